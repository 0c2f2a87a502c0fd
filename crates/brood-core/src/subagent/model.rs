//! Model selection for freshly created subagents.
//!
//! Precedence: explicit override, then the type's recommendation adjusted
//! for bring-your-own-key (BYOK) providers, then the parent's own handle.
//! A handle looks like `<provider>/<model>`; BYOK providers carry their own
//! prefix which maps onto a base provider family (see [`BYOK_PROVIDERS`]).

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// BYOK prefix -> base provider family.
pub const BYOK_PROVIDERS: [(&str, &str); 8] = [
    ("bring-your-own-anthropic", "anthropic"),
    ("bring-your-own-openai", "openai"),
    ("bring-your-own-gemini", "google_ai"),
    ("bring-your-own-vertex", "google_vertex"),
    ("bring-your-own-bedrock", "bedrock"),
    ("bring-your-own-openrouter", "openrouter"),
    ("bring-your-own-zai", "zai"),
    ("bring-your-own-minimax", "minimax"),
];

/// Source of enabled model handles.
#[async_trait]
pub trait ModelCatalog: Send + Sync {
    /// Every handle the current account may use right now.
    async fn available_models(&self) -> Result<HashSet<String>>;
}

/// A fixed availability set, e.g. from the config file.
#[derive(Debug, Clone, Default)]
pub struct StaticModelCatalog {
    models: HashSet<String>,
}

impl StaticModelCatalog {
    pub fn new<I, S>(models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            models: models.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl ModelCatalog for StaticModelCatalog {
    async fn available_models(&self) -> Result<HashSet<String>> {
        Ok(self.models.clone())
    }
}

/// Inputs to [`resolve_subagent_model`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelResolutionInput<'a> {
    pub explicit: Option<&'a str>,
    /// The type's recommendation; `None` means inherit.
    pub recommended: Option<&'a str>,
    pub parent: Option<&'a str>,
}

/// Provider prefix of a handle: everything before the first `/`.
pub fn provider_prefix(handle: &str) -> Option<&str> {
    handle
        .split_once('/')
        .map(|(prefix, _)| prefix)
        .filter(|p| !p.is_empty())
}

/// Base provider family for a BYOK prefix, if it is one.
pub fn byok_base_provider(prefix: &str) -> Option<&'static str> {
    BYOK_PROVIDERS
        .iter()
        .find(|(byok, _)| *byok == prefix)
        .map(|(_, base)| *base)
}

/// Availability set fetched on first use and reused for the rest of one
/// resolution call.
struct LazyAvailability<'a> {
    catalog: &'a dyn ModelCatalog,
    models: OnceCell<HashSet<String>>,
}

impl<'a> LazyAvailability<'a> {
    fn new(catalog: &'a dyn ModelCatalog) -> Self {
        Self {
            catalog,
            models: OnceCell::new(),
        }
    }

    async fn contains(&self, handle: &str) -> bool {
        let models = self
            .models
            .get_or_init(|| async {
                match self.catalog.available_models().await {
                    Ok(models) => models,
                    Err(e) => {
                        warn!(error = %e, "model availability lookup failed, treating as empty");
                        HashSet::new()
                    }
                }
            })
            .await;
        models.contains(handle)
    }
}

/// Pick the model handle for a fresh subagent.
///
/// The catalog is queried at most once per call, and only when an
/// availability check is actually needed.
pub async fn resolve_subagent_model(
    input: ModelResolutionInput<'_>,
    catalog: &dyn ModelCatalog,
) -> Option<String> {
    if let Some(explicit) = input.explicit {
        return Some(explicit.to_string());
    }

    let available = LazyAvailability::new(catalog);
    let recommended = input.recommended;

    let Some(parent) = input.parent else {
        let rec = recommended?;
        if !available.contains(rec).await {
            debug!(model = rec, "recommended model not available, using it anyway");
        }
        return Some(rec.to_string());
    };

    let parent_byok = provider_prefix(parent)
        .and_then(|prefix| byok_base_provider(prefix).map(|base| (prefix, base)));

    let Some(rec) = recommended else {
        return Some(parent.to_string());
    };

    match parent_byok {
        Some((byok_prefix, base_provider)) => {
            let rec_prefix = provider_prefix(rec);
            if rec_prefix == Some(byok_prefix) && available.contains(rec).await {
                return Some(rec.to_string());
            }
            if rec_prefix == Some(base_provider) {
                let (_, model_name) = rec.split_once('/')?;
                let swapped = format!("{byok_prefix}/{model_name}");
                if available.contains(&swapped).await {
                    debug!(from = rec, to = %swapped, "using BYOK variant of recommended model");
                    return Some(swapped);
                }
            }
            Some(parent.to_string())
        }
        None => {
            if available.contains(rec).await {
                Some(rec.to_string())
            } else {
                Some(parent.to_string())
            }
        }
    }
}
