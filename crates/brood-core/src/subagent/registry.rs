//! Subagent type registry -- named [`SubagentTypeConfig`] policies.
//!
//! The supervisor looks types up by the name a request carries (e.g.
//! `subagent_type = "explore"`). The registry is built once and shared
//! read-only between concurrent launches.

use std::collections::BTreeMap;

use super::types::{InitBlocks, PermissionMode, RecommendedModel, SubagentTypeConfig, ToolAllowance};

/// Name of the catch-all built-in type.
pub const GENERAL_PURPOSE: &str = "general-purpose";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Unknown subagent type: {0}")]
    UnknownType(String),
}

/// A collection of [`SubagentTypeConfig`]s, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct SubagentTypeRegistry {
    types: BTreeMap<String, SubagentTypeConfig>,
}

impl SubagentTypeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in types.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for config in builtin_types() {
            registry.register(config);
        }
        registry
    }

    /// Register a type under its `name`, replacing and returning any
    /// previous entry with that name.
    pub fn register(&mut self, config: SubagentTypeConfig) -> Option<SubagentTypeConfig> {
        self.types.insert(config.name.clone(), config)
    }

    /// Register a type under `name`, overriding whatever name it carried.
    pub fn register_as(
        &mut self,
        name: impl Into<String>,
        mut config: SubagentTypeConfig,
    ) -> Option<SubagentTypeConfig> {
        config.name = name.into();
        self.register(config)
    }

    pub fn get(&self, name: &str) -> Option<&SubagentTypeConfig> {
        self.types.get(name)
    }

    /// Like [`get`](Self::get), but an unknown name is an error.
    pub fn require(&self, name: &str) -> Result<&SubagentTypeConfig, RegistryError> {
        self.get(name)
            .ok_or_else(|| RegistryError::UnknownType(name.to_string()))
    }

    /// Registered type names, sorted.
    pub fn list(&self) -> Vec<&str> {
        self.types.keys().map(String::as_str).collect()
    }

    /// Registered types, sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = &SubagentTypeConfig> {
        self.types.values()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

fn read_only_tools() -> ToolAllowance {
    ToolAllowance::Only(vec!["Read".into(), "Glob".into(), "Grep".into()])
}

fn builtin_types() -> Vec<SubagentTypeConfig> {
    vec![
        SubagentTypeConfig {
            name: GENERAL_PURPOSE.into(),
            description: "Multi-step research and implementation tasks with the parent's full toolset"
                .into(),
            recommended_model: RecommendedModel::Inherit,
            permission_mode: None,
            allowed_tools: ToolAllowance::All,
            init_blocks: InitBlocks::All,
        },
        SubagentTypeConfig {
            name: "explore".into(),
            description: "Fast read-only codebase search".into(),
            recommended_model: RecommendedModel::Handle("anthropic/claude-haiku-4-5".into()),
            permission_mode: None,
            allowed_tools: read_only_tools(),
            init_blocks: InitBlocks::None,
        },
        SubagentTypeConfig {
            name: "plan".into(),
            description: "Read-only investigation that ends in an implementation plan".into(),
            recommended_model: RecommendedModel::Inherit,
            permission_mode: Some(PermissionMode::Plan),
            allowed_tools: read_only_tools(),
            init_blocks: InitBlocks::Only(vec!["persona".into(), "human".into()]),
        },
    ]
}
