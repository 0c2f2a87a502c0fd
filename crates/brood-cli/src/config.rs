//! Configuration file management for brood.
//!
//! Provides a TOML-based config file at `~/.config/brood/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use brood_core::subagent::supervisor::{API_KEY_ENV, BASE_URL_ENV};
use brood_core::subagent::{
    Credentials, ParentContext, PermissionMode, PermissionState, SubagentTypeConfig,
    SubagentTypeRegistry,
};

/// Id of the agent running this process, used as the subagents' parent.
pub const AGENT_ID_ENV: &str = "BROOD_AGENT_ID";
/// Model handle of the agent running this process.
pub const MODEL_ENV: &str = "BROOD_MODEL";

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub api: ApiSection,
    pub parent: ParentSection,
    pub permissions: PermissionsSection,
    pub models: ModelsSection,
    /// Extra subagent types, merged over the built-ins by name.
    pub subagent_types: BTreeMap<String, SubagentTypeConfig>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParentSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionsSection {
    pub mode: PermissionMode,
    pub allow: Vec<String>,
    pub deny: Vec<String>,
    pub session_allow: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsSection {
    /// Model handles this account may use.
    pub available: Vec<String>,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the brood config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/brood` or `~/.config/brood`,
/// never the platform-specific `dirs::config_dir()`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("brood");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("brood")
}

/// Return the path to the brood config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load the config file at `path`. A missing file is `Ok(None)`.
pub fn load_config_from(path: &Path) -> Result<Option<ConfigFile>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e)
                .with_context(|| format!("failed to read config file at {}", path.display()));
        }
    };
    let config: ConfigFile = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))?;
    Ok(Some(config))
}

/// Load the config file from [`config_path`].
pub fn load_config() -> Result<Option<ConfigFile>> {
    load_config_from(&config_path())
}

/// Serialize and write the config file to `path`, creating parent dirs as
/// needed. Sets file permissions to 0600 on Unix.
pub fn save_config_to(config: &ConfigFile, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create config directory {}", dir.display()))?;
    }

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    // The file may hold an API key.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

/// Write the config file to [`config_path`].
pub fn save_config(config: &ConfigFile) -> Result<()> {
    save_config_to(config, &config_path())
}

/// Contents written by `brood init`.
pub fn starter_config() -> ConfigFile {
    let mut config = ConfigFile::default();
    config.permissions.allow = vec!["Read".into(), "Glob".into(), "Grep".into()];
    config
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Values given on the command line.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub agent_id: Option<String>,
    pub model: Option<String>,
    pub permission_mode: Option<PermissionMode>,
}

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct BroodConfig {
    pub credentials: Credentials,
    pub parent: ParentContext,
    pub permissions: PermissionState,
    pub available_models: Vec<String>,
    pub registry: SubagentTypeRegistry,
}

impl BroodConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// - API key: `--api-key` > `BROOD_API_KEY` > `api.key` > none
    /// - Base URL: `--base-url` > `BROOD_BASE_URL` > `api.base_url` > none (hosted)
    /// - Parent agent: `--agent-id` > `BROOD_AGENT_ID` > `parent.agent_id` > none
    /// - Parent model: `--parent-model` > `BROOD_MODEL` > `parent.model` > none
    /// - Permission mode: `--permission-mode` > `permissions.mode` > `default`
    pub fn resolve(cli: &CliOverrides) -> Result<Self> {
        let file = load_config()?.unwrap_or_default();
        Ok(Self::from_sources(cli, file, |key| std::env::var(key).ok()))
    }

    fn from_sources(
        cli: &CliOverrides,
        file: ConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let pick = |flag: &Option<String>, var: &str, from_file: Option<String>| {
            flag.clone()
                .or_else(|| env(var).filter(|v| !v.trim().is_empty()))
                .or(from_file)
        };

        let credentials = Credentials {
            api_key: pick(&cli.api_key, API_KEY_ENV, file.api.key),
            base_url: pick(&cli.base_url, BASE_URL_ENV, file.api.base_url),
        };
        let parent = ParentContext {
            agent_id: pick(&cli.agent_id, AGENT_ID_ENV, file.parent.agent_id),
            model: pick(&cli.model, MODEL_ENV, file.parent.model),
        };
        let permissions = PermissionState {
            mode: cli.permission_mode.unwrap_or(file.permissions.mode),
            allow: file.permissions.allow,
            deny: file.permissions.deny,
            session_allow: file.permissions.session_allow,
        };

        let mut registry = SubagentTypeRegistry::with_builtins();
        for (name, config) in file.subagent_types {
            registry.register_as(name, config);
        }

        Self {
            credentials,
            parent,
            permissions,
            available_models: file.models.available,
            registry,
        }
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use brood_core::subagent::ToolAllowance;

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        crate::test_util::lock_env()
    }

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn file_with_values() -> ConfigFile {
        toml::from_str(
            r#"
            [api]
            key = "file-key"
            base_url = "http://file:8283"

            [parent]
            agent_id = "agent-file"
            model = "anthropic/file-model"

            [permissions]
            mode = "acceptEdits"
            allow = ["Read"]
            deny = ["WebFetch"]

            [models]
            available = ["anthropic/claude-haiku-4-5"]

            [subagent_types.reviewer]
            description = "Reviews diffs"
            allowed_tools = ["Read", "Bash(git diff:*)"]
            "#,
        )
        .unwrap()
    }

    #[test]
    fn cli_flag_overrides_everything() {
        let cli = CliOverrides {
            api_key: Some("cli-key".into()),
            model: Some("openai/cli-model".into()),
            permission_mode: Some(PermissionMode::Plan),
            ..CliOverrides::default()
        };
        let env = env_from(&[(API_KEY_ENV, "env-key"), (MODEL_ENV, "openai/env-model")]);
        let config = BroodConfig::from_sources(&cli, file_with_values(), env);

        assert_eq!(config.credentials.api_key.as_deref(), Some("cli-key"));
        assert_eq!(config.parent.model.as_deref(), Some("openai/cli-model"));
        assert_eq!(config.permissions.mode, PermissionMode::Plan);
    }

    #[test]
    fn env_var_overrides_config_file() {
        let env = env_from(&[(BASE_URL_ENV, "http://env:8283"), (AGENT_ID_ENV, "agent-env")]);
        let config = BroodConfig::from_sources(&CliOverrides::default(), file_with_values(), env);

        assert_eq!(config.credentials.base_url.as_deref(), Some("http://env:8283"));
        assert_eq!(config.parent.agent_id.as_deref(), Some("agent-env"));
        assert_eq!(config.credentials.api_key.as_deref(), Some("file-key"));
        assert_eq!(config.permissions.mode, PermissionMode::AcceptEdits);
        assert_eq!(config.permissions.deny, vec!["WebFetch"]);
        assert_eq!(config.available_models, vec!["anthropic/claude-haiku-4-5"]);
    }

    #[test]
    fn blank_env_var_is_ignored() {
        let env = env_from(&[(API_KEY_ENV, "  ")]);
        let config = BroodConfig::from_sources(&CliOverrides::default(), file_with_values(), env);
        assert_eq!(config.credentials.api_key.as_deref(), Some("file-key"));
    }

    #[test]
    fn defaults_when_nothing_set() {
        let config =
            BroodConfig::from_sources(&CliOverrides::default(), ConfigFile::default(), env_from(&[]));
        assert!(config.credentials.api_key.is_none());
        assert!(config.credentials.base_url.is_none());
        assert!(config.parent.model.is_none());
        assert_eq!(config.permissions.mode, PermissionMode::Default);
        assert_eq!(config.registry.list(), vec!["explore", "general-purpose", "plan"]);
    }

    #[test]
    fn file_types_merge_over_builtins() {
        let config =
            BroodConfig::from_sources(&CliOverrides::default(), file_with_values(), env_from(&[]));
        let reviewer = config.registry.get("reviewer").unwrap();
        assert_eq!(reviewer.name, "reviewer");
        assert_eq!(
            reviewer.allowed_tools,
            ToolAllowance::Only(vec!["Read".into(), "Bash(git diff:*)".into()])
        );
        assert!(config.registry.get("explore").is_some());
    }

    #[test]
    fn missing_file_loads_as_none() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(load_config_from(&tmp.path().join("absent.toml")).unwrap().is_none());
    }

    #[test]
    fn invalid_file_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[permissions]\nmode = \"yolo\"\n").unwrap();
        let err = load_config_from(&path).unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse config file"));
    }

    #[test]
    fn save_and_load_config_roundtrip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("brood").join("config.toml");

        let mut original = starter_config();
        original.api.key = Some("sk-roundtrip".into());
        original
            .subagent_types
            .insert("docs".into(), SubagentTypeConfig::new("docs"));
        save_config_to(&original, &path).unwrap();

        let loaded = load_config_from(&path).unwrap().unwrap();
        assert_eq!(loaded.api.key.as_deref(), Some("sk-roundtrip"));
        assert_eq!(loaded.permissions.allow, original.permissions.allow);
        assert!(loaded.subagent_types.contains_key("docs"));
    }

    #[cfg(unix)]
    #[test]
    fn save_config_sets_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        save_config_to(&ConfigFile::default(), &path).unwrap();

        let meta = std::fs::metadata(&path).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }

    #[test]
    fn config_path_follows_xdg_config_home() {
        let _lock = lock_env();
        let tmp = tempfile::TempDir::new().unwrap();
        let orig_xdg = std::env::var("XDG_CONFIG_HOME").ok();

        // SAFETY: serialized by the env mutex, test-only code.
        unsafe { std::env::set_var("XDG_CONFIG_HOME", tmp.path()) };
        let path = config_path();

        match orig_xdg {
            Some(x) => unsafe { std::env::set_var("XDG_CONFIG_HOME", x) },
            None => unsafe { std::env::remove_var("XDG_CONFIG_HOME") },
        }

        assert_eq!(path, tmp.path().join("brood").join("config.toml"));
    }
}
