//! Child argument construction.
//!
//! Turns one logical request into the flat, ordered argument list passed to
//! the child. Nothing downstream re-quotes these for a shell.

use super::types::{InitBlocks, PermissionMode, PermissionState, SubagentTypeConfig};

/// Output format the engine's stream parser understands.
pub const STREAM_OUTPUT_FORMAT: &str = "stream-json";

/// Inputs for [`build_subagent_args`].
#[derive(Debug, Clone, Copy)]
pub struct ArgsInput<'a> {
    pub type_config: &'a SubagentTypeConfig,
    /// Resolved model; ignored on the redeploy path.
    pub model: Option<&'a str>,
    pub prompt: &'a str,
    pub existing_agent_id: Option<&'a str>,
    pub existing_conversation_id: Option<&'a str>,
    pub max_turns: Option<u32>,
    pub permissions: &'a PermissionState,
}

impl ArgsInput<'_> {
    fn is_redeploy(&self) -> bool {
        self.existing_agent_id.is_some() || self.existing_conversation_id.is_some()
    }
}

/// Build the child's argument list.
///
/// Redeploying an existing identity never passes `--system` or `--model`:
/// that identity already owns both. Redeploying by agent id alone always
/// starts a new conversation so parallel calls against one agent do not
/// race on a shared conversation.
pub fn build_subagent_args(input: &ArgsInput<'_>) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    let redeploy = input.is_redeploy();
    let config = input.type_config;

    // Identity.
    if let Some(conv) = input.existing_conversation_id {
        args.extend(["--conv".to_string(), conv.to_string()]);
    } else if let Some(agent) = input.existing_agent_id {
        args.extend(["--agent".to_string(), agent.to_string(), "--new".to_string()]);
    } else {
        args.extend([
            "--new-agent".to_string(),
            "--system".to_string(),
            config.name.clone(),
        ]);
        if let Some(model) = input.model {
            args.extend(["--model".to_string(), model.to_string()]);
        }
    }

    args.extend(["-p".to_string(), input.prompt.to_string()]);
    args.extend([
        "--output-format".to_string(),
        STREAM_OUTPUT_FORMAT.to_string(),
    ]);

    let mode = config.permission_mode.unwrap_or(input.permissions.mode);
    if mode != PermissionMode::Default {
        args.extend(["--permission-mode".to_string(), mode.as_str().to_string()]);
    }

    let allowed = merge_allowed_tools(config, input.permissions);
    if !allowed.is_empty() {
        args.extend(["--allowedTools".to_string(), allowed.join(",")]);
    }

    if !input.permissions.deny.is_empty() {
        args.extend([
            "--disallowedTools".to_string(),
            input.permissions.deny.join(","),
        ]);
    }

    if !redeploy {
        match &config.init_blocks {
            InitBlocks::All => {}
            InitBlocks::None => args.extend(["--init-blocks".to_string(), "none".to_string()]),
            InitBlocks::Only(blocks) => {
                args.extend(["--init-blocks".to_string(), blocks.join(",")]);
            }
        }
    }

    if let Some(tools) = config.allowed_tools.restricted() {
        args.extend(["--tools".to_string(), tools.join(",")]);
    }

    if let Some(turns) = input.max_turns.filter(|t| *t > 0) {
        args.extend(["--max-turns".to_string(), turns.to_string()]);
    }

    args
}

/// Parent allow-list, then session allow rules, then the type's own list,
/// deduplicated in first-seen order.
fn merge_allowed_tools(config: &SubagentTypeConfig, permissions: &PermissionState) -> Vec<String> {
    let type_tools = config.allowed_tools.restricted().unwrap_or(&[]);
    let mut merged: Vec<String> = Vec::new();
    for tool in permissions
        .allow
        .iter()
        .chain(&permissions.session_allow)
        .chain(type_tools)
    {
        if !tool.is_empty() && !merged.contains(tool) {
            merged.push(tool.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subagent::types::ToolAllowance;

    fn explore() -> SubagentTypeConfig {
        SubagentTypeConfig {
            name: "explore".into(),
            allowed_tools: ToolAllowance::Only(vec!["Read".into(), "Grep".into()]),
            init_blocks: InitBlocks::None,
            ..SubagentTypeConfig::default()
        }
    }

    fn input<'a>(config: &'a SubagentTypeConfig, perms: &'a PermissionState) -> ArgsInput<'a> {
        ArgsInput {
            type_config: config,
            model: Some("anthropic/claude-haiku"),
            prompt: "find the bug",
            existing_agent_id: None,
            existing_conversation_id: None,
            max_turns: None,
            permissions: perms,
        }
    }

    fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn fresh_path_full_argument_list() {
        let config = explore();
        let perms = PermissionState::default();
        let args = build_subagent_args(&input(&config, &perms));
        assert_eq!(
            args,
            vec![
                "--new-agent",
                "--system",
                "explore",
                "--model",
                "anthropic/claude-haiku",
                "-p",
                "find the bug",
                "--output-format",
                "stream-json",
                "--allowedTools",
                "Read,Grep",
                "--init-blocks",
                "none",
                "--tools",
                "Read,Grep",
            ]
        );
    }

    #[test]
    fn fresh_path_without_model_omits_flag() {
        let config = SubagentTypeConfig::new("general-purpose");
        let perms = PermissionState::default();
        let mut i = input(&config, &perms);
        i.model = None;
        let args = build_subagent_args(&i);
        assert!(!args.contains(&"--model".to_string()));
        assert!(!args.contains(&"--tools".to_string()));
        assert!(!args.contains(&"--init-blocks".to_string()));
        assert!(!args.contains(&"--allowedTools".to_string()));
    }

    #[test]
    fn redeploy_by_conversation_passes_only_conv() {
        let config = explore();
        let perms = PermissionState::default();
        let mut i = input(&config, &perms);
        i.existing_conversation_id = Some("conv-9");
        i.existing_agent_id = Some("agent-1");
        let args = build_subagent_args(&i);

        assert_eq!(&args[..2], &["--conv", "conv-9"]);
        assert!(!args.contains(&"--agent".to_string()));
        assert!(!args.contains(&"--system".to_string()));
        assert!(!args.contains(&"--model".to_string()));
        assert!(!args.contains(&"--init-blocks".to_string()));
        // Tool restriction still applies on redeploy.
        assert_eq!(flag_value(&args, "--tools"), Some("Read,Grep"));
    }

    #[test]
    fn redeploy_by_agent_starts_new_conversation() {
        let config = explore();
        let perms = PermissionState::default();
        let mut i = input(&config, &perms);
        i.existing_agent_id = Some("agent-1");
        let args = build_subagent_args(&i);
        assert_eq!(&args[..3], &["--agent", "agent-1", "--new"]);
        assert!(!args.contains(&"--model".to_string()));
    }

    #[test]
    fn permission_mode_override_and_default_omission() {
        let mut config = explore();
        let mut perms = PermissionState {
            mode: PermissionMode::AcceptEdits,
            ..PermissionState::default()
        };
        let args = build_subagent_args(&input(&config, &perms));
        assert_eq!(flag_value(&args, "--permission-mode"), Some("acceptEdits"));

        config.permission_mode = Some(PermissionMode::Plan);
        let args = build_subagent_args(&input(&config, &perms));
        assert_eq!(flag_value(&args, "--permission-mode"), Some("plan"));

        config.permission_mode = None;
        perms.mode = PermissionMode::Default;
        let args = build_subagent_args(&input(&config, &perms));
        assert!(!args.contains(&"--permission-mode".to_string()));
    }

    #[test]
    fn allowed_tools_union_in_first_seen_order() {
        let config = explore();
        let perms = PermissionState {
            allow: vec!["Bash(git:*)".into(), "Read".into()],
            session_allow: vec!["Edit".into(), "Bash(git:*)".into()],
            deny: vec!["WebFetch".into(), "Write".into()],
            ..PermissionState::default()
        };
        let args = build_subagent_args(&input(&config, &perms));
        assert_eq!(
            flag_value(&args, "--allowedTools"),
            Some("Bash(git:*),Read,Edit,Grep")
        );
        assert_eq!(flag_value(&args, "--disallowedTools"), Some("WebFetch,Write"));
    }

    #[test]
    fn init_blocks_explicit_list() {
        let mut config = explore();
        config.init_blocks = InitBlocks::Only(vec!["persona".into(), "project".into()]);
        let perms = PermissionState::default();
        let args = build_subagent_args(&input(&config, &perms));
        assert_eq!(flag_value(&args, "--init-blocks"), Some("persona,project"));
    }

    #[test]
    fn max_turns_only_when_positive() {
        let config = explore();
        let perms = PermissionState::default();
        let mut i = input(&config, &perms);
        i.max_turns = Some(0);
        assert!(!build_subagent_args(&i).contains(&"--max-turns".to_string()));
        i.max_turns = Some(12);
        assert_eq!(flag_value(&build_subagent_args(&i), "--max-turns"), Some("12"));
    }
}
