//! Launcher resolution: how to re-invoke the harness as a child process.
//!
//! [`resolve_launcher`] is a pure function of [`LauncherInputs`]; only
//! [`LauncherInputs::from_env`] touches the process environment.

use std::path::PathBuf;

use tracing::warn;

/// Explicit override for the child binary.
pub const BIN_OVERRIDE_ENV: &str = "BROOD_BIN";
/// JSON array of arguments prepended to every child invocation.
pub const BIN_ARGS_ENV: &str = "BROOD_BIN_ARGS_JSON";
/// Binary name used when nothing else applies.
pub const DEFAULT_BINARY: &str = "brood";

/// Extensions of scripts run through an interpreter (dev checkouts).
const INTERPRETED_SCRIPT_EXTENSIONS: &[&str] = &[".ts", ".mts", ".py"];
/// Extensions of packaged scripts that are directly executable on unix.
const PACKAGED_SCRIPT_EXTENSIONS: &[&str] = &[".js", ".mjs", ".cjs"];

/// Host platform, as far as launching is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    Unix,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) { Self::Windows } else { Self::Unix }
    }
}

/// Everything the resolver looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherInputs {
    pub override_bin: Option<String>,
    pub override_args_json: Option<String>,
    /// The current process's own argv.
    pub argv: Vec<String>,
    /// The current process's executable (the interpreter when running a script).
    pub current_exe: Option<PathBuf>,
    pub platform: Platform,
}

impl LauncherInputs {
    /// Snapshot the real process state.
    pub fn from_env() -> Self {
        Self {
            override_bin: std::env::var(BIN_OVERRIDE_ENV).ok(),
            override_args_json: std::env::var(BIN_ARGS_ENV).ok(),
            argv: std::env::args().collect(),
            current_exe: std::env::current_exe().ok(),
            platform: Platform::current(),
        }
    }
}

/// Resolved command token plus arguments that precede per-call arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub command: String,
    pub base_args: Vec<String>,
}

impl LaunchCommand {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            base_args: Vec::new(),
        }
    }

    /// Combine with per-call arguments and environment overrides.
    pub fn to_spec(&self, args: Vec<String>, env: Vec<(String, String)>) -> LaunchSpec {
        let mut full_args = self.base_args.clone();
        full_args.extend(args);
        LaunchSpec {
            command: self.command.clone(),
            args: full_args,
            env,
        }
    }
}

/// Fully resolved invocation for one child process. Never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub command: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

/// Decide which executable and base arguments re-invoke the harness.
///
/// First match wins:
/// 1. the explicit override (plus its JSON pre-arguments),
/// 2. an interpreted script in `argv[1]`: same interpreter, same script,
/// 3. a packaged script in `argv[1]`: wrapped by the runtime on Windows,
///    invoked directly elsewhere,
/// 4. the globally installed [`DEFAULT_BINARY`].
pub fn resolve_launcher(inputs: &LauncherInputs) -> LaunchCommand {
    if let Some(command) = inputs.override_bin.as_deref().and_then(override_token) {
        return LaunchCommand {
            command,
            base_args: parse_pre_args(inputs.override_args_json.as_deref()),
        };
    }

    let script = inputs.argv.get(1).map(String::as_str);
    let exe = inputs
        .current_exe
        .as_ref()
        .map(|p| p.to_string_lossy().into_owned());

    if let (Some(script), Some(exe)) = (script, exe.as_ref()) {
        if has_extension(script, INTERPRETED_SCRIPT_EXTENSIONS) {
            return LaunchCommand {
                command: exe.clone(),
                base_args: vec![script.to_string()],
            };
        }
    }

    if let Some(script) = script.filter(|s| has_extension(s, PACKAGED_SCRIPT_EXTENSIONS)) {
        return match (inputs.platform, exe) {
            (Platform::Windows, Some(exe)) => LaunchCommand {
                command: exe,
                base_args: vec![script.to_string()],
            },
            _ => LaunchCommand::new(script),
        };
    }

    LaunchCommand::new(DEFAULT_BINARY)
}

/// The override as a single command token: trimmed, one layer of matching
/// quotes removed, never split on whitespace. Blank means "no override".
fn override_token(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let unquoted = ['"', '\'']
        .iter()
        .find_map(|q| {
            trimmed
                .strip_prefix(*q)
                .and_then(|rest| rest.strip_suffix(*q))
        })
        .unwrap_or(trimmed);
    if unquoted.is_empty() {
        None
    } else {
        Some(unquoted.to_string())
    }
}

fn parse_pre_args(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Vec::new();
    };
    match serde_json::from_str::<Vec<String>>(raw) {
        Ok(args) => args,
        Err(e) => {
            warn!(env = BIN_ARGS_ENV, error = %e, "ignoring pre-arguments that are not a JSON string array");
            Vec::new()
        }
    }
}

fn has_extension(path: &str, extensions: &[&str]) -> bool {
    let lower = path.to_ascii_lowercase();
    extensions.iter().any(|ext| lower.ends_with(ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(argv: &[&str]) -> LauncherInputs {
        LauncherInputs {
            override_bin: None,
            override_args_json: None,
            argv: argv.iter().map(|s| s.to_string()).collect(),
            current_exe: Some(PathBuf::from("/usr/local/bin/node")),
            platform: Platform::Unix,
        }
    }

    #[test]
    fn override_wins_with_pre_args() {
        let mut i = inputs(&["node", "/opt/brood/cli.js"]);
        i.override_bin = Some("/dev/brood/run.sh".into());
        i.override_args_json = Some(r#"["--dev", "--trace"]"#.into());

        let cmd = resolve_launcher(&i);
        assert_eq!(cmd.command, "/dev/brood/run.sh");
        assert_eq!(cmd.base_args, vec!["--dev", "--trace"]);
    }

    #[test]
    fn override_with_spaces_is_one_token() {
        let mut i = inputs(&["brood"]);
        i.override_bin = Some(r#""C:\Program Files\brood\brood.exe""#.into());
        let cmd = resolve_launcher(&i);
        assert_eq!(cmd.command, r"C:\Program Files\brood\brood.exe");
        assert!(cmd.base_args.is_empty());

        i.override_bin = Some("/Users/me/My Tools/brood".into());
        assert_eq!(resolve_launcher(&i).command, "/Users/me/My Tools/brood");
    }

    #[test]
    fn blank_override_is_ignored() {
        let mut i = inputs(&["brood"]);
        i.override_bin = Some("   ".into());
        assert_eq!(resolve_launcher(&i).command, DEFAULT_BINARY);
    }

    #[test]
    fn malformed_pre_args_are_dropped() {
        let mut i = inputs(&["brood"]);
        i.override_bin = Some("brood-dev".into());
        i.override_args_json = Some("--dev --trace".into());
        let cmd = resolve_launcher(&i);
        assert_eq!(cmd.command, "brood-dev");
        assert!(cmd.base_args.is_empty());

        i.override_args_json = Some("[1, 2]".into());
        assert!(resolve_launcher(&i).base_args.is_empty());
    }

    #[test]
    fn interpreted_script_reuses_interpreter() {
        let mut i = inputs(&["bun", "/src/brood/index.ts", "run"]);
        i.current_exe = Some(PathBuf::from("/home/me/.bun/bin/bun"));
        let cmd = resolve_launcher(&i);
        assert_eq!(cmd.command, "/home/me/.bun/bin/bun");
        assert_eq!(cmd.base_args, vec!["/src/brood/index.ts"]);
    }

    #[test]
    fn packaged_script_is_direct_on_unix() {
        let cmd = resolve_launcher(&inputs(&["node", "/usr/lib/brood/cli.js"]));
        assert_eq!(cmd, LaunchCommand::new("/usr/lib/brood/cli.js"));
    }

    #[test]
    fn packaged_script_is_wrapped_on_windows() {
        let mut i = inputs(&["node.exe", r"C:\brood\cli.mjs"]);
        i.platform = Platform::Windows;
        i.current_exe = Some(PathBuf::from(r"C:\node\node.exe"));
        let cmd = resolve_launcher(&i);
        assert_eq!(cmd.command, r"C:\node\node.exe");
        assert_eq!(cmd.base_args, vec![r"C:\brood\cli.mjs"]);
    }

    #[test]
    fn falls_back_to_global_binary() {
        assert_eq!(
            resolve_launcher(&inputs(&["/usr/local/bin/brood", "run"])),
            LaunchCommand::new(DEFAULT_BINARY)
        );
        assert_eq!(resolve_launcher(&inputs(&[])), LaunchCommand::new(DEFAULT_BINARY));
    }

    #[test]
    fn launch_spec_prepends_base_args() {
        let cmd = LaunchCommand {
            command: "bun".into(),
            base_args: vec!["index.ts".into()],
        };
        let spec = cmd.to_spec(
            vec!["-p".into(), "hi".into()],
            vec![("BROOD_AGENT_ROLE".into(), "subagent".into())],
        );
        assert_eq!(spec.args, vec!["index.ts", "-p", "hi"]);
        assert_eq!(spec.env.len(), 1);
    }
}
