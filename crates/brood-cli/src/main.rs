mod config;
mod run_cmd;

use clap::{Parser, Subcommand};

use brood_core::subagent::registry::GENERAL_PURPOSE;
use brood_core::subagent::{PermissionMode, SubagentRequest};

use config::{BroodConfig, CliOverrides};

#[derive(Parser)]
#[command(name = "brood", version, about = "Launch and supervise brood subagents")]
struct Cli {
    /// API key forwarded to subagents (overrides BROOD_API_KEY)
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Backend base URL (overrides BROOD_BASE_URL)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Id of the launching agent (overrides BROOD_AGENT_ID)
    #[arg(long, global = true)]
    agent_id: Option<String>,

    /// Model the launching agent runs on (overrides BROOD_MODEL)
    #[arg(long, global = true)]
    parent_model: Option<String>,

    /// Permission mode passed down to subagents
    #[arg(long, global = true)]
    permission_mode: Option<PermissionMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter config file
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// List available subagent types
    Types,
    /// Launch one subagent and print its result as JSON
    Run {
        /// Subagent type
        #[arg(long = "type", short = 't', default_value = GENERAL_PURPOSE)]
        subagent_type: String,
        /// Task for the subagent
        #[arg(long, short = 'p')]
        prompt: String,
        /// Explicit model handle, bypassing model resolution
        #[arg(long)]
        model: Option<String>,
        /// Redeploy an existing agent in a new conversation
        #[arg(long)]
        agent: Option<String>,
        /// Continue an existing conversation
        #[arg(long)]
        conv: Option<String>,
        /// Maximum turns for the subagent
        #[arg(long)]
        max_turns: Option<u32>,
    },
    /// Launch one subagent per prompt in parallel and print a JSON array
    Fanout {
        /// Subagent type for every prompt
        #[arg(long = "type", short = 't', default_value = GENERAL_PURPOSE)]
        subagent_type: String,
        /// One task per occurrence
        #[arg(long = "prompt", short = 'p', required = true)]
        prompts: Vec<String>,
        /// Maximum number of concurrent subagents
        #[arg(long, default_value_t = 4)]
        max_agents: usize,
    },
}

impl Cli {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            api_key: self.api_key.clone(),
            base_url: self.base_url.clone(),
            agent_id: self.agent_id.clone(),
            model: self.parent_model.clone(),
            permission_mode: self.permission_mode,
        }
    }
}

/// Execute the `brood init` command: write config file.
fn cmd_init(force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::starter_config();
    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  permissions.allow = {}", cfg.permissions.allow.join(", "));
    println!();
    println!("Next: set api.key (or BROOD_API_KEY) and run `brood types`.");

    Ok(())
}

/// Execute the `brood types` command: list subagent types.
fn cmd_types(resolved: &BroodConfig) {
    for config in resolved.registry.iter() {
        let model = config.recommended_model.handle().unwrap_or("inherit");
        println!("{:<20} {:<32} {}", config.name, model, config.description);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries JSON results.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let overrides = cli.overrides();

    let succeeded = match cli.command {
        Commands::Init { force } => {
            cmd_init(force)?;
            true
        }
        Commands::Types => {
            cmd_types(&BroodConfig::resolve(&overrides)?);
            true
        }
        Commands::Run {
            subagent_type,
            prompt,
            model,
            agent,
            conv,
            max_turns,
        } => {
            let supervisor = run_cmd::build_supervisor(BroodConfig::resolve(&overrides)?);
            let request = SubagentRequest {
                model_override: model,
                existing_agent_id: agent,
                existing_conversation_id: conv,
                max_turns,
                ..SubagentRequest::new(subagent_type, prompt)
            };
            run_cmd::run_one(&supervisor, request).await?
        }
        Commands::Fanout {
            subagent_type,
            prompts,
            max_agents,
        } => {
            let supervisor = run_cmd::build_supervisor(BroodConfig::resolve(&overrides)?);
            let requests = prompts
                .into_iter()
                .map(|prompt| SubagentRequest::new(subagent_type.clone(), prompt))
                .collect();
            run_cmd::run_fanout(&supervisor, requests, max_agents).await?
        }
    };

    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}
