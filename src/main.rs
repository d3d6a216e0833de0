//! asgctl - converge AWS Auto Scaling Groups on a JSON spec
//!
//! ## Usage
//!
//! ```bash
//! # Create the group, or update it in place if it already exists
//! asgctl apply --spec web.json
//!
//! # Drain and delete the group named in the spec
//! asgctl delete --spec web.json
//!
//! # Read the live group back in the declarative shape
//! asgctl status --spec web.json --ignore-tag-key scratch
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use asgctl::aws::AwsAsgClient;
use asgctl::{GroupManager, GroupSpec};

/// Converge AWS Auto Scaling Groups on a declarative spec
#[derive(Parser)]
#[command(name = "asgctl")]
#[command(about = "Declarative lifecycle management for AWS Auto Scaling Groups", long_about = None)]
struct Cli {
    /// AWS region (falls back to the environment/profile chain)
    #[arg(long, global = true)]
    region: Option<String>,

    /// Seconds between convergence polls
    #[arg(long, global = true, default_value_t = 10)]
    poll_interval: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the group, or update it in place if it already exists
    Apply {
        /// Path to the group spec (JSON)
        #[arg(long)]
        spec: PathBuf,
    },
    /// Drain and delete the group
    Delete {
        /// Path to the group spec (JSON)
        #[arg(long)]
        spec: PathBuf,

        /// Group name override; defaults to the name in the spec
        #[arg(long)]
        name: Option<String>,

        /// Delete without draining, even if the spec says otherwise
        #[arg(long)]
        force: bool,
    },
    /// Read the live group back in the declarative shape
    Status {
        /// Path to the group spec (JSON)
        #[arg(long)]
        spec: PathBuf,

        /// Group name override; defaults to the name in the spec
        #[arg(long)]
        name: Option<String>,

        /// Tag keys to leave out of the report (repeatable)
        #[arg(long = "ignore-tag-key")]
        ignore_tag_keys: Vec<String>,
    },
}

fn load_spec(path: &PathBuf) -> anyhow::Result<GroupSpec> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("reading spec file {}", path.display()))?;
    GroupSpec::from_json(&data).with_context(|| format!("parsing spec file {}", path.display()))
}

fn named_group(spec: &GroupSpec, name_override: Option<String>) -> anyhow::Result<String> {
    match name_override.or_else(|| spec.name.clone()) {
        Some(name) => Ok(name),
        None => bail!("the spec has no explicit name; pass --name"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
    if let Some(region) = cli.region.clone() {
        loader = loader.region(aws_config::Region::new(region));
    }
    let config = loader.load().await;

    let manager = GroupManager::new(AwsAsgClient::from_config(&config))
        .with_poll_interval(Duration::from_secs(cli.poll_interval));

    match cli.command {
        Command::Apply { spec } => {
            let spec = load_spec(&spec)?;
            let report = manager.apply(&spec).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Delete { spec, name, force } => {
            let mut spec = load_spec(&spec)?;
            spec.force_delete = spec.force_delete || force;
            let name = named_group(&spec, name)?;
            manager.delete(&name, &spec).await?;
            info!(group = %name, "delete complete");
        }
        Command::Status {
            spec,
            name,
            ignore_tag_keys,
        } => {
            let spec = load_spec(&spec)?;
            let name = named_group(&spec, name)?;
            match manager.read(&name, &spec, &ignore_tag_keys).await? {
                Some(state) => println!("{}", serde_json::to_string_pretty(&state)?),
                None => bail!("Auto Scaling Group {name} does not exist"),
            }
        }
    }

    Ok(())
}
