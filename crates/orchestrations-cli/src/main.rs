mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{
    description::DescriptionSubcommand, instance::InstanceSubcommand,
    schedule::ScheduleSubcommand,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "orchestrations",
    about = "Orchestration host: synchronize descriptions, inspect instances, run the recurring scheduler",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: nearest ancestor containing .orchestrations/)
    #[arg(long, global = true, env = "ORCHESTRATIONS_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create .orchestrations/ and a default config.yaml
    Init,

    /// Synchronize the declared descriptions with the database
    Sync,

    /// Recurring scheduler
    Schedule {
        #[command(subcommand)]
        subcommand: ScheduleSubcommand,
    },

    /// Inspect persisted orchestration descriptions
    Description {
        #[command(subcommand)]
        subcommand: DescriptionSubcommand,
    },

    /// Inspect and cancel orchestration instances
    Instance {
        #[command(subcommand)]
        subcommand: InstanceSubcommand,
    },

    /// Run the HTTP API and the recurring scheduler loop
    Serve {
        /// Port to listen on (default: server.port from config.yaml)
        #[arg(long)]
        port: Option<u16>,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root),
        Commands::Sync => cmd::sync::run(&root, cli.json),
        Commands::Schedule { subcommand } => cmd::schedule::run(&root, subcommand, cli.json),
        Commands::Description { subcommand } => {
            cmd::description::run(&root, subcommand, cli.json)
        }
        Commands::Instance { subcommand } => cmd::instance::run(&root, subcommand, cli.json),
        Commands::Serve { port } => cmd::serve::run(&root, port),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
