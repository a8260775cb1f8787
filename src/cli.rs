use std::env;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::error;

use crate::config::{AppConfig, SyncSettings};
use crate::runtime;

#[derive(Parser)]
#[command(about = "Keeps booking reservations in line with iCal availability feeds")]
pub struct Cli {
    /// KEY=value settings file; falls back to CONFIG_FILE, then the environment alone.
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Reconcile once and apply the plan.
    Run {
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the plan as JSON without contacting the provider.
    Plan,
    /// Reconcile every SYNC_INTERVAL_SECS until interrupted.
    Watch {
        #[arg(long)]
        dry_run: bool,
    },
}

impl Cli {
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Run { dry_run: false })
    }

    fn load_config(&self) -> Result<AppConfig, String> {
        match self.config.clone().or_else(|| env::var("CONFIG_FILE").ok()) {
            Some(path) => AppConfig::from_file(&path),
            None => Ok(AppConfig::default()),
        }
    }
}

/// Exit codes: 0 success, 1 some operations failed, 2 the run aborted.
pub async fn cli() -> ExitCode {
    let cli = Cli::parse();
    let config = match cli.load_config() {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load configuration: {}", e);
            return ExitCode::from(2);
        }
    };
    let settings = match SyncSettings::from_app_config(&config) {
        Ok(settings) => settings,
        Err(e) => {
            error!("invalid configuration: {}", e);
            return ExitCode::from(2);
        }
    };

    let result = match cli.command() {
        Commands::Run { dry_run } => runtime::run(&settings, dry_run).await,
        Commands::Plan => runtime::plan(&settings).await,
        Commands::Watch { dry_run } => runtime::watch(&settings, dry_run).await,
    };
    result.unwrap_or_else(|e| {
        error!("run aborted: {}", e);
        ExitCode::from(2)
    })
}
