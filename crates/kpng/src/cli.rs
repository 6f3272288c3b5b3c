//! Command line.

use crate::config::{KpngConfig, DEFAULT_CONFIG_PATH};
use crate::run::RunOptions;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Cluster network proxy agent.
#[derive(Parser, Debug)]
#[command(name = "kpng")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file; defaults apply if it does not exist
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error); RUST_LOG wins over it
    #[arg(short = 'l', long)]
    pub log_level: Option<String>,

    /// Watch events as JSON lines; `-` reads stdin
    #[arg(long, default_value = "-")]
    pub events: String,

    /// Only handle services labelled for this proxy name
    #[arg(long)]
    pub service_proxy_name: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Program services into IPVS
    ToIpvs(ToIpvsArgs),
}

#[derive(Args, Debug, Default)]
pub struct ToIpvsArgs {
    /// IPVS scheduler (rr, wrr, lc, ...)
    #[arg(long)]
    pub scheduler: Option<String>,

    /// Dummy interface service addresses are bound to
    #[arg(long)]
    pub dummy_interface: Option<String>,

    /// Log kernel operations instead of applying them
    #[arg(long)]
    pub dry_run: bool,
}

impl Cli {
    /// Applies flags given on the command line over the loaded file.
    pub fn apply_overrides(&self, config: &mut KpngConfig) {
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(name) = &self.service_proxy_name {
            config.ingest.service_proxy_name = Some(name.clone());
        }

        match &self.command {
            Command::ToIpvs(args) => {
                if let Some(scheduler) = &args.scheduler {
                    config.ipvs.scheduling_method = scheduler.clone();
                }
                if let Some(link) = &args.dummy_interface {
                    config.ipvs.dummy_interface = link.clone();
                }
            }
        }
    }

    pub fn run_options(&self) -> RunOptions {
        let Command::ToIpvs(args) = &self.command;
        RunOptions {
            events: self.events.clone(),
            dry_run: args.dry_run,
        }
    }
}
