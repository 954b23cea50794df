//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use history_refresh::config::{Config, LogFormat};

/// Refresh forum thread history records through a durable work queue.
///
/// Publishers enqueue active records; workers fetch each thread page and
/// store its current title and page count.
#[derive(Parser, Debug)]
#[command(name = "history-refresh")]
#[command(author, version, about)]
pub struct Args {
    /// Path to a TOML config file
    #[arg(long, env = "HISTORY_REFRESH_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// SQLite database file (overrides `[database] path`)
    #[arg(long, env = "HISTORY_REFRESH_DATABASE", global = true)]
    pub database: Option<PathBuf>,

    /// Default log filter (overrides `[log] level`; RUST_LOG still wins)
    #[arg(long, env = "HISTORY_REFRESH_LOG_LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Log output format (overrides `[log] format`)
    #[arg(long, value_enum, global = true)]
    pub log_format: Option<LogFormat>,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Consume the stream and refresh records until interrupted
    Work {
        /// Consumer id for this process (default: random UUID)
        #[arg(long)]
        consumer: Option<String>,
    },

    /// Enqueue every active record once, or repeatedly with --interval
    Publish {
        /// Republish every N seconds until interrupted
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..=604_800))]
        interval: Option<u64>,
    },

    /// List entries delivered to the group but not yet acknowledged
    Pending,

    /// Add a history record
    Add {
        /// Thread URL to track
        url: String,

        /// Forum tag selecting the extractor (nga, tieba)
        #[arg(long)]
        source_type: String,
    },
}

impl Args {
    /// Applies command-line overrides on top of the file config.
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(path) = &self.database {
            config.database.path.clone_from(path);
        }
        if let Some(level) = &self.log_level {
            config.log.level.clone_from(level);
        }
        if let Some(format) = self.log_format {
            config.log.format = format;
        }
        if let Command::Work {
            consumer: Some(consumer),
        } = &self.command
        {
            config.stream.consumer = Some(consumer.clone());
        }
    }
}
