mod cli;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use local_recall::config::RecallConfig;
use local_recall::model::OllamaClient;
use local_recall::pipeline::RecallContext;

#[derive(Parser)]
#[command(name = "local-recall", version, about = "Screen recall backed by local models")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Capture screens on an interval and describe them as they arrive
    Record {
        /// Milliseconds between capture cycles
        #[arg(long)]
        every_ms: Option<u64>,
        /// Stop after this many capture cycles
        #[arg(long)]
        max_sets: Option<u64>,
        /// Drop the collection before recording
        #[arg(long)]
        reset: bool,
        /// Only capture and publish; leave describing to `describe`
        #[arg(long)]
        no_describe: bool,
    },
    /// Describe and store published captures
    Describe {
        /// Exit once the channel is drained instead of waiting for more
        #[arg(long)]
        drain: bool,
    },
    /// Ask a question about past screen activity
    Query {
        prompt: String,
        /// Rewrite the question with the interpreter model first
        #[arg(long)]
        expand: bool,
        /// Number of descriptions to retrieve
        #[arg(long)]
        max_results: Option<usize>,
    },
    /// Manage the local models
    Models {
        #[command(subcommand)]
        action: ModelsAction,
    },
    /// Delete every stored description
    Reset {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Show collection size and channel lag
    Stats,
}

#[derive(Subcommand)]
enum ModelsAction {
    /// Pull every configured model that is not available yet
    Pull,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = RecallConfig::load()?;

    // Log to stderr so stdout carries only descriptions and answers.
    let filter = EnvFilter::try_new(&config.general.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let db = local_recall::db::open_database(config.resolved_db_path())?;
    let models = Arc::new(OllamaClient::new(&config.models.host)?);
    let ctx = RecallContext::new(config, db, models);

    match cli.command {
        Command::Record {
            every_ms,
            max_sets,
            reset,
            no_describe,
        } => {
            let record = &ctx.config.record;
            let options = local_recall::pipeline::RecordOptions {
                every: Duration::from_millis(every_ms.unwrap_or(record.every_ms)),
                max_screenshot_sets: max_sets.or(record.max_screenshot_sets),
            };
            cli::record(&ctx, options, reset, !no_describe).await?;
        }
        Command::Describe { drain } => {
            cli::describe(&ctx, drain).await?;
        }
        Command::Query {
            prompt,
            expand,
            max_results,
        } => {
            let options = local_recall::pipeline::QueryOptions {
                expand: expand || ctx.config.query.expand,
                max_results: max_results.unwrap_or(ctx.config.query.max_results),
            };
            cli::query(&ctx, &prompt, &options).await?;
        }
        Command::Models { action } => match action {
            ModelsAction::Pull => {
                cli::models_pull(&ctx).await?;
            }
        },
        Command::Reset { yes } => {
            cli::reset::reset(&ctx, yes).await?;
        }
        Command::Stats => {
            cli::stats::stats(&ctx).await?;
        }
    }

    Ok(())
}
