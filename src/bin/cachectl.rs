//! Operator CLI for the cloud upload buffer: drive the worker on an interval,
//! or inspect/manipulate queues directly.

use clap::{Parser, Subcommand};
use cloud_cache::{CacheConfig, HttpUploader, Orchestrator, QueueStore, RedisQueueStore};

#[derive(Parser, Debug)]
#[command(name = "cachectl", version, about = "Operator tool for the cloud upload buffer")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Drive upload_pending/upload_retrying/upload_failing on a loop until Ctrl-C.
    Run {
        #[arg(long, default_value_t = 30)]
        interval: u64,
    },
    /// List queue names matching a glob pattern.
    ListQueues {
        #[arg(long, default_value = "*")]
        pattern: String,
    },
    /// Print a queue's entries.
    Peek { queue: String },
    /// Delete a queue.
    Clear {
        queue: String,
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = CacheConfig::from_env()?;
    let store = RedisQueueStore::connect(&config.redis_url).await?;

    match args.command {
        Command::Run { interval } => run_loop(store, config, interval).await?,
        Command::ListQueues { pattern } => {
            for name in store.list(&pattern).await? {
                println!("{name}");
            }
        }
        Command::Peek { queue } => {
            for entry in store.range(&queue, 0, -1).await? {
                println!("{entry}");
            }
        }
        Command::Clear { queue, yes } => {
            if !yes {
                eprintln!("refusing to clear '{queue}' without --yes");
                std::process::exit(1);
            }
            let existed = store.delete(&queue).await?;
            tracing::info!(%queue, existed, "cleared queue");
        }
    }

    Ok(())
}

async fn run_loop(
    store: RedisQueueStore,
    config: CacheConfig,
    interval: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let orchestrator = Orchestrator::new(store, &config)?;
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                drive_once(&orchestrator).await;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("ctrl-c received, finishing in-flight drive pass");
                break;
            }
        }
    }

    Ok(())
}

async fn drive_once(orchestrator: &Orchestrator<RedisQueueStore, HttpUploader>) {
    match orchestrator.upload_pending().await {
        Ok(summary) => tracing::debug!(total = summary.total, errors = ?summary.errors, "upload_pending"),
        Err(err) => tracing::error!(%err, "upload_pending failed"),
    }
    match orchestrator.upload_retrying().await {
        Ok(summary) => tracing::debug!(total = summary.total, errors = ?summary.errors, "upload_retrying"),
        Err(err) => tracing::error!(%err, "upload_retrying failed"),
    }
    match orchestrator.upload_failing().await {
        Ok(summary) => tracing::debug!(total = summary.total, errors = ?summary.errors, "upload_failing"),
        Err(err) => tracing::error!(%err, "upload_failing failed"),
    }
}
