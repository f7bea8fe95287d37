use anyhow::Context;
use clap::Parser;
use pubsub_sink::host::JsonLinesDecoder;
use pubsub_sink::transport::{MemoryConnector, MemoryTransport, PubSubConnector, WireEncoding};
use pubsub_sink::{Config, FlushStatus, Keeper, Record};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const STDIN_TAG: &str = "stdin";

#[derive(Parser, Debug)]
#[command(name = "pubsub-sink")]
#[command(about = "Publishes newline-delimited JSON records to Google Cloud Pub/Sub", long_about = None)]
struct Args {
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,

    #[arg(short, long, help = "Enable JSON output for logs")]
    json_logs: bool,

    #[arg(short, long, help = "Verbose logging")]
    verbose: bool,

    #[arg(long, default_value_t = 500, help = "Records per flush")]
    batch_size: usize,

    #[arg(long, default_value_t = 5, help = "Redeliveries of a batch before giving up")]
    max_retries: u32,

    #[arg(long, help = "Publish to an in-memory bus and log every message")]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(args.json_logs, args.verbose);

    info!("Starting pubsub-sink");
    info!("Loading configuration from {:?}", args.config);

    let config = Config::from_file(&args.config)
        .with_context(|| format!("failed to load configuration from {:?}", args.config))?;
    config.log_summary();

    let options = config.keeper_options().await?;
    let connected = if args.dry_run {
        info!("Dry run: messages stay in memory");
        let transport = MemoryTransport::new()
            .with_encoding(WireEncoding::Json)
            .echo();
        Keeper::connect(&MemoryConnector::new(Arc::new(transport)), options).await
    } else {
        Keeper::connect(&PubSubConnector::from_env(), options).await
    };
    let keeper = connected.context("failed to start publishing")?;

    let result = run(&keeper, &args).await;

    keeper.stop().await;
    info!("pubsub-sink stopped");

    result
}

/// Reads stdin in batches of `--batch-size` lines until EOF or Ctrl-C.
async fn run(keeper: &Keeper, args: &Args) -> anyhow::Result<()> {
    let batch_size = args.batch_size.max(1);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut batch = String::new();
    let mut pending = 0;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    info!("End of input");
                    break;
                };
                if !line.trim().is_empty() {
                    batch.push_str(&line);
                    batch.push('\n');
                    pending += 1;
                }
                if pending >= batch_size {
                    deliver(keeper, &batch, args.max_retries).await;
                    batch.clear();
                    pending = 0;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C, shutting down");
                break;
            }
        }
    }

    if pending > 0 {
        deliver(keeper, &batch, args.max_retries).await;
    }

    Ok(())
}

/// Flushes one batch, redelivering all of it while the verdict is Retry.
async fn deliver(keeper: &Keeper, batch: &str, max_retries: u32) {
    let mut decoder = JsonLinesDecoder::new(batch).skip_malformed();
    let records: Vec<Record> = decoder.by_ref().collect();
    if decoder.skipped() > 0 {
        warn!(skipped = decoder.skipped(), "Dropped malformed input lines");
    }
    let mut attempt = 0;

    loop {
        let report = keeper.flush(records.clone(), STDIN_TAG).await;
        match report.status {
            FlushStatus::Ok => return,
            FlushStatus::Retry if attempt < max_retries => {
                attempt += 1;
                let backoff = Duration::from_millis(100 * 2u64.pow(attempt.min(10)));
                warn!(
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "Redelivering batch"
                );
                tokio::time::sleep(backoff).await;
            }
            status => {
                error!(
                    ?status,
                    attempts = attempt + 1,
                    records = records.len(),
                    "Giving up on batch"
                );
                return;
            }
        }
    }
}

fn init_logging(json: bool, verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("pubsub_sink=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("pubsub_sink=info,warn"))
    };

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
