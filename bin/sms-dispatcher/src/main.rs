//! SMS Dispatcher
//!
//! Sends every `recipient,message` line of a CSV file through the configured
//! gateway, one chunk at a time, and writes a status report at the end.
//!
//! Between chunks the operator is asked whether to continue, unless
//! `--auto-continue` is given. Ctrl+C stops the run at the next pause; the
//! report is written either way.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SMS_DISPATCH_CONFIG` | - | Path to the TOML configuration file |
//! | `SMS_DISPATCH_BATCH_SIZE` | `10` | Records per chunk (1-20) |
//! | `SMS_DISPATCH_DELAY_MS` | `2000` | Pause after each send (1000-10000) |
//! | `SMS_DISPATCH_GATEWAY` | `loopback` | `loopback` or `http` |
//! | `SMS_DISPATCH_HTTP_URL` | - | Provider endpoint (http gateway) |
//! | `SMS_DISPATCH_REPORT_DIR` | `./reports` | Report output directory |
//! | `LOG_FORMAT` | `text` | `json` for structured logs |
//! | `RUST_LOG` | `info` | Log level |

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use futures::StreamExt;
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use sms_config::{AppConfig, ConfigLoader, GatewayKind};
use sms_dispatch::{
    gateway_channel, load_file, write_report, BatchDispatcher, BatchSettings, DispatchRun,
    HttpGateway, HttpGatewayConfig, LoopbackConfig, LoopbackGateway, RecordStore, RunOutcome,
    TransmissionAdapter,
};

/// Bulk SMS dispatcher
#[derive(Parser, Debug)]
#[command(name = "sms-dispatcher")]
#[command(about = "Send text messages listed in a CSV file, in paced chunks")]
struct Args {
    /// CSV file with one `recipient,message` pair per line, no header
    #[arg(required_unless_present = "print_config")]
    input: Option<PathBuf>,

    /// Configuration file (defaults to the standard search paths)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Records per chunk (1-20)
    #[arg(long)]
    batch_size: Option<usize>,

    /// Pause after each message in milliseconds (1000-10000)
    #[arg(long)]
    delay_ms: Option<u64>,

    /// Run every chunk without asking
    #[arg(long)]
    auto_continue: bool,

    /// Gateway: loopback or http
    #[arg(long)]
    gateway: Option<String>,

    /// Directory the report is written to
    #[arg(long)]
    report_dir: Option<PathBuf>,

    /// Print an example configuration file and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print!("{}", AppConfig::example_toml());
        return Ok(());
    }

    sms_common::logging::init_logging("sms-dispatcher");

    let config = load_config(&args)?;
    let input = args
        .input
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("an input CSV file is required"))?;

    let records = load_file(input)?;
    if records.is_empty() {
        anyhow::bail!("{} contains no dispatchable records", input.display());
    }
    info!(
        records = records.len(),
        batch_size = config.dispatch.batch_size,
        delay_ms = config.dispatch.inter_message_delay_ms,
        gateway = ?config.gateway.kind,
        "Starting SMS dispatch"
    );

    let (sink, events) = gateway_channel();
    let adapter: Arc<dyn TransmissionAdapter> = match config.gateway.kind {
        GatewayKind::Loopback => Arc::new(LoopbackGateway::new(LoopbackConfig::from(&config.gateway), sink)),
        GatewayKind::Http => Arc::new(HttpGateway::new(HttpGatewayConfig::from(&config.gateway), sink)?),
    };

    let store = RecordStore::new();
    let dispatcher = BatchDispatcher::new(store.clone(), adapter, events);
    let printer = spawn_progress_printer(store.clone());

    let settings = BatchSettings::from(&config.dispatch);
    let result = drive(&dispatcher, records, settings).await;
    printer.abort();

    // The report reflects whatever was observed, even after a failure
    let summary = store.summary();
    println!("\nDispatch finished: {}", summary);
    let path = write_report(&config.report.output_dir, &config.report.file_prefix, &store.snapshot())?;
    println!("Report written to {}", path.display());

    result
}

fn load_config(args: &Args) -> Result<AppConfig> {
    let loader = match &args.config {
        Some(path) => ConfigLoader::with_path(path),
        None => ConfigLoader::new(),
    };
    let mut config = loader.load()?;

    if let Some(batch_size) = args.batch_size {
        config.dispatch.batch_size = batch_size;
    }
    if let Some(delay_ms) = args.delay_ms {
        config.dispatch.inter_message_delay_ms = delay_ms;
    }
    if args.auto_continue {
        config.dispatch.auto_continue = true;
    }
    if let Some(kind) = &args.gateway {
        config.gateway.kind = kind.parse()?;
    }
    if let Some(dir) = &args.report_dir {
        config.report.output_dir = dir.display().to_string();
    }

    config.validate()?;
    Ok(config)
}

/// Run chunk by chunk until the input is exhausted, the operator declines
/// to continue, or the run is interrupted.
async fn drive(
    dispatcher: &BatchDispatcher,
    records: Vec<sms_common::DispatchRecord>,
    settings: BatchSettings,
) -> Result<()> {
    let mut answers = None;
    let mut run = dispatcher.start(records, settings.clone())?;

    loop {
        let outcome = follow(run).await?;

        if outcome.aborted {
            warn!(chunk = ?outcome.next_chunk, "Dispatch interrupted, remaining records left as they are");
            return Ok(());
        }
        let Some(next) = outcome.next_chunk else {
            info!(total_chunks = outcome.total_chunks, "All chunks dispatched");
            return Ok(());
        };

        let answers = answers.get_or_insert_with(spawn_stdin_reader);
        if !confirm_next_chunk(answers, next, outcome.total_chunks).await? {
            info!(next_chunk = next, "Stopping before chunk {} of {}", next, outcome.total_chunks);
            return Ok(());
        }
        run = dispatcher.resume(settings.clone(), next)?;
    }
}

/// Print chunk completions and abort the run on Ctrl+C
async fn follow(mut run: DispatchRun) -> Result<RunOutcome> {
    let abort = run.abort_handle();
    let interrupt = tokio::spawn(async move {
        shutdown_signal().await;
        info!("Interrupt received, stopping at the next pause");
        abort.abort();
    });

    while let Some(progress) = run.next().await {
        if progress.timed_out {
            println!(
                "Chunk {} of {} complete (some acknowledgements still outstanding)",
                progress.chunk, progress.total_chunks
            );
        } else {
            println!("Chunk {} of {} complete", progress.chunk, progress.total_chunks);
        }
    }

    let outcome = run.wait().await;
    interrupt.abort();
    Ok(outcome?)
}

async fn confirm_next_chunk(
    answers: &mut mpsc::UnboundedReceiver<String>,
    next: usize,
    total: usize,
) -> Result<bool> {
    print!("Continue with chunk {} of {}? [y/N] ", next, total);
    std::io::stdout().flush()?;

    tokio::select! {
        answer = answers.recv() => {
            let answer = answer.unwrap_or_default().trim().to_ascii_lowercase();
            Ok(matches!(answer.as_str(), "y" | "yes"))
        }
        _ = shutdown_signal() => {
            println!();
            Ok(false)
        }
    }
}

/// Read operator answers on a plain thread so a pending read never holds up
/// runtime shutdown.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn spawn_progress_printer(store: RecordStore) -> JoinHandle<()> {
    let mut changes = store.subscribe();
    tokio::spawn(async move {
        let mut last = None;
        while changes.changed().await.is_ok() {
            let summary = store.summary();
            if last != Some(summary) {
                println!("  {}", summary);
                last = Some(summary);
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
