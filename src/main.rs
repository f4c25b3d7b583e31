//! EMG Gesture Agent CLI
//!
//! Real-time gesture recognition and training-data capture for an EMG armband.

use clap::{Parser, Subcommand};
use emg_gesture_agent::{
    capture::{CaptureJob, CaptureJobSpec, Dataset},
    collector::{AcquisitionMode, SimulatedFeedConfig, SimulatedFeedFactory},
    config::{Config, IsolationMode, NotifierConfig},
    core::label_name,
    stats::create_shared_stats_with_persistence,
    supervisor::{power_off_device, probe_device, WorkerReply, POWER_OFF_SETTLE},
    AgentError, CancelToken, Orchestrator, PipelineState, VERSION,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "emg-agent")]
#[command(version = VERSION)]
#[command(about = "Real-time EMG gesture classification and dataset capture", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Override worker isolation (thread or process)
    #[arg(long, global = true)]
    isolation: Option<IsolationMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify gestures in real time until Ctrl+C
    Realtime {
        /// Stop automatically after this many seconds
        #[arg(long)]
        seconds: Option<u64>,
    },

    /// Record one gesture label into the dataset
    Collect {
        /// Gesture label (0-5); 0 starts a new dataset
        #[arg(long)]
        label: usize,

        /// Recording length in seconds
        #[arg(long)]
        seconds: Option<u64>,
    },

    /// Record every gesture label in order, starting a new dataset
    CollectAll {
        /// Recording length per label in seconds
        #[arg(long)]
        seconds: Option<u64>,
    },

    /// Check whether the armband is reachable
    Probe {
        /// Timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Switch the armband off
    PowerOff {
        /// Timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Truncate the dataset and rewrite its header
    ResetDataset,

    /// Show the last trained model's accuracy
    Accuracy,

    /// Show whether the dataset and model files exist
    Check,

    /// Show configuration, files and cumulative statistics
    Status,

    /// Show or update configuration
    Config {
        /// Send results to this URL (empty string disables)
        #[arg(long)]
        notifier_url: Option<String>,

        /// Persist a worker isolation mode
        #[arg(long)]
        set_isolation: Option<IsolationMode>,
    },

    /// Run the HTTP control server
    #[cfg(feature = "server")]
    Serve {
        /// Port to listen on
        #[arg(long, default_value = "5000")]
        port: u16,

        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        host: std::net::IpAddr,
    },

    /// Run one supervised task and print its reply (used by process isolation)
    #[command(hide = true)]
    Worker {
        /// Data directory of the parent agent
        #[arg(long)]
        data_dir: Option<PathBuf>,

        #[command(subcommand)]
        task: WorkerCommand,
    },
}

#[derive(Subcommand)]
enum WorkerCommand {
    Probe,
    PowerOff,
    Capture {
        #[arg(long)]
        label: usize,
        #[arg(long)]
        millis: u64,
        #[arg(long, default_value = "preprocessed")]
        mode: AcquisitionMode,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: Could not load config ({e}), using defaults");
        Config::default()
    });
    if let Some(isolation) = cli.isolation {
        config.isolation = isolation;
    }

    match cli.command {
        Commands::Realtime { seconds } => cmd_realtime(config, seconds),
        Commands::Collect { label, seconds } => cmd_collect(config, label, seconds),
        Commands::CollectAll { seconds } => cmd_collect_all(config, seconds),
        Commands::Probe { timeout } => cmd_probe(config, timeout),
        Commands::PowerOff { timeout } => cmd_power_off(config, timeout),
        Commands::ResetDataset => cmd_reset_dataset(config),
        Commands::Accuracy => cmd_accuracy(config),
        Commands::Check => cmd_check(config),
        Commands::Status => cmd_status(config),
        Commands::Config {
            notifier_url,
            set_isolation,
        } => cmd_config(config, notifier_url, set_isolation),
        #[cfg(feature = "server")]
        Commands::Serve { port, host } => cmd_serve(config, host, port),
        Commands::Worker { data_dir, task } => cmd_worker(config, data_dir, task),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "emg_gesture_agent=debug"
    } else {
        "emg_gesture_agent=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_orchestrator(config: Config) -> Orchestrator {
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }
    match Orchestrator::builder(config).build() {
        Ok(orchestrator) => orchestrator,
        Err(e) => fail(&e),
    }
}

fn fail(err: &AgentError) -> ! {
    eprintln!("Error [{}]: {err}", err.code());
    std::process::exit(1);
}

fn cmd_realtime(config: Config, seconds: Option<u64>) {
    println!("EMG Gesture Agent v{VERSION}");
    println!();
    println!("  Window: {} samples", config.pipeline.window_len);
    println!("  Confidence threshold: {}", config.pipeline.confidence_threshold);
    match &config.notifier {
        Some(notifier) => println!("  Notifier: {}", notifier.url),
        None => println!("  Notifier: none (results are logged only)"),
    }
    println!();

    let orchestrator = build_orchestrator(config);

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone());

    println!("Connecting...");
    if let Err(e) = orchestrator.start_pipeline() {
        fail(&e);
    }
    println!("Streaming. Press Ctrl+C to stop");
    println!();

    let started = Instant::now();
    let limit = seconds.map(Duration::from_secs);
    while running.load(Ordering::SeqCst) && orchestrator.is_pipeline_running() {
        if limit.is_some_and(|limit| started.elapsed() >= limit) {
            break;
        }
        thread::sleep(Duration::from_millis(200));
    }

    println!();
    println!("Stopping...");
    let device_failed = orchestrator.pipeline_state() == PipelineState::Error;
    match orchestrator.stop_pipeline() {
        Ok(report) => {
            println!(
                "Processed {} samples, dispatched {} results ({} below threshold)",
                report.samples_received, report.results_dispatched, report.results_discarded
            );
        }
        Err(e) => eprintln!("Error [{}]: {e}", e.code()),
    }

    println!();
    println!("{}", orchestrator.stats().summary());
    if device_failed {
        std::process::exit(1);
    }
}

fn cmd_collect(config: Config, label: usize, seconds: Option<u64>) {
    let orchestrator = build_orchestrator(config);
    let duration = seconds.map(Duration::from_secs);

    println!(
        "Recording label {label} ({}) for {}s...",
        label_name(label),
        duration
            .unwrap_or(orchestrator.config().capture.default_duration)
            .as_secs()
    );
    match orchestrator.run_capture_job(label, duration) {
        Ok(records) => println!(
            "Wrote {records} records to {:?}",
            orchestrator.dataset().path()
        ),
        Err(e) => fail(&e),
    }
}

fn cmd_collect_all(config: Config, seconds: Option<u64>) {
    let orchestrator = build_orchestrator(config);

    println!("Collecting all gestures. Hold each gesture while it records.");
    let report = orchestrator.collect_all(seconds.map(Duration::from_secs));

    println!();
    for count in &report.completed {
        println!(
            "  {} {:<14} {} records",
            count.label,
            label_name(count.label),
            count.records
        );
    }
    if let Some((label, e)) = &report.failure {
        eprintln!("Label {label} ({}) failed: {e}", label_name(*label));
        std::process::exit(1);
    }
    println!("Total: {} records", report.total_records());
}

fn cmd_probe(config: Config, timeout: Option<u64>) {
    let orchestrator = build_orchestrator(config);
    if orchestrator.probe_connectivity(timeout.map(Duration::from_secs)) {
        println!("Armband reachable");
    } else {
        println!("Armband not reachable");
        std::process::exit(1);
    }
}

fn cmd_power_off(config: Config, timeout: Option<u64>) {
    let orchestrator = build_orchestrator(config);
    if orchestrator.power_off_device(timeout.map(Duration::from_secs)) {
        println!("Armband powered off");
    } else {
        println!("Armband did not acknowledge power-off");
        std::process::exit(1);
    }
}

fn cmd_reset_dataset(config: Config) {
    let orchestrator = build_orchestrator(config);
    match orchestrator.reset_dataset() {
        Ok(()) => println!("Dataset reset: {:?}", orchestrator.dataset().path()),
        Err(e) => fail(&e),
    }
}

fn cmd_accuracy(config: Config) {
    match emg_gesture_agent::metadata::last_accuracy(&config.metadata_path()) {
        Ok(Some(accuracy)) => println!("Model accuracy: {accuracy}%"),
        Ok(None) => {
            println!("No accuracy recorded. Train a model first.");
            std::process::exit(1);
        }
        Err(e) => fail(&e),
    }
}

fn cmd_check(config: Config) {
    let dataset = config.dataset_path();
    let model = config.model_path();
    println!("Dataset {:?}: {}", dataset, presence(dataset.exists()));
    println!("Model   {:?}: {}", model, presence(model.exists()));
}

fn presence(exists: bool) -> &'static str {
    if exists {
        "present ✓"
    } else {
        "missing ✗"
    }
}

fn cmd_status(config: Config) {
    println!("EMG Gesture Agent Status");
    println!("========================");
    println!();

    println!("Configuration:");
    println!("  Window: {} samples", config.pipeline.window_len);
    println!("  Confidence threshold: {}", config.pipeline.confidence_threshold);
    println!(
        "  Capture: {}s per label, {} attempts, {}s grace",
        config.capture.default_duration.as_secs(),
        config.capture.max_attempts,
        config.capture.deadline_grace.as_secs()
    );
    println!("  Isolation: {:?}", config.isolation);
    println!(
        "  Notifier: {}",
        config
            .notifier
            .as_ref()
            .map(|n| n.url.as_str())
            .unwrap_or("none")
    );
    println!();

    let dataset = Dataset::new(config.dataset_path());
    println!("Files:");
    match dataset.row_count() {
        Ok(rows) if dataset.exists() => println!("  Dataset: {rows} rows"),
        Ok(_) => println!("  Dataset: missing"),
        Err(e) => println!("  Dataset: unreadable ({e})"),
    }
    println!("  Model: {}", presence(config.model_path().exists()));
    match emg_gesture_agent::metadata::last_accuracy(&config.metadata_path()) {
        Ok(Some(accuracy)) => println!("  Accuracy: {accuracy}%"),
        _ => println!("  Accuracy: unknown"),
    }
    println!();

    if config.stats_path().exists() {
        let stats = create_shared_stats_with_persistence(config.stats_path());
        println!("Cumulative {}", stats.summary());
    } else {
        println!("No previous session data found.");
    }
}

fn cmd_config(mut config: Config, notifier_url: Option<String>, isolation: Option<IsolationMode>) {
    let mut changed = false;
    if let Some(url) = notifier_url {
        config.notifier = if url.is_empty() {
            None
        } else {
            Some(NotifierConfig::new(url))
        };
        changed = true;
    }
    if let Some(isolation) = isolation {
        config.isolation = isolation;
        changed = true;
    }
    if changed {
        if let Err(e) = config.save() {
            eprintln!("Error saving config: {e}");
            std::process::exit(1);
        }
        println!("Configuration saved.");
        println!();
    }

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}

#[cfg(feature = "server")]
fn cmd_serve(config: Config, host: std::net::IpAddr, port: u16) {
    use emg_gesture_agent::server::{run, ServerConfig};

    let orchestrator = Arc::new(build_orchestrator(config));
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error starting runtime: {e}");
            std::process::exit(1);
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone());

    runtime.block_on(async {
        let server_config = ServerConfig::new(port).with_host(host);
        let (addr, shutdown_tx) = match run(server_config, orchestrator.clone()).await {
            Ok(bound) => bound,
            Err(e) => {
                eprintln!("Error starting server: {e}");
                std::process::exit(1);
            }
        };
        println!("Control server on http://{addr}. Press Ctrl+C to stop");

        while running.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        let _ = shutdown_tx.send(());
    });

    if orchestrator.is_pipeline_running() {
        let _ = orchestrator.stop_pipeline();
    }
    println!("{}", orchestrator.stats().summary());
}

/// Child side of process isolation: run one task, print one JSON line.
fn cmd_worker(mut config: Config, data_dir: Option<PathBuf>, task: WorkerCommand) {
    if let Some(dir) = data_dir {
        config.data_path = dir;
    }
    let feeds = SimulatedFeedFactory::new(SimulatedFeedConfig::default());
    let cancel = CancelToken::new();

    let ok = match task {
        WorkerCommand::Probe => reply(probe_device(&feeds)),
        WorkerCommand::PowerOff => reply(power_off_device(&feeds, POWER_OFF_SETTLE, &cancel)),
        WorkerCommand::Capture {
            label,
            millis,
            mode,
        } => reply(
            CaptureJobSpec::new(label, Duration::from_millis(millis), mode).and_then(|spec| {
                CaptureJob::new(spec).run_and_flush(
                    &feeds,
                    &Dataset::new(config.dataset_path()),
                    &cancel,
                )
            }),
        ),
    };
    std::process::exit(if ok { 0 } else { 1 });
}

fn reply<T: Serialize>(result: Result<T, AgentError>) -> bool {
    let ok = result.is_ok();
    let line = serde_json::to_string(&WorkerReply::from_result(result))
        .unwrap_or_else(|e| format!(r#"{{"err":{{"code":"WORKER_ERROR","detail":"{e}"}}}}"#));
    println!("{line}");
    ok
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) {
    if let Err(e) = ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    }) {
        eprintln!("Warning: Could not set Ctrl+C handler: {e}");
    }
}
