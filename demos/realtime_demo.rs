//! Demonstration of real-time gesture classification.
//!
//! This example shows how to:
//! 1. Build an orchestrator over the simulated armband
//! 2. Supply an in-memory model and a custom result sink
//! 3. Probe the device, then stream and classify for a few seconds
//! 4. Record a short labeled capture into a scratch dataset
//!
//! Run with: cargo run --example realtime_demo

use std::sync::Arc;
use std::time::Duration;

use emg_gesture_agent::{
    collector::{SimulatedFeedConfig, SimulatedFeedFactory, CHANNEL_COUNT},
    core::{label_name, ClassificationResult, LinearModel, Preloaded, GESTURE_LABELS},
    stats::create_shared_stats,
    AgentError, Config, Orchestrator, ResultSink,
};

/// Prints each dispatched result instead of sending it anywhere.
struct PrintSink;

impl ResultSink for PrintSink {
    fn dispatch(&self, result: &ClassificationResult) -> Result<(), AgentError> {
        println!(
            "  [{}] {} ({:.0}%)",
            result.classified_at.format("%H:%M:%S%.3f"),
            label_name(result.label),
            result.confidence * 100.0
        );
        Ok(())
    }
}

/// One label per simulated pattern, keyed on the mean of its primary channel.
fn demo_model() -> LinearModel {
    let labels: Vec<String> = GESTURE_LABELS.iter().map(|l| l.to_string()).collect();
    let weights = (0..labels.len())
        .map(|label| {
            let mut row = vec![0.0; LinearModel::FEATURES];
            row[label % CHANNEL_COUNT] = 20.0;
            row
        })
        .collect();
    let bias = vec![0.0; labels.len()];
    LinearModel {
        labels,
        weights,
        bias,
    }
}

fn main() {
    println!("EMG Gesture Agent - Real-time Demo");
    println!("==================================");
    println!();

    let scratch = std::env::temp_dir().join("emg-gesture-agent-demo");
    let mut config = Config {
        data_path: scratch,
        ..Config::default()
    };
    config.capture.default_duration = Duration::from_secs(2);
    if let Err(e) = config.ensure_directories() {
        eprintln!("Could not create scratch directory: {e}");
        return;
    }

    let stats = create_shared_stats();
    let orchestrator = match Orchestrator::builder(config)
        .feeds(Arc::new(SimulatedFeedFactory::new(SimulatedFeedConfig {
            pattern_period: Duration::from_secs(2),
            ..SimulatedFeedConfig::default()
        })))
        .classifiers(Arc::new(Preloaded(Arc::new(demo_model()))))
        .sink(Arc::new(PrintSink))
        .stats(stats.clone())
        .build()
    {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            eprintln!("Failed to build orchestrator: {e}");
            return;
        }
    };

    print!("Probing armband... ");
    if orchestrator.probe_connectivity(Some(Duration::from_secs(2))) {
        println!("OK ✓");
    } else {
        println!("FAILED ✗");
        return;
    }
    println!();

    println!("Streaming for 10 seconds (the simulated gesture changes every 2s):");
    if let Err(e) = orchestrator.start_pipeline() {
        eprintln!("Failed to start: {e}");
        return;
    }
    std::thread::sleep(Duration::from_secs(10));

    match orchestrator.stop_pipeline() {
        Ok(report) => {
            println!();
            println!(
                "Classified {} windows from {} samples",
                report.windows_classified, report.samples_received
            );
        }
        Err(e) => eprintln!("Pipeline ended with an error: {e}"),
    }
    println!();

    println!("Recording 2 seconds of '{}'...", label_name(0));
    match orchestrator.run_capture_job(0, None) {
        Ok(records) => println!(
            "Wrote {records} records to {:?}",
            orchestrator.dataset().path()
        ),
        Err(e) => eprintln!("Capture failed: {e}"),
    }
    println!();

    println!("{}", stats.summary());
}
