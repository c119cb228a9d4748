//! Demo binary for adaptive-admission
//!
//! Starts a controller, pushes a burst of mixed-priority streams through
//! it, forces one adjustment cycle and prints the resulting stats as JSON.
//!
//! ## Usage
//!
//! ```text
//! adaptive-admission [config.toml]
//! ```
//!
//! ## Environment Variables
//!
//! - `LOG_FORMAT=json`: structured JSON output (production)
//! - `RUST_LOG=info`: log level filter (default: info)

use std::path::Path;
use std::time::Duration;

use adaptive_admission::{
    config::loader, init_tracing, metrics, AdmissionConfig, ConcurrencyController, Priority,
    StreamUpdate,
};
use tracing::{info, warn};

const DEMO_STREAMS: usize = 80;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = init_tracing();
    metrics::init_metrics()?;

    let config = match std::env::args().nth(1) {
        Some(path) => loader::load_from_file(Path::new(&path))?,
        None => AdmissionConfig::default(),
    };

    let controller = ConcurrencyController::new(config)?;
    controller.start()?;
    info!(limit = controller.current_limit(), "admission demo started");

    // Give the collector a chance to take its first sample.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut admitted = Vec::new();
    for i in 0..DEMO_STREAMS {
        let stream_id = format!("demo-stream-{i:03}");
        let priority = match i % 10 {
            0 => Priority::Critical,
            1 | 2 => Priority::High,
            3..=6 => Priority::Normal,
            _ => Priority::Low,
        };
        if controller.acquire(&stream_id, priority, false).await {
            controller
                .update_stream_metrics(
                    &stream_id,
                    StreamUpdate::new()
                        .message_rate(1.0 + (i % 5) as f64)
                        .response_time(Duration::from_millis(200 + 25 * i as u64)),
                )
                .await;
            admitted.push(stream_id);
        }
    }
    info!(
        admitted = admitted.len(),
        rejected = DEMO_STREAMS - admitted.len(),
        "burst complete"
    );

    match controller.adjuster().adjust_once() {
        Ok(outcome) => info!(?outcome, "adjustment cycle"),
        Err(e) => warn!(error = %e, "adjustment cycle failed"),
    }

    for stream_id in admitted.iter().step_by(2) {
        controller.release(stream_id).await;
    }

    println!("{}", serde_json::to_string_pretty(&controller.get_stats())?);

    for stream_id in admitted.iter().skip(1).step_by(2) {
        controller.release(stream_id).await;
    }
    controller.stop().await;

    info!("admission demo finished");
    Ok(())
}
