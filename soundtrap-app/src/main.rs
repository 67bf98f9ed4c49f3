//! Soundtrap headless host entry point.
//!
//! Opens the microphone, runs the engine until Ctrl-C, and forwards engine
//! events to the log (and optionally to stdout as JSON lines).
//!
//! ## Runtime note
//!
//! The engine runs its pipeline on its own threads. `start()`/`stop()` block
//! while the device opens or the pipeline joins, so they are called through
//! `spawn_blocking` to keep the Tokio workers free for event forwarding.

mod settings;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use settings::{default_settings_path, load_settings, save_settings, AppSettings};
use soundtrap_core::{
    audio::device::list_input_devices, CpalSource, DirectorySink, HttpUploader,
    HttpUploaderConfig, SegmentDelivery, SoundtrapEngine, TransportChain, WavEncoder,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

#[derive(Debug)]
struct Args {
    settings_path: PathBuf,
    list_devices: bool,
    write_default_settings: bool,
    json_events: bool,
}

fn print_usage() {
    println!(
        "Usage: soundtrap [--settings <file.json>] [--list-devices] \\
  [--write-default-settings] [--json-events]"
    );
}

fn parse_args() -> Result<Args, String> {
    let mut settings_path: Option<PathBuf> = None;
    let mut list_devices = false;
    let mut write_default_settings = false;
    let mut json_events = false;

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--settings" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --settings".into());
                };
                settings_path = Some(PathBuf::from(v));
            }
            "--list-devices" => list_devices = true,
            "--write-default-settings" => write_default_settings = true,
            "--json-events" => json_events = true,
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                return Err(format!("unknown argument: {other}"));
            }
        }
    }

    Ok(Args {
        settings_path: settings_path.unwrap_or_else(default_settings_path),
        list_devices,
        write_default_settings,
        json_events,
    })
}

fn build_engine(settings: &AppSettings) -> SoundtrapEngine {
    let mut transports = TransportChain::new().with(DirectorySink::new(&settings.output_dir));
    if let Some(url) = settings.upload_url.as_ref() {
        let mut config = HttpUploaderConfig::new(url.clone());
        config.bearer_token = settings.upload_token.clone();
        transports.push(Box::new(HttpUploader::new(config)));
        info!(url = url.as_str(), "segment upload enabled");
    }

    SoundtrapEngine::new(
        settings.engine_config(),
        CpalSource::new(settings.source_config()),
        SegmentDelivery::new(WavEncoder::default(), transports),
    )
}

fn print_json_line<T: Serialize>(kind: &str, event: &T) {
    match serde_json::to_string(event) {
        Ok(json) => println!("{{\"type\":\"{kind}\",\"event\":{json}}}"),
        Err(e) => warn!("serialize {kind} event: {e}"),
    }
}

/// Forward one broadcast stream until the engine is dropped.
fn forward<T, F>(mut rx: broadcast::Receiver<T>, name: &'static str, mut on_event: F)
where
    T: Clone + Send + 'static,
    F: FnMut(T) + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => on_event(event),
                Err(RecvError::Lagged(n)) => {
                    warn!("{name} receiver lagged by {n} events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("soundtrap=info,soundtrap_core=info")
            }),
        )
        .init();

    let args = parse_args().map_err(|e| {
        print_usage();
        anyhow::anyhow!(e)
    })?;

    if args.list_devices {
        for device in list_input_devices() {
            let marker = if device.is_default { " (default)" } else { "" };
            println!("{}{marker}", device.name);
        }
        return Ok(());
    }

    if args.write_default_settings {
        save_settings(&args.settings_path, &AppSettings::default())
            .with_context(|| format!("write {}", args.settings_path.display()))?;
        println!("{}", args.settings_path.display());
        return Ok(());
    }

    let settings = load_settings(&args.settings_path);
    info!(
        settings = %args.settings_path.display(),
        output_dir = %settings.output_dir.display(),
        threshold_dbfs = settings.threshold_dbfs,
        "Soundtrap starting"
    );

    let engine = Arc::new(build_engine(&settings));
    let json_events = args.json_events;

    let level_log_every = u64::from(settings.level_log_every);
    let mut level_count = 0u64;
    forward(engine.subscribe_levels(), "level", move |event| {
        level_count += 1;
        if level_log_every > 0 && (event.triggered || level_count % level_log_every == 0) {
            info!(
                monitor_level = format_args!("{:.1}", event.monitor_level),
                trigger_db = format_args!("{:.1}", event.trigger_db),
                triggered = event.triggered,
                "level"
            );
        }
        if json_events {
            print_json_line("level", &event);
        }
    });

    forward(engine.subscribe_segments(), "segment", move |event| {
        info!(
            segment_id = event.segment_id,
            duration_ms = event.duration_ms,
            outcome = ?event.outcome,
            "segment finished"
        );
        if json_events {
            print_json_line("segment", &event);
        }
    });

    forward(engine.subscribe_status(), "status", move |event| {
        info!(status = ?event.status, detail = ?event.detail, "engine status");
        if json_events {
            print_json_line("status", &event);
        }
    });

    let starter = Arc::clone(&engine);
    tokio::task::spawn_blocking(move || starter.start())
        .await
        .context("engine start task failed")?
        .context("could not start monitoring")?;

    tokio::signal::ctrl_c().await.context("listen for Ctrl-C")?;
    info!("shutdown requested");

    let stopper = Arc::clone(&engine);
    match tokio::task::spawn_blocking(move || stopper.stop())
        .await
        .context("engine stop task failed")?
    {
        Ok(()) => {}
        // Source ended on its own; the engine is already stopped.
        Err(soundtrap_core::SoundtrapError::NotRunning) => {}
        Err(e) => return Err(e.into()),
    }

    let snap = engine.pipeline_diagnostics_snapshot();
    info!(
        blocks_in = snap.blocks_in,
        triggers_fired = snap.triggers_fired,
        segments_delivered = snap.segments_delivered,
        transport_failures = snap.transport_failures,
        "Soundtrap stopped"
    );
    Ok(())
}
