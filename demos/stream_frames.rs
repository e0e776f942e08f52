//! Discover a sonar, apply settings and print incoming frames.
//!
//! Usage: `cargo run --example stream_frames -- <serial> [config.yaml] [frame-count]`
//!
//! Set `RUST_LOG=sonarlink=debug` to see connection and reassembly events.

use futures::StreamExt;
use sonarlink::{
    AcquisitionSettings, AvailabilityListener, ClientConfig, Controller, SettingsAppliedExt,
};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut args = std::env::args().skip(1);
    let serial: u32 = args
        .next()
        .ok_or_else(|| anyhow::anyhow!("usage: stream_frames <serial> [config.yaml] [count]"))?
        .parse()?;
    let config = match args.next() {
        Some(path) => ClientConfig::from_file(path)?,
        None => ClientConfig::default(),
    };
    let count: usize = args.next().map(|n| n.parse()).transpose()?.unwrap_or(100);

    let mut listener = AvailabilityListener::bind(&config).await?;
    info!(serial, "Waiting for beacon");
    let beacon = listener.wait_for(serial, Duration::from_secs(30)).await?;
    info!(
        source = %beacon.source,
        system = %beacon.system_type,
        version = %beacon.software_version,
        available = beacon.is_available(),
        "Found device"
    );

    let mut controller = Controller::start(config, Some(beacon.source.ip())).await?;
    controller.follow(&listener, serial);

    let settings = AcquisitionSettings::builder(beacon.system_type).build()?;
    let cookie = controller.apply_settings(settings)?;

    let frames = controller.frames().ok_or_else(|| anyhow::anyhow!("frame stream taken"))?;
    let mut frames = frames.after_cookie(cookie).take(count).boxed();
    while let Some(frame) = frames.next().await {
        let header = frame.header();
        let mean = frame.samples().iter().map(|&s| s as u64).sum::<u64>() as f64
            / frame.samples().len().max(1) as f64;
        println!(
            "frame {:>6}  mode {}  {:>3} beams x {:>4} samples  {:>5.1} °C  mean {:>6.2}",
            frame.frame_index(),
            header.ping_mode.code(),
            frame.beam_count(),
            frame.samples_per_beam(),
            header.water_temp,
            mean
        );
    }

    if let Some(stats) = controller.stop().await? {
        info!(
            completed = stats.completed,
            abandoned = stats.abandoned,
            duplicates = stats.duplicates,
            dropped = stats.dropped,
            "Frame receiver summary"
        );
    }
    listener.stop().await?;
    Ok(())
}
