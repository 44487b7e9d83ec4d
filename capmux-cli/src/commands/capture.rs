//! Capture command - run a capture session in the foreground

use anyhow::{Context, Result};
use capmux_core::config::ConfigFile;
use capmux_core::types::{CapabilityResponse, PixelFormat};
use capmux_core::{
    CapabilityRequest, CaptureParams, ClientEvent, ClientHandle, StreamDescriptor, VideoFormat,
};
use clap::Args;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::signal;
use tracing::{debug, info};

use super::local_manager;

/// Arguments for the capture command
#[derive(Args)]
pub struct CaptureArgs {
    /// Camera device id (see `capmux devices`)
    #[arg(short, long, conflicts_with_all = ["tab", "desktop"])]
    device: Option<String>,

    /// Tab id to capture
    #[arg(long, conflicts_with = "desktop")]
    tab: Option<String>,

    /// Screen or window id to capture
    #[arg(long)]
    desktop: Option<String>,

    /// Requested width (defaults to the config file)
    #[arg(long)]
    width: Option<u32>,

    /// Requested height (defaults to the config file)
    #[arg(long)]
    height: Option<u32>,

    /// Requested frame rate (defaults to the config file)
    #[arg(long)]
    fps: Option<f32>,

    /// Stop after this many frames
    #[arg(short = 'n', long)]
    frames: Option<u64>,

    /// Stop after this many seconds
    #[arg(short = 't', long)]
    duration: Option<u64>,

    /// Take a still photo once the device starts and write it here
    #[arg(long)]
    photo: Option<PathBuf>,
}

impl CaptureArgs {
    fn descriptor(&self, config: &ConfigFile) -> StreamDescriptor {
        if let Some(tab) = &self.tab {
            StreamDescriptor::tab(tab)
        } else if let Some(desktop) = &self.desktop {
            StreamDescriptor::desktop(desktop)
        } else if let Some(device) = &self.device {
            StreamDescriptor::device(device)
        } else {
            let first = config
                .fake
                .devices
                .first()
                .map(|d| d.id.clone())
                .unwrap_or_else(|| "fake-cam-0".to_string());
            StreamDescriptor::device(first)
        }
    }

    fn params(&self, config: &ConfigFile) -> CaptureParams {
        let defaults = config.capture_params().requested_format;
        CaptureParams::new(VideoFormat::new(
            self.width.unwrap_or(defaults.width),
            self.height.unwrap_or(defaults.height),
            self.fps.unwrap_or(defaults.frame_rate),
            PixelFormat::I420,
        ))
    }
}

/// Run a capture session until interrupted or a limit is reached
pub async fn capture(args: CaptureArgs) -> Result<()> {
    let config = ConfigFile::load_or_default();
    let handle = local_manager(&config)?;
    handle
        .enumerate_devices()
        .await
        .context("Failed to enumerate devices")?;

    let descriptor = args.descriptor(&config);
    let params = args.params(&config);
    println!("Capmux - Capture\n");
    println!("  Source:    {}", descriptor);
    println!("  Requested: {}", params.requested_format);
    println!();

    let session = handle.open(descriptor).await?;
    let (client, mut events) = ClientHandle::new();
    handle
        .start_capture_for_client(session, params, client.clone())
        .await
        .context("Failed to start capture")?;

    let photo = match &args.photo {
        Some(_) => Some(
            handle
                .get_capability(session, CapabilityRequest::TakePhoto)
                .await?,
        ),
        None => None,
    };

    let deadline = args
        .duration
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    let started_at = Instant::now();
    let mut frames = 0u64;
    let mut bytes = 0usize;
    let mut aborted = false;

    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let timeout = deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::from_secs(3600));

        tokio::select! {
            _ = &mut ctrl_c => {
                println!("\nReceived interrupt signal...");
                break;
            }
            _ = tokio::time::sleep(timeout), if deadline.is_some() => {
                info!("Capture duration reached");
                break;
            }
            event = events.recv() => match event {
                Some(ClientEvent::Started) => println!("Capture started."),
                Some(ClientEvent::Buffer(buffer)) => {
                    frames += 1;
                    bytes += buffer.data().len();
                    debug!("Frame {:?} {}", buffer.id(), buffer.info().format);
                    if frames == 1 {
                        println!("First frame: {}", buffer.info().format);
                    }
                    if args.frames.is_some_and(|limit| frames >= limit) {
                        break;
                    }
                }
                Some(ClientEvent::Error(failure)) => {
                    println!("Device failed: {}", failure);
                    aborted = true;
                    break;
                }
                Some(ClientEvent::Ended) => {
                    println!("Device ended.");
                    break;
                }
                Some(ClientEvent::Aborted) | Some(ClientEvent::Stopped) | None => break,
            }
        }
    }

    handle
        .stop_capture_for_client(session, client.id(), aborted)
        .await?;

    // Closing fails a photo request that never reached a device
    handle.close(session).await?;

    if let (Some(path), Some(ticket)) = (&args.photo, photo) {
        match ticket.wait().await {
            Ok(CapabilityResponse::Photo(photo)) => {
                std::fs::write(path, &photo.data)
                    .with_context(|| format!("Failed to write photo to {}", path.display()))?;
                println!("Saved {} photo to {}", photo.mime_type, path.display());
            }
            Ok(other) => println!("Unexpected photo response: {:?}", other),
            Err(e) => println!("Photo failed: {}", e),
        }
    }

    let stats = handle.status().await?.stats;
    handle.shutdown().await?;

    let elapsed = started_at.elapsed().as_secs_f64();
    println!();
    println!("Capture stopped.");
    println!("  Frames:   {} ({:.1} fps)", frames, frames as f64 / elapsed.max(0.001));
    println!("  Bytes:    {}", bytes);
    println!("  Dropped:  {}", stats.frames_dropped);

    Ok(())
}
