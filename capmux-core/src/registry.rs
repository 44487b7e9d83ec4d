//! Enumerated devices and their cached formats

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::{CapmuxError, Result};
use crate::types::{DeviceDescriptor, DeviceInfo, PixelFormat, VideoFormat};

/// Cache of the devices the backend last reported
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<DeviceInfo>,
    enumerated: bool,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cache with a reconciled list
    pub fn install(&mut self, devices: Vec<DeviceInfo>) {
        info!("Device registry updated: {} device(s)", devices.len());
        self.devices = devices;
        self.enumerated = true;
    }

    /// Whether an enumeration has completed
    pub fn is_enumerated(&self) -> bool {
        self.enumerated
    }

    pub fn find(&self, device_id: &str) -> Option<&DeviceInfo> {
        self.devices
            .iter()
            .find(|d| d.descriptor.device_id == device_id)
    }

    pub fn devices(&self) -> &[DeviceInfo] {
        &self.devices
    }

    pub fn descriptors(&self) -> Vec<DeviceDescriptor> {
        self.devices.iter().map(|d| d.descriptor.clone()).collect()
    }

    /// Cached formats for a device, empty if unknown
    pub fn supported_formats(&self, device_id: &str) -> Vec<VideoFormat> {
        self.find(device_id)
            .map(|d| d.supported_formats.clone())
            .unwrap_or_default()
    }
}

/// Merge a fresh backend snapshot into the cached list
///
/// Devices still present keep their cached formats, vanished devices are
/// dropped and new devices are probed. Runs on the worker.
pub fn reconcile(
    cached: &[DeviceInfo],
    snapshot: Vec<DeviceDescriptor>,
    mut probe: impl FnMut(&DeviceDescriptor) -> Result<Vec<VideoFormat>>,
) -> Vec<DeviceInfo> {
    snapshot
        .into_iter()
        .map(|descriptor| {
            if let Some(known) = cached
                .iter()
                .find(|d| d.descriptor.device_id == descriptor.device_id)
            {
                return DeviceInfo {
                    descriptor,
                    supported_formats: known.supported_formats.clone(),
                };
            }

            debug!("Probing new device {}", descriptor);
            let formats = match probe(&descriptor) {
                Ok(formats) => consolidate_formats(formats),
                Err(e) => {
                    warn!("Failed to probe {}: {}", descriptor.device_id, e);
                    Vec::new()
                }
            };
            DeviceInfo {
                descriptor,
                supported_formats: formats,
            }
        })
        .collect()
}

/// Normalize a probed format list
///
/// Sorted by area ascending then frame rate descending. Only the fastest
/// format of each frame area is kept, and everything except depth formats
/// is reported as I420 since frames are converted before delivery.
pub fn consolidate_formats(mut formats: Vec<VideoFormat>) -> Vec<VideoFormat> {
    formats.sort_by(|a, b| {
        a.area()
            .cmp(&b.area())
            .then(b.frame_rate.total_cmp(&a.frame_rate))
    });
    // Equal areas are adjacent after the sort; 480x640 and 640x480 count as one size
    formats.dedup_by(|later, kept| later.area() == kept.area());
    for format in &mut formats {
        if format.pixel_format != PixelFormat::Y16 {
            format.pixel_format = PixelFormat::I420;
        }
    }
    formats
}

/// Pending result of `enumerate_devices`
#[derive(Debug)]
pub struct EnumerationTicket {
    rx: oneshot::Receiver<Result<Vec<DeviceDescriptor>>>,
}

impl EnumerationTicket {
    pub(crate) fn new(rx: oneshot::Receiver<Result<Vec<DeviceDescriptor>>>) -> Self {
        Self { rx }
    }

    /// Wait for the enumeration to finish
    pub async fn wait(self) -> Result<Vec<DeviceDescriptor>> {
        self.rx.await.map_err(|_| CapmuxError::ManagerGone)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(w: u32, h: u32, fps: f32, pf: PixelFormat) -> VideoFormat {
        VideoFormat::new(w, h, fps, pf)
    }

    #[test]
    fn test_consolidate_sorts_and_dedupes() {
        let formats = consolidate_formats(vec![
            fmt(1280, 720, 30.0, PixelFormat::Mjpeg),
            fmt(640, 480, 15.0, PixelFormat::Yuy2),
            fmt(1280, 720, 60.0, PixelFormat::Nv12),
            fmt(640, 480, 30.0, PixelFormat::Yuy2),
            fmt(320, 240, 30.0, PixelFormat::Y16),
        ]);

        assert_eq!(
            formats,
            vec![
                fmt(320, 240, 30.0, PixelFormat::Y16),
                fmt(640, 480, 30.0, PixelFormat::I420),
                fmt(1280, 720, 60.0, PixelFormat::I420),
            ]
        );
    }

    #[test]
    fn test_consolidate_dedupes_same_area() {
        let formats = consolidate_formats(vec![
            fmt(640, 480, 60.0, PixelFormat::Yuy2),
            fmt(480, 640, 30.0, PixelFormat::Yuy2),
            fmt(640, 480, 15.0, PixelFormat::Mjpeg),
        ]);

        assert_eq!(formats, vec![fmt(640, 480, 60.0, PixelFormat::I420)]);
    }

    #[test]
    fn test_reconcile_keeps_cached_and_probes_new() {
        let cached = vec![DeviceInfo {
            descriptor: DeviceDescriptor::new("cam0", "Old Camera"),
            supported_formats: vec![fmt(640, 480, 30.0, PixelFormat::I420)],
        }];
        let snapshot = vec![
            DeviceDescriptor::new("cam0", "Old Camera"),
            DeviceDescriptor::new("cam1", "New Camera"),
        ];

        let mut probed = Vec::new();
        let devices = reconcile(&cached, snapshot, |d| {
            probed.push(d.device_id.clone());
            Ok(vec![fmt(1920, 1080, 30.0, PixelFormat::Mjpeg)])
        });

        assert_eq!(probed, vec!["cam1".to_string()]);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].supported_formats, cached[0].supported_formats);
        assert_eq!(
            devices[1].supported_formats,
            vec![fmt(1920, 1080, 30.0, PixelFormat::I420)]
        );
    }

    #[test]
    fn test_reconcile_drops_vanished() {
        let cached = vec![DeviceInfo::new(DeviceDescriptor::new("gone", "Gone"))];
        let devices = reconcile(&cached, Vec::new(), |_| Ok(Vec::new()));
        assert!(devices.is_empty());
    }

    #[test]
    fn test_probe_failure_yields_empty_formats() {
        let devices = reconcile(&[], vec![DeviceDescriptor::new("cam2", "Flaky")], |_| {
            Err(CapmuxError::device("probe timed out"))
        });
        assert_eq!(devices.len(), 1);
        assert!(devices[0].supported_formats.is_empty());
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = DeviceRegistry::new();
        assert!(!registry.is_enumerated());
        registry.install(vec![DeviceInfo {
            descriptor: DeviceDescriptor::new("cam0", "Camera"),
            supported_formats: vec![VideoFormat::default()],
        }]);
        assert!(registry.is_enumerated());
        assert!(registry.find("cam0").is_some());
        assert_eq!(registry.supported_formats("cam0").len(), 1);
        assert!(registry.supported_formats("missing").is_empty());
    }
}
