//! Camera frame sources.
//!
//! This module provides the sources the detection session reads from:
//! - Synthetic cameras (`stub://...`) for tests and dry runs
//! - USB/V4L2 devices (feature: camera-v4l2)
//!
//! The session owns exactly one `CameraHandle` for its lifetime. The handle is
//! released once, on session teardown; releasing an already released handle is
//! a no-op. A failed open never leaves a handle behind.

mod stub;
#[cfg(feature = "camera-v4l2")]
pub mod v4l2;

pub use stub::{StubCamera, StubCameraConfig};
#[cfg(feature = "camera-v4l2")]
pub use v4l2::{V4l2Camera, V4l2Config};

use crate::error::CaptureError;
use crate::frame::Frame;

/// A device the monitor can open.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CameraDevice {
    /// Numbered capture device (`/dev/video<N>` on Linux).
    Index(u32),
    /// Explicit device node path.
    Path(String),
    /// Synthetic camera (`stub://<name>`).
    Stub(String),
}

impl CameraDevice {
    /// Resolve the configured device: an explicit URL/path wins over the index.
    pub fn resolve(index: u32, url: Option<&str>) -> Self {
        match url.map(str::trim).filter(|u| !u.is_empty()) {
            Some(url) if url.starts_with("stub://") => CameraDevice::Stub(url.to_string()),
            Some(path) => CameraDevice::Path(path.to_string()),
            None => CameraDevice::Index(index),
        }
    }

    pub fn node_path(&self) -> String {
        match self {
            CameraDevice::Index(index) => format!("/dev/video{}", index),
            CameraDevice::Path(path) => path.clone(),
            CameraDevice::Stub(url) => url.clone(),
        }
    }
}

impl std::fmt::Display for CameraDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.node_path())
    }
}

/// An opened camera backend.
pub trait FrameSource: Send {
    /// Capture the next frame. Transient failures map to `ReadFailure`.
    fn read_frame(&mut self) -> Result<Frame, CaptureError>;

    /// Whether the backend reports itself as opened.
    fn is_opened(&self) -> bool;

    /// Frame size reported by the device (width, height).
    fn frame_size(&self) -> (u32, u32);

    /// Release the underlying device. Must tolerate repeated calls.
    fn close(&mut self);
}

/// Opens camera backends. Injected into the session so tests can count opens.
pub trait CameraProvider: Send + Sync {
    fn open(&self, device: &CameraDevice) -> Result<Box<dyn FrameSource>, CaptureError>;
}

/// Default provider: synthetic cameras for `stub://`, V4L2 for real devices.
#[derive(Clone, Debug, Default)]
pub struct DeviceCameraProvider {
    pub target_fps: u32,
}

impl DeviceCameraProvider {
    pub fn new(target_fps: u32) -> Self {
        Self { target_fps }
    }
}

impl CameraProvider for DeviceCameraProvider {
    fn open(&self, device: &CameraDevice) -> Result<Box<dyn FrameSource>, CaptureError> {
        match device {
            CameraDevice::Stub(url) => {
                let config = StubCameraConfig {
                    name: url.clone(),
                    target_fps: self.target_fps,
                    ..StubCameraConfig::default()
                };
                Ok(Box::new(StubCamera::new(config)))
            }
            #[cfg(feature = "camera-v4l2")]
            other => {
                let config = V4l2Config {
                    device: other.node_path(),
                    target_fps: self.target_fps,
                    ..V4l2Config::default()
                };
                Ok(Box::new(V4l2Camera::open(config)?))
            }
            #[cfg(not(feature = "camera-v4l2"))]
            other => Err(CaptureError::DeviceUnavailable {
                device: other.node_path(),
                reason: "camera capture requires the camera-v4l2 feature".to_string(),
            }),
        }
    }
}

/// Exclusive owner of an opened camera.
pub struct CameraHandle {
    device: String,
    source: Option<Box<dyn FrameSource>>,
    frames_read: u64,
}

impl CameraHandle {
    /// Open a device and verify it reports itself as opened.
    pub fn open(
        provider: &dyn CameraProvider,
        device: &CameraDevice,
    ) -> Result<Self, CaptureError> {
        let mut source = provider.open(device)?;
        if !source.is_opened() {
            source.close();
            return Err(CaptureError::DeviceUnavailable {
                device: device.node_path(),
                reason: "device did not report opened".to_string(),
            });
        }
        let (width, height) = source.frame_size();
        log::info!("camera: opened {} ({}x{})", device, width, height);
        Ok(Self {
            device: device.node_path(),
            source: Some(source),
            frames_read: 0,
        })
    }

    pub fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        let source = self
            .source
            .as_mut()
            .ok_or_else(|| CaptureError::Disconnected(format!("{} released", self.device)))?;
        let frame = source.read_frame()?;
        self.frames_read += 1;
        Ok(frame)
    }

    pub fn frame_size(&self) -> Option<(u32, u32)> {
        self.source.as_ref().map(|source| source.frame_size())
    }

    pub fn is_open(&self) -> bool {
        self.source.as_ref().is_some_and(|source| source.is_opened())
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// Release the device. Returns false when it was already released.
    pub fn release(&mut self) -> bool {
        match self.source.take() {
            Some(mut source) => {
                source.close();
                log::info!(
                    "camera: released {} after {} frames",
                    self.device,
                    self.frames_read
                );
                true
            }
            None => false,
        }
    }
}

impl Drop for CameraHandle {
    fn drop(&mut self) {
        if self.source.is_some() {
            log::warn!("camera: handle for {} dropped without release", self.device);
            self.release();
        }
    }
}

impl std::fmt::Debug for CameraHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraHandle")
            .field("device", &self.device)
            .field("open", &self.source.is_some())
            .field("frames_read", &self.frames_read)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct ClosedSource {
        closes: Arc<AtomicUsize>,
    }

    impl FrameSource for ClosedSource {
        fn read_frame(&mut self) -> Result<Frame, CaptureError> {
            Err(CaptureError::ReadFailure("closed".into()))
        }
        fn is_opened(&self) -> bool {
            false
        }
        fn frame_size(&self) -> (u32, u32) {
            (0, 0)
        }
        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct ClosedProvider {
        closes: Arc<AtomicUsize>,
    }

    impl CameraProvider for ClosedProvider {
        fn open(&self, _device: &CameraDevice) -> Result<Box<dyn FrameSource>, CaptureError> {
            Ok(Box::new(ClosedSource {
                closes: self.closes.clone(),
            }))
        }
    }

    #[test]
    fn resolve_prefers_explicit_url() {
        assert_eq!(CameraDevice::resolve(2, None), CameraDevice::Index(2));
        assert_eq!(
            CameraDevice::resolve(0, Some("stub://porch")),
            CameraDevice::Stub("stub://porch".into())
        );
        assert_eq!(
            CameraDevice::resolve(0, Some("/dev/video4")),
            CameraDevice::Path("/dev/video4".into())
        );
        assert_eq!(CameraDevice::resolve(1, Some("  ")), CameraDevice::Index(1));
        assert_eq!(CameraDevice::Index(3).node_path(), "/dev/video3");
    }

    #[test]
    fn unopened_device_is_closed_and_rejected() {
        let closes = Arc::new(AtomicUsize::new(0));
        let provider = ClosedProvider {
            closes: closes.clone(),
        };
        let err = CameraHandle::open(&provider, &CameraDevice::Index(0)).unwrap_err();
        assert!(matches!(err, CaptureError::DeviceUnavailable { .. }));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn release_is_idempotent() {
        let provider = DeviceCameraProvider::new(0);
        let mut handle =
            CameraHandle::open(&provider, &CameraDevice::Stub("stub://test".into())).unwrap();
        assert!(handle.read_frame().is_ok());
        assert!(handle.release());
        assert!(!handle.release());
        assert!(!handle.is_open());
        assert!(matches!(
            handle.read_frame(),
            Err(CaptureError::Disconnected(_))
        ));
    }

    #[cfg(not(feature = "camera-v4l2"))]
    #[test]
    fn real_devices_need_v4l2_feature() {
        let provider = DeviceCameraProvider::new(10);
        let err = CameraHandle::open(&provider, &CameraDevice::Index(0)).unwrap_err();
        assert!(matches!(err, CaptureError::DeviceUnavailable { .. }));
    }
}
