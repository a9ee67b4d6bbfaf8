//! V4L2 camera source.
//!
//! Opens a local device node (e.g. /dev/video0), negotiates RGB24 and falls
//! back to MJPEG decoding for webcams that only stream compressed frames.

use ouroboros::self_referencing;

use super::FrameSource;
use crate::error::CaptureError;
use crate::frame::Frame;

/// Configuration for a V4L2 camera.
#[derive(Clone, Debug)]
pub struct V4l2Config {
    /// Device path (e.g., "/dev/video0")
    pub device: String,
    /// Requested frame rate. Zero leaves the driver default.
    pub target_fps: u32,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
}

impl Default for V4l2Config {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            target_fps: 20,
            width: 640,
            height: 480,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PixelFormat {
    Rgb24,
    Mjpeg,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

/// Production camera backed by libv4l.
pub struct V4l2Camera {
    config: V4l2Config,
    state: Option<V4l2State>,
    format: PixelFormat,
    active_width: u32,
    active_height: u32,
}

impl V4l2Camera {
    pub fn open(config: V4l2Config) -> Result<Self, CaptureError> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let unavailable = |reason: String| CaptureError::DeviceUnavailable {
            device: config.device.clone(),
            reason,
        };

        let mut device = v4l::Device::with_path(&config.device)
            .map_err(|err| unavailable(format!("open: {}", err)))?;
        let mut format = device
            .format()
            .map_err(|err| unavailable(format!("read format: {}", err)))?;
        format.width = config.width;
        format.height = config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Camera: failed to set format on {}: {}",
                    config.device,
                    err
                );
                device
                    .format()
                    .map_err(|err| unavailable(format!("read format after set failure: {}", err)))?
            }
        };

        let pixel_format = if format.fourcc == v4l::FourCC::new(b"RGB3") {
            PixelFormat::Rgb24
        } else if format.fourcc == v4l::FourCC::new(b"MJPG") {
            PixelFormat::Mjpeg
        } else {
            return Err(unavailable(format!("unsupported pixel format {}", format.fourcc)));
        };

        if config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Camera: failed to set fps on {}: {}",
                    config.device,
                    err
                );
            }
        }

        let state = V4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
            },
        }
        .try_build()
        .map_err(|err| unavailable(format!("create buffer stream: {}", err)))?;

        log::info!(
            "V4l2Camera: connected to {} ({}x{}, {:?})",
            config.device,
            format.width,
            format.height,
            pixel_format
        );
        Ok(Self {
            active_width: format.width,
            active_height: format.height,
            config,
            state: Some(state),
            format: pixel_format,
        })
    }

    fn decode(&self, buf: Vec<u8>) -> Result<Frame, CaptureError> {
        match self.format {
            PixelFormat::Rgb24 => {
                let expected = self.active_width as usize * self.active_height as usize * 3;
                if buf.len() < expected {
                    return Err(CaptureError::ReadFailure(format!(
                        "short frame: {} of {} bytes",
                        buf.len(),
                        expected
                    )));
                }
                let mut buf = buf;
                buf.truncate(expected);
                Frame::new(self.active_width, self.active_height, buf)
                    .map_err(|err| CaptureError::ReadFailure(err.to_string()))
            }
            PixelFormat::Mjpeg => {
                let decoded = image::load_from_memory_with_format(&buf, image::ImageFormat::Jpeg)
                    .map_err(|err| CaptureError::ReadFailure(format!("mjpeg decode: {}", err)))?
                    .to_rgb8();
                let (width, height) = decoded.dimensions();
                Frame::new(width, height, decoded.into_raw())
                    .map_err(|err| CaptureError::ReadFailure(err.to_string()))
            }
        }
    }
}

impl FrameSource for V4l2Camera {
    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().ok_or_else(|| {
            CaptureError::Disconnected(format!("{} not open", self.config.device))
        })?;
        let buf = state
            .with_mut(|fields| fields.stream.next().map(|(buf, _meta)| buf.to_vec()))
            .map_err(|err| CaptureError::ReadFailure(format!("capture: {}", err)))?;
        self.decode(buf)
    }

    fn is_opened(&self) -> bool {
        self.state.is_some()
    }

    fn frame_size(&self) -> (u32, u32) {
        (self.active_width, self.active_height)
    }

    fn close(&mut self) {
        if self.state.take().is_some() {
            log::debug!("V4l2Camera: closed {}", self.config.device);
        }
    }
}
