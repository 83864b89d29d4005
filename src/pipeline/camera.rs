use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Sender, TrySendError};
use nokhwa::{
    Camera,
    pixel_format::RgbFormat,
    utils::{
        CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
        Resolution,
    },
};

use super::rgba_converter;
use crate::{config::CameraSettings, types::Frame};

// macOS built-in cameras often reject YUYV even though it is advertised.
const PREFERRED_PIXEL_FORMATS: &[FrameFormat] = &[
    FrameFormat::RAWRGB,
    FrameFormat::RAWBGR,
    FrameFormat::GRAY,
    FrameFormat::YUYV,
    FrameFormat::NV12,
    FrameFormat::MJPEG,
];

const TARGET_FRAME_RATE: u32 = 30;
const READ_RETRY_BASE: Duration = Duration::from_millis(20);
const READ_RETRY_MAX: Duration = Duration::from_millis(500);
const MAX_CONSECUTIVE_READ_FAILURES: u32 = 100;

/// Delay between failed frame reads, doubling up to a cap.
#[derive(Debug, Default)]
struct ReadBackoff {
    failures: u32,
}

impl ReadBackoff {
    fn reset(&mut self) {
        self.failures = 0;
    }

    /// Records a failed read. `None` means the camera is gone for good.
    fn on_failure(&mut self) -> Option<Duration> {
        self.failures += 1;
        if self.failures >= MAX_CONSECUTIVE_READ_FAILURES {
            return None;
        }
        let shift = (self.failures - 1).min(5);
        Some((READ_RETRY_BASE * (1u32 << shift)).min(READ_RETRY_MAX))
    }
}

fn requested_formats(width: u32, height: u32) -> [RequestedFormat<'static>; 3] {
    let target = Resolution::new(width, height);
    [
        RequestedFormat::with_formats(
            RequestedFormatType::Closest(CameraFormat::new(
                target,
                FrameFormat::MJPEG,
                TARGET_FRAME_RATE,
            )),
            PREFERRED_PIXEL_FORMATS,
        ),
        RequestedFormat::with_formats(
            RequestedFormatType::HighestResolution(target),
            PREFERRED_PIXEL_FORMATS,
        ),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::None),
    ]
}

/// Capture thread handle. Stops and joins the thread on `stop` or drop.
#[derive(Debug)]
pub struct CameraStream {
    device: String,
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl CameraStream {
    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn build_camera(index: &CameraIndex, settings: &CameraSettings) -> Result<Camera> {
    let mut last_err = None;

    for requested in requested_formats(settings.width, settings.height) {
        match Camera::new(index.clone(), requested) {
            Ok(mut camera) => match camera.open_stream() {
                Ok(()) => return Ok(camera),
                Err(err) => last_err = Some(err.into()),
            },
            Err(err) => last_err = Some(err.into()),
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("failed to open camera with any supported format")))
}

/// Opens the configured webcam and starts forwarding RGBA frames.
///
/// The camera is opened on the calling thread first so an unavailable device
/// is reported to the caller instead of dying silently inside the worker.
pub fn start_camera_stream(
    settings: &CameraSettings,
    frame_tx: Sender<Frame>,
) -> Result<CameraStream> {
    let index = CameraIndex::Index(settings.index);
    let opened = build_camera(&index, settings)
        .with_context(|| format!("Webcam not available: failed to open camera {}", settings.index))?;
    let device = opened.info().human_name();
    let format = opened.camera_format();
    log::info!(
        "camera {device} opened at {}x{} {:?}@{}fps (requested {}x{})",
        format.width(),
        format.height(),
        format.format(),
        format.frame_rate(),
        settings.width,
        settings.height
    );
    drop(opened);

    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();
    let thread_settings = settings.clone();

    let handle = thread::Builder::new()
        .name("camera".into())
        .spawn(move || {
            let mut camera = match build_camera(&index, &thread_settings) {
                Ok(cam) => cam,
                Err(err) => {
                    log::error!("failed to open camera: {err:?}");
                    return;
                }
            };

            let mut backoff = ReadBackoff::default();
            while !stop_flag.load(Ordering::Relaxed) {
                let read_start = Instant::now();
                let buffer = match camera.frame() {
                    Ok(buffer) => {
                        backoff.reset();
                        buffer
                    }
                    Err(err) => {
                        let Some(delay) = backoff.on_failure() else {
                            log::error!(
                                "camera failed {MAX_CONSECUTIVE_READ_FAILURES} reads in a row, giving up: {err:?}"
                            );
                            break;
                        };
                        if backoff.failures == 1 {
                            log::warn!(
                                "camera frame read failed (after {:?}): {err:?}",
                                read_start.elapsed()
                            );
                        } else {
                            log::debug!("camera frame read failed again, retrying in {delay:?}");
                        }
                        thread::sleep(delay);
                        continue;
                    }
                };

                let frame = match rgba_converter::convert_camera_frame(&buffer) {
                    Ok(frame) => frame,
                    Err(err) => {
                        log::warn!("failed to decode camera frame: {err:?}");
                        continue;
                    }
                };

                // Drop the frame if the detection loop is still busy.
                if let Err(TrySendError::Disconnected(_)) = frame_tx.try_send(frame) {
                    log::debug!("frame receiver gone, stopping capture");
                    break;
                }
            }

            let _ = camera.stop_stream();
        })
        .context("failed to spawn camera thread")?;

    Ok(CameraStream {
        device,
        stop,
        handle: Some(handle),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_backoff_grows_then_gives_up() {
        let mut backoff = ReadBackoff::default();
        assert_eq!(backoff.on_failure(), Some(Duration::from_millis(20)));
        assert_eq!(backoff.on_failure(), Some(Duration::from_millis(40)));
        assert_eq!(backoff.on_failure(), Some(Duration::from_millis(80)));

        for _ in 3..MAX_CONSECUTIVE_READ_FAILURES - 1 {
            let delay = backoff.on_failure().unwrap();
            assert!(delay <= READ_RETRY_MAX);
        }
        assert_eq!(backoff.on_failure(), None);
    }

    #[test]
    fn successful_read_resets_backoff() {
        let mut backoff = ReadBackoff::default();
        for _ in 0..10 {
            backoff.on_failure();
        }
        backoff.reset();
        assert_eq!(backoff.on_failure(), Some(READ_RETRY_BASE));
    }
}
