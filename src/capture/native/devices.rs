//! Camera and microphone tracks
//!
//! Each track runs its device on a dedicated thread (neither nokhwa cameras
//! nor cpal streams may move between threads) and fans the raw data out on a
//! broadcast channel.

use super::StreamRegistry;
use crate::capture::traits::{
    FacingMode, MediaDevices, MediaStream, MediaTrack, StreamConstraints, StreamHandle, TrackKind,
};
use crate::utils::error::{CaptureError, CaptureResult};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Sample, SampleFormat};
use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{ApiBackend, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use uuid::Uuid;

const FRAME_BUFFER: usize = 64;
const SAMPLE_BUFFER: usize = 256;

/// Camera index for a facing mode. Desktop hosts cannot tell which way a
/// camera points, so the first device stands in for the front camera.
pub fn camera_index(facing_mode: FacingMode) -> CameraIndex {
    match facing_mode {
        FacingMode::User => CameraIndex::Index(0),
        FacingMode::Environment => CameraIndex::Index(1),
    }
}

/// Negotiated camera output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// ffmpeg pixel format, or "mjpeg" for compressed frames
    pub pixel_format: &'static str,
}

/// Map a nokhwa frame format to its ffmpeg pixel format
pub fn ffmpeg_pixel_format(format: FrameFormat) -> &'static str {
    match format {
        FrameFormat::YUYV => "yuyv422",
        FrameFormat::NV12 => "nv12",
        FrameFormat::RAWRGB => "rgb24",
        FrameFormat::MJPEG => "mjpeg",
        FrameFormat::GRAY => "gray",
        other => {
            tracing::warn!("Unknown camera format {:?}, assuming yuyv422", other);
            "yuyv422"
        }
    }
}

/// Negotiated microphone output, interleaved f32
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

pub struct CameraTrack {
    index: CameraIndex,
    live: Arc<AtomicBool>,
    format: VideoFormat,
    frames: broadcast::Sender<Arc<[u8]>>,
}

impl CameraTrack {
    /// Open the camera on its own thread and wait for the first format report
    pub async fn open(index: CameraIndex) -> CaptureResult<Arc<Self>> {
        let live = Arc::new(AtomicBool::new(true));
        let (frames, _) = broadcast::channel(FRAME_BUFFER);
        let (ready_tx, ready_rx) = oneshot::channel();

        let thread_live = live.clone();
        let thread_frames = frames.clone();
        let thread_index = index.clone();
        std::thread::Builder::new()
            .name(format!("camera-{thread_index}"))
            .spawn(move || run_camera(thread_index, thread_live, thread_frames, ready_tx))?;

        let format = ready_rx
            .await
            .map_err(|_| CaptureError::AcquisitionFailure("camera thread exited".to_string()))??;

        Ok(Arc::new(Self {
            index,
            live,
            format,
            frames,
        }))
    }

    pub fn format(&self) -> VideoFormat {
        self.format
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<[u8]>> {
        self.frames.subscribe()
    }
}

impl MediaTrack for CameraTrack {
    fn kind(&self) -> TrackKind {
        TrackKind::Video
    }

    fn stop(&self) {
        if self.live.swap(false, Ordering::SeqCst) {
            tracing::info!("Camera {} track stopped", self.index);
        }
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

fn run_camera(
    index: CameraIndex,
    live: Arc<AtomicBool>,
    frames: broadcast::Sender<Arc<[u8]>>,
    ready: oneshot::Sender<CaptureResult<VideoFormat>>,
) {
    let requested = RequestedFormat::new::<RgbAFormat>(RequestedFormatType::AbsoluteHighestResolution);
    let mut camera = match Camera::new(index.clone(), requested) {
        Ok(camera) => camera,
        Err(e) => {
            let _ = ready.send(Err(CaptureError::AcquisitionFailure(format!(
                "camera {index}: {e}"
            ))));
            return;
        }
    };
    if let Err(e) = camera.open_stream() {
        let _ = ready.send(Err(CaptureError::AcquisitionFailure(format!(
            "camera {index} stream: {e}"
        ))));
        return;
    }

    let camera_format = camera.camera_format();
    let format = VideoFormat {
        width: camera_format.resolution().width(),
        height: camera_format.resolution().height(),
        fps: camera_format.frame_rate(),
        pixel_format: ffmpeg_pixel_format(camera_format.format()),
    };
    tracing::info!(
        "Camera {} opened: {}x{} @ {}fps ({})",
        index,
        format.width,
        format.height,
        format.fps,
        format.pixel_format
    );
    if ready.send(Ok(format)).is_err() {
        let _ = camera.stop_stream();
        return;
    }

    let mut frame_count: u64 = 0;
    while live.load(Ordering::SeqCst) {
        // Blocks until the camera delivers the next frame
        match camera.frame() {
            Ok(frame) => {
                // No receivers just means nothing is recording yet
                let _ = frames.send(Arc::from(frame.buffer()));
                frame_count += 1;
            }
            Err(e) => tracing::debug!("Failed to capture frame: {:?}", e),
        }
    }

    if let Err(e) = camera.stop_stream() {
        tracing::warn!("Error stopping camera {} stream: {:?}", index, e);
    }
    tracing::info!("Camera {} released after {} frames", index, frame_count);
}

pub struct MicrophoneTrack {
    live: Arc<AtomicBool>,
    format: AudioFormat,
    samples: broadcast::Sender<Arc<[f32]>>,
}

impl MicrophoneTrack {
    /// Open the default input device
    pub async fn open() -> CaptureResult<Arc<Self>> {
        let live = Arc::new(AtomicBool::new(true));
        let (samples, _) = broadcast::channel(SAMPLE_BUFFER);
        let (ready_tx, ready_rx) = oneshot::channel();

        let thread_live = live.clone();
        let thread_samples = samples.clone();
        std::thread::Builder::new()
            .name("microphone".to_string())
            .spawn(move || run_microphone(thread_live, thread_samples, ready_tx))?;

        let format = ready_rx.await.map_err(|_| {
            CaptureError::AcquisitionFailure("microphone thread exited".to_string())
        })??;

        Ok(Arc::new(Self {
            live,
            format,
            samples,
        }))
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<[f32]>> {
        self.samples.subscribe()
    }
}

impl MediaTrack for MicrophoneTrack {
    fn kind(&self) -> TrackKind {
        TrackKind::Audio
    }

    fn stop(&self) {
        if self.live.swap(false, Ordering::SeqCst) {
            tracing::info!("Microphone track stopped");
        }
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

fn run_microphone(
    live: Arc<AtomicBool>,
    samples: broadcast::Sender<Arc<[f32]>>,
    ready: oneshot::Sender<CaptureResult<AudioFormat>>,
) {
    let (stream, format) = match open_input_stream(samples) {
        Ok(opened) => opened,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready.send(Err(CaptureError::AcquisitionFailure(format!(
            "microphone stream: {e}"
        ))));
        return;
    }
    tracing::info!(
        "Microphone opened: {} Hz, {} channel(s)",
        format.sample_rate,
        format.channels
    );
    if ready.send(Ok(format)).is_err() {
        return;
    }

    // The cpal stream lives as long as this thread
    while live.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(20));
    }
    drop(stream);
    tracing::info!("Microphone released");
}

fn open_input_stream(
    samples: broadcast::Sender<Arc<[f32]>>,
) -> CaptureResult<(cpal::Stream, AudioFormat)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| CaptureError::AcquisitionFailure("no microphone found".to_string()))?;
    let supported = device
        .default_input_config()
        .map_err(|e| CaptureError::AcquisitionFailure(format!("microphone config: {e}")))?;

    let config: cpal::StreamConfig = supported.config();
    let format = AudioFormat {
        sample_rate: config.sample_rate.0,
        channels: config.channels,
    };

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_input_stream::<f32>(&device, &config, samples),
        SampleFormat::I16 => build_input_stream::<i16>(&device, &config, samples),
        SampleFormat::I32 => build_input_stream::<i32>(&device, &config, samples),
        SampleFormat::U16 => build_input_stream::<u16>(&device, &config, samples),
        SampleFormat::F64 => build_input_stream::<f64>(&device, &config, samples),
        other => {
            return Err(CaptureError::AcquisitionFailure(format!(
                "unsupported microphone sample format {other:?}"
            )))
        }
    }?;

    Ok((stream, format))
}

fn build_input_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    samples: broadcast::Sender<Arc<[f32]>>,
) -> CaptureResult<cpal::Stream>
where
    T: Sample + cpal::SizedSample + Send + 'static,
    f32: cpal::FromSample<T>,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let converted: Arc<[f32]> = data.iter().map(|s| f32::from_sample(*s)).collect();
                let _ = samples.send(converted);
            },
            |err| tracing::error!("Microphone stream error: {}", err),
            None,
        )
        .map_err(|e| CaptureError::AcquisitionFailure(format!("microphone stream: {e}")))
}

/// A camera plus, for the front role, the microphone
pub struct NativeStream {
    pub(crate) id: String,
    pub camera: Arc<CameraTrack>,
    pub microphone: Option<Arc<MicrophoneTrack>>,
}

impl MediaStream for NativeStream {
    fn id(&self) -> &str {
        &self.id
    }

    fn tracks(&self) -> Vec<Arc<dyn MediaTrack>> {
        let mut tracks: Vec<Arc<dyn MediaTrack>> = vec![self.camera.clone()];
        if let Some(microphone) = &self.microphone {
            tracks.push(microphone.clone());
        }
        tracks
    }
}

pub struct NativeDevices {
    registry: StreamRegistry,
}

impl NativeDevices {
    pub fn new(registry: StreamRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl MediaDevices for NativeDevices {
    async fn open_stream(&self, constraints: &StreamConstraints) -> CaptureResult<StreamHandle> {
        let camera = CameraTrack::open(camera_index(constraints.facing_mode)).await?;

        let microphone = match &constraints.audio {
            Some(audio) => {
                if audio.echo_cancellation || audio.noise_suppression {
                    tracing::debug!("Host audio processing is not available; recording raw input");
                }
                match MicrophoneTrack::open().await {
                    Ok(microphone) => Some(microphone),
                    Err(e) => {
                        camera.stop();
                        return Err(e);
                    }
                }
            }
            None => None,
        };

        let stream = Arc::new(NativeStream {
            id: Uuid::new_v4().to_string(),
            camera,
            microphone,
        });
        self.registry.insert(&stream);
        Ok(stream)
    }

    async fn count_video_inputs(&self) -> CaptureResult<usize> {
        let cameras = tokio::task::spawn_blocking(|| nokhwa::query(ApiBackend::Auto))
            .await
            .map_err(|e| CaptureError::AcquisitionFailure(format!("camera query task: {e}")))?
            .map_err(|e| CaptureError::AcquisitionFailure(format!("camera query: {e}")))?;
        Ok(cameras.len())
    }
}
