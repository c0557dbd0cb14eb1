//! ffmpeg-backed recorder
//!
//! Camera frames are written to ffmpeg's stdin. Microphone samples go over a
//! loopback TCP socket ffmpeg connects to as a second input. The encoded
//! container is read back from stdout and flushed as data chunks on every
//! timeslice.

use super::devices::{AudioFormat, CameraTrack, MicrophoneTrack, VideoFormat};
use super::{NativeStream, StreamRegistry};
use crate::capture::traits::{
    MediaRecorder, MediaTrack, RecorderBackend, RecorderEvent, RecorderEventSender, StreamHandle,
};
use crate::utils::error::{CaptureError, CaptureResult};
use anyhow::{bail, Context};
use std::collections::HashSet;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::TryRecvError;

const POLL_INTERVAL: Duration = Duration::from_millis(5);
const READ_BUFFER: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Webm,
    Mp4,
}

/// Container and encoders for one MIME type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFormat {
    pub container: Container,
    pub video_encoder: &'static str,
    pub audio_encoder: &'static str,
}

/// Parse `video/webm;codecs=vp9,opus` style MIME types. Returns `None` for
/// containers or codecs there is no encoder mapping for.
pub fn parse_mime_type(mime_type: &str) -> Option<OutputFormat> {
    let mut parts = mime_type.split(';').map(str::trim);
    let container = match parts.next()?.to_ascii_lowercase().as_str() {
        "video/webm" => Container::Webm,
        "video/mp4" => Container::Mp4,
        _ => return None,
    };

    let mut format = match container {
        Container::Webm => OutputFormat {
            container,
            video_encoder: "libvpx",
            audio_encoder: "libopus",
        },
        Container::Mp4 => OutputFormat {
            container,
            video_encoder: "libx264",
            audio_encoder: "aac",
        },
    };

    for param in parts {
        let Some(codecs) = param.strip_prefix("codecs=") else {
            continue;
        };
        for codec in codecs.trim_matches('"').split(',').map(str::trim) {
            let codec = codec.to_ascii_lowercase();
            match (container, codec.as_str()) {
                (Container::Webm, "vp8") => format.video_encoder = "libvpx",
                (Container::Webm, "vp9") => format.video_encoder = "libvpx-vp9",
                (Container::Webm, "opus") => format.audio_encoder = "libopus",
                (Container::Mp4, c) if c == "h264" || c.starts_with("avc1") => {
                    format.video_encoder = "libx264"
                }
                (Container::Mp4, c) if c == "aac" || c.starts_with("mp4a") => {
                    format.audio_encoder = "aac"
                }
                _ => return None,
            }
        }
    }

    Some(format)
}

/// Full ffmpeg argument list for a recording
pub fn ffmpeg_args(
    video: &VideoFormat,
    audio: Option<(&AudioFormat, u16)>,
    output: &OutputFormat,
) -> Vec<String> {
    let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error"].map(String::from).to_vec();

    if video.pixel_format == "mjpeg" {
        args.extend(["-f".to_string(), "mjpeg".to_string()]);
    } else {
        args.extend([
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pixel_format".to_string(),
            video.pixel_format.to_string(),
            "-video_size".to_string(),
            format!("{}x{}", video.width, video.height),
        ]);
    }
    args.extend([
        "-framerate".to_string(),
        video.fps.to_string(),
        "-i".to_string(),
        "pipe:0".to_string(),
    ]);

    if let Some((format, port)) = audio {
        args.extend([
            "-f".to_string(),
            "f32le".to_string(),
            "-ar".to_string(),
            format.sample_rate.to_string(),
            "-ac".to_string(),
            format.channels.to_string(),
            "-i".to_string(),
            format!("tcp://127.0.0.1:{port}"),
        ]);
    }

    args.extend([
        "-c:v".to_string(),
        output.video_encoder.to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
    ]);
    match output.container {
        Container::Webm => args.extend([
            "-deadline".to_string(),
            "realtime".to_string(),
            "-cpu-used".to_string(),
            "8".to_string(),
            "-b:v".to_string(),
            "2M".to_string(),
        ]),
        Container::Mp4 => args.extend(["-preset".to_string(), "veryfast".to_string()]),
    }

    if audio.is_some() {
        args.extend(["-c:a".to_string(), output.audio_encoder.to_string()]);
    } else {
        args.push("-an".to_string());
    }

    match output.container {
        Container::Webm => args.extend(["-f".to_string(), "webm".to_string()]),
        Container::Mp4 => args.extend([
            "-movflags".to_string(),
            "frag_keyframe+empty_moov+default_base_moof".to_string(),
            "-f".to_string(),
            "mp4".to_string(),
        ]),
    }
    args.push("pipe:1".to_string());
    args
}

/// Recorder surface backed by the system ffmpeg binary
pub struct FfmpegRecorderBackend {
    registry: StreamRegistry,
    encoders: HashSet<String>,
}

impl FfmpegRecorderBackend {
    /// Check that ffmpeg runs and collect its encoder list
    pub fn detect(registry: StreamRegistry) -> anyhow::Result<Self> {
        let output = Command::new("ffmpeg")
            .args(["-hide_banner", "-encoders"])
            .output()
            .context("failed to run ffmpeg")?;
        if !output.status.success() {
            bail!("ffmpeg -encoders exited with {}", output.status);
        }

        let encoders = parse_encoder_list(&String::from_utf8_lossy(&output.stdout));
        tracing::info!("ffmpeg available with {} encoders", encoders.len());
        Ok(Self { registry, encoders })
    }
}

/// Encoder names from `ffmpeg -encoders` output
fn parse_encoder_list(listing: &str) -> HashSet<String> {
    listing
        .lines()
        .skip_while(|line| !line.trim_start().starts_with("------"))
        .skip(1)
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(str::to_string)
        .collect()
}

impl RecorderBackend for FfmpegRecorderBackend {
    fn is_type_supported(&self, mime_type: &str) -> CaptureResult<bool> {
        Ok(parse_mime_type(mime_type).is_some_and(|format| {
            self.encoders.contains(format.video_encoder)
                && self.encoders.contains(format.audio_encoder)
        }))
    }

    fn create(
        &self,
        stream: StreamHandle,
        mime_type: &str,
        events: RecorderEventSender,
    ) -> CaptureResult<Box<dyn MediaRecorder>> {
        let native = self.registry.get(stream.id()).ok_or_else(|| {
            CaptureError::RecordingFailure(format!(
                "stream {} was not opened by this backend",
                stream.id()
            ))
        })?;
        let output = parse_mime_type(mime_type).ok_or_else(|| {
            CaptureError::RecordingFailure(format!("no encoder for {mime_type}"))
        })?;

        Ok(Box::new(FfmpegRecorder {
            stream: native,
            output,
            events,
            active: Arc::new(AtomicBool::new(false)),
        }))
    }
}

struct FfmpegRecorder {
    stream: Arc<NativeStream>,
    output: OutputFormat,
    events: RecorderEventSender,
    active: Arc<AtomicBool>,
}

impl FfmpegRecorder {
    fn spawn(&self, timeslice: Duration) -> anyhow::Result<()> {
        let camera = self.stream.camera.clone();
        let microphone = self.stream.microphone.clone();

        let audio_socket = match &microphone {
            Some(_) => {
                let listener = TcpListener::bind("127.0.0.1:0").context("failed to bind audio socket")?;
                listener.set_nonblocking(true)?;
                Some(listener)
            }
            None => None,
        };
        let audio_input = match (&microphone, &audio_socket) {
            (Some(mic), Some(listener)) => Some((mic.format(), listener.local_addr()?.port())),
            _ => None,
        };

        let args = ffmpeg_args(
            &camera.format(),
            audio_input.as_ref().map(|(format, port)| (format, *port)),
            &self.output,
        );
        tracing::debug!("Spawning ffmpeg {}", args.join(" "));

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("failed to start ffmpeg")?;

        let stdin = child.stdin.take().context("ffmpeg stdin unavailable")?;
        let active = self.active.clone();
        std::thread::Builder::new()
            .name("ffmpeg-video".to_string())
            .spawn(move || write_video(camera, stdin, active))?;

        if let (Some(microphone), Some(listener)) = (microphone, audio_socket) {
            let active = self.active.clone();
            std::thread::Builder::new()
                .name("ffmpeg-audio".to_string())
                .spawn(move || write_audio(microphone, listener, active))?;
        }

        let events = self.events.clone();
        std::thread::Builder::new()
            .name("ffmpeg-output".to_string())
            .spawn(move || read_output(child, timeslice, events))?;
        Ok(())
    }
}

impl MediaRecorder for FfmpegRecorder {
    fn start(&mut self, timeslice: Duration) -> CaptureResult<()> {
        if self.active.swap(true, Ordering::SeqCst) {
            return Err(CaptureError::RecordingFailure("recorder already started".to_string()));
        }
        self.spawn(timeslice).map_err(|e| {
            self.active.store(false, Ordering::SeqCst);
            CaptureError::RecordingFailure(format!("{e:#}"))
        })
    }

    fn stop(&mut self) {
        // Writers close their inputs, ffmpeg drains and the output reader
        // reports the stop once stdout hits EOF
        self.active.store(false, Ordering::SeqCst);
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl Drop for FfmpegRecorder {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

fn write_video(camera: Arc<CameraTrack>, mut stdin: ChildStdin, active: Arc<AtomicBool>) {
    let mut frames = camera.subscribe();
    let mut written: u64 = 0;

    while active.load(Ordering::SeqCst) {
        match frames.try_recv() {
            Ok(frame) => {
                if let Err(e) = stdin.write_all(&frame) {
                    tracing::warn!("ffmpeg stopped accepting frames: {}", e);
                    break;
                }
                written += 1;
            }
            Err(TryRecvError::Empty) => {
                if !camera.is_live() {
                    break;
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(TryRecvError::Lagged(skipped)) => {
                tracing::warn!("Encoder fell behind, dropped {} frames", skipped);
            }
            Err(TryRecvError::Closed) => break,
        }
    }

    // Dropping stdin signals EOF to ffmpeg
    drop(stdin);
    tracing::debug!("Video writer finished after {} frames", written);
}

fn write_audio(microphone: Arc<MicrophoneTrack>, listener: TcpListener, active: Arc<AtomicBool>) {
    let Some(mut socket) = accept_while(&listener, &active) else {
        tracing::warn!("ffmpeg never connected for audio");
        return;
    };
    let mut samples = microphone.subscribe();

    while active.load(Ordering::SeqCst) {
        match samples.try_recv() {
            Ok(buffer) => {
                let bytes: Vec<u8> = buffer.iter().flat_map(|s| s.to_le_bytes()).collect();
                if let Err(e) = socket.write_all(&bytes) {
                    tracing::warn!("ffmpeg stopped accepting audio: {}", e);
                    break;
                }
            }
            Err(TryRecvError::Empty) => {
                if !microphone.is_live() {
                    break;
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(TryRecvError::Lagged(skipped)) => {
                tracing::warn!("Encoder fell behind, dropped {} audio buffers", skipped);
            }
            Err(TryRecvError::Closed) => break,
        }
    }
    let _ = socket.shutdown(std::net::Shutdown::Write);
}

fn accept_while(listener: &TcpListener, active: &AtomicBool) -> Option<TcpStream> {
    while active.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((socket, _)) => {
                let _ = socket.set_nonblocking(false);
                return Some(socket);
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(POLL_INTERVAL)
            }
            Err(e) => {
                tracing::warn!("Audio socket accept failed: {}", e);
                return None;
            }
        }
    }
    None
}

fn read_output(mut child: Child, timeslice: Duration, events: RecorderEventSender) {
    let stderr_reader = child.stderr.take().map(|mut stderr| {
        std::thread::spawn(move || {
            let mut text = String::new();
            let _ = stderr.read_to_string(&mut text);
            text
        })
    });

    let Some(mut stdout) = child.stdout.take() else {
        let _ = events.send(RecorderEvent::Error(Some("ffmpeg stdout unavailable".to_string())));
        return;
    };

    let mut pending = Vec::new();
    let mut buffer = vec![0u8; READ_BUFFER];
    let mut last_flush = Instant::now();
    let read_result = loop {
        match stdout.read(&mut buffer) {
            Ok(0) => break Ok(()),
            Ok(n) => {
                pending.extend_from_slice(&buffer[..n]);
                if last_flush.elapsed() >= timeslice {
                    let _ = events.send(RecorderEvent::Data(std::mem::take(&mut pending)));
                    last_flush = Instant::now();
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => break Err(e),
        }
    };

    if !pending.is_empty() {
        let _ = events.send(RecorderEvent::Data(pending));
    }

    let status = child.wait();
    let stderr = stderr_reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default();

    match (read_result, status) {
        (Ok(()), Ok(status)) if status.success() => {
            let _ = events.send(RecorderEvent::Stopped);
        }
        (Err(e), _) => {
            let _ = events.send(RecorderEvent::Error(Some(format!("ffmpeg output: {e}"))));
        }
        (Ok(()), Ok(status)) => {
            let detail = stderr.lines().last().unwrap_or("").trim().to_string();
            let message = if detail.is_empty() {
                format!("ffmpeg exited with {status}")
            } else {
                format!("ffmpeg exited with {status}: {detail}")
            };
            let _ = events.send(RecorderEvent::Error(Some(message)));
        }
        (Ok(()), Err(e)) => {
            let _ = events.send(RecorderEvent::Error(Some(format!("ffmpeg wait: {e}"))));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mime_type() {
        let vp9 = parse_mime_type("video/webm;codecs=vp9,opus").unwrap();
        assert_eq!(vp9.container, Container::Webm);
        assert_eq!(vp9.video_encoder, "libvpx-vp9");
        assert_eq!(vp9.audio_encoder, "libopus");

        let plain = parse_mime_type("video/webm").unwrap();
        assert_eq!(plain.video_encoder, "libvpx");

        let mp4 = parse_mime_type("video/mp4").unwrap();
        assert_eq!(mp4.container, Container::Mp4);
        assert_eq!(mp4.video_encoder, "libx264");

        assert!(parse_mime_type("video/webm;codecs=av1").is_none());
        assert!(parse_mime_type("video/ogg").is_none());
    }

    #[test]
    fn test_parse_encoder_list() {
        let listing = "Encoders:\n V..... = Video\n ------\n V....D libx264  H.264\n A....D libopus  Opus\n";
        let encoders = parse_encoder_list(listing);
        assert!(encoders.contains("libx264"));
        assert!(encoders.contains("libopus"));
        assert_eq!(encoders.len(), 2);
    }

    #[test]
    fn test_ffmpeg_args_video_only() {
        let video = VideoFormat {
            width: 1280,
            height: 720,
            fps: 30,
            pixel_format: "yuyv422",
        };
        let output = parse_mime_type("video/mp4").unwrap();
        let args = ffmpeg_args(&video, None, &output);

        assert!(args.windows(2).any(|w| w == ["-video_size", "1280x720"]));
        assert!(args.contains(&"-an".to_string()));
        assert!(args.contains(&"frag_keyframe+empty_moov+default_base_moof".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("pipe:1"));
    }

    #[test]
    fn test_ffmpeg_args_with_audio_socket() {
        let video = VideoFormat {
            width: 640,
            height: 480,
            fps: 15,
            pixel_format: "mjpeg",
        };
        let audio = AudioFormat {
            sample_rate: 48000,
            channels: 2,
        };
        let output = parse_mime_type("video/webm;codecs=vp8,opus").unwrap();
        let args = ffmpeg_args(&video, Some((&audio, 40123)), &output);

        assert!(args.windows(2).any(|w| w == ["-f", "mjpeg"]));
        assert!(args.contains(&"tcp://127.0.0.1:40123".to_string()));
        assert!(args.windows(2).any(|w| w == ["-c:a", "libopus"]));
        assert!(!args.contains(&"-an".to_string()));
    }
}
