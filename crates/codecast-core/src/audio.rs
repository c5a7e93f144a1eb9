//! Audio sample capture and clip export.
//!
//! The capture buffer is fed by device callbacks through a [`SampleSink`].
//! Samples are only kept while the capture is recording, and `clear()` drops
//! everything accumulated so far, so pre-roll audio captured before the
//! recording transition never reaches the exported clip.

use codecast_proto::AudioClip;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// MIME type of exported clips.
pub const CLIP_MIME: &str = "audio/wav";

/// Samples encoded between cancellation checks.
const CANCEL_CHECK_INTERVAL: usize = 4096;

/// Errors raised while exporting a clip.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("wav encoding failed: {0}")]
    Encode(#[from] hound::Error),

    #[error("audio export cancelled")]
    Cancelled,

    #[error("audio export task failed: {0}")]
    Task(String),
}

#[derive(Debug, Default)]
struct CaptureBuffer {
    samples: Mutex<Vec<f32>>,
    capturing: AtomicBool,
}

/// Handle given to audio devices for delivering samples.
#[derive(Debug, Clone)]
pub struct SampleSink {
    buffer: Arc<CaptureBuffer>,
}

impl SampleSink {
    /// Appends interleaved samples. Ignored unless the capture is recording.
    pub fn push(&self, samples: &[f32]) {
        if !self.buffer.capturing.load(Ordering::Acquire) {
            return;
        }
        if let Ok(mut buf) = self.buffer.samples.lock() {
            buf.extend_from_slice(samples);
        }
    }
}

/// Session-lifetime sample buffer.
#[derive(Debug, Clone)]
pub struct AudioCapture {
    buffer: Arc<CaptureBuffer>,
    sample_rate: u32,
    channels: u16,
}

impl AudioCapture {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            buffer: Arc::new(CaptureBuffer::default()),
            sample_rate,
            channels: channels.max(1),
        }
    }

    /// Sink to hand to the device.
    pub fn sink(&self) -> SampleSink {
        SampleSink {
            buffer: Arc::clone(&self.buffer),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Drops all buffered samples.
    pub fn clear(&self) {
        if let Ok(mut buf) = self.buffer.samples.lock() {
            buf.clear();
        }
    }

    /// Starts accumulating samples.
    pub fn record(&self) {
        self.buffer.capturing.store(true, Ordering::Release);
    }

    /// Stops accumulating samples; buffered samples are kept for export.
    pub fn stop(&self) {
        self.buffer.capturing.store(false, Ordering::Release);
    }

    pub fn is_recording(&self) -> bool {
        self.buffer.capturing.load(Ordering::Acquire)
    }

    /// Number of buffered interleaved samples.
    pub fn sample_count(&self) -> usize {
        self.buffer.samples.lock().map(|b| b.len()).unwrap_or(0)
    }

    /// Encodes the buffered samples into a WAV clip on a blocking task.
    ///
    /// The returned [`PendingClip`] can be awaited or cancelled; cancelling
    /// `cancel` aborts the export between encoding chunks.
    pub fn export(&self, cancel: CancellationToken) -> PendingClip {
        let samples = self
            .buffer
            .samples
            .lock()
            .map(|b| b.clone())
            .unwrap_or_default();
        let (rate, channels) = (self.sample_rate, self.channels);
        let token = cancel.clone();
        debug!(samples = samples.len(), rate, channels, "Exporting audio clip");

        let task = tokio::task::spawn_blocking(move || {
            let encoded = encode_wav(&samples, rate, channels, &token)?;
            let frames = samples.len() as u64 / u64::from(channels);
            let duration_ms = if rate == 0 {
                0
            } else {
                frames * 1000 / u64::from(rate)
            };
            Ok(AudioClip::new(
                CLIP_MIME,
                &encoded,
                samples.len() as u64,
                duration_ms,
            ))
        });

        PendingClip { task, cancel }
    }
}

/// An in-flight clip export.
#[derive(Debug)]
pub struct PendingClip {
    task: JoinHandle<Result<AudioClip, AudioError>>,
    cancel: CancellationToken,
}

impl PendingClip {
    /// Requests cancellation without waiting.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the export to finish or be cancelled.
    pub async fn wait(self) -> Result<AudioClip, AudioError> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(AudioError::Cancelled),
            joined = self.task => match joined {
                Ok(result) => result,
                Err(e) => {
                    warn!(error = %e, "Audio export task panicked or was aborted");
                    Err(AudioError::Task(e.to_string()))
                }
            },
        }
    }
}

/// Encodes interleaved `f32` samples as 16-bit PCM WAV bytes.
pub fn encode_wav(
    samples: &[f32],
    sample_rate: u32,
    channels: u16,
    cancel: &CancellationToken,
) -> Result<Vec<u8>, AudioError> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for chunk in samples.chunks(CANCEL_CHECK_INTERVAL) {
            if cancel.is_cancelled() {
                return Err(AudioError::Cancelled);
            }
            for &sample in chunk {
                let int_sample = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
                writer.write_sample(int_sample)?;
            }
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}
