//! Audio input devices.
//!
//! Hardware drivers live outside codecast; they plug in through
//! [`AudioDevice`]. A [`DeviceLease`] owns an acquired device and releases it
//! exactly once, either explicitly or when dropped.

use crate::audio::SampleSink;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors raised while acquiring a device.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("device unavailable: {0}")]
    Unavailable(String),
}

/// An audio input that delivers interleaved `f32` samples to a sink.
pub trait AudioDevice: Send + 'static {
    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u16;

    /// Acquires the device and starts delivering samples to `sink`.
    ///
    /// May block (e.g. on a permission prompt).
    fn start(&mut self, sink: SampleSink) -> Result<(), DeviceError>;

    /// Stops delivery and releases the device.
    fn release(&mut self);
}

/// Owns an acquired device; releases it exactly once.
pub struct DeviceLease {
    device: Option<Box<dyn AudioDevice>>,
}

impl DeviceLease {
    /// Starts `device` and wraps it in a lease.
    ///
    /// If starting fails the device is released before returning.
    pub fn acquire(mut device: Box<dyn AudioDevice>, sink: SampleSink) -> Result<Self, DeviceError> {
        match device.start(sink) {
            Ok(()) => Ok(Self {
                device: Some(device),
            }),
            Err(e) => {
                device.release();
                Err(e)
            }
        }
    }

    /// Releases the device. Later calls are no-ops.
    pub fn release(&mut self) {
        if let Some(mut device) = self.device.take() {
            debug!("Releasing audio device");
            device.release();
        }
    }

    pub fn is_released(&self) -> bool {
        self.device.is_none()
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for DeviceLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceLease")
            .field("released", &self.is_released())
            .finish()
    }
}

/// Signal produced by a [`GeneratorDevice`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorKind {
    Silence,
    Tone,
}

/// Software device that produces silence or a 440 Hz tone in real time.
pub struct GeneratorDevice {
    kind: GeneratorKind,
    sample_rate: u32,
    channels: u16,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl GeneratorDevice {
    /// Delivery period.
    const PERIOD: Duration = Duration::from_millis(20);
    const TONE_HZ: f32 = 440.0;

    pub fn new(kind: GeneratorKind, sample_rate: u32, channels: u16) -> Self {
        Self {
            kind,
            sample_rate,
            channels: channels.max(1),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }
}

impl AudioDevice for GeneratorDevice {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn start(&mut self, sink: SampleSink) -> Result<(), DeviceError> {
        if self.sample_rate == 0 {
            return Err(DeviceError::Unavailable("sample rate must be positive".into()));
        }
        self.running.store(true, Ordering::Release);
        let running = Arc::clone(&self.running);
        let (kind, rate, channels) = (self.kind, self.sample_rate, self.channels);
        let frames_per_period = (rate as usize * Self::PERIOD.as_millis() as usize) / 1000;

        let worker = std::thread::Builder::new()
            .name("codecast-audio".into())
            .spawn(move || {
                let mut phase: f32 = 0.0;
                let step = Self::TONE_HZ * std::f32::consts::TAU / rate as f32;
                let mut block = Vec::with_capacity(frames_per_period * channels as usize);
                while running.load(Ordering::Acquire) {
                    block.clear();
                    for _ in 0..frames_per_period {
                        let value = match kind {
                            GeneratorKind::Silence => 0.0,
                            GeneratorKind::Tone => 0.2 * phase.sin(),
                        };
                        phase = (phase + step) % std::f32::consts::TAU;
                        block.extend(std::iter::repeat_n(value, channels as usize));
                    }
                    sink.push(&block);
                    std::thread::sleep(Self::PERIOD);
                }
            })
            .map_err(|e| DeviceError::Unavailable(e.to_string()))?;

        self.worker = Some(worker);
        Ok(())
    }

    fn release(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            warn!("Audio generator thread panicked");
        }
    }
}
