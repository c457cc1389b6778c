//! Microphone capture: scoped device access, ambient-noise calibration and
//! energy-based utterance boundaries.

use super::{AudioClip, UtteranceSource};
use crate::error::{Error, Result};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, StreamConfig};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Capture format: 16 kHz mono, what speech endpoints expect.
const SAMPLE_RATE: u32 = 16_000;
/// How long to sample the room before listening for speech.
const CALIBRATION: Duration = Duration::from_secs(1);
/// Silence this long after speech closes the utterance.
const PAUSE: Duration = Duration::from_millis(800);
/// Polling interval for the shared sample buffer.
const POLL: Duration = Duration::from_millis(50);
/// Energy multiplier over the ambient floor that counts as speech.
const SPEECH_FACTOR: f32 = 1.75;
/// Threshold floor for near-silent rooms.
const MIN_THRESHOLD: f32 = 0.01;

/// Default-device microphone. The device is opened per capture and released
/// as soon as the utterance ends.
pub struct Microphone;

impl Microphone {
    pub fn new() -> Self {
        Self
    }
}

impl Default for Microphone {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UtteranceSource for Microphone {
    async fn capture(&mut self) -> Result<AudioClip> {
        // Device polling is blocking by nature; keep it off the async workers.
        tokio::task::block_in_place(capture_utterance)
    }
}

fn capture_utterance() -> Result<AudioClip> {
    let mic = OpenMic::open()?;
    let threshold = mic.calibrate_ambient_noise();
    let samples = mic.record_utterance(threshold);
    drop(mic);
    encode_wav(&samples)
}

/// An open input stream. Dropping it stops capture and releases the device.
struct OpenMic {
    _stream: cpal::Stream,
    buffer: Arc<Mutex<Vec<f32>>>,
}

impl OpenMic {
    fn open() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::audio("no input device available"))?;
        let config = StreamConfig {
            channels: 1,
            sample_rate: SampleRate(SAMPLE_RATE),
            buffer_size: BufferSize::Default,
        };

        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buffer);
        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut sink) = sink.lock() {
                        sink.extend_from_slice(data);
                    }
                },
                |err| warn!(error = %err, "input stream error"),
                None,
            )
            .map_err(|e| Error::audio(format!("cannot open input stream: {e}")))?;
        stream.play()
            .map_err(|e| Error::audio(format!("cannot start capture: {e}")))?;

        debug!(device = %device.name().unwrap_or_default(), "microphone open");
        Ok(Self {
            _stream: stream,
            buffer,
        })
    }

    fn drain(&self) -> Vec<f32> {
        self.buffer
            .lock()
            .map(|mut samples| std::mem::take(&mut *samples))
            .unwrap_or_default()
    }

    /// Sample the room for a moment; the speech threshold sits above the
    /// ambient energy floor.
    fn calibrate_ambient_noise(&self) -> f32 {
        std::thread::sleep(CALIBRATION);
        let ambient = rms(&self.drain());
        let threshold = (ambient * SPEECH_FACTOR).max(MIN_THRESHOLD);
        debug!(ambient, threshold, "ambient noise calibrated");
        threshold
    }

    /// Discard leading silence, then record until the speaker pauses. There
    /// is no overall deadline; capture waits as long as the speaker does.
    fn record_utterance(&self, threshold: f32) -> Vec<f32> {
        let mut samples = Vec::new();
        let mut last_voice: Option<Instant> = None;
        loop {
            std::thread::sleep(POLL);
            let block = self.drain();
            let voiced = rms(&block) >= threshold;
            match last_voice {
                None if voiced => {
                    samples.extend_from_slice(&block);
                    last_voice = Some(Instant::now());
                }
                None => {}
                Some(since) => {
                    samples.extend_from_slice(&block);
                    if voiced {
                        last_voice = Some(Instant::now());
                    } else if since.elapsed() >= PAUSE {
                        break;
                    }
                }
            }
        }
        debug!(samples = samples.len(), "utterance ended");
        samples
    }
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
}

/// Encode to 16-bit mono WAV, the shape transcription endpoints expect.
fn encode_wav(samples: &[f32]) -> Result<AudioClip> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    let mut writer = hound::WavWriter::new(&mut cursor, spec)
        .map_err(|e| Error::audio(format!("cannot encode wav: {e}")))?;
    for &sample in samples {
        let value = (sample * f32::from(i16::MAX)).clamp(i16::MIN.into(), i16::MAX.into()) as i16;
        writer
            .write_sample(value)
            .map_err(|e| Error::audio(format!("cannot encode wav: {e}")))?;
    }
    writer
        .finalize()
        .map_err(|e| Error::audio(format!("cannot encode wav: {e}")))?;

    Ok(AudioClip {
        wav: cursor.into_inner(),
        duration_secs: samples.len() as f32 / SAMPLE_RATE as f32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_of_silence_is_zero() {
        assert_eq!(rms(&[]), 0.0);
        assert_eq!(rms(&[0.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn rms_of_constant_signal_is_its_amplitude() {
        let signal = [0.5f32; 1600];
        assert!((rms(&signal) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn wav_encoding_carries_duration() {
        let samples = vec![0.0f32; SAMPLE_RATE as usize / 2];
        let clip = encode_wav(&samples).unwrap();
        assert!((clip.duration_secs - 0.5).abs() < 1e-6);
        // RIFF header plus 2 bytes per sample.
        assert_eq!(clip.wav.len(), 44 + samples.len() * 2);
        assert_eq!(&clip.wav[..4], b"RIFF");
        assert_eq!(&clip.wav[8..12], b"WAVE");
    }
}
