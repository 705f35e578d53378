//! Pumping captured audio into the shared buffer.
//!
//! The SDK does not capture audio itself. A platform layer implements
//! [`AudioSource`] (or pushes frames through [`channel_source`]) and
//! [`pump`] moves frames into a shared-buffer [`Writer`] until the source
//! ends or the pump is cancelled.

use crate::audio::AudioFrame;
use crate::audio::shared_buffer::Writer;
use crate::error::{BufferError, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Producer of captured audio frames.
#[async_trait]
pub trait AudioSource: Send {
    /// Next captured frame, or `None` once the source is exhausted.
    async fn next_frame(&mut self) -> Result<Option<AudioFrame>>;
}

/// An [`AudioSource`] fed from a platform capture callback.
pub struct ChannelSource {
    rx: mpsc::Receiver<AudioFrame>,
}

#[async_trait]
impl AudioSource for ChannelSource {
    async fn next_frame(&mut self) -> Result<Option<AudioFrame>> {
        Ok(self.rx.recv().await)
    }
}

/// Create a bounded channel-backed source.
///
/// Capture callbacks should use `try_send` on the returned sender so a slow
/// pump drops frames instead of stalling the audio thread.
#[must_use]
pub fn channel_source(capacity: usize) -> (mpsc::Sender<AudioFrame>, ChannelSource) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (tx, ChannelSource { rx })
}

/// Move frames from `source` into `writer` until the source ends, the writer
/// is superseded, or `cancel` fires.
///
/// The writer is finished when the pump returns, so readers stop cleanly
/// rather than hang.
///
/// # Errors
///
/// Returns the source's error; the stream is still finished first.
pub async fn pump<S: AudioSource>(
    mut source: S,
    writer: Writer<AudioFrame>,
    cancel: CancellationToken,
) -> Result<u64> {
    let mut frames: u64 = 0;
    info!("audio pump started");

    let outcome = loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("audio pump cancelled");
                break Ok(());
            }
            next = source.next_frame() => next,
        };

        match next {
            Ok(Some(frame)) => match writer.write(frame) {
                Ok(()) => frames += 1,
                Err(BufferError::WritePermissionDenied) => {
                    warn!("audio pump writer superseded, stopping");
                    break Ok(());
                }
                Err(e) => {
                    warn!(error = %e, "audio pump write failed, stopping");
                    break Ok(());
                }
            },
            Ok(None) => {
                debug!("audio source exhausted");
                break Ok(());
            }
            Err(e) => break Err(e),
        }
    };

    writer.finish();
    info!(frames, "audio pump stopped");
    outcome.map(|()| frames)
}

/// Convert interleaved multi-channel audio to mono by averaging channels.
#[must_use]
pub fn to_mono(data: &[f32], channels: u16) -> Vec<f32> {
    let ch = usize::from(channels.max(1));
    if ch == 1 {
        return data.to_vec();
    }
    data.chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Linear-interpolation resampler from `src_rate` to `dst_rate`.
///
/// Adequate for speech (48kHz → 16kHz): speech energy sits below 8kHz.
#[must_use]
pub fn downsample(samples: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if src_rate == dst_rate || samples.is_empty() || dst_rate == 0 {
        return samples.to_vec();
    }

    let ratio = f64::from(src_rate) / f64::from(dst_rate);
    let out_len = (samples.len() as f64 / ratio) as usize;
    let mut output = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos as usize;
        let frac = src_pos - idx as f64;

        let sample = if idx + 1 < samples.len() {
            f64::from(samples[idx]) * (1.0 - frac) + f64::from(samples[idx + 1]) * frac
        } else {
            f64::from(samples[idx.min(samples.len() - 1)])
        };

        output.push(sample as f32);
    }

    output
}

/// Build a pipeline frame from native interleaved capture data.
#[must_use]
pub fn frame_from_native(
    data: &[f32],
    channels: u16,
    native_rate: u32,
    target_rate: u32,
) -> AudioFrame {
    let mono = to_mono(data, channels);
    AudioFrame::new(downsample(&mono, native_rate, target_rate), target_rate)
}
