// SPDX-License-Identifier: MIT
use std::io::Write;

use tracing::{debug, trace};

use crate::media::{Decoded, DecodedFrame, Decoder, Image, SourceError};
use crate::progress::ProgressBar;

/// Extra decode attempts made when a frame fails or does not advance the timestamp.
pub const MAX_DECODE_RETRIES: u32 = 2;

const MS_PER_SECOND: u64 = 1_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplingState {
    pub sampling_period_ms: Option<u64>,
    pub last_emitted_timestamp: i64,
    pub frames_emitted: u64,
    pub frames_total_hint: Option<u64>,
}

impl SamplingState {
    #[must_use]
    pub fn new(sampling_rate: u32, frames_total_hint: Option<u64>) -> Self {
        let sampling_period_ms = (sampling_rate > 0).then(|| MS_PER_SECOND / u64::from(sampling_rate));
        Self {
            sampling_period_ms,
            // Far enough in the past that the first frame always clears the gate.
            last_emitted_timestamp: i64::MIN,
            frames_emitted: 0,
            frames_total_hint,
        }
    }

    #[must_use]
    pub fn passes_gate(&self, timestamp_ms: i64) -> bool {
        match self.sampling_period_ms {
            None => true,
            Some(period) => {
                let elapsed = timestamp_ms.saturating_sub(self.last_emitted_timestamp);
                elapsed >= i64::try_from(period).unwrap_or(i64::MAX)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampledFrame {
    pub image: Image,
    pub timestamp_ms: i64,
    /// Accepted decodes so far, including frames dropped by pacing.
    pub decode_position: u64,
}

/// Pull-based, rate-limited view over a [`Decoder`].
///
/// Every underlying frame is decoded exactly once; frames that arrive sooner than the
/// sampling period after the last emitted one are decoded and dropped.
pub struct PacedFrameSource<D: Decoder, W: Write = std::io::Stdout> {
    decoder: D,
    state: SamplingState,
    last_decoded_ms: Option<i64>,
    decode_position: u64,
    progress: Option<ProgressBar<W>>,
    exhausted: bool,
}

impl<D: Decoder> PacedFrameSource<D> {
    /// Wraps `decoder`, emitting at most `sampling_rate` frames per second of media time.
    /// A rate of `0` emits every decoded frame.
    pub fn new(decoder: D, sampling_rate: u32) -> Self {
        let state = SamplingState::new(sampling_rate, decoder.total_frames());
        Self {
            decoder,
            state,
            last_decoded_ms: None,
            decode_position: 0,
            progress: None,
            exhausted: false,
        }
    }
}

impl<D: Decoder, W: Write> PacedFrameSource<D, W> {
    /// Reports decode progress through `progress`.
    #[must_use]
    pub fn with_progress<W2: Write>(self, progress: ProgressBar<W2>) -> PacedFrameSource<D, W2> {
        PacedFrameSource {
            decoder: self.decoder,
            state: self.state,
            last_decoded_ms: self.last_decoded_ms,
            decode_position: self.decode_position,
            progress: Some(progress),
            exhausted: self.exhausted,
        }
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.decoder.is_live()
    }

    #[must_use]
    pub fn describe(&self) -> String {
        self.decoder.describe()
    }

    /// Returns the next frame that clears the pacing gate, or `None` once the stream is
    /// exhausted. Exhaustion is sticky.
    ///
    /// # Errors
    ///
    /// Propagates [`SourceError::Read`] from the backend; the source is exhausted after.
    pub fn next_frame(&mut self) -> Result<Option<SampledFrame>, SourceError> {
        loop {
            let frame = match self.decode_step() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    self.mark_exhausted();
                    return Ok(None);
                }
                Err(e) => {
                    self.mark_exhausted();
                    return Err(e);
                }
            };

            if !self.state.passes_gate(frame.timestamp_ms) {
                trace!(timestamp_ms = frame.timestamp_ms, "dropped by pacing gate");
                continue;
            }

            self.state.last_emitted_timestamp = frame.timestamp_ms;
            self.state.frames_emitted += 1;
            if let Some(progress) = self.progress.as_mut() {
                progress.update(self.decode_position);
            }

            return Ok(Some(SampledFrame {
                image: frame.image,
                timestamp_ms: frame.timestamp_ms,
                decode_position: self.decode_position,
            }));
        }
    }

    /// Decodes one frame, retrying when the result is ambiguous between a bad frame and
    /// the end of the stream.
    fn decode_step(&mut self) -> Result<Option<DecodedFrame>, SourceError> {
        if self.exhausted {
            return Ok(None);
        }

        let mut attempt = 0;
        loop {
            match self.decoder.decode()? {
                Decoded::EndOfStream => return Ok(None),
                Decoded::Frame(frame) if self.advances(frame.timestamp_ms) => {
                    if attempt > 0 {
                        debug!(attempt, timestamp_ms = frame.timestamp_ms, "decode recovered after retry");
                    }
                    self.last_decoded_ms = Some(frame.timestamp_ms);
                    self.decode_position += 1;
                    return Ok(Some(frame));
                }
                Decoded::Frame(frame) => {
                    trace!(
                        timestamp_ms = frame.timestamp_ms,
                        previous = ?self.last_decoded_ms,
                        "timestamp did not advance"
                    );
                }
                Decoded::Failed => trace!(attempt, "decode failed"),
            }

            if attempt == MAX_DECODE_RETRIES {
                debug!(
                    source = %self.decoder.describe(),
                    "no advancing frame after {} attempts, treating as end of stream",
                    MAX_DECODE_RETRIES + 1
                );
                return Ok(None);
            }
            attempt += 1;
        }
    }

    fn advances(&self, timestamp_ms: i64) -> bool {
        self.last_decoded_ms.is_none_or(|previous| timestamp_ms > previous)
    }

    fn mark_exhausted(&mut self) {
        if self.exhausted {
            return;
        }
        self.exhausted = true;
        if let Some(progress) = self.progress.as_mut() {
            progress.finish();
        }
        debug!(
            source = %self.decoder.describe(),
            decoded = self.decode_position,
            emitted = self.state.frames_emitted,
            hint = ?self.state.frames_total_hint,
            "source exhausted"
        );
    }
}
