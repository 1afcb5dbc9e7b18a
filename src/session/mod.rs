// SPDX-License-Identifier: MIT
pub mod interrupt;

use std::fmt;
use std::io::{self, Write};

use anyhow::Result;
use tracing::{debug, info, trace, warn};

use crate::display::SessionView;
use crate::media::{Decoder, SourceError};
use crate::sampler::paced::PacedFrameSource;
use crate::scorer::{DetectionResult, FaceId, OrientationHint, Region, Scorer};
pub use interrupt::{InterruptHandle, InterruptLatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    SourceExhausted,
    ScoreThresholdReached,
    UserInterrupted,
    CancelKeyPressed,
    SourceError,
}

impl TerminationReason {
    #[must_use]
    pub fn is_error(self) -> bool {
        self == Self::SourceError
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::SourceExhausted => "end of source reached",
            Self::ScoreThresholdReached => "registration score reached 100",
            Self::UserInterrupted => "interrupted",
            Self::CancelKeyPressed => "cancelled from the keyboard",
            Self::SourceError => "video source failed",
        };
        f.write_str(text)
    }
}

/// Registration score, always within `0..=100`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct SessionScore(u8);

impl SessionScore {
    pub const ZERO: Self = Self(0);
    pub const MAX: Self = Self(100);

    #[must_use]
    pub fn from_reported(score: i32) -> Self {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let clamped = score.clamp(0, 100) as u8;
        Self(clamped)
    }

    #[must_use]
    pub fn value(self) -> u8 {
        self.0
    }

    #[must_use]
    pub fn is_max(self) -> bool {
        self == Self::MAX
    }
}

impl fmt::Display for SessionScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub identifier: Option<FaceId>,
    pub region: Option<Region>,
    /// End the session as soon as the score reaches 100.
    pub stop_at_threshold: bool,
}

impl SessionConfig {
    #[must_use]
    pub fn registration(identifier: FaceId, region: Option<Region>) -> Self {
        Self {
            identifier: Some(identifier),
            region,
            stop_at_threshold: true,
        }
    }

    #[must_use]
    pub fn analysis(region: Option<Region>) -> Self {
        Self {
            identifier: None,
            region,
            stop_at_threshold: false,
        }
    }
}

/// What the view is asked to show after every change.
#[derive(Debug, Clone, Copy)]
pub struct SessionStatus<'a> {
    pub score: SessionScore,
    pub hints: &'a [OrientationHint],
    pub frames_scored: u64,
    pub frames_with_detection: u64,
    pub last_timestamp_ms: Option<i64>,
}

#[derive(Debug)]
pub struct SessionOutcome {
    pub reason: TerminationReason,
    pub score: SessionScore,
    pub frames_scored: u64,
    pub frames_with_detection: u64,
    pub source_error: Option<SourceError>,
}

impl SessionOutcome {
    #[must_use]
    pub fn detection_percent(&self) -> f64 {
        if self.frames_scored == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let percent = self.frames_with_detection as f64 * 100.0 / self.frames_scored as f64;
        percent
    }
}

/// Receives every scored frame, detected or not.
pub trait FrameSink {
    /// # Errors
    ///
    /// Returns an error if the frame cannot be recorded; the session stops.
    fn record(&mut self, timestamp_ms: i64, result: &DetectionResult) -> Result<()>;
}

#[derive(Default)]
struct Tally {
    score: SessionScore,
    hints: Vec<OrientationHint>,
    frames_scored: u64,
    frames_with_detection: u64,
    last_timestamp_ms: Option<i64>,
}

impl Tally {
    fn status(&self) -> SessionStatus<'_> {
        SessionStatus {
            score: self.score,
            hints: &self.hints,
            frames_scored: self.frames_scored,
            frames_with_detection: self.frames_with_detection,
            last_timestamp_ms: self.last_timestamp_ms,
        }
    }
}

/// Drives one acquisition + scoring run to exactly one [`TerminationReason`].
pub struct Session<'a, S: Scorer, V: SessionView> {
    config: SessionConfig,
    scorer: &'a mut S,
    view: &'a mut V,
    interrupt: InterruptHandle,
    sink: Option<&'a mut dyn FrameSink>,
}

impl<'a, S: Scorer, V: SessionView> Session<'a, S, V> {
    pub fn new(
        config: SessionConfig,
        scorer: &'a mut S,
        view: &'a mut V,
        interrupt: InterruptHandle,
    ) -> Self {
        Self {
            config,
            scorer,
            view,
            interrupt,
            sink: None,
        }
    }

    #[must_use]
    pub fn with_sink(mut self, sink: &'a mut dyn FrameSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Runs until the source ends, the score reaches 100 (when configured), or the user
    /// stops the session. The source is released before this returns.
    ///
    /// # Errors
    ///
    /// Scorer, sink and view failures are fatal and returned as errors. Source read
    /// failures are not: they end the session with [`TerminationReason::SourceError`].
    pub fn run<D: Decoder, W: Write>(
        mut self,
        mut source: PacedFrameSource<D, W>,
    ) -> Result<SessionOutcome> {
        let uri = source.describe();
        let live = source.is_live();
        debug!(source = %uri, live, identifier = ?self.config.identifier, "session started");

        let mut tally = Tally::default();
        self.view.render(&tally.status())?;

        let mut source_error = None;
        let reason = loop {
            if self.interrupt.is_set() {
                break TerminationReason::UserInterrupted;
            }
            if self.view.cancel_requested()? {
                break TerminationReason::CancelKeyPressed;
            }

            let next = source.next_frame();
            // A signal that landed during a blocking decode wins over whatever the decode
            // returned, including the end of the stream.
            if self.interrupt.is_set() {
                break TerminationReason::UserInterrupted;
            }
            let frame = match next {
                Ok(Some(frame)) => frame,
                Ok(None) if live => {
                    source_error = Some(SourceError::Read {
                        uri: uri.clone(),
                        source: io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "device stopped delivering frames",
                        ),
                    });
                    break TerminationReason::SourceError;
                }
                Ok(None) => break TerminationReason::SourceExhausted,
                Err(e) => {
                    source_error = Some(e);
                    break TerminationReason::SourceError;
                }
            };

            let region = self
                .config
                .region
                .map_or_else(|| Region::full(&frame.image), |r| r.clamped_to(&frame.image));
            let result = self
                .scorer
                .score(&frame.image, region, self.config.identifier)?;

            trace!(
                timestamp_ms = frame.timestamp_ms,
                decode_position = frame.decode_position,
                detected = result.detected,
                score = result.score,
                "frame scored"
            );
            tally.frames_scored += 1;
            tally.last_timestamp_ms = Some(frame.timestamp_ms);
            if let Some(sink) = self.sink.as_mut() {
                sink.record(frame.timestamp_ms, &result)?;
            }

            if result.detected {
                tally.frames_with_detection += 1;
                tally.score = SessionScore::from_reported(result.score);
                tally.hints = result.orientation_hints;
                self.view.render(&tally.status())?;
            }

            if self.config.stop_at_threshold && tally.score.is_max() {
                break TerminationReason::ScoreThresholdReached;
            }
        };

        drop(source);

        if let Some(e) = &source_error {
            warn!(source = %uri, error = %e, "video source failed");
        }
        info!(
            source = %uri,
            %reason,
            score = tally.score.value(),
            frames_scored = tally.frames_scored,
            frames_with_detection = tally.frames_with_detection,
            "session finished"
        );

        let outcome = SessionOutcome {
            reason,
            score: tally.score,
            frames_scored: tally.frames_scored,
            frames_with_detection: tally.frames_with_detection,
            source_error,
        };
        self.view.finish(&outcome)?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use anyhow::bail;

    use super::*;
    use crate::media::{Decoded, Image};
    use crate::sampler::paced::tests::{ScriptedDecoder, Step};

    /// Replays canned scores; `None` means "no face".
    struct ScriptedScorer {
        scores: VecDeque<Option<i32>>,
        seen: Vec<(Region, Option<FaceId>)>,
        trip_on_call: Option<(usize, InterruptHandle)>,
        fail_on_call: Option<usize>,
    }

    impl ScriptedScorer {
        fn new(scores: &[Option<i32>]) -> Self {
            Self {
                scores: scores.iter().copied().collect(),
                seen: Vec::new(),
                trip_on_call: None,
                fail_on_call: None,
            }
        }
    }

    impl Scorer for ScriptedScorer {
        fn score(
            &mut self,
            _image: &Image,
            region: Region,
            identifier: Option<FaceId>,
        ) -> Result<DetectionResult> {
            self.seen.push((region, identifier));
            let call = self.seen.len();
            if self.fail_on_call == Some(call) {
                bail!("engine lost its model");
            }
            if let Some((at, handle)) = &self.trip_on_call
                && *at == call
            {
                handle.trip();
            }
            Ok(match self.scores.pop_front().flatten() {
                Some(score) => DetectionResult {
                    detected: true,
                    score,
                    orientation_hints: vec![OrientationHint::Left],
                },
                None => DetectionResult::not_detected(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingView {
        rendered: Vec<u8>,
        cancel_after_polls: Option<usize>,
        polls: usize,
        finished: Option<TerminationReason>,
    }

    impl SessionView for RecordingView {
        fn render(&mut self, status: &SessionStatus<'_>) -> Result<()> {
            self.rendered.push(status.score.value());
            Ok(())
        }

        fn cancel_requested(&mut self) -> Result<bool> {
            self.polls += 1;
            Ok(self.cancel_after_polls.is_some_and(|n| self.polls > n))
        }

        fn finish(&mut self, outcome: &SessionOutcome) -> Result<()> {
            self.finished = Some(outcome.reason);
            Ok(())
        }
    }

    #[derive(Default)]
    struct VecSink(Vec<(i64, bool)>);

    impl FrameSink for VecSink {
        fn record(&mut self, timestamp_ms: i64, result: &DetectionResult) -> Result<()> {
            self.0.push((timestamp_ms, result.detected));
            Ok(())
        }
    }

    fn frames(n: i64) -> ScriptedDecoder {
        let timestamps: Vec<i64> = (0..n).map(|i| i * 100).collect();
        ScriptedDecoder::timestamps(&timestamps)
    }

    fn run(
        decoder: ScriptedDecoder,
        config: SessionConfig,
        scorer: &mut ScriptedScorer,
        view: &mut RecordingView,
        latch: &InterruptLatch,
    ) -> SessionOutcome {
        let source = PacedFrameSource::new(decoder, 0);
        Session::new(config, scorer, view, latch.handle())
            .run(source)
            .unwrap()
    }

    #[test]
    fn stops_the_first_time_score_reaches_100() {
        let latch = InterruptLatch::new();
        let mut scorer = ScriptedScorer::new(&[Some(20), None, Some(60), Some(100), Some(100)]);
        let mut view = RecordingView::default();
        let outcome = run(frames(10), SessionConfig::registration(4, None), &mut scorer, &mut view, &latch);

        assert_eq!(outcome.reason, TerminationReason::ScoreThresholdReached);
        assert_eq!(outcome.score, SessionScore::MAX);
        assert_eq!(outcome.frames_scored, 4);
        assert_eq!(outcome.frames_with_detection, 3);
        assert_eq!(view.rendered, vec![0, 20, 60, 100]);
        assert_eq!(view.finished, Some(TerminationReason::ScoreThresholdReached));
        assert!(scorer.seen.iter().all(|(_, id)| *id == Some(4)));
    }

    #[test]
    fn reported_score_is_clamped() {
        let latch = InterruptLatch::new();
        let mut scorer = ScriptedScorer::new(&[Some(-5), Some(250)]);
        let mut view = RecordingView::default();
        let outcome = run(frames(5), SessionConfig::registration(1, None), &mut scorer, &mut view, &latch);

        assert_eq!(view.rendered, vec![0, 0, 100]);
        assert_eq!(outcome.reason, TerminationReason::ScoreThresholdReached);
        assert_eq!(outcome.frames_scored, 2);
    }

    #[test]
    fn analysis_ignores_the_threshold() {
        let latch = InterruptLatch::new();
        let mut scorer = ScriptedScorer::new(&[Some(100), Some(100), None]);
        let mut view = RecordingView::default();
        let mut sink = VecSink::default();
        let source = PacedFrameSource::new(frames(3), 0);
        let outcome = Session::new(SessionConfig::analysis(None), &mut scorer, &mut view, latch.handle())
            .with_sink(&mut sink)
            .run(source)
            .unwrap();

        assert_eq!(outcome.reason, TerminationReason::SourceExhausted);
        assert_eq!(outcome.frames_scored, 3);
        assert!((outcome.detection_percent() - 66.666).abs() < 0.01);
        assert_eq!(sink.0, vec![(0, true), (100, true), (200, false)]);
        assert!(scorer.seen.iter().all(|(_, id)| id.is_none()));
    }

    #[test]
    fn empty_source_exhausts_immediately_with_zero_score() {
        let latch = InterruptLatch::new();
        let mut scorer = ScriptedScorer::new(&[]);
        let mut view = RecordingView::default();
        let outcome = run(
            ScriptedDecoder::new(vec![]),
            SessionConfig::registration(1, None),
            &mut scorer,
            &mut view,
            &latch,
        );

        assert_eq!(outcome.reason, TerminationReason::SourceExhausted);
        assert_eq!(outcome.score, SessionScore::ZERO);
        assert_eq!(outcome.frames_scored, 0);
        assert_eq!(view.rendered, vec![0]);
    }

    #[test]
    fn tripped_latch_stops_before_the_first_frame() {
        let latch = InterruptLatch::new();
        latch.handle().trip();
        let mut scorer = ScriptedScorer::new(&[Some(10)]);
        let mut view = RecordingView::default();
        let outcome = run(frames(3), SessionConfig::registration(1, None), &mut scorer, &mut view, &latch);

        assert_eq!(outcome.reason, TerminationReason::UserInterrupted);
        assert!(scorer.seen.is_empty());
    }

    #[test]
    fn interrupt_mid_session_stops_within_one_frame() {
        let latch = InterruptLatch::new();
        let mut scorer = ScriptedScorer::new(&[Some(10), Some(20), Some(30), Some(40)]);
        scorer.trip_on_call = Some((2, latch.handle()));
        let mut view = RecordingView::default();
        let outcome = run(frames(10), SessionConfig::registration(1, None), &mut scorer, &mut view, &latch);

        assert_eq!(outcome.reason, TerminationReason::UserInterrupted);
        assert_eq!(outcome.frames_scored, 2);
        assert_eq!(outcome.score.value(), 20);
    }

    /// Trips the latch while "blocked" in a decode.
    struct TrippingDecoder {
        inner: ScriptedDecoder,
        trip_at_call: usize,
        handle: InterruptHandle,
    }

    impl Decoder for TrippingDecoder {
        fn decode(&mut self) -> Result<Decoded, SourceError> {
            if self.inner.calls + 1 == self.trip_at_call {
                self.handle.trip();
            }
            self.inner.decode()
        }

        fn describe(&self) -> String {
            self.inner.describe()
        }
    }

    #[test]
    fn interrupt_during_decode_skips_scoring() {
        let latch = InterruptLatch::new();
        let decoder = TrippingDecoder {
            inner: frames(5),
            trip_at_call: 2,
            handle: latch.handle(),
        };
        let mut scorer = ScriptedScorer::new(&[Some(10), Some(20)]);
        let mut view = RecordingView::default();
        let outcome = Session::new(
            SessionConfig::registration(1, None),
            &mut scorer,
            &mut view,
            latch.handle(),
        )
        .run(PacedFrameSource::new(decoder, 0))
        .unwrap();

        assert_eq!(outcome.reason, TerminationReason::UserInterrupted);
        assert_eq!(scorer.seen.len(), 1);
    }

    #[test]
    fn interrupt_during_the_final_decode_is_not_exhaustion() {
        let latch = InterruptLatch::new();
        let decoder = TrippingDecoder {
            inner: frames(1),
            trip_at_call: 2,
            handle: latch.handle(),
        };
        let mut scorer = ScriptedScorer::new(&[Some(10)]);
        let mut view = RecordingView::default();
        let outcome = Session::new(
            SessionConfig::registration(1, None),
            &mut scorer,
            &mut view,
            latch.handle(),
        )
        .run(PacedFrameSource::new(decoder, 0))
        .unwrap();

        assert_eq!(outcome.reason, TerminationReason::UserInterrupted);
        assert_eq!(outcome.frames_scored, 1);
    }

    #[test]
    fn interrupt_during_a_failing_read_is_not_a_source_error() {
        let latch = InterruptLatch::new();
        let decoder = TrippingDecoder {
            inner: ScriptedDecoder::new(vec![Step::Frame(0, 1), Step::ReadError]),
            trip_at_call: 2,
            handle: latch.handle(),
        };
        let mut scorer = ScriptedScorer::new(&[Some(10)]);
        let mut view = RecordingView::default();
        let outcome = Session::new(
            SessionConfig::registration(1, None),
            &mut scorer,
            &mut view,
            latch.handle(),
        )
        .run(PacedFrameSource::new(decoder, 0))
        .unwrap();

        assert_eq!(outcome.reason, TerminationReason::UserInterrupted);
        assert!(outcome.source_error.is_none());
    }

    #[test]
    fn cancel_key_ends_the_session() {
        let latch = InterruptLatch::new();
        let mut scorer = ScriptedScorer::new(&[Some(10), Some(20), Some(30)]);
        let mut view = RecordingView {
            cancel_after_polls: Some(2),
            ..RecordingView::default()
        };
        let outcome = run(frames(10), SessionConfig::registration(1, None), &mut scorer, &mut view, &latch);

        assert_eq!(outcome.reason, TerminationReason::CancelKeyPressed);
        assert_eq!(outcome.frames_scored, 2);
    }

    #[test]
    fn live_source_running_dry_is_a_source_error() {
        let latch = InterruptLatch::new();
        let mut decoder = frames(2);
        decoder.live = true;
        let mut scorer = ScriptedScorer::new(&[None, None]);
        let mut view = RecordingView::default();
        let outcome = run(decoder, SessionConfig::registration(1, None), &mut scorer, &mut view, &latch);

        assert_eq!(outcome.reason, TerminationReason::SourceError);
        assert!(outcome.reason.is_error());
        assert!(matches!(outcome.source_error, Some(SourceError::Read { .. })));
    }

    #[test]
    fn read_error_becomes_source_error() {
        let latch = InterruptLatch::new();
        let decoder = ScriptedDecoder::new(vec![Step::Frame(0, 1), Step::ReadError]);
        let mut scorer = ScriptedScorer::new(&[Some(50)]);
        let mut view = RecordingView::default();
        let outcome = run(decoder, SessionConfig::registration(1, None), &mut scorer, &mut view, &latch);

        assert_eq!(outcome.reason, TerminationReason::SourceError);
        assert_eq!(outcome.score.value(), 50);
        assert_eq!(outcome.frames_scored, 1);
    }

    #[test]
    fn scorer_failure_is_fatal() {
        let latch = InterruptLatch::new();
        let mut scorer = ScriptedScorer::new(&[Some(10), Some(20)]);
        scorer.fail_on_call = Some(2);
        let mut view = RecordingView::default();
        let err = Session::new(
            SessionConfig::registration(1, None),
            &mut scorer,
            &mut view,
            latch.handle(),
        )
        .run(PacedFrameSource::new(frames(5), 0))
        .unwrap_err();

        assert!(err.to_string().contains("engine lost its model"));
        assert!(view.finished.is_none());
    }

    #[test]
    fn region_is_clamped_to_the_frame() {
        let latch = InterruptLatch::new();
        let region = Region {
            x: 0,
            y: 0,
            width: 640,
            height: 480,
        };
        let mut scorer = ScriptedScorer::new(&[None]);
        let mut view = RecordingView::default();
        run(frames(1), SessionConfig::analysis(Some(region)), &mut scorer, &mut view, &latch);

        // Scripted frames are 1x1.
        assert_eq!(scorer.seen[0].0.width, 1);
        assert_eq!(scorer.seen[0].0.height, 1);
    }

    #[test]
    fn score_clamps_reported_values() {
        assert_eq!(SessionScore::from_reported(42).value(), 42);
        assert_eq!(SessionScore::from_reported(i32::MIN), SessionScore::ZERO);
        assert_eq!(SessionScore::from_reported(i32::MAX), SessionScore::MAX);
    }
}
