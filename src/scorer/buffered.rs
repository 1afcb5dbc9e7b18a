// SPDX-License-Identifier: MIT
//! Asynchronous scorer wrapper for live sources.
//!
//! Frames are handed to a worker thread through a single-slot channel. While the worker
//! is busy newer frames are dropped instead of queued, so a slow engine never makes the
//! camera fall behind. Each call returns the newest finished result, at most once.

use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::{Result, anyhow, bail};
use crossbeam_channel::{Sender, TrySendError, bounded};
use tracing::{debug, trace};

use super::{DetectionResult, FaceId, Region, Scorer};
use crate::media::Image;

struct Job {
    image: Image,
    region: Region,
    identifier: Option<FaceId>,
}

type Slot = Arc<Mutex<Option<Result<DetectionResult, String>>>>;

pub struct BufferedScorer {
    jobs: Option<Sender<Job>>,
    latest: Slot,
    handle: Option<thread::JoinHandle<()>>,
    dropped: u64,
}

impl BufferedScorer {
    /// Moves `inner` onto a background thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker thread cannot be spawned.
    pub fn spawn<S: Scorer + Send + 'static>(mut inner: S) -> Result<Self> {
        let (tx, rx) = bounded::<Job>(1);
        let latest: Slot = Arc::new(Mutex::new(None));
        let latest_clone = Arc::clone(&latest);

        let handle = thread::Builder::new()
            .name("scorer".into())
            .spawn(move || {
                for job in rx {
                    let result = inner
                        .score(&job.image, job.region, job.identifier)
                        .map_err(|e| format!("{e:#}"));
                    let failed = result.is_err();
                    if let Ok(mut guard) = latest_clone.lock() {
                        *guard = Some(result);
                    }
                    if failed {
                        break;
                    }
                }
            })
            .map_err(|e| anyhow!("failed to spawn scorer thread: {e}"))?;

        Ok(Self {
            jobs: Some(tx),
            latest,
            handle: Some(handle),
            dropped: 0,
        })
    }

    fn take_latest(&self) -> Option<Result<DetectionResult, String>> {
        self.latest.lock().ok().and_then(|mut guard| guard.take())
    }

    pub fn shutdown(&mut self) {
        self.jobs.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        if self.dropped > 0 {
            debug!(dropped = self.dropped, "buffered scorer skipped frames while busy");
        }
    }
}

impl Scorer for BufferedScorer {
    fn score(
        &mut self,
        image: &Image,
        region: Region,
        identifier: Option<FaceId>,
    ) -> Result<DetectionResult> {
        let Some(jobs) = self.jobs.as_ref() else {
            bail!("buffered scorer is shut down");
        };

        let job = Job {
            image: image.clone(),
            region,
            identifier,
        };
        match jobs.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                trace!("scorer busy, frame dropped");
                self.dropped += 1;
            }
            Err(TrySendError::Disconnected(_)) => {
                // The worker only exits after storing its failure.
                if let Some(Err(message)) = self.take_latest() {
                    bail!("scorer failed: {message}");
                }
                bail!("scorer thread exited");
            }
        }

        match self.take_latest() {
            Some(Ok(result)) => Ok(result),
            Some(Err(message)) => bail!("scorer failed: {message}"),
            None => Ok(DetectionResult::not_detected()),
        }
    }
}

impl Drop for BufferedScorer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    use super::*;

    struct CountingScorer {
        calls: Arc<AtomicUsize>,
        fail_after: Option<usize>,
        delay: Duration,
    }

    impl Scorer for CountingScorer {
        fn score(
            &mut self,
            image: &Image,
            _region: Region,
            _identifier: Option<FaceId>,
        ) -> Result<DetectionResult> {
            thread::sleep(self.delay);
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_after.is_some_and(|limit| n > limit) {
                bail!("engine crashed");
            }
            Ok(DetectionResult {
                detected: true,
                score: i32::from(image.data[0]),
                orientation_hints: Vec::new(),
            })
        }
    }

    fn image(tag: u8) -> Image {
        Image {
            width: 1,
            height: 1,
            data: vec![tag; 3],
        }
    }

    fn region() -> Region {
        Region::full(&image(0))
    }

    /// Submits `tag` until a result comes back or the deadline passes.
    fn poll_until_result(scorer: &mut BufferedScorer, tag: u8) -> Result<DetectionResult> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let result = scorer.score(&image(tag), region(), None)?;
            if result.detected || Instant::now() > deadline {
                return Ok(result);
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn first_call_returns_not_detected_then_result_arrives() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut scorer = BufferedScorer::spawn(CountingScorer {
            calls: Arc::clone(&calls),
            fail_after: None,
            delay: Duration::from_millis(20),
        })
        .unwrap();

        let first = scorer.score(&image(7), region(), Some(1)).unwrap();
        assert!(!first.detected);

        let result = poll_until_result(&mut scorer, 7).unwrap();
        assert!(result.detected);
        assert_eq!(result.score, 7);
    }

    #[test]
    fn shut_down_scorer_rejects_frames() {
        let mut scorer = BufferedScorer::spawn(CountingScorer {
            calls: Arc::new(AtomicUsize::new(0)),
            fail_after: None,
            delay: Duration::ZERO,
        })
        .unwrap();

        assert!(poll_until_result(&mut scorer, 3).unwrap().detected);
        scorer.shutdown();
        assert!(scorer.score(&image(3), region(), None).is_err());
    }

    #[test]
    fn busy_worker_drops_frames() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut scorer = BufferedScorer::spawn(CountingScorer {
            calls: Arc::clone(&calls),
            fail_after: None,
            delay: Duration::from_millis(100),
        })
        .unwrap();

        for tag in 0..20 {
            scorer.score(&image(tag), region(), None).unwrap();
        }
        assert!(scorer.dropped > 0);
        scorer.shutdown();
        assert!(calls.load(Ordering::SeqCst) < 20);
    }

    #[test]
    fn inner_failure_surfaces_on_a_later_call() {
        let mut scorer = BufferedScorer::spawn(CountingScorer {
            calls: Arc::new(AtomicUsize::new(0)),
            fail_after: Some(0),
            delay: Duration::ZERO,
        })
        .unwrap();

        let err = poll_until_result(&mut scorer, 1).unwrap_err();
        assert!(format!("{err:#}").contains("engine crashed"));
    }
}
