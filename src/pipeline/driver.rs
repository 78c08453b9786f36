//! Capture, convert, decode and dedupe, one frame per iteration

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace, warn};

use super::dedup::DedupCache;
use super::report::ReportSink;
use crate::capture::{convert, CaptureSource, MjpegDecoder};
use crate::error::PipelineError;
use crate::recognizer::Recognizer;
use crate::ScannerConfig;

/// Monotonic time source used for duplicate suppression
pub trait Clock {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// What happened to one frame
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameStats {
    /// Sequence number the source stamped on the frame
    pub sequence: u64,
    pub candidates: usize,
    pub decoded: usize,
    pub reported: usize,
    pub suppressed: usize,
    /// The frame could not be converted and was never recognised
    pub skipped: bool,
}

/// Single-threaded scan loop over one capture stream
pub struct Scanner<S, R, W, C = MonotonicClock> {
    source: S,
    recognizer: R,
    sink: W,
    clock: C,
    mjpeg: MjpegDecoder,
    dedup: DedupCache,
}

impl<S, R, W> Scanner<S, R, W, MonotonicClock>
where
    S: CaptureSource,
    R: Recognizer,
    W: ReportSink,
{
    pub fn new(source: S, recognizer: R, sink: W, config: &ScannerConfig) -> Self {
        let timeout = Duration::from_secs(config.dedup_timeout_secs);
        let dedup = match config.evict_after_secs {
            Some(secs) => DedupCache::with_eviction(timeout, Duration::from_secs(secs)),
            None => DedupCache::new(timeout),
        };

        Self {
            source,
            recognizer,
            sink,
            clock: MonotonicClock,
            mjpeg: MjpegDecoder::new(),
            dedup,
        }
    }
}

impl<S, R, W, C> Scanner<S, R, W, C>
where
    S: CaptureSource,
    R: Recognizer,
    W: ReportSink,
    C: Clock,
{
    /// Swap the time source
    pub fn with_clock<C2: Clock>(self, clock: C2) -> Scanner<S, R, W, C2> {
        Scanner {
            source: self.source,
            recognizer: self.recognizer,
            sink: self.sink,
            clock,
            mjpeg: self.mjpeg,
            dedup: self.dedup,
        }
    }

    /// Process exactly one frame.
    ///
    /// Capture failures and unsupported formats are returned as errors. A
    /// frame that fails to convert for any other reason is skipped, and a
    /// candidate that fails to decode never affects the others.
    pub fn step(&mut self) -> Result<FrameStats, PipelineError> {
        let mut stats = FrameStats::default();

        let luma = self.recognizer.begin_frame();
        let mjpeg = &mut self.mjpeg;
        let (sequence, converted) = self
            .source
            .with_frame(|frame| (frame.sequence, convert(mjpeg, frame, luma)))?;
        stats.sequence = sequence;

        if let Err(e) = converted {
            if e.is_fatal() {
                return Err(e.into());
            }
            warn!(sequence, "Skipping frame: {}", e);
            metrics::counter!("qrscan_skipped_frames_total").increment(1);
            stats.skipped = true;
            return Ok(stats);
        }

        self.recognizer.end_frame();
        stats.candidates = self.recognizer.candidate_count();

        for index in 0..stats.candidates {
            let record = match self.recognizer.decode_at(index) {
                Ok(record) => record,
                Err(e) => {
                    trace!(index, "Candidate rejected: {}", e);
                    metrics::counter!("qrscan_decode_failures_total").increment(1);
                    continue;
                }
            };
            stats.decoded += 1;

            if self.dedup.seen(&record, self.clock.now()) {
                stats.suppressed += 1;
                continue;
            }

            self.sink.report(&record).map_err(PipelineError::Report)?;
            stats.reported += 1;
        }

        let purged = self.dedup.purge_expired(self.clock.now());
        if purged > 0 {
            debug!(purged, remaining = self.dedup.len(), "Evicted stale fingerprints");
        }

        metrics::counter!("qrscan_reports_total").increment(stats.reported as u64);
        Ok(stats)
    }

    /// Loop until `stop` is raised or a frame fails fatally.
    ///
    /// A source whose negotiated format cannot be converted is rejected
    /// before the first acquire. `stop` is checked once per frame, before acquiring. Returns the
    /// number of frames processed.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<u64, PipelineError> {
        let params = self.source.params();
        params.ensure_supported().map_err(|e| {
            error!("Refusing to scan: {}", e);
            e
        })?;
        info!(
            format = %params.format,
            width = params.width,
            height = params.height,
            timeout_secs = self.dedup.timeout().as_secs(),
            "Scanning"
        );

        let mut frames = 0u64;
        while !stop.load(Ordering::Relaxed) {
            let stats = self.step().map_err(|e| {
                error!(frames, "Scan loop failed: {}", e);
                e
            })?;
            frames += 1;
            metrics::counter!("qrscan_frames_total").increment(1);
            trace!(
                frame = frames,
                sequence = stats.sequence,
                candidates = stats.candidates,
                decoded = stats.decoded,
                reported = stats.reported,
                suppressed = stats.suppressed,
                skipped = stats.skipped,
                "Frame processed"
            );
        }

        info!(frames, "Scan loop stopped");
        Ok(frames)
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn sink(&self) -> &W {
        &self.sink
    }

    pub fn dedup(&self) -> &DedupCache {
        &self.dedup
    }

    pub fn into_parts(self) -> (S, R, W) {
        (self.source, self.recognizer, self.sink)
    }
}
