//! Scan loop behaviour against a scripted camera and recognizer

use std::cell::Cell;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use qrscan::capture::{CaptureFrame, CaptureSource, FormatParams, FrameFormat, LumaImage};
use qrscan::pipeline::{Clock, ReportSink, Scanner, WriterSink};
use qrscan::recognizer::{DecodedRecord, EccLevel, Recognizer, SymbolType};
use qrscan::{CaptureError, ConvertError, DecodeError, PipelineError, ScannerConfig};

const W: u32 = 4;
const H: u32 = 2;

/// Camera that plays back a fixed list of frames, then fails to dequeue
struct ScriptedSource {
    frames: VecDeque<(FrameFormat, Vec<u8>)>,
    held: Option<(FrameFormat, Vec<u8>)>,
    sequence: u64,
    acquired: usize,
    released: usize,
    fail_release: bool,
    stop_after: Option<(usize, &'static AtomicBool)>,
}

impl ScriptedSource {
    fn new(frames: impl IntoIterator<Item = (FrameFormat, Vec<u8>)>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
            held: None,
            sequence: 0,
            acquired: 0,
            released: 0,
            fail_release: false,
            stop_after: None,
        }
    }

    fn yuyv(count: usize) -> Self {
        Self::new((0..count).map(|_| (FrameFormat::Yuyv, yuyv_frame())))
    }
}

impl CaptureSource for ScriptedSource {
    fn params(&self) -> FormatParams {
        let format = self
            .frames
            .front()
            .map(|(format, _)| *format)
            .unwrap_or(FrameFormat::Yuyv);
        FormatParams {
            format,
            width: W,
            height: H,
            stride: W * 2,
        }
    }

    fn acquire(&mut self) -> Result<CaptureFrame<'_>, CaptureError> {
        let params = self.params();
        let (format, data) = self.frames.pop_front().ok_or_else(|| {
            CaptureError::Acquire(io::Error::new(io::ErrorKind::UnexpectedEof, "script exhausted"))
        })?;
        self.acquired += 1;
        self.sequence += 1;
        if let Some((n, stop)) = self.stop_after {
            if self.acquired >= n {
                stop.store(true, Ordering::Relaxed);
            }
        }

        let held = self.held.insert((format, data));
        Ok(CaptureFrame {
            data: &held.1,
            params: FormatParams {
                format: held.0,
                ..params
            },
            sequence: self.sequence,
        })
    }

    fn release(&mut self) -> Result<(), CaptureError> {
        assert!(self.held.take().is_some(), "release without acquire");
        self.released += 1;
        if self.fail_release {
            return Err(CaptureError::Release(io::Error::new(
                io::ErrorKind::Other,
                "QBUF failed",
            )));
        }
        Ok(())
    }
}

/// Recognizer whose candidates per frame are scripted; `None` fails to decode
struct ScriptedRecognizer {
    image: LumaImage,
    script: VecDeque<Vec<Option<DecodedRecord>>>,
    current: Vec<Option<DecodedRecord>>,
    submitted: Vec<Vec<u8>>,
}

impl ScriptedRecognizer {
    fn new(script: impl IntoIterator<Item = Vec<Option<DecodedRecord>>>) -> Self {
        Self {
            image: LumaImage::new(W as usize, H as usize),
            script: script.into_iter().collect(),
            current: Vec::new(),
            submitted: Vec::new(),
        }
    }

    fn repeating(frames: usize, candidates: Vec<Option<DecodedRecord>>) -> Self {
        Self::new((0..frames).map(|_| candidates.clone()))
    }
}

impl Recognizer for ScriptedRecognizer {
    type Candidate = Option<DecodedRecord>;

    fn begin_frame(&mut self) -> &mut LumaImage {
        self.current.clear();
        &mut self.image
    }

    fn end_frame(&mut self) {
        self.submitted.push(self.image.as_bytes().to_vec());
        self.current = self.script.pop_front().unwrap_or_default();
    }

    fn candidate_count(&self) -> usize {
        self.current.len()
    }

    fn candidate(&self, index: usize) -> Option<&Self::Candidate> {
        self.current.get(index)
    }

    fn decode(&self, candidate: &Self::Candidate) -> Result<DecodedRecord, DecodeError> {
        candidate
            .clone()
            .ok_or_else(|| DecodeError::Symbol("ECC failure".into()))
    }
}

#[derive(Default)]
struct Collected(Vec<DecodedRecord>);

impl ReportSink for Collected {
    fn report(&mut self, record: &DecodedRecord) -> io::Result<()> {
        self.0.push(record.clone());
        Ok(())
    }
}

struct FailingSink;

impl ReportSink for FailingSink {
    fn report(&mut self, _record: &DecodedRecord) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "stdout closed"))
    }
}

/// Clock advanced by hand between frames
struct ManualClock(Cell<Instant>);

impl ManualClock {
    fn new() -> Self {
        Self(Cell::new(Instant::now()))
    }

    fn advance(&self, by: Duration) {
        self.0.set(self.0.get() + by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.0.get()
    }
}

fn record(payload: &str, mask: u16) -> DecodedRecord {
    DecodedRecord {
        payload: payload.as_bytes().to_vec(),
        version: 1,
        ecc_level: EccLevel::L,
        mask,
        symbol_type: SymbolType::Qr,
    }
}

/// Luma 10, 20, .. at even offsets, chroma bytes all 0x80
fn yuyv_frame() -> Vec<u8> {
    (0..W * H)
        .flat_map(|i| [(10 * (i + 1)) as u8, 0x80])
        .collect()
}

fn scanner_config(timeout: u64) -> ScannerConfig {
    ScannerConfig {
        dedup_timeout_secs: timeout,
        ..ScannerConfig::default()
    }
}

fn reports_per_frame(timeout: u64, frames: usize) -> Vec<usize> {
    let clock = ManualClock::new();
    let mut scanner = Scanner::new(
        ScriptedSource::yuyv(frames),
        ScriptedRecognizer::repeating(frames, vec![Some(record("same symbol", 2))]),
        Collected::default(),
        &scanner_config(timeout),
    )
    .with_clock(&clock);

    (0..frames)
        .map(|_| {
            let stats = scanner.step().unwrap();
            clock.advance(Duration::from_secs(1));
            stats.reported
        })
        .collect()
}

#[test]
fn repeated_symbol_is_reported_once_per_window() {
    // Suppressed while less than the timeout has elapsed since the last report
    assert_eq!(reports_per_frame(3, 5), vec![1, 0, 0, 1, 0]);
    assert_eq!(reports_per_frame(2, 5), vec![1, 0, 1, 0, 1]);
}

#[test]
fn zero_timeout_reports_every_sighting() {
    assert_eq!(reports_per_frame(0, 4), vec![1, 1, 1, 1]);
}

#[test]
fn failed_candidate_does_not_hide_the_others() {
    let mut scanner = Scanner::new(
        ScriptedSource::yuyv(1),
        ScriptedRecognizer::new([vec![Some(record("first", 0)), None, Some(record("third", 0))]]),
        Collected::default(),
        &scanner_config(2),
    );

    let stats = scanner.step().unwrap();
    assert_eq!(stats.candidates, 3);
    assert_eq!(stats.decoded, 2);
    assert_eq!(stats.reported, 2);

    let payloads: Vec<_> = scanner.sink().0.iter().map(|r| r.payload.clone()).collect();
    assert_eq!(payloads, vec![b"first".to_vec(), b"third".to_vec()]);
}

#[test]
fn records_differing_only_in_mask_are_both_reported() {
    let mut scanner = Scanner::new(
        ScriptedSource::yuyv(2),
        ScriptedRecognizer::repeating(2, vec![Some(record("code", 1)), Some(record("code", 6))]),
        Collected::default(),
        &scanner_config(10),
    );

    assert_eq!(scanner.step().unwrap().reported, 2);
    let second = scanner.step().unwrap();
    assert_eq!(second.reported, 0);
    assert_eq!(second.suppressed, 2);
    assert_eq!(scanner.dedup().len(), 2);
}

#[test]
fn frame_is_converted_into_recognizer_buffer() {
    let mut scanner = Scanner::new(
        ScriptedSource::yuyv(1),
        ScriptedRecognizer::new([vec![]]),
        Collected::default(),
        &scanner_config(2),
    );

    let stats = scanner.step().unwrap();
    assert_eq!(stats.candidates, 0);

    let (source, recognizer, _) = scanner.into_parts();
    assert_eq!(source.acquired, 1);
    assert_eq!(source.released, 1);
    assert_eq!(
        recognizer.submitted,
        vec![vec![10, 20, 30, 40, 50, 60, 70, 80]]
    );
}

#[test]
fn unsupported_source_is_rejected_before_capture() {
    let source = ScriptedSource::new([(FrameFormat::Unsupported(*b"NV12"), vec![0; 12])]);
    let mut scanner = Scanner::new(
        source,
        ScriptedRecognizer::new([vec![Some(record("never", 0))]]),
        Collected::default(),
        &scanner_config(2),
    );

    let err = scanner.run(&AtomicBool::new(false)).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Convert(ConvertError::UnsupportedFormat(FrameFormat::Unsupported(f))) if &f == b"NV12"
    ));
    assert_eq!(scanner.source().acquired, 0);
    assert_eq!(scanner.source().released, 0);
}

#[test]
fn unsupported_frame_mid_stream_ends_the_loop() {
    let source = ScriptedSource::new([
        (FrameFormat::Yuyv, yuyv_frame()),
        (FrameFormat::Unsupported(*b"NV12"), vec![0; 12]),
    ]);
    let mut scanner = Scanner::new(
        source,
        ScriptedRecognizer::repeating(2, vec![Some(record("first", 0))]),
        Collected::default(),
        &scanner_config(2),
    );

    let err = scanner.run(&AtomicBool::new(false)).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Convert(ConvertError::UnsupportedFormat(_))
    ));

    let (source, recognizer, sink) = scanner.into_parts();
    // The buffer still went back to the driver before the error surfaced
    assert_eq!(source.acquired, 2);
    assert_eq!(source.released, 2);
    assert_eq!(recognizer.submitted.len(), 1);
    assert_eq!(sink.0.len(), 1);
}

#[test]
fn truncated_frame_is_skipped_and_scanning_continues() {
    let source = ScriptedSource::new([
        (FrameFormat::Yuyv, vec![0; 3]),
        (FrameFormat::Yuyv, yuyv_frame()),
    ]);
    let mut scanner = Scanner::new(
        source,
        ScriptedRecognizer::new([vec![Some(record("after", 0))]]),
        Collected::default(),
        &scanner_config(2),
    );

    let first = scanner.step().unwrap();
    assert!(first.skipped);
    assert_eq!(first.reported, 0);

    let second = scanner.step().unwrap();
    assert!(!second.skipped);
    assert_eq!(second.reported, 1);
    assert_eq!(scanner.source().released, 2);
}

#[test]
fn frame_sequence_is_carried_into_stats() {
    let mut source = ScriptedSource::new([
        (FrameFormat::Yuyv, yuyv_frame()),
        (FrameFormat::Yuyv, vec![0; 3]),
        (FrameFormat::Yuyv, yuyv_frame()),
    ]);
    // Start mid-stream, as a driver counter would after earlier frames
    source.sequence = 41;
    let mut scanner = Scanner::new(
        source,
        ScriptedRecognizer::repeating(2, vec![]),
        Collected::default(),
        &scanner_config(2),
    );

    let sequences: Vec<_> = (0..3)
        .map(|_| {
            let stats = scanner.step().unwrap();
            (stats.sequence, stats.skipped)
        })
        .collect();
    assert_eq!(sequences, vec![(42, false), (43, true), (44, false)]);
}

#[test]
fn acquire_failure_is_fatal() {
    let mut scanner = Scanner::new(
        ScriptedSource::yuyv(2),
        ScriptedRecognizer::repeating(2, vec![Some(record("a", 0))]),
        Collected::default(),
        &scanner_config(2),
    );

    let err = scanner.run(&AtomicBool::new(false)).unwrap_err();
    assert!(matches!(err, PipelineError::Capture(CaptureError::Acquire(_))));
    assert_eq!(scanner.sink().0.len(), 1);
    assert_eq!(scanner.source().acquired, 2);
    assert_eq!(scanner.source().released, 2);
}

#[test]
fn release_failure_is_fatal() {
    let mut source = ScriptedSource::yuyv(3);
    source.fail_release = true;
    let mut scanner = Scanner::new(
        source,
        ScriptedRecognizer::repeating(3, vec![Some(record("a", 0))]),
        Collected::default(),
        &scanner_config(2),
    );

    let err = scanner.run(&AtomicBool::new(false)).unwrap_err();
    assert!(matches!(err, PipelineError::Capture(CaptureError::Release(_))));
    assert!(scanner.sink().0.is_empty());
    assert_eq!(scanner.source().acquired, 1);
}

#[test]
fn report_failure_is_fatal() {
    let mut scanner = Scanner::new(
        ScriptedSource::yuyv(1),
        ScriptedRecognizer::new([vec![Some(record("a", 0))]]),
        FailingSink,
        &scanner_config(2),
    );

    assert!(matches!(scanner.step(), Err(PipelineError::Report(_))));
}

#[test]
fn raised_stop_flag_is_honoured_between_frames() {
    let already_stopped = AtomicBool::new(true);
    let mut scanner = Scanner::new(
        ScriptedSource::yuyv(3),
        ScriptedRecognizer::repeating(3, vec![]),
        Collected::default(),
        &scanner_config(2),
    );
    assert_eq!(scanner.run(&already_stopped).unwrap(), 0);
    assert_eq!(scanner.source().acquired, 0);

    static STOP: AtomicBool = AtomicBool::new(false);
    let mut source = ScriptedSource::yuyv(5);
    source.stop_after = Some((2, &STOP));
    let mut scanner = Scanner::new(
        source,
        ScriptedRecognizer::repeating(5, vec![]),
        Collected::default(),
        &scanner_config(2),
    );
    assert_eq!(scanner.run(&STOP).unwrap(), 2);
    assert_eq!(scanner.source().released, 2);
}

#[test]
fn verbose_output_matches_report_format() {
    let mut symbol = record("https://example.org/a", 7);
    symbol.version = 4;
    symbol.ecc_level = EccLevel::H;

    let mut scanner = Scanner::new(
        ScriptedSource::yuyv(2),
        ScriptedRecognizer::repeating(2, vec![Some(symbol)]),
        WriterSink::new(Vec::new(), true),
        &scanner_config(2),
    );
    scanner.step().unwrap();
    scanner.step().unwrap();

    let (_, _, sink) = scanner.into_parts();
    assert_eq!(
        String::from_utf8(sink.into_inner()).unwrap(),
        "==> https://example.org/a\n    Version: 4, ECC: H, Mask: 7, Type: QR\n\n"
    );
}

#[test]
fn eviction_forgets_idle_fingerprints() {
    let clock = ManualClock::new();
    let config = ScannerConfig {
        dedup_timeout_secs: 2,
        evict_after_secs: Some(5),
        ..ScannerConfig::default()
    };
    let mut scanner = Scanner::new(
        ScriptedSource::yuyv(2),
        ScriptedRecognizer::new([vec![Some(record("a", 0))], vec![]]),
        Collected::default(),
        &config,
    )
    .with_clock(&clock);

    scanner.step().unwrap();
    assert_eq!(scanner.dedup().len(), 1);

    clock.advance(Duration::from_secs(6));
    scanner.step().unwrap();
    assert!(scanner.dedup().is_empty());
}
