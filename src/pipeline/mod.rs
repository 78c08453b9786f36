pub mod dedup;
pub mod driver;
pub mod report;

pub use dedup::DedupCache;
pub use driver::{Clock, FrameStats, MonotonicClock, Scanner};
pub use report::{ReportSink, WriterSink};
