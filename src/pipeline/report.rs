use std::io::{self, Write};

use crate::recognizer::DecodedRecord;

/// Destination for newly seen records
pub trait ReportSink {
    fn report(&mut self, record: &DecodedRecord) -> io::Result<()>;
}

/// Writes one `==> payload` line per record, plus metadata when verbose
pub struct WriterSink<W: Write> {
    out: W,
    verbose: bool,
}

impl<W: Write> WriterSink<W> {
    pub fn new(out: W, verbose: bool) -> Self {
        Self { out, verbose }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl WriterSink<io::Stdout> {
    pub fn stdout(verbose: bool) -> Self {
        Self::new(io::stdout(), verbose)
    }
}

impl<W: Write> ReportSink for WriterSink<W> {
    fn report(&mut self, record: &DecodedRecord) -> io::Result<()> {
        writeln!(self.out, "==> {}", record.payload_lossy())?;
        if self.verbose {
            writeln!(
                self.out,
                "    Version: {}, ECC: {}, Mask: {}, Type: {}\n",
                record.version, record.ecc_level, record.mask, record.symbol_type
            )?;
        }
        self.out.flush()
    }
}

impl<S: ReportSink + ?Sized> ReportSink for &mut S {
    fn report(&mut self, record: &DecodedRecord) -> io::Result<()> {
        (**self).report(record)
    }
}
