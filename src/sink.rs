use anyhow::{Context, Result};
use serde::Serialize;
use std::io::Write;

use crate::assembler::AbandonmentReport;
use crate::schema::CompletedRecord;

/// Destination for everything a crawl produces.
pub trait RecordSink {
    fn emit(&mut self, record: &CompletedRecord) -> Result<()>;

    fn abandoned(&mut self, report: &AbandonmentReport) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename = "abandoned")]
struct AbandonedLine<'a> {
    #[serde(flatten)]
    report: &'a AbandonmentReport,
}

/// Writes one JSON object per line, tagged with `type`.
pub struct JsonLinesSink<W: Write> {
    writer: W,
    lines: usize,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, lines: 0 }
    }

    pub fn lines(&self) -> usize {
        self.lines
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_line(&mut self, value: &impl Serialize) -> Result<()> {
        serde_json::to_writer(&mut self.writer, value).context("Failed to serialize record")?;
        self.writer
            .write_all(b"\n")
            .context("Failed to write record")?;
        self.lines += 1;
        Ok(())
    }
}

impl<W: Write> RecordSink for JsonLinesSink<W> {
    fn emit(&mut self, record: &CompletedRecord) -> Result<()> {
        self.write_line(record)
    }

    fn abandoned(&mut self, report: &AbandonmentReport) -> Result<()> {
        self.write_line(&AbandonedLine { report })
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush().context("Failed to flush output")
    }
}

/// Keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub records: Vec<CompletedRecord>,
    pub abandoned: Vec<AbandonmentReport>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordSink for MemorySink {
    fn emit(&mut self, record: &CompletedRecord) -> Result<()> {
        self.records.push(record.clone());
        Ok(())
    }

    fn abandoned(&mut self, report: &AbandonmentReport) -> Result<()> {
        self.abandoned.push(report.clone());
        Ok(())
    }
}
