use chrono::{DateTime, Local};
use std::borrow::Cow;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::Result;
use crate::intake::FrameAssessment;

pub const HEADER: [&str; 5] = [
    "Timestamp",
    "Detected Items",
    "Total Calories",
    "Total Sugar (g)",
    "Status",
];

/// One CSV row summarising a frame that had detections.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub timestamp: String,
    pub items: String,
    pub total_calories: f64,
    pub total_sugar: f64,
    pub status: String,
}

impl LogRecord {
    /// `None` when the frame had no retained detections.
    pub fn from_assessment(assessment: &FrameAssessment, at: DateTime<Local>) -> Option<Self> {
        if assessment.is_empty() {
            return None;
        }
        Some(Self {
            timestamp: at.format("%Y-%m-%d %H:%M:%S").to_string(),
            items: assessment.labels.join(", "),
            total_calories: assessment.total_calories,
            total_sugar: assessment.total_sugar,
            status: assessment.status.to_string(),
        })
    }

    fn fields(&self) -> [String; 5] {
        [
            self.timestamp.clone(),
            self.items.clone(),
            format_total(self.total_calories),
            format_total(self.total_sugar),
            self.status.clone(),
        ]
    }
}

/// Sums are written exactly, up to six decimals, with at least one decimal kept.
fn format_total(value: f64) -> String {
    let fixed = format!("{:.6}", value);
    let trimmed = fixed.trim_end_matches('0');
    if trimmed.ends_with('.') {
        format!("{}0", trimmed)
    } else {
        trimmed.to_string()
    }
}

/// Quote a field when it holds a separator, quote or line break.
fn csv_field(field: &str) -> Cow<'_, str> {
    if field.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

fn write_row<W: Write + ?Sized, S: AsRef<str>>(writer: &mut W, fields: &[S]) -> std::io::Result<()> {
    let line = fields
        .iter()
        .map(|f| csv_field(f.as_ref()))
        .collect::<Vec<_>>()
        .join(",");
    writeln!(writer, "{}", line)
}

/// Append-only CSV log of per-frame assessments.
pub struct SessionLogger {
    writer: Box<dyn Write>,
    rows: usize,
}

impl SessionLogger {
    /// Create (truncating) the log file and write the header.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path.as_ref())?;
        Self::from_writer(Box::new(BufWriter::new(file)))
    }

    pub fn from_writer(mut writer: Box<dyn Write>) -> Result<Self> {
        write_row(writer.as_mut(), &HEADER)?;
        Ok(Self { writer, rows: 0 })
    }

    /// Append a row stamped with the current local time. Returns whether a row was written.
    pub fn record(&mut self, assessment: &FrameAssessment) -> Result<bool> {
        self.record_at(assessment, Local::now())
    }

    pub fn record_at(&mut self, assessment: &FrameAssessment, at: DateTime<Local>) -> Result<bool> {
        match LogRecord::from_assessment(assessment, at) {
            Some(record) => {
                write_row(self.writer.as_mut(), &record.fields())?;
                self.rows += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Number of rows written, header excluded.
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
