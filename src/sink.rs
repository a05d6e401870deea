//! Buffered columnar sink.
//!
//! Rows accumulate in column buffers and are written out as one Parquet row
//! group per flush. The flush trigger is real memory pressure: after each
//! page the pipeline probes resident memory and hands it to `maybe_flush`,
//! which compares it against the per-worker budget. Large archives therefore
//! produce artifacts with many small row groups instead of growing the heap.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, BinaryBuilder, ListBuilder, StringArray, StringBuilder};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use chrono::SecondsFormat;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;

use crate::conf::{Conf, SampleMode};
use crate::error::WriteError;
use crate::sampler::SampledRow;

/// Memory threshold that triggers a flush, fixed per run.
#[derive(Debug, Clone, Copy)]
pub struct FlushBudget {
    pub threshold_bytes: u64,
}

impl FlushBudget {
    /// Fraction of the per-worker share of total memory.
    pub fn from_conf(conf: &Conf) -> Self {
        let total = total_memory();
        if total == 0 {
            // Probe unavailable; flushing then only happens at finalize.
            return Self {
                threshold_bytes: u64::MAX,
            };
        }
        let per_worker = total / conf.pipeline_parallelism.max(1) as u64;
        Self {
            threshold_bytes: (per_worker as f64 * conf.flush_fraction) as u64,
        }
    }

    pub fn exceeded(&self, resident_bytes: u64) -> bool {
        resident_bytes > self.threshold_bytes
    }
}

/// Column buffers for the run's configured row shape. All columns always
/// share the same length; flushing clears them in place.
enum Buffers {
    Full {
        namespace: Vec<String>,
        title: Vec<String>,
        timestamp: Vec<String>,
        text: Vec<String>,
    },
    Delta {
        namespace: Vec<String>,
        title: Vec<String>,
        initial_text: Vec<String>,
        initial_timestamp: Vec<String>,
        diff_timestamps: Vec<Vec<String>>,
        diffs: Vec<Vec<Vec<u8>>>,
    },
}

impl Buffers {
    fn new(mode: SampleMode) -> Self {
        match mode {
            SampleMode::FullText => Self::Full {
                namespace: Vec::new(),
                title: Vec::new(),
                timestamp: Vec::new(),
                text: Vec::new(),
            },
            SampleMode::Delta => Self::Delta {
                namespace: Vec::new(),
                title: Vec::new(),
                initial_text: Vec::new(),
                initial_timestamp: Vec::new(),
                diff_timestamps: Vec::new(),
                diffs: Vec::new(),
            },
        }
    }
}

/// One output artifact, created lazily on the first flush.
pub struct ColumnSink {
    path: PathBuf,
    mode: SampleMode,
    budget: FlushBudget,
    buffers: Buffers,
    writer: Option<ArrowWriter<File>>,
    buffered: usize,
    written: usize,
}

impl ColumnSink {
    pub fn new(path: &Path, mode: SampleMode, budget: FlushBudget) -> Self {
        Self {
            path: path.to_path_buf(),
            mode,
            budget,
            buffers: Buffers::new(mode),
            writer: None,
            buffered: 0,
            written: 0,
        }
    }

    pub fn buffered_rows(&self) -> usize {
        self.buffered
    }

    pub fn append(&mut self, row: SampledRow) {
        match (&mut self.buffers, row) {
            (
                Buffers::Full {
                    namespace,
                    title,
                    timestamp,
                    text,
                },
                SampledRow::Full {
                    namespace: ns,
                    title: t,
                    timestamp: ts,
                    text: body,
                },
            ) => {
                namespace.push(ns);
                title.push(t);
                timestamp.push(format_timestamp(ts));
                text.push(body);
            }
            (
                Buffers::Delta {
                    namespace,
                    title,
                    initial_text,
                    initial_timestamp,
                    diff_timestamps,
                    diffs,
                },
                SampledRow::Delta {
                    namespace: ns,
                    title: t,
                    initial_text: base,
                    initial_timestamp: base_ts,
                    diff_timestamps: stamps,
                    diffs: deltas,
                },
            ) => {
                namespace.push(ns);
                title.push(t);
                initial_text.push(base);
                initial_timestamp.push(format_timestamp(base_ts));
                diff_timestamps.push(stamps.into_iter().map(format_timestamp).collect());
                diffs.push(deltas);
            }
            _ => unreachable!("row shape does not match sink mode"),
        }
        self.buffered += 1;
    }

    /// Flush if the probed resident memory exceeds the budget. Called by the
    /// pipeline at every page boundary.
    pub fn maybe_flush(&mut self, resident_bytes: u64) -> Result<bool, WriteError> {
        if self.buffered > 0 && self.budget.exceeded(resident_bytes) {
            self.flush()?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Write buffered rows as one row group and clear the buffers.
    pub fn flush(&mut self) -> Result<(), WriteError> {
        if self.buffered == 0 {
            return Ok(());
        }
        let batch = self.take_batch()?;
        let writer = self.writer()?;
        writer.write(&batch)?;
        writer.flush()?;
        self.written += batch.num_rows();
        self.buffered = 0;
        Ok(())
    }

    /// Flush the remainder and close the artifact. An archive with no sampled
    /// rows still yields a valid empty artifact so it joins the completion
    /// set.
    pub fn finalize(mut self) -> Result<usize, WriteError> {
        self.flush()?;
        let writer = match self.writer.take() {
            Some(writer) => writer,
            None => self.create_writer()?,
        };
        writer.close()?;
        Ok(self.written)
    }

    fn writer(&mut self) -> Result<&mut ArrowWriter<File>, WriteError> {
        if self.writer.is_none() {
            self.writer = Some(self.create_writer()?);
        }
        Ok(self.writer.as_mut().expect("writer just created"))
    }

    fn create_writer(&self) -> Result<ArrowWriter<File>, WriteError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(&self.path)?;
        let props = WriterProperties::builder()
            .set_compression(parquet::basic::Compression::ZSTD(Default::default()))
            .build();
        Ok(ArrowWriter::try_new(file, schema(self.mode), Some(props))?)
    }

    fn take_batch(&mut self) -> Result<RecordBatch, WriteError> {
        let columns: Vec<ArrayRef> = match &mut self.buffers {
            Buffers::Full {
                namespace,
                title,
                timestamp,
                text,
            } => vec![
                Arc::new(StringArray::from(std::mem::take(namespace))),
                Arc::new(StringArray::from(std::mem::take(title))),
                Arc::new(StringArray::from(std::mem::take(timestamp))),
                Arc::new(StringArray::from(std::mem::take(text))),
            ],
            Buffers::Delta {
                namespace,
                title,
                initial_text,
                initial_timestamp,
                diff_timestamps,
                diffs,
            } => {
                let mut stamp_lists = ListBuilder::new(StringBuilder::new());
                for stamps in diff_timestamps.drain(..) {
                    for stamp in stamps {
                        stamp_lists.values().append_value(stamp);
                    }
                    stamp_lists.append(true);
                }
                let mut diff_lists = ListBuilder::new(BinaryBuilder::new());
                for deltas in diffs.drain(..) {
                    for delta in deltas {
                        diff_lists.values().append_value(&delta);
                    }
                    diff_lists.append(true);
                }
                vec![
                    Arc::new(StringArray::from(std::mem::take(namespace))),
                    Arc::new(StringArray::from(std::mem::take(title))),
                    Arc::new(StringArray::from(std::mem::take(initial_text))),
                    Arc::new(StringArray::from(std::mem::take(initial_timestamp))),
                    Arc::new(stamp_lists.finish()),
                    Arc::new(diff_lists.finish()),
                ]
            }
        };
        Ok(RecordBatch::try_new(schema(self.mode), columns)?)
    }
}

fn format_timestamp(ts: chrono::DateTime<chrono::Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Column order is fixed: namespace, title, then mode-specific fields.
pub fn schema(mode: SampleMode) -> SchemaRef {
    let fields = match mode {
        SampleMode::FullText => vec![
            Field::new("namespace", DataType::Utf8, false),
            Field::new("title", DataType::Utf8, false),
            Field::new("timestamp", DataType::Utf8, false),
            Field::new("text", DataType::Utf8, false),
        ],
        SampleMode::Delta => vec![
            Field::new("namespace", DataType::Utf8, false),
            Field::new("title", DataType::Utf8, false),
            Field::new("initial_text", DataType::Utf8, false),
            Field::new("initial_timestamp", DataType::Utf8, false),
            Field::new(
                "diff_timestamps",
                DataType::List(Arc::new(Field::new("item", DataType::Utf8, true))),
                false,
            ),
            Field::new(
                "diffs",
                DataType::List(Arc::new(Field::new("item", DataType::Binary, true))),
                false,
            ),
        ],
    };
    Arc::new(Schema::new(fields))
}

/// Resident set size of this process, in bytes.
#[cfg(target_os = "linux")]
pub fn resident_memory() -> u64 {
    std::fs::read_to_string("/proc/self/statm")
        .ok()
        .and_then(|content| {
            content
                .split_whitespace()
                .nth(1)
                .and_then(|pages| pages.parse::<u64>().ok())
                .map(|pages| pages * 4096)
        })
        .unwrap_or(0)
}

#[cfg(not(target_os = "linux"))]
pub fn resident_memory() -> u64 {
    0
}

/// Total system memory, in bytes.
#[cfg(target_os = "linux")]
pub fn total_memory() -> u64 {
    std::fs::read_to_string("/proc/meminfo")
        .ok()
        .and_then(|content| {
            content
                .lines()
                .find(|line| line.starts_with("MemTotal:"))
                .and_then(|line| {
                    line.split_whitespace()
                        .nth(1)
                        .and_then(|kb| kb.parse::<u64>().ok())
                        .map(|kb| kb * 1024)
                })
        })
        .unwrap_or(0)
}

#[cfg(not(target_os = "linux"))]
pub fn total_memory() -> u64 {
    0
}

// ── Tests ──
