//! Binary delta encoding for compaction mode (bsdiff4 patch format).

use chrono::{DateTime, Utc};
use qbsdiff::{Bsdiff, Bspatch};

use crate::error::EncodeError;

/// Byte-level diff from `old` to `new`.
pub fn diff(old: &[u8], new: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut patch = Vec::new();
    Bsdiff::new(old, new).compare(std::io::Cursor::new(&mut patch))?;
    Ok(patch)
}

/// Apply a patch produced by [`diff`].
pub fn patch(old: &[u8], patch: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut new = Vec::new();
    Bspatch::new(patch)?.apply(old, std::io::Cursor::new(&mut new))?;
    Ok(new)
}

/// Per-page accumulator for delta mode: the first accepted revision is kept
/// verbatim as the base snapshot, every later one as a diff against the
/// immediately preceding accepted revision (not against the base).
#[derive(Debug)]
pub struct DeltaChain {
    pub initial_text: String,
    pub initial_timestamp: DateTime<Utc>,
    pub diff_timestamps: Vec<DateTime<Utc>>,
    pub diffs: Vec<Vec<u8>>,
    /// Raw bytes of the most recently accepted revision.
    snapshot: Vec<u8>,
}

impl DeltaChain {
    pub fn new(timestamp: DateTime<Utc>, text: String) -> Self {
        let snapshot = text.clone().into_bytes();
        Self {
            initial_text: text,
            initial_timestamp: timestamp,
            diff_timestamps: Vec::new(),
            diffs: Vec::new(),
            snapshot,
        }
    }

    /// Append one accepted revision. A diff failure aborts the archive so the
    /// output schema stays fixed for the run.
    pub fn accept(
        &mut self,
        timestamp: DateTime<Utc>,
        text: String,
        title: &str,
    ) -> Result<(), EncodeError> {
        let cur = text.into_bytes();
        let delta = diff(&self.snapshot, &cur).map_err(|source| EncodeError::Diff {
            title: title.to_string(),
            source,
        })?;
        self.diff_timestamps.push(timestamp);
        self.diffs.push(delta);
        self.snapshot = cur;
        Ok(())
    }
}

// ── Tests ──
