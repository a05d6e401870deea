//! Per-page sampling state machine.
//!
//! Consumes [`DumpToken`]s in document order and decides, with O(1) state per
//! page, which revisions make it into the artifact. Revisions within a page
//! are assumed to arrive in ascending timestamp order, as the dumps store
//! them; the sampler never re-sorts.

use chrono::{DateTime, Utc};

use crate::conf::{SampleMode, WatermarkPolicy};
use crate::delta::DeltaChain;
use crate::error::{ParseError, PipelineError};
use crate::stream::DumpToken;

/// One emitted record. The shape is fixed per run by the configured mode.
#[derive(Debug, Clone, PartialEq)]
pub enum SampledRow {
    Full {
        namespace: String,
        title: String,
        timestamp: DateTime<Utc>,
        text: String,
    },
    Delta {
        namespace: String,
        title: String,
        initial_text: String,
        initial_timestamp: DateTime<Utc>,
        diff_timestamps: Vec<DateTime<Utc>>,
        diffs: Vec<Vec<u8>>,
    },
}

/// Ephemeral per-page state. Reset after every `PageEnd`.
#[derive(Debug, Default)]
struct PageAccumulator {
    title: String,
    namespace: String,
    /// Namespace matched the filter; revisions are ignored otherwise.
    selected: bool,
    /// Next-eligible timestamp. `None` until the first acceptance.
    watermark: Option<DateTime<Utc>>,
    rev_timestamp: Option<DateTime<Utc>>,
    rev_text: Option<String>,
    /// Delta mode only: base snapshot plus diffs so far.
    chain: Option<DeltaChain>,
}

pub struct Sampler {
    namespace_filter: String,
    policy: WatermarkPolicy,
    mode: SampleMode,
    page: PageAccumulator,
}

impl Sampler {
    pub fn new(namespace_filter: &str, policy: WatermarkPolicy, mode: SampleMode) -> Self {
        Self {
            namespace_filter: namespace_filter.to_string(),
            policy,
            mode,
            page: PageAccumulator::default(),
        }
    }

    /// Feed one token; at most one row comes out.
    pub fn feed(&mut self, token: DumpToken) -> Result<Option<SampledRow>, PipelineError> {
        match token {
            DumpToken::Title(title) => {
                self.page.title = title;
                Ok(None)
            }
            DumpToken::Namespace(ns) => {
                self.page.selected = ns == self.namespace_filter;
                self.page.namespace = ns;
                Ok(None)
            }
            DumpToken::Timestamp(value) => {
                if self.page.selected {
                    self.page.rev_timestamp = Some(parse_timestamp(&value)?);
                }
                Ok(None)
            }
            DumpToken::Text(text) => {
                if self.page.selected {
                    self.page.rev_text = Some(text);
                }
                Ok(None)
            }
            DumpToken::RevisionEnd => self.finish_revision(),
            DumpToken::PageEnd => Ok(self.finish_page()),
        }
    }

    fn finish_revision(&mut self) -> Result<Option<SampledRow>, PipelineError> {
        if !self.page.selected {
            return Ok(None);
        }
        let timestamp =
            self.page
                .rev_timestamp
                .take()
                .ok_or_else(|| ParseError::MissingTimestamp {
                    title: self.page.title.clone(),
                })?;
        // Absent text is an empty revision, not an error.
        let text = self.page.rev_text.take().unwrap_or_default();

        if let Some(watermark) = self.page.watermark {
            if timestamp < watermark {
                return Ok(None);
            }
        }
        self.page.watermark = Some(self.policy.next_watermark(timestamp));

        match self.mode {
            SampleMode::FullText => Ok(Some(SampledRow::Full {
                namespace: self.page.namespace.clone(),
                title: self.page.title.clone(),
                timestamp,
                text,
            })),
            SampleMode::Delta => {
                match self.page.chain.as_mut() {
                    Some(chain) => chain.accept(timestamp, text, &self.page.title)?,
                    None => self.page.chain = Some(DeltaChain::new(timestamp, text)),
                }
                Ok(None)
            }
        }
    }

    fn finish_page(&mut self) -> Option<SampledRow> {
        let page = std::mem::take(&mut self.page);
        page.chain.map(|chain| SampledRow::Delta {
            namespace: page.namespace,
            title: page.title,
            initial_text: chain.initial_text,
            initial_timestamp: chain.initial_timestamp,
            diff_timestamps: chain.diff_timestamps,
            diffs: chain.diffs,
        })
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, ParseError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|source| ParseError::BadTimestamp {
            value: value.to_string(),
            source,
        })
}

// ── Tests ──
