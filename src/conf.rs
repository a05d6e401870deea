use std::path::{Path, PathBuf};

use chrono::{DateTime, Days, Duration, NaiveTime, Utc};
use serde::Deserialize;

/// Shape of the rows written to the artifact. Fixed for a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SampleMode {
    /// One row per sampled revision: namespace, title, timestamp, text.
    FullText,
    /// One row per page: base snapshot plus binary deltas.
    Delta,
}

/// How far the per-page watermark advances after an accepted revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatermarkPolicy {
    /// Start of the next calendar day (UTC) after the accepted timestamp,
    /// i.e. at most one sampled revision per page per day.
    CalendarDay,
    /// Accepted timestamp plus a fixed number of seconds.
    FixedSeconds(i64),
}

impl WatermarkPolicy {
    /// Watermark after accepting a revision timestamped `accepted`.
    pub fn next_watermark(&self, accepted: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::CalendarDay => (accepted.date_naive() + Days::new(1))
                .and_time(NaiveTime::MIN)
                .and_utc(),
            Self::FixedSeconds(secs) => accepted + Duration::seconds(*secs),
        }
    }
}

/// Run configuration. Loaded once in `main` and passed by value into the
/// orchestrator and each pipeline; nothing reads config globally.
#[derive(Debug, Clone, Deserialize)]
pub struct Conf {
    /// Projects to process, e.g. ["enwiki", "dewiki"].
    #[serde(default)]
    pub wikis: Vec<String>,
    /// Dump month tag, e.g. "20170901". Part of source URLs and artifact names.
    #[serde(default)]
    pub month_source: String,
    /// Pages outside this namespace id emit no rows.
    #[serde(default = "default_namespace")]
    pub namespace_filter: String,
    #[serde(default = "default_mode")]
    pub mode: SampleMode,
    #[serde(default = "default_watermark")]
    pub watermark: WatermarkPolicy,
    /// Simultaneous downloads (bandwidth-bound, keep small).
    #[serde(default = "default_download_parallelism")]
    pub download_parallelism: usize,
    /// Simultaneous full pipelines (CPU/memory-bound).
    #[serde(default = "default_pipeline_parallelism")]
    pub pipeline_parallelism: usize,
    /// Fraction of the per-worker memory budget that triggers a sink flush.
    #[serde(default = "default_flush_fraction")]
    pub flush_fraction: f64,
    /// Staging directory for downloaded archives.
    #[serde(default = "default_input_path")]
    pub input_path: PathBuf,
    /// Staging directory for artifacts before upload.
    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,
    #[serde(default = "default_url_prefix")]
    pub url_prefix: String,
    /// Artifact store root (bucket directory).
    #[serde(default = "default_bucket")]
    pub bucket: PathBuf,
    /// Re-run archives whose artifacts already exist in the store.
    #[serde(default)]
    pub overwrite: bool,
}

impl Conf {
    /// Load from an optional config file with `DIACHRONIC_*` env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder
            .add_source(config::Environment::with_prefix("DIACHRONIC"))
            .build()?
            .try_deserialize()
    }
}

impl Default for Conf {
    fn default() -> Self {
        Self {
            wikis: Vec::new(),
            month_source: String::new(),
            namespace_filter: default_namespace(),
            mode: default_mode(),
            watermark: default_watermark(),
            download_parallelism: default_download_parallelism(),
            pipeline_parallelism: default_pipeline_parallelism(),
            flush_fraction: default_flush_fraction(),
            input_path: default_input_path(),
            output_path: default_output_path(),
            url_prefix: default_url_prefix(),
            bucket: default_bucket(),
            overwrite: false,
        }
    }
}

fn default_namespace() -> String {
    "0".to_string()
}

fn default_mode() -> SampleMode {
    SampleMode::FullText
}

fn default_watermark() -> WatermarkPolicy {
    WatermarkPolicy::CalendarDay
}

fn default_download_parallelism() -> usize {
    2
}

fn default_pipeline_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
}

fn default_flush_fraction() -> f64 {
    0.5
}

fn default_input_path() -> PathBuf {
    PathBuf::from("staging/input")
}

fn default_output_path() -> PathBuf {
    PathBuf::from("staging/output")
}

fn default_url_prefix() -> String {
    "https://dumps.wikimedia.org/".to_string()
}

fn default_bucket() -> PathBuf {
    PathBuf::from("bucket")
}

// ── Tests ──
