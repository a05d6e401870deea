//! Where archives come from: the dump manifest and the downloads.
//!
//! The orchestrator only sees the [`DumpSource`] trait, so tests can swap in
//! a stub that serves local fixtures.

use std::fs::File;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::info;

use crate::archive::Archive;
use crate::conf::Conf;
use crate::error::{DiscoveryError, DownloadError};

/// Manifest job holding the full-edit-history parts.
const HISTORY_JOB: &str = "metahistory7zdump";

static HISTORY_FILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"pages-meta-history.*\.7z$").unwrap());

pub trait DumpSource: Send + Sync {
    /// Candidate archive file names for one project.
    fn list_files(&self, project: &str) -> Result<Vec<String>, DiscoveryError>;
    /// Download one archive to its staging input path.
    fn fetch(&self, archive: &Archive) -> Result<(), DownloadError>;
}

/// Production source: `dumpstatus.json` manifest plus plain HTTP GETs
/// against a dumps mirror. No internal timeouts or retries; failures
/// propagate to the per-archive boundary.
pub struct HttpDumpSource {
    client: reqwest::blocking::Client,
    url_prefix: String,
    month_source: String,
}

impl HttpDumpSource {
    pub fn new(conf: &Conf) -> Result<Self, reqwest::Error> {
        Ok(Self {
            // Dump parts run to gigabytes; the default 30s request timeout
            // would cut downloads short.
            client: reqwest::blocking::Client::builder().timeout(None).build()?,
            url_prefix: conf.url_prefix.trim_end_matches('/').to_string(),
            month_source: conf.month_source.clone(),
        })
    }
}

impl DumpSource for HttpDumpSource {
    fn list_files(&self, project: &str) -> Result<Vec<String>, DiscoveryError> {
        let url = format!(
            "{}/{}/{}/dumpstatus.json",
            self.url_prefix, project, self.month_source
        );
        info!("fetching manifest: {}", url);
        let manifest: Value = self
            .client
            .get(&url)
            .send()?
            .error_for_status()?
            .json()?;
        let files = history_files(&manifest)
            .ok_or_else(|| DiscoveryError::Malformed(format!("no {HISTORY_JOB} files at {url}")))?;
        info!("{}: {} history parts in manifest", project, files.len());
        Ok(files)
    }

    fn fetch(&self, archive: &Archive) -> Result<(), DownloadError> {
        if let Some(parent) = archive.input_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut response = self
            .client
            .get(&archive.url)
            .send()?
            .error_for_status()?;
        let mut file = File::create(&archive.input_path)?;
        let bytes = std::io::copy(&mut response, &mut file)?;
        info!("downloaded {} ({} bytes)", archive.file_name, bytes);
        Ok(())
    }
}

/// Pull the history-dump part names out of a manifest document, sorted for a
/// stable work order.
fn history_files(manifest: &Value) -> Option<Vec<String>> {
    let files = manifest
        .get("jobs")?
        .get(HISTORY_JOB)?
        .get("files")?
        .as_object()?;
    let mut names: Vec<String> = files
        .keys()
        .filter(|name| HISTORY_FILE_RE.is_match(name))
        .cloned()
        .collect();
    names.sort();
    Some(names)
}

// ── Tests ──
