//! Error taxonomy for the batch run.
//!
//! Every per-archive failure maps to exactly one category; the orchestrator
//! logs the category with the archive id and keeps going. `DiscoveryError` is
//! the one fatal case: it happens before any archive has been attempted.

use thiserror::Error;

/// Fatal: the work list could not be built.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("manifest request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("manifest malformed: {0}")]
    Malformed(String),
    #[error("artifact store listing failed: {0}")]
    Store(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("download failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("staging write failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed XML: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("revision of page {title:?} has no timestamp")]
    MissingTimestamp { title: String },
    #[error("bad timestamp {value:?}: {source}")]
    BadTimestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
    #[error("decompressor exited with {status}")]
    Decompressor { status: std::process::ExitStatus },
    #[error("archive stream failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("binary delta failed for page {title:?}: {source}")]
    Diff {
        title: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("column batch failed: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
    #[error("artifact write failed: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
    #[error("artifact file failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("artifact publish failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Anything that can sink one archive. Caught at the orchestrator's
/// per-archive boundary; never stops other archives.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Download(#[from] DownloadError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Write(#[from] WriteError),
    #[error(transparent)]
    Upload(#[from] UploadError),
}

impl PipelineError {
    /// Stable category string used in logs and batch reports.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Download(_) => "download",
            Self::Parse(_) => "parse",
            Self::Encode(_) => "encode",
            Self::Write(_) => "write",
            Self::Upload(_) => "upload",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_are_stable() {
        let err = PipelineError::Parse(ParseError::MissingTimestamp {
            title: "Test".into(),
        });
        assert_eq!(err.category(), "parse");
        assert!(err.to_string().contains("Test"));

        let err = PipelineError::Upload(UploadError::Io(std::io::Error::other("denied")));
        assert_eq!(err.category(), "upload");
    }
}
