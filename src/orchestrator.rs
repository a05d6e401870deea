//! Batch orchestrator: resumable fleet runs over many archives.
//!
//! Two independent admission controls compose: a small semaphore bounds
//! simultaneous downloads, a larger one bounds simultaneous full pipelines.
//! A worker holds its pipeline slot for the whole archive but the download
//! permit only while fetching bytes. One archive's failure never touches the
//! others; cleanup of staging files runs on every exit path.

use std::collections::HashSet;
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::{mpsc, Semaphore};
use tokio::task;
use tracing::{info, warn};

use crate::archive::Archive;
use crate::conf::Conf;
use crate::error::{DiscoveryError, PipelineError, UploadError};
use crate::pipeline;
use crate::source::DumpSource;
use crate::store::ArtifactStore;

/// One isolated per-archive failure.
#[derive(Debug)]
pub struct ArchiveFailure {
    pub archive: String,
    pub category: &'static str,
    pub message: String,
}

/// Final status of a batch run. A fully successful run has no failures.
#[derive(Debug)]
pub struct BatchReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failures: Vec<ArchiveFailure>,
}

pub struct Orchestrator {
    conf: Conf,
    source: Arc<dyn DumpSource>,
    store: Arc<dyn ArtifactStore>,
}

impl Orchestrator {
    pub fn new(conf: Conf, source: Arc<dyn DumpSource>, store: Arc<dyn ArtifactStore>) -> Self {
        Self { conf, source, store }
    }

    /// Candidate archives across all configured projects, in manifest order.
    async fn discover(&self) -> Result<Vec<Archive>, DiscoveryError> {
        let mut archives = Vec::new();
        for project in &self.conf.wikis {
            let source = Arc::clone(&self.source);
            let name = project.clone();
            let files = task::spawn_blocking(move || source.list_files(&name))
                .await
                .expect("discovery task panicked")?;
            for file in files {
                archives.push(Archive::new(&self.conf, project, &file));
            }
        }
        Ok(archives)
    }

    /// Work set after subtracting already-produced artifacts:
    /// (to run, skipped).
    pub async fn plan(&self) -> Result<(Vec<Archive>, Vec<Archive>), DiscoveryError> {
        let archives = self.discover().await?;
        let store = Arc::clone(&self.store);
        let done = task::spawn_blocking(move || store.list())
            .await
            .expect("store listing task panicked")?;
        Ok(partition(archives, &done, self.conf.overwrite))
    }

    /// Run every pending archive to completion. Only discovery failures are
    /// fatal; everything after is isolated per archive and reported.
    pub async fn run(&self) -> Result<BatchReport, DiscoveryError> {
        let (to_run, skipped) = self.plan().await?;
        info!(
            "{} archives to run, {} already in the store",
            to_run.len(),
            skipped.len()
        );

        let downloads = Arc::new(Semaphore::new(self.conf.download_parallelism.max(1)));
        let pipelines = Arc::new(Semaphore::new(self.conf.pipeline_parallelism.max(1)));
        let attempted = to_run.len();

        let pb = ProgressBar::new(attempted as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")
                .unwrap()
                .progress_chars("=> "),
        );

        let (tx, mut rx) =
            mpsc::channel::<(Archive, Result<(), PipelineError>)>(self.conf.pipeline_parallelism.max(1) * 2);

        for archive in to_run {
            let conf = self.conf.clone();
            let source = Arc::clone(&self.source);
            let store = Arc::clone(&self.store);
            let downloads = Arc::clone(&downloads);
            let pipelines = Arc::clone(&pipelines);
            let tx = tx.clone();

            tokio::spawn(async move {
                let _slot = pipelines.acquire_owned().await.unwrap();
                let result = run_one(archive.clone(), conf, source, store, downloads).await;
                archive.cleanup();
                let _ = tx.send((archive, result)).await;
            });
        }

        // Drop our copy of tx so rx closes when all workers finish.
        drop(tx);

        let mut succeeded = 0usize;
        let mut failures = Vec::new();
        while let Some((archive, result)) = rx.recv().await {
            match result {
                Ok(()) => succeeded += 1,
                Err(err) => {
                    warn!(
                        "{} failed ({}): {}",
                        archive.file_name,
                        err.category(),
                        err
                    );
                    failures.push(ArchiveFailure {
                        archive: archive.file_name,
                        category: err.category(),
                        message: err.to_string(),
                    });
                }
            }
            pb.inc(1);
        }
        pb.finish_and_clear();

        info!(
            "batch done: {} ok, {} failed, {} skipped",
            succeeded,
            failures.len(),
            skipped.len()
        );
        Ok(BatchReport {
            attempted,
            succeeded,
            skipped: skipped.len(),
            failures,
        })
    }
}

/// Download under the network permit, then convert and publish on the
/// blocking pool. Strictly sequential within one archive.
async fn run_one(
    archive: Archive,
    conf: Conf,
    source: Arc<dyn DumpSource>,
    store: Arc<dyn ArtifactStore>,
    downloads: Arc<Semaphore>,
) -> Result<(), PipelineError> {
    {
        let _permit = downloads.acquire().await.unwrap();
        let archive = archive.clone();
        task::spawn_blocking(move || source.fetch(&archive))
            .await
            .expect("download task panicked")?;
    }

    task::spawn_blocking(move || -> Result<(), PipelineError> {
        pipeline::convert_archive(&archive, &conf)?;
        store
            .upload(&archive.artifact_name, &archive.output_path)
            .map_err(UploadError::from)?;
        Ok(())
    })
    .await
    .expect("pipeline task panicked")
}

fn partition(
    archives: Vec<Archive>,
    done: &HashSet<String>,
    overwrite: bool,
) -> (Vec<Archive>, Vec<Archive>) {
    if overwrite {
        return (archives, Vec::new());
    }
    archives
        .into_iter()
        .partition(|archive| !done.contains(&archive.artifact_name))
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn archives(names: &[&str]) -> Vec<Archive> {
        let conf = Conf {
            month_source: "20170901".into(),
            ..Conf::default()
        };
        names
            .iter()
            .map(|n| Archive::new(&conf, "enwiki", n))
            .collect()
    }

    #[test]
    fn partition_skips_already_produced() {
        let all = archives(&["a.7z", "b.7z", "c.7z"]);
        let done: HashSet<String> = [all[1].artifact_name.clone()].into();

        let (to_run, skipped) = partition(all, &done, false);
        let names: Vec<_> = to_run.iter().map(|a| a.file_name.as_str()).collect();
        assert_eq!(names, vec!["a.7z", "c.7z"]);
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].file_name, "b.7z");
    }

    #[test]
    fn overwrite_reruns_everything() {
        let all = archives(&["a.7z", "b.7z"]);
        let done: HashSet<String> = all.iter().map(|a| a.artifact_name.clone()).collect();

        let (to_run, skipped) = partition(all, &done, true);
        assert_eq!(to_run.len(), 2);
        assert!(skipped.is_empty());
    }
}
