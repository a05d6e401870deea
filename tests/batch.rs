//! End-to-end batch runs against a stub dump source and a directory store.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tempfile::tempdir;

use diachronic::archive::Archive;
use diachronic::conf::Conf;
use diachronic::error::{DiscoveryError, DownloadError};
use diachronic::orchestrator::Orchestrator;
use diachronic::source::DumpSource;
use diachronic::store::{ArtifactStore, FsStore};

fn dump(title: &str, text: &str) -> String {
    format!(
        r#"<mediawiki xmlns="http://www.mediawiki.org/xml/export-0.10/">
  <page>
    <title>{title}</title>
    <ns>0</ns>
    <revision>
      <timestamp>2017-09-01T12:00:00Z</timestamp>
      <text>{text}</text>
    </revision>
  </page>
</mediawiki>"#
    )
}

/// Serves in-memory XML fixtures as plain `.xml` archives and counts how many
/// downloads actually happen.
struct StubSource {
    fixtures: HashMap<String, String>,
    fetches: AtomicUsize,
}

impl StubSource {
    fn new(fixtures: &[(&str, String)]) -> Self {
        Self {
            fixtures: fixtures
                .iter()
                .map(|(name, xml)| (name.to_string(), xml.clone()))
                .collect(),
            fetches: AtomicUsize::new(0),
        }
    }
}

impl DumpSource for StubSource {
    fn list_files(&self, _project: &str) -> Result<Vec<String>, DiscoveryError> {
        let mut names: Vec<String> = self.fixtures.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn fetch(&self, archive: &Archive) -> Result<(), DownloadError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(parent) = archive.input_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&archive.input_path, &self.fixtures[&archive.file_name])?;
        Ok(())
    }
}

/// Forwards to a real `FsStore` but fails the first upload, like a bucket
/// that was briefly unreachable.
struct FlakyStore {
    inner: FsStore,
    failed_once: std::sync::atomic::AtomicBool,
}

impl FlakyStore {
    fn new(root: &Path) -> Self {
        Self {
            inner: FsStore::new(root),
            failed_once: std::sync::atomic::AtomicBool::new(false),
        }
    }
}

impl ArtifactStore for FlakyStore {
    fn list(&self) -> std::io::Result<std::collections::HashSet<String>> {
        self.inner.list()
    }

    fn upload(&self, name: &str, local: &Path) -> std::io::Result<()> {
        if !self.failed_once.swap(true, Ordering::SeqCst) {
            return Err(std::io::Error::other("bucket unavailable"));
        }
        self.inner.upload(name, local)
    }
}

fn test_conf(root: &Path) -> Conf {
    Conf {
        wikis: vec!["testwiki".into()],
        month_source: "20170901".into(),
        input_path: root.join("staging/input"),
        output_path: root.join("staging/output"),
        bucket: root.join("bucket"),
        download_parallelism: 2,
        pipeline_parallelism: 2,
        ..Conf::default()
    }
}

#[tokio::test]
async fn one_bad_archive_does_not_stop_the_batch() {
    let root = tempdir().unwrap();
    let conf = test_conf(root.path());
    let source = Arc::new(StubSource::new(&[
        ("part1.xml", dump("Alpha", "alpha text")),
        ("part2.xml", "<mediawiki><page><title>broken</page></mediawiki>".to_string()),
        ("part3.xml", dump("Gamma", "gamma text")),
    ]));
    let store = Arc::new(FsStore::new(&conf.bucket));

    let report = Orchestrator::new(conf.clone(), source, store.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(report.attempted, 3);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].archive, "part2.xml");
    assert_eq!(report.failures[0].category, "parse");

    let names = store.list().unwrap();
    assert!(names.contains("testwiki/20170901/part1.xml.parquet"));
    assert!(names.contains("testwiki/20170901/part3.xml.parquet"));
    assert_eq!(names.len(), 2);

    // Staging is cleaned up on both the success and the failure paths.
    for dir in [&conf.input_path, &conf.output_path] {
        let leftovers = std::fs::read_dir(dir)
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(leftovers, 0, "leftover files in {}", dir.display());
    }
}

#[tokio::test]
async fn second_run_only_attempts_missing_archives() {
    let root = tempdir().unwrap();
    let conf = test_conf(root.path());
    let store = Arc::new(FsStore::new(&conf.bucket));

    let first = Arc::new(StubSource::new(&[
        ("part1.xml", dump("Alpha", "alpha text")),
        ("part2.xml", dump("Beta", "beta text")),
    ]));
    let report = Orchestrator::new(conf.clone(), first.clone(), store.clone())
        .run()
        .await
        .unwrap();
    assert_eq!(report.succeeded, 2);
    assert_eq!(first.fetches.load(Ordering::SeqCst), 2);

    // The manifest grew by one part; only that one gets downloaded.
    let second = Arc::new(StubSource::new(&[
        ("part1.xml", dump("Alpha", "alpha text")),
        ("part2.xml", dump("Beta", "beta text")),
        ("part3.xml", dump("Gamma", "gamma text")),
    ]));
    let report = Orchestrator::new(conf.clone(), second.clone(), store.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(report.attempted, 1);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.skipped, 2);
    assert_eq!(second.fetches.load(Ordering::SeqCst), 1);
    assert_eq!(store.list().unwrap().len(), 3);
}

#[tokio::test]
async fn failed_upload_is_reported_and_retried_next_run() {
    let root = tempdir().unwrap();
    let conf = test_conf(root.path());
    let store = Arc::new(FlakyStore::new(&conf.bucket));
    let source = Arc::new(StubSource::new(&[("part1.xml", dump("Alpha", "alpha text"))]));

    let report = Orchestrator::new(conf.clone(), source.clone(), store.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(report.attempted, 1);
    assert_eq!(report.succeeded, 0);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].category, "upload");
    assert!(store.list().unwrap().is_empty());

    // The converted artifact never reached the store, so its staging copy is
    // gone too and the archive is attempted again next run.
    for dir in [&conf.input_path, &conf.output_path] {
        let leftovers = std::fs::read_dir(dir)
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(leftovers, 0, "leftover files in {}", dir.display());
    }

    let report = Orchestrator::new(conf, source.clone(), store.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(report.attempted, 1);
    assert_eq!(report.succeeded, 1);
    assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
    assert!(store
        .list()
        .unwrap()
        .contains("testwiki/20170901/part1.xml.parquet"));
}

#[tokio::test]
async fn overwrite_reprocesses_existing_artifacts() {
    let root = tempdir().unwrap();
    let mut conf = test_conf(root.path());
    let store = Arc::new(FsStore::new(&conf.bucket));
    let source = Arc::new(StubSource::new(&[("part1.xml", dump("Alpha", "v1"))]));

    let report = Orchestrator::new(conf.clone(), source.clone(), store.clone())
        .run()
        .await
        .unwrap();
    assert_eq!(report.succeeded, 1);

    conf.overwrite = true;
    let report = Orchestrator::new(conf, source.clone(), store)
        .run()
        .await
        .unwrap();
    assert_eq!(report.attempted, 1);
    assert_eq!(report.skipped, 0);
    assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
}
