use std::path::PathBuf;

use crate::conf::Conf;

/// One unit of work: a single compressed dump file of one project.
///
/// Created at discovery time, consumed by exactly one pipeline execution.
/// Both staging files are removed when the archive is done, success or not.
#[derive(Debug, Clone)]
pub struct Archive {
    pub project: String,
    pub file_name: String,
    /// Remote source of the compressed dump.
    pub url: String,
    /// Local staging path of the downloaded archive.
    pub input_path: PathBuf,
    /// Local staging path of the artifact before upload.
    pub output_path: PathBuf,
    /// Completion marker in the artifact store.
    pub artifact_name: String,
}

impl Archive {
    pub fn new(conf: &Conf, project: &str, file_name: &str) -> Self {
        let stem = file_name.strip_suffix(".7z").unwrap_or(file_name);
        let out_name = format!("{stem}.parquet");
        Self {
            project: project.to_string(),
            file_name: file_name.to_string(),
            url: format!(
                "{}/{}/{}/{}",
                conf.url_prefix.trim_end_matches('/'),
                project,
                conf.month_source,
                file_name
            ),
            input_path: conf.input_path.join(file_name),
            output_path: conf.output_path.join(&out_name),
            artifact_name: format!("{}/{}/{}", project, conf.month_source, out_name),
        }
    }

    /// Remove staging files. Runs on every exit path; missing files are fine.
    pub fn cleanup(&self) {
        for path in [&self.input_path, &self.output_path] {
            if let Err(err) = std::fs::remove_file(path) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::debug!("could not remove {}: {}", path.display(), err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn naming_follows_project_and_month() {
        let conf = Conf {
            month_source: "20170901".into(),
            url_prefix: "https://dumps.example.org/".into(),
            ..Conf::default()
        };
        let archive = Archive::new(
            &conf,
            "enwiki",
            "enwiki-20170901-pages-meta-history1.xml-p10p2123.7z",
        );

        assert_eq!(
            archive.url,
            "https://dumps.example.org/enwiki/20170901/enwiki-20170901-pages-meta-history1.xml-p10p2123.7z"
        );
        assert_eq!(
            archive.artifact_name,
            "enwiki/20170901/enwiki-20170901-pages-meta-history1.xml-p10p2123.parquet"
        );
        assert!(archive
            .output_path
            .to_string_lossy()
            .ends_with("enwiki-20170901-pages-meta-history1.xml-p10p2123.parquet"));
    }

    #[test]
    fn plain_xml_archives_keep_their_stem() {
        let conf = Conf {
            month_source: "20170901".into(),
            ..Conf::default()
        };
        let archive = Archive::new(&conf, "testwiki", "dump.xml");
        assert_eq!(archive.artifact_name, "testwiki/20170901/dump.xml.parquet");
    }

    #[test]
    fn cleanup_tolerates_missing_files() {
        let conf = Conf::default();
        let archive = Archive::new(&conf, "enwiki", "nope.7z");
        archive.cleanup();
    }
}
