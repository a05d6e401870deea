//! Per-archive pipeline: decompress → tokenize → sample → write.
//!
//! Everything here is strictly sequential and blocking; the orchestrator
//! decides how many of these run at once.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};

use tracing::info;

use crate::archive::Archive;
use crate::conf::Conf;
use crate::error::{ParseError, PipelineError};
use crate::sampler::Sampler;
use crate::sink::{resident_memory, ColumnSink, FlushBudget};
use crate::stream::{DumpToken, DumpTokens};

/// Streaming XML source for one archive. Compressed dumps go through an
/// external `7z` process whose stdout is consumed directly; plain `.xml`
/// files are read as-is.
fn open_archive(archive: &Archive) -> Result<(Box<dyn BufRead>, Option<Child>), ParseError> {
    if archive.file_name.ends_with(".7z") {
        let mut child = Command::new("7z")
            .args(["e", "-so"])
            .arg(&archive.input_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        let stdout = child.stdout.take().expect("stdout was piped");
        Ok((
            Box::new(BufReader::with_capacity(1 << 20, stdout)),
            Some(child),
        ))
    } else {
        let file = File::open(&archive.input_path)?;
        Ok((Box::new(BufReader::with_capacity(1 << 20, file)), None))
    }
}

/// Decode one downloaded archive into its artifact at the staging output
/// path. Returns the number of rows written.
pub fn convert_archive(archive: &Archive, conf: &Conf) -> Result<usize, PipelineError> {
    let budget = FlushBudget::from_conf(conf);
    convert_with_budget(archive, conf, budget)
}

pub fn convert_with_budget(
    archive: &Archive,
    conf: &Conf,
    budget: FlushBudget,
) -> Result<usize, PipelineError> {
    let (reader, child) = open_archive(archive).map_err(PipelineError::Parse)?;
    let mut tokens = DumpTokens::new(reader);
    let mut sampler = Sampler::new(&conf.namespace_filter, conf.watermark, conf.mode);
    let mut sink = ColumnSink::new(&archive.output_path, conf.mode, budget);

    let pumped = pump(&mut tokens, &mut sampler, &mut sink);

    if let Some(mut child) = child {
        if pumped.is_err() {
            // The parse already failed; do not hang on a stuck decompressor.
            let _ = child.kill();
        }
        let status = child.wait().map_err(ParseError::Io)?;
        if pumped.is_ok() && !status.success() {
            return Err(ParseError::Decompressor { status }.into());
        }
    }
    pumped?;

    let rows = sink.finalize()?;
    info!(
        "wrote {} rows for {} to {}",
        rows,
        archive.file_name,
        archive.output_path.display()
    );
    Ok(rows)
}

fn pump(
    tokens: &mut DumpTokens<Box<dyn BufRead>>,
    sampler: &mut Sampler,
    sink: &mut ColumnSink,
) -> Result<(), PipelineError> {
    while let Some(token) = tokens.next_token()? {
        let page_end = matches!(token, DumpToken::PageEnd);
        if let Some(row) = sampler.feed(token)? {
            sink.append(row);
        }
        if page_end {
            sink.maybe_flush(resident_memory())?;
        }
    }
    Ok(())
}

// ── Tests ──
