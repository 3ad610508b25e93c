use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

use crate::page_writer::PageWriter;
use crate::state::{CrawlStore, PageRecord, PageStatus, StoreError};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One line of an export: the stored record plus where its page was mirrored.
#[derive(Debug, Clone, Serialize)]
pub struct ExportRecord {
    #[serde(flatten)]
    pub record: PageRecord,

    /// Location of the saved page, relative to the output directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportScope {
    AllRecords,
    SuccessOnly,
}

/// Stream the store into a JSONL file at `path`, one record per line.
/// Successful records get a `local_path` when `pages` is given and a file
/// was mirrored for them.
pub fn export_store<P: AsRef<Path>>(
    store: &CrawlStore,
    pages: Option<&PageWriter>,
    output_dir: &Path,
    scope: ExportScope,
    path: P,
) -> Result<usize, ExportError> {
    let mut writer = BufWriter::new(File::create(path)?);
    let mut written = 0usize;

    store.for_each_record(|record| {
        if scope == ExportScope::SuccessOnly && record.status != PageStatus::Success {
            return Ok(());
        }
        let local_path = match pages {
            Some(pages) if record.status == PageStatus::Success => store
                .page_file(&record.url)?
                .map(|file| {
                    let absolute = pages.path_of(&file);
                    let relative = absolute.strip_prefix(output_dir).unwrap_or(&absolute);
                    relative.to_string_lossy().replace('\\', "/")
                }),
            _ => None,
        };

        let line = ExportRecord { record, local_path };
        serde_json::to_writer(&mut writer, &line)?;
        writer.write_all(b"\n")?;
        written += 1;
        Ok(())
    })?;

    writer.flush()?;
    Ok(written)
}

/// `manifest.jsonl`: every successfully mirrored page and its file.
pub fn write_manifest(
    store: &CrawlStore,
    pages: Option<&PageWriter>,
    output_dir: &Path,
) -> Result<usize, ExportError> {
    export_store(
        store,
        pages,
        output_dir,
        ExportScope::SuccessOnly,
        output_dir.join(crate::config::Config::MANIFEST_FILE),
    )
}
