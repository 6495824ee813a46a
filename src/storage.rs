//! Local statement archive
//!
//! Every generated or saved statement is mirrored as a Markdown document
//! under the inspector's Documents folder, front matter first so the archive
//! stays greppable by record id or jurisdiction. The durable record lives
//! behind the gateway; archive failures are the caller's to log and never
//! block the workflow.

use chrono::Local;
use std::fs;
use std::path::PathBuf;
use tracing::info;

/// Context written into an archived document's front matter
#[derive(Debug, Clone, Copy)]
pub(crate) struct ArchiveEntry<'a> {
    pub(crate) statement: &'a str,
    pub(crate) record_id: Option<&'a str>,
    pub(crate) jurisdiction: &'a str,
    /// Short description of the attached image, if any
    pub(crate) image: Option<&'a str>,
}

/// Archive one statement; returns the path of the written document
pub(crate) fn archive_statement(entry: &ArchiveEntry<'_>) -> Result<PathBuf, StorageError> {
    if entry.statement.trim().is_empty() {
        return Err(StorageError::EmptyStatement);
    }

    let dir = dirs::document_dir()
        .ok_or(StorageError::NoDocumentsDir)?
        .join("snagscribe")
        .join("statements");
    fs::create_dir_all(&dir).map_err(|e| StorageError::Io {
        path: dir.clone(),
        source: e,
    })?;

    let now = Local::now();
    let path = dir.join(format!("inspection-{}.md", now.format("%Y%m%d-%H%M%S")));
    let document = render_markdown(entry, &now.to_rfc3339());
    fs::write(&path, document).map_err(|e| StorageError::Io {
        path: path.clone(),
        source: e,
    })?;

    info!("Archived statement to {:?}", path);
    Ok(path)
}

/// Front matter first, statement body after a blank line. Optional fields are
/// omitted rather than written empty, so a missing record id is visible as a
/// missing key.
fn render_markdown(entry: &ArchiveEntry<'_>, saved_at: &str) -> String {
    let mut doc = String::new();
    doc.push_str("---\n");
    doc.push_str(&format!("saved: {}\n", saved_at));
    doc.push_str(&format!("jurisdiction: {}\n", entry.jurisdiction));
    if let Some(id) = entry.record_id {
        doc.push_str(&format!("record: {}\n", id));
    }
    if let Some(image) = entry.image {
        doc.push_str(&format!("image: {}\n", image));
    }
    doc.push_str("---\n\n");
    doc.push_str(entry.statement.trim_end());
    doc.push('\n');
    doc
}

/// Archive errors
#[derive(Debug, thiserror::Error)]
pub(crate) enum StorageError {
    #[error("could not find a Documents directory")]
    NoDocumentsDir,

    #[error("refusing to archive an empty statement")]
    EmptyStatement,

    #[error("failed to write {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
