//! ---
//! campus_section: "03-persistence-logging"
//! campus_subsection: "module"
//! campus_type: "source"
//! campus_scope: "code"
//! campus_description: "Persistence abstractions and storage bindings."
//! campus_version: "v0.1.0"
//! campus_owner: "platform"
//! ---
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::Path;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{PersistenceError, Result};

/// A whole JSON document: an object mapping ids to entries, in insertion order.
pub type Document<T> = IndexMap<String, T>;

/// Load a document, treating a missing or empty file as an empty document.
pub fn load_document<T: DeserializeOwned>(path: &Path) -> Result<Document<T>> {
    match fs::read(path) {
        Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Document::new()),
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(Document::new()),
        Err(err) => Err(err.into()),
    }
}

/// Replace the document at `path` with `document`.
///
/// The new content is written and synced to a sibling temporary file which is
/// then renamed over the target, so readers only ever observe a complete
/// document. Returns the number of bytes written.
pub fn write_document<T: Serialize>(path: &Path, document: &Document<T>) -> Result<usize> {
    let file_name = path
        .file_name()
        .ok_or_else(|| PersistenceError::InvalidPath(path.to_path_buf()))?;
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let mut temp_name = OsString::from(".");
    temp_name.push(file_name);
    temp_name.push(".tmp");
    let temp_path = parent.join(temp_name);

    let bytes = serde_json::to_vec_pretty(document)?;
    if let Err(err) = write_synced(&temp_path, &bytes) {
        let _ = fs::remove_file(&temp_path);
        return Err(err);
    }
    fs::rename(&temp_path, path)?;
    Ok(bytes.len())
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(bytes)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}
