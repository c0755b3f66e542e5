//! Flat-file JSON state: which document is waiting to be signed, and what
//! happened so far.

use crate::{ids::DocId, Error};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Mutex,
};

/// The document a tablet opening `/current` is sent to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentDocument {
    pub doc_id: DocId,
    pub filename: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryEvent {
    Uploaded,
    Signed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub doc_id: DocId,
    pub filename: String,
    pub event: HistoryEvent,
    #[serde(default)]
    pub pages_signed: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_file: Option<String>,
    pub at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn uploaded(doc_id: DocId, filename: String) -> Self {
        HistoryEntry {
            doc_id,
            filename,
            event: HistoryEvent::Uploaded,
            pages_signed: 0,
            signed_file: None,
            at: Utc::now(),
        }
    }

    pub fn signed(
        doc_id: DocId,
        filename: String,
        pages_signed: usize,
        signed_file: Option<String>,
    ) -> Self {
        HistoryEntry {
            doc_id,
            filename,
            event: HistoryEvent::Signed,
            pages_signed,
            signed_file,
            at: Utc::now(),
        }
    }
}

#[derive(Debug)]
pub struct StateStore {
    current_path: PathBuf,
    history_path: PathBuf,
    history_limit: usize,
    // Worker threads share one store; writers take turns.
    lock: Mutex<()>,
}

impl StateStore {
    pub fn open<P: AsRef<Path>>(root: P, history_limit: usize) -> Result<Self, Error> {
        let root = root.as_ref();
        fs::create_dir_all(root)?;
        Ok(StateStore {
            current_path: root.join("current.json"),
            history_path: root.join("history.json"),
            history_limit,
            lock: Mutex::new(()),
        })
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, ()> {
        // The guarded data is `()`, a panicked holder cannot corrupt it.
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn current(&self) -> Result<Option<CurrentDocument>, Error> {
        let _guard = self.guard();
        read_json(&self.current_path)
    }

    pub fn set_current(&self, current: &CurrentDocument) -> Result<(), Error> {
        let _guard = self.guard();
        write_json(&self.current_path, current)
    }

    /// Clear the pointer, but only if it still points at `id`: a newer
    /// upload must not be forgotten because an older document got signed.
    pub fn clear_current_if(&self, id: &DocId) -> Result<bool, Error> {
        let _guard = self.guard();
        match read_json::<CurrentDocument>(&self.current_path)? {
            Some(current) if &current.doc_id == id => {
                fs::remove_file(&self.current_path)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Record `entry`, dropping the oldest entries beyond the limit. The
    /// dropped entries are handed back so their files can go too.
    pub fn append(&self, entry: HistoryEntry) -> Result<Vec<HistoryEntry>, Error> {
        let _guard = self.guard();
        let mut entries: Vec<HistoryEntry> = read_json(&self.history_path)?.unwrap_or_default();
        entries.push(entry);
        let excess = entries.len().saturating_sub(self.history_limit);
        let dropped: Vec<HistoryEntry> = entries.drain(..excess).collect();
        write_json(&self.history_path, &entries)?;
        Ok(dropped)
    }

    /// History, newest first.
    pub fn entries(&self) -> Result<Vec<HistoryEntry>, Error> {
        let _guard = self.guard();
        let mut entries: Vec<HistoryEntry> = read_json(&self.history_path)?.unwrap_or_default();
        entries.reverse();
        Ok(entries)
    }

    /// Original file name of `id`, taken from its upload entry.
    pub fn filename_of(&self, id: &DocId) -> Result<Option<String>, Error> {
        Ok(self
            .entries()?
            .into_iter()
            .find(|entry| &entry.doc_id == id && entry.event == HistoryEvent::Uploaded)
            .map(|entry| entry.filename))
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, Error> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write through a temp file and rename, so readers never see half a file.
fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), Error> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
