//! Scratch storage for uploads, page renders and signed copies.
//!
//! ```text
//! <root>/docs/<id>.pdf
//! <root>/renders/<id>_p<n>.png
//! <root>/signed/signed_<id>_<tag>.pdf
//! ```

use crate::{ids::DocId, Error};
use std::{
    fs, io,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone)]
pub struct DocumentStore {
    docs_dir: PathBuf,
    renders_dir: PathBuf,
    signed_dir: PathBuf,
}

impl DocumentStore {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, Error> {
        let root = root.as_ref();
        let store = DocumentStore {
            docs_dir: root.join("docs"),
            renders_dir: root.join("renders"),
            signed_dir: root.join("signed"),
        };
        for dir in [&store.docs_dir, &store.renders_dir, &store.signed_dir] {
            fs::create_dir_all(dir)?;
        }
        Ok(store)
    }

    fn pdf_path(&self, id: &DocId) -> PathBuf {
        self.docs_dir.join(format!("{}.pdf", id))
    }

    pub fn save_pdf(&self, id: &DocId, bytes: &[u8]) -> Result<(), Error> {
        fs::write(self.pdf_path(id), bytes)?;
        Ok(())
    }

    pub fn has_pdf(&self, id: &DocId) -> bool {
        self.pdf_path(id).is_file()
    }

    pub fn load_pdf(&self, id: &DocId) -> Result<Vec<u8>, Error> {
        read_or_not_found(&self.pdf_path(id), "PDF not found")
    }

    /// Store the render of page `index` (0-based) and return its file name.
    pub fn write_render(&self, id: &DocId, index: usize, png: &[u8]) -> Result<String, Error> {
        let name = format!("{}_p{}.png", id, index + 1);
        fs::write(self.renders_dir.join(&name), png)?;
        Ok(name)
    }

    pub fn read_render(&self, name: &str) -> Result<Vec<u8>, Error> {
        if !is_render_name(name) {
            return Err(Error::not_found("Render not found"));
        }
        read_or_not_found(&self.renders_dir.join(name), "Render not found")
    }

    pub fn write_signed(&self, name: &str, bytes: &[u8]) -> Result<(), Error> {
        fs::write(self.signed_dir.join(name), bytes)?;
        Ok(())
    }

    /// `name` must already be verified by [`crate::tag::Signer::verify`].
    pub fn read_signed(&self, name: &str) -> Result<Vec<u8>, Error> {
        read_or_not_found(&self.signed_dir.join(name), "Signed file not found")
    }

    /// Delete a signed copy whose history entry is gone.
    pub fn remove_signed(&self, name: &str) {
        remove_quietly(&self.signed_dir.join(name));
    }

    /// Remove the uploaded PDF and its renders. Failures are only logged:
    /// a leftover scratch file is not worth failing a request over.
    pub fn cleanup(&self, id: &DocId) {
        remove_quietly(&self.pdf_path(id));

        let prefix = format!("{}_p", id);
        let entries = match fs::read_dir(&self.renders_dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("Cannot list {}: {}", self.renders_dir.display(), e);
                return;
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(&prefix) && name.ends_with(".png") {
                remove_quietly(&entry.path());
            }
        }
    }
}

/// `<hex>_p<digits>.png`, nothing else.
fn is_render_name(name: &str) -> bool {
    let Some(stem) = name.strip_suffix(".png") else {
        return false;
    };
    let Some((id, page)) = stem.split_once("_p") else {
        return false;
    };
    DocId::parse(id).is_ok() && !page.is_empty() && page.bytes().all(|b| b.is_ascii_digit())
}

fn read_or_not_found(path: &Path, message: &str) -> Result<Vec<u8>, Error> {
    match fs::read(path) {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::not_found(message)),
        Err(e) => Err(e.into()),
    }
}

fn remove_quietly(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => log::debug!("Removed {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Cannot remove {}: {}", path.display(), e),
    }
}
