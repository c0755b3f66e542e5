use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;

const MAX_DOC_ID_LEN: usize = 32;

/// Identifier of an uploaded document. Always lowercase hex, so it is safe
/// to use in file names and URLs as is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocId(String);

impl DocId {
    /// Fresh id: the first 12 hex digits of a random UUID.
    pub fn generate() -> Self {
        let hex = uuid::Uuid::new_v4().simple().to_string();
        DocId(hex[..12].to_owned())
    }

    pub fn parse(value: &str) -> Result<Self, Error> {
        let valid = !value.is_empty()
            && value.len() <= MAX_DOC_ID_LEN
            && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if valid {
            Ok(DocId(value.to_owned()))
        } else {
            Err(Error::bad_request("Invalid doc_id"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DocId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        DocId::parse(&value)
    }
}

impl From<DocId> for String {
    fn from(id: DocId) -> Self {
        id.0
    }
}

/// Only `.pdf` uploads are accepted, whatever the case of the extension.
pub fn allowed_file(filename: &str) -> bool {
    match filename.rsplit_once('.') {
        Some((_, extension)) => extension.eq_ignore_ascii_case("pdf"),
        None => false,
    }
}
