//! HMAC tags on signed file names.
//!
//! A signed copy is stored as `signed_<id>_<tag>.pdf`. The tag is derived
//! from the document id and a server secret, so a download link cannot be
//! guessed from the id alone.

use crate::{ids::DocId, Error};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Bytes of the MAC kept in the file name.
const TAG_BYTES: usize = 8;

#[derive(Clone)]
pub struct Signer {
    key: Vec<u8>,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").finish_non_exhaustive()
    }
}

impl Signer {
    pub fn new<K: Into<Vec<u8>>>(key: K) -> Self {
        Signer { key: key.into() }
    }

    fn mac(&self, id: &DocId) -> Result<HmacSha256, Error> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| Error::Other(format!("HMAC key rejected: {}", e)))?;
        mac.update(id.as_str().as_bytes());
        Ok(mac)
    }

    pub fn tag(&self, id: &DocId) -> Result<String, Error> {
        let digest = self.mac(id)?.finalize().into_bytes();
        Ok(hex::encode(&digest[..TAG_BYTES]))
    }

    pub fn signed_file_name(&self, id: &DocId) -> Result<String, Error> {
        Ok(format!("signed_{}_{}.pdf", id, self.tag(id)?))
    }

    /// Check a file name produced by [`Signer::signed_file_name`] and return
    /// the document id it belongs to.
    pub fn verify(&self, file_name: &str) -> Result<DocId, Error> {
        let not_found = || Error::not_found("Signed file not found");
        let stem = file_name
            .strip_prefix("signed_")
            .and_then(|rest| rest.strip_suffix(".pdf"))
            .ok_or_else(not_found)?;
        let (id, tag) = stem.rsplit_once('_').ok_or_else(not_found)?;
        let id = DocId::parse(id).map_err(|_| not_found())?;
        let tag = hex::decode(tag).map_err(|_| not_found())?;
        if tag.len() != TAG_BYTES {
            return Err(not_found());
        }
        self.mac(&id)?
            .verify_truncated_left(&tag)
            .map_err(|_| not_found())?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_name_verifies() {
        let signer = Signer::new(b"secret".to_vec());
        let id = DocId::parse("0123456789ab").unwrap();
        let name = signer.signed_file_name(&id).unwrap();
        assert!(name.starts_with("signed_0123456789ab_"));
        assert_eq!(name.len(), "signed_0123456789ab_".len() + 16 + ".pdf".len());
        assert_eq!(signer.verify(&name).unwrap(), id);
    }

    #[test]
    fn tag_depends_on_key() {
        let id = DocId::parse("0123456789ab").unwrap();
        let name = Signer::new("one").signed_file_name(&id).unwrap();
        assert!(Signer::new("two").verify(&name).is_err());
    }

    #[test]
    fn malformed_names_are_not_found() {
        let signer = Signer::new("secret");
        for bad in [
            "signed_0123456789ab.pdf",
            "signed_0123456789ab_zz.pdf",
            "signed_0123456789ab_00000000000000000000.pdf",
            "../signed_0123456789ab_0000000000000000.pdf",
            "other.pdf",
        ] {
            let err = signer.verify(bad).unwrap_err();
            assert_eq!(err.status(), 404, "{bad}");
        }
    }
}
