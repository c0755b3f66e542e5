use crate::Error;
use lopdf::{Dictionary, Document, Object, ObjectId};

/// Follow indirect references until a direct object is reached.
pub trait PdfObjectDeref {
    fn deref<'a>(&'a self, doc: &'a Document) -> Result<&'a Object, Error>;
}

impl PdfObjectDeref for Object {
    fn deref<'a>(&'a self, doc: &'a Document) -> Result<&'a Object, Error> {
        let mut object = self;
        // Bounded so that a reference cycle cannot spin forever.
        for _ in 0..32 {
            match object {
                Object::Reference(id) => object = doc.get_object(*id)?,
                _ => return Ok(object),
            }
        }
        Err(Error::Other("PDF reference chain too deep.".to_owned()))
    }
}

/// Read an integer or real as `f64`.
pub fn number(object: &Object) -> Result<f64, Error> {
    match object {
        Object::Integer(value) => Ok(*value as f64),
        Object::Real(value) => Ok(*value as f64),
        _ => Err(Error::Other(format!("Expected a number, found {:?}.", object))),
    }
}

/// Look up `key` on a page, walking up the `Parent` chain for inheritable
/// attributes such as `MediaBox`, `CropBox` and `Resources`.
pub fn inherited<'a>(
    doc: &'a Document,
    page_id: ObjectId,
    key: &[u8],
) -> Result<Option<&'a Object>, Error> {
    let mut node: &Dictionary = doc.get_object(page_id)?.as_dict()?;
    for _ in 0..32 {
        if let Ok(value) = node.get(key) {
            return Ok(Some(value.deref(doc)?));
        }
        match node.get(b"Parent") {
            Ok(parent) => node = parent.deref(doc)?.as_dict()?,
            Err(_) => return Ok(None),
        }
    }
    Err(Error::Other("Page tree too deep.".to_owned()))
}
