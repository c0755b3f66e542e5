//! Request payloads: the PDF upload form and the signature overlays.

use crate::{ids::allowed_file, Error};
use base64::Engine;
use multipart::server::Multipart;
use serde::Deserialize;
use serde_json::Value;
use std::io::{Cursor, Read};

const DATA_URL_PREFIX: &str = "data:image/png;base64,";

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// One drawn overlay, for page `index` (0-based).
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayPage {
    pub index: usize,
    pub png: Vec<u8>,
}

/// Boundary parameter of a `multipart/form-data` content type.
pub fn multipart_boundary(content_type: &str) -> Option<&str> {
    let mut parts = content_type.split(';');
    let mime = parts.next()?.trim();
    if !mime.eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    parts.find_map(|param| {
        let (key, value) = param.trim().split_once('=')?;
        if key.trim().eq_ignore_ascii_case("boundary") {
            let value = value.trim().trim_matches('"');
            (!value.is_empty()).then_some(value)
        } else {
            None
        }
    })
}

/// Walk every multipart field, handing name, file name and content to `f`.
fn for_each_field<F>(boundary: &str, body: &[u8], mut f: F) -> Result<(), Error>
where
    F: FnMut(&str, Option<&str>, Vec<u8>),
{
    let mut multipart = Multipart::with_body(Cursor::new(body), boundary);
    while let Some(mut field) = multipart
        .read_entry()
        .map_err(|e| Error::bad_request(format!("Malformed form data: {}", e)))?
    {
        let mut data = Vec::new();
        field
            .data
            .read_to_end(&mut data)
            .map_err(|e| Error::bad_request(format!("Malformed form data: {}", e)))?;
        f(&field.headers.name, field.headers.filename.as_deref(), data);
    }
    Ok(())
}

/// The PDF sent in the `file` field of the upload form.
pub fn read_upload(content_type: &str, body: &[u8]) -> Result<UploadedFile, Error> {
    let boundary =
        multipart_boundary(content_type).ok_or_else(|| Error::bad_request("No file field"))?;

    let mut upload = None;
    for_each_field(boundary, body, |name, filename, data| {
        if name == "file" && upload.is_none() {
            upload = Some((filename.unwrap_or_default().to_owned(), data));
        }
    })?;

    let (filename, bytes) = upload.ok_or_else(|| Error::bad_request("No file field"))?;
    if filename.is_empty() {
        return Err(Error::bad_request("No file selected"));
    }
    if !allowed_file(&filename) {
        return Err(Error::bad_request("Only PDF allowed"));
    }
    if !has_pdf_header(&bytes) {
        return Err(Error::bad_request("Not a PDF document"));
    }
    Ok(UploadedFile { filename, bytes })
}

/// Readers accept the `%PDF-` header anywhere in the first kilobyte.
fn has_pdf_header(bytes: &[u8]) -> bool {
    bytes[..bytes.len().min(1024)]
        .windows(5)
        .any(|window| window == b"%PDF-")
}

/// Overlays sent by the signing page.
///
/// Multipart fields named `page_<index>` are preferred; otherwise the body is
/// read as JSON `{"pages": [{"index": n, "dataURL": "data:image/png;base64,..."}]}`.
/// Entries that cannot be understood are skipped rather than failing the
/// whole request.
pub fn collect_pages(content_type: &str, body: &[u8]) -> Result<Vec<OverlayPage>, Error> {
    if let Some(boundary) = multipart_boundary(content_type) {
        let mut pages = Vec::new();
        for_each_field(boundary, body, |name, _, png| {
            let Some(index) = name.strip_prefix("page_") else {
                return;
            };
            match index.parse::<usize>() {
                Ok(index) if !png.is_empty() => pages.push(OverlayPage { index, png }),
                Ok(_) => {}
                Err(_) => log::debug!("Ignoring form field {:?}", name),
            }
        })?;
        return Ok(pages);
    }

    #[derive(Deserialize, Default)]
    struct Payload {
        #[serde(default)]
        pages: Vec<Value>,
    }

    // Anything that is not the expected JSON object counts as no pages.
    let payload: Payload = serde_json::from_slice(body).unwrap_or_default();
    Ok(payload.pages.iter().filter_map(json_page).collect())
}

fn json_page(item: &Value) -> Option<OverlayPage> {
    let index = match item.get("index")? {
        Value::Number(n) => usize::try_from(n.as_u64()?).ok()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    let data_url = item.get("dataURL")?.as_str()?;
    let encoded = data_url.strip_prefix(DATA_URL_PREFIX)?;
    let png = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .ok()?;
    Some(OverlayPage { index, png })
}

/// Cheap emptiness check: a canvas with strokes on it compresses to more
/// than `min_bytes` of PNG, an untouched one does not.
pub fn looks_signed(pages: &[OverlayPage], min_bytes: usize) -> bool {
    pages.iter().any(|page| page.png.len() > min_bytes)
}

#[cfg(test)]
pub(crate) fn multipart_body(boundary: &str, fields: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, filename, data) in fields {
        body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        match filename {
            Some(filename) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                    name, filename
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
            ),
        }
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
    body
}
