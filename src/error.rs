use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The client sent something we refuse to work with.
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },
    #[error("page {index} not found (document has {count} pages)")]
    PageOutOfRange { index: usize, count: usize },
    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),
    #[error("PNG decoding error: {0}")]
    PngDecoding(#[from] png::DecodingError),
    #[error("PNG encoding error: {0}")]
    PngEncoding(#[from] png::EncodingError),
    #[error("render error: {0}")]
    Render(String),
    #[error("QR code error: {0}")]
    Qr(#[from] qrcode::types::QrError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Other(String),
}

impl From<mupdf::Error> for Error {
    fn from(e: mupdf::Error) -> Self {
        Error::Render(e.to_string())
    }
}

impl Error {
    pub fn bad_request<S: Into<String>>(message: S) -> Self {
        Error::BadRequest(message.into())
    }

    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Error::NotFound(message.into())
    }

    /// HTTP status code used when this error reaches a client.
    pub fn status(&self) -> u16 {
        match self {
            Error::BadRequest(_) | Error::PageOutOfRange { .. } => 400,
            Error::NotFound(_) => 404,
            Error::PayloadTooLarge { .. } => 413,
            _ => 500,
        }
    }

    /// Message safe to show to a client. Internal failures stay in the log.
    pub fn public_message(&self) -> String {
        match self.status() {
            500 => "Internal server error".to_owned(),
            _ => self.to_string(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
