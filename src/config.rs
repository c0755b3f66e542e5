use crate::Error;
use clap::{Parser, ValueEnum};
use rand::RngCore;
use std::{net::SocketAddr, path::PathBuf};

/// What `POST /api/sign/<id>` does with accepted overlays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SigningMode {
    /// Paint the overlays into the PDF and keep a downloadable signed copy.
    Composite,
    /// Only record that the document was signed, then discard it.
    Acknowledge,
}

#[derive(Debug, Parser)]
#[command(name = "signpad", version, about = "Collect handwritten signatures on PDF files")]
pub struct Args {
    /// Address to listen on.
    #[arg(long, env = "SIGNPAD_BIND", default_value = "0.0.0.0:8000")]
    pub bind: SocketAddr,

    /// Base URL used in links and QR codes, e.g. `https://sign.example.com`.
    /// Taken from the request `Host` header when not set.
    #[arg(long, env = "SIGNPAD_PUBLIC_URL")]
    pub public_url: Option<String>,

    /// Scratch directory for uploads, renders, signed copies and state.
    #[arg(long, env = "SIGNPAD_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Render zoom, 1.0 being 72 dpi.
    #[arg(long, env = "SIGNPAD_ZOOM", default_value_t = 1.6)]
    pub zoom: f32,

    #[arg(long, env = "SIGNPAD_MAX_UPLOAD_BYTES", default_value_t = 64 * 1024 * 1024)]
    pub max_upload_bytes: usize,

    /// Overlays no larger than this are considered empty.
    #[arg(long, env = "SIGNPAD_MIN_OVERLAY_BYTES", default_value_t = 2000)]
    pub min_overlay_bytes: usize,

    #[arg(long, env = "SIGNPAD_MODE", value_enum, default_value_t = SigningMode::Composite)]
    pub mode: SigningMode,

    /// Key for the HMAC tag in signed file names. Random when not set.
    #[arg(long, env = "SIGNPAD_SECRET", hide_env_values = true)]
    pub secret: Option<String>,

    #[arg(long, env = "SIGNPAD_WORKERS", default_value_t = 4)]
    pub workers: usize,

    #[arg(long, env = "SIGNPAD_HISTORY_LIMIT", default_value_t = 500)]
    pub history_limit: usize,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: SocketAddr,
    pub public_url: Option<String>,
    pub data_dir: PathBuf,
    pub zoom: f32,
    pub max_upload_bytes: usize,
    pub min_overlay_bytes: usize,
    pub mode: SigningMode,
    pub secret: Vec<u8>,
    pub workers: usize,
    pub history_limit: usize,
}

impl Config {
    pub fn from_args(args: Args) -> Result<Self, Error> {
        if !(args.zoom > 0.0 && args.zoom <= 8.0) {
            return Err(Error::Other(format!("zoom must be in (0, 8], got {}", args.zoom)));
        }
        if args.workers == 0 {
            return Err(Error::Other("workers must be at least 1".to_owned()));
        }
        if args.max_upload_bytes == 0 || args.history_limit == 0 {
            return Err(Error::Other(
                "max-upload-bytes and history-limit must be positive".to_owned(),
            ));
        }

        let secret = match args.secret {
            Some(secret) if !secret.is_empty() => secret.into_bytes(),
            _ => {
                log::warn!(
                    "SIGNPAD_SECRET is not set, using a random key: download links will not survive a restart"
                );
                let mut key = vec![0u8; 32];
                rand::thread_rng().fill_bytes(&mut key);
                key
            }
        };

        Ok(Config {
            bind: args.bind,
            public_url: args
                .public_url
                .map(|url| url.trim_end_matches('/').to_owned())
                .filter(|url| !url.is_empty()),
            data_dir: args
                .data_dir
                .unwrap_or_else(|| std::env::temp_dir().join("pdf_sign_demo")),
            zoom: args.zoom,
            max_upload_bytes: args.max_upload_bytes,
            min_overlay_bytes: args.min_overlay_bytes,
            mode: args.mode,
            secret,
            workers: args.workers,
            history_limit: args.history_limit,
        })
    }

    /// Defaults rooted at `data_dir`, with a fixed secret. Meant for tests
    /// and embedding.
    pub fn with_data_dir<P: Into<PathBuf>>(data_dir: P) -> Self {
        Config {
            bind: SocketAddr::from(([127, 0, 0, 1], 8000)),
            public_url: None,
            data_dir: data_dir.into(),
            zoom: 1.6,
            max_upload_bytes: 64 * 1024 * 1024,
            min_overlay_bytes: 2000,
            mode: SigningMode::Composite,
            secret: b"signpad-development-secret".to_vec(),
            workers: 1,
            history_limit: 500,
        }
    }
}
