//! Fetching remote bytes: the catalog, install configs, and archives.
//!
//! `http(s)://` URLs go through a blocking `reqwest` client. `file://` URLs are
//! read straight from disk, which is how local mirrors (and tests) are served.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use sha2::Digest;

/// Errors raised while fetching a URL.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },

    #[error("unsupported URL: {0}")]
    UnsupportedUrl(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = core::result::Result<T, FetchError>;

/// The HTTP capability the repository layer consumes.
pub trait Fetch {
    /// Fetch a small document fully into memory.
    fn get_bytes(&self, url: &str) -> Result<Vec<u8>>;

    /// Stream a (possibly large) resource into `out`, advancing `progress`.
    /// Returns the number of bytes written.
    fn download(&self, url: &str, out: &mut dyn Write, progress: &ProgressBar) -> Result<u64>;
}

/// Fetches over HTTP(S) with `reqwest`, or from disk for `file://` URLs.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("benchkit/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .timeout(None)
            .build()?;
        Ok(Self { client })
    }

    fn open(&self, url: &str) -> Result<(Box<dyn Read>, Option<u64>)> {
        if let Some(path) = url.strip_prefix("file://") {
            let file = File::open(PathBuf::from(path))?;
            let len = file.metadata().ok().map(|m| m.len());
            return Ok((Box::new(file), len));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(FetchError::UnsupportedUrl(url.to_string()));
        }

        let response = self.client.get(url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let len = response.content_length();
        Ok((Box::new(response), len))
    }
}

impl Fetch for HttpFetcher {
    fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let (mut reader, len) = self.open(url)?;
        let mut buf = Vec::with_capacity(len.map_or(0, |l| usize::try_from(l).unwrap_or(0)));
        reader.read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn download(&self, url: &str, out: &mut dyn Write, progress: &ProgressBar) -> Result<u64> {
        let (reader, len) = self.open(url)?;
        if progress.length().is_none_or(|l| l == 0)
            && let Some(len) = len
        {
            progress.set_length(len);
        }
        let mut reader = progress.wrap_read(reader);
        Ok(io::copy(&mut reader, out)?)
    }
}

/// A writer that hashes everything passing through it with `D`.
pub struct HashingWriter<W, D> {
    inner: W,
    hasher: D,
}

impl<W: Write, D: Digest> HashingWriter<W, D> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: D::new(),
        }
    }

    /// Flush the inner writer and return the lowercase hex digest.
    pub fn finish(mut self) -> io::Result<String> {
        self.inner.flush()?;
        Ok(hex::encode(self.hasher.finalize()))
    }
}

impl<W: Write, D: Digest> Write for HashingWriter<W, D> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        Digest::update(&mut self.hasher, &buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// A byte progress bar, or a hidden one when progress is not shown.
pub fn progress_bar(len: Option<u64>, visible: bool, message: &str) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let bar = len.map_or_else(ProgressBar::no_length, ProgressBar::new);
    if let Ok(style) =
        ProgressStyle::with_template("{msg} [{bar:40}] {bytes}/{total_bytes} ({eta})")
    {
        bar.set_style(style.progress_chars("=> "));
    }
    bar.set_message(message.to_string());
    bar
}
