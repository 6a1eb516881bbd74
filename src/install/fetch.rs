//! Remote archive fetcher
//!
//! Streams a `.tar.gz` over HTTP and unpacks it while it downloads, with the
//! first path component stripped. The async side pumps network chunks into
//! a bounded channel; a blocking task decompresses and writes entries,
//! reporting progress per entry and per chunk.

use crate::error::{InstallError, InstallResult};
use crate::install::cancel::CancellationToken;
use crate::install::event::Progress;
use async_trait::async_trait;
use flate2::read::GzDecoder;
use futures_util::{Stream, StreamExt};
use std::fmt;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Decides whether an entry (path after stripping) is extracted
pub type EntryFilter = Arc<dyn Fn(&Path) -> bool + Send + Sync>;

/// Maps a kept entry path to the path it is written to
pub type EntryRename = Arc<dyn Fn(&Path) -> PathBuf + Send + Sync>;

/// Receives entry progress, possibly from a blocking thread
pub type ProgressFn = Arc<dyn Fn(Progress) + Send + Sync>;

const CHUNK_SIZE: usize = 64 * 1024;
const CHANNEL_DEPTH: usize = 16;
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// One archive to fetch and where to put it
#[derive(Clone)]
pub struct FetchRequest {
    pub url: String,
    pub dest: PathBuf,
    pub filter: Option<EntryFilter>,
    pub rename: Option<EntryRename>,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>, dest: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            dest: dest.into(),
            filter: None,
            rename: None,
        }
    }

    pub fn with_filter(mut self, filter: impl Fn(&Path) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn with_rename(
        mut self,
        rename: impl Fn(&Path) -> PathBuf + Send + Sync + 'static,
    ) -> Self {
        self.rename = Some(Arc::new(rename));
        self
    }
}

impl fmt::Debug for FetchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchRequest")
            .field("url", &self.url)
            .field("dest", &self.dest)
            .field("filter", &self.filter.is_some())
            .field("rename", &self.rename.is_some())
            .finish()
    }
}

/// What a completed fetch produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchSummary {
    /// Files written, relative to the destination
    pub files: Vec<PathBuf>,
    /// Bytes received on the network stream
    pub received: u64,
}

/// Anything that can deliver a remote archive into a directory
#[async_trait]
pub trait ArchiveSource: Send + Sync {
    async fn fetch(
        &self,
        request: &FetchRequest,
        cancel: &CancellationToken,
        on_progress: ProgressFn,
    ) -> InstallResult<FetchSummary>;
}

/// Archive source backed by `reqwest`
pub struct HttpArchiveSource {
    client: reqwest::Client,
}

impl HttpArchiveSource {
    /// Build a client sending `headers` with every request
    pub fn new(headers: &[(String, String)]) -> InstallResult<Self> {
        let mut map = reqwest::header::HeaderMap::new();
        for (name, value) in headers {
            let name = reqwest::header::HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| InstallError::InvalidOptions(format!("invalid header {}", name)))?;
            let value = reqwest::header::HeaderValue::from_str(value).map_err(|_| {
                InstallError::InvalidOptions(format!("invalid value for header {}", name))
            })?;
            map.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .user_agent(concat!("purs-install/", env!("CARGO_PKG_VERSION")))
            .default_headers(map)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| InstallError::network("<client>", e))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl ArchiveSource for HttpArchiveSource {
    async fn fetch(
        &self,
        request: &FetchRequest,
        cancel: &CancellationToken,
        on_progress: ProgressFn,
    ) -> InstallResult<FetchSummary> {
        debug!("GET {}", request.url);

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(InstallError::Canceled),
            response = self.client.get(&request.url).send() => {
                response.map_err(|e| InstallError::network(&request.url, e))?
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(InstallError::HttpStatus {
                url: request.url.clone(),
                status: status.as_u16(),
            });
        }

        let total = response.content_length();
        extract_stream(response.bytes_stream(), total, request, cancel, on_progress).await
    }
}

enum Message {
    Chunk(Vec<u8>),
    End,
}

/// Unpack a gzip'd tar byte stream into `request.dest`.
///
/// Returns `Canceled` if the token fires before extraction finishes; the
/// entry being written at that moment is removed.
pub async fn extract_stream<S, B, E>(
    stream: S,
    total: Option<u64>,
    request: &FetchRequest,
    cancel: &CancellationToken,
    on_progress: ProgressFn,
) -> InstallResult<FetchSummary>
where
    S: Stream<Item = Result<B, E>> + Send,
    B: AsRef<[u8]> + Send,
    E: fmt::Display,
{
    cancel.check()?;

    tokio::fs::create_dir_all(&request.dest).await.map_err(|e| {
        InstallError::io(format!("creating directory {}", request.dest.display()), e)
    })?;

    let received = Arc::new(AtomicU64::new(0));
    let aborted = Arc::new(AtomicBool::new(false));
    let (tx, rx) = mpsc::channel::<Message>(CHANNEL_DEPTH);

    let unpacker = Unpacker {
        dest: request.dest.clone(),
        filter: request.filter.clone(),
        rename: request.rename.clone(),
        on_progress,
        received: Arc::clone(&received),
        total,
    };
    let reader = ChannelReader {
        rx,
        buf: Vec::new(),
        pos: 0,
        aborted: Arc::clone(&aborted),
    };
    let extractor = tokio::task::spawn_blocking(move || unpacker.unpack(reader));

    let url = request.url.as_str();
    let pump = async {
        let mut stream = std::pin::pin!(stream);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| InstallError::network(url, e))?;
            let bytes = chunk.as_ref();
            received.fetch_add(bytes.len() as u64, Ordering::SeqCst);
            if tx.send(Message::Chunk(bytes.to_vec())).await.is_err() {
                // Extractor stopped early; its own result reports why.
                return Ok(());
            }
        }
        let _ = tx.send(Message::End).await;
        Ok(())
    };

    let outcome: InstallResult<()> = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(InstallError::Canceled),
        result = pump => result,
    };
    if outcome.is_err() {
        aborted.store(true, Ordering::SeqCst);
    }
    // Unblocks a reader still waiting for the next chunk
    drop(tx);

    let extracted = extractor
        .await
        .map_err(|e| InstallError::io("joining archive extractor", io::Error::other(e)))?;

    outcome?;
    cancel.check()?;

    let files = extracted.map_err(|e| {
        InstallError::io(
            format!("extracting {} into {}", request.url, request.dest.display()),
            e,
        )
    })?;

    Ok(FetchSummary {
        files,
        received: received.load(Ordering::SeqCst),
    })
}

/// Blocking `Read` over the chunk channel
struct ChannelReader {
    rx: mpsc::Receiver<Message>,
    buf: Vec<u8>,
    pos: usize,
    aborted: Arc<AtomicBool>,
}

impl Read for ChannelReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.aborted.load(Ordering::SeqCst) {
                // Not `Interrupted`: std read loops retry that kind forever
                return Err(io::Error::other("download aborted"));
            }
            if self.pos < self.buf.len() {
                let n = out.len().min(self.buf.len() - self.pos);
                out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
                self.pos += n;
                return Ok(n);
            }
            match self.rx.blocking_recv() {
                Some(Message::Chunk(chunk)) => {
                    self.buf = chunk;
                    self.pos = 0;
                }
                Some(Message::End) => return Ok(0),
                None => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "archive stream ended before completion",
                    ))
                }
            }
        }
    }
}

struct Unpacker {
    dest: PathBuf,
    filter: Option<EntryFilter>,
    rename: Option<EntryRename>,
    on_progress: ProgressFn,
    received: Arc<AtomicU64>,
    total: Option<u64>,
}

impl Unpacker {
    fn unpack<R: Read>(&self, reader: R) -> io::Result<Vec<PathBuf>> {
        let mut archive = tar::Archive::new(GzDecoder::new(reader));
        let mut files = Vec::new();
        let root = self.dest.canonicalize()?;

        for entry in archive.entries()? {
            let mut entry = entry?;
            let raw = entry.path()?.into_owned();
            let Some(relative) = strip_first_component(&raw) else {
                continue;
            };
            if let Some(filter) = &self.filter {
                if !filter(&relative) {
                    continue;
                }
            }
            let relative = match &self.rename {
                Some(rename) => rename(&relative),
                None => relative,
            };
            let target = self.dest.join(&relative);

            // Links are never extracted, so nothing written later can
            // resolve outside the destination through them.
            match entry.header().entry_type() {
                tar::EntryType::Directory => {
                    fs::create_dir_all(&target)?;
                    ensure_within(&root, &target)?;
                }
                tar::EntryType::Regular | tar::EntryType::Continuous => {
                    self.write_file(&mut entry, &root, &relative, &target)?;
                    files.push(relative);
                }
                other => debug!("skipping {:?} entry {}", other, relative.display()),
            }
        }

        Ok(files)
    }

    fn write_file<R: Read>(
        &self,
        entry: &mut tar::Entry<'_, R>,
        root: &Path,
        relative: &Path,
        target: &Path,
    ) -> io::Result<()> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
            ensure_within(root, parent)?;
        }
        if fs::symlink_metadata(target).is_ok_and(|m| m.file_type().is_symlink()) {
            fs::remove_file(target)?;
        }
        let size = entry.header().size()?;
        let mode = entry.header().mode().ok();

        self.report(relative, 0, size);

        let mut file = fs::File::create(target)?;
        let copied = self.copy_entry(entry, &mut file, relative, size);
        drop(file);

        if let Err(e) = copied {
            let _ = fs::remove_file(target);
            return Err(e);
        }

        #[cfg(unix)]
        if let Some(mode) = mode {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(target, fs::Permissions::from_mode(mode & 0o777))?;
        }
        #[cfg(not(unix))]
        let _ = mode;

        Ok(())
    }

    fn copy_entry<R: Read>(
        &self,
        entry: &mut tar::Entry<'_, R>,
        file: &mut fs::File,
        relative: &Path,
        size: u64,
    ) -> io::Result<()> {
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut written = 0u64;
        loop {
            let n = entry.read(&mut buf)?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n])?;
            written += n as u64;
            self.report(relative, written, size);
        }
        file.flush()
    }

    fn report(&self, path: &Path, written: u64, size: u64) {
        (self.on_progress)(Progress::Entry {
            path: path.to_path_buf(),
            written,
            size,
            received: self.received.load(Ordering::SeqCst),
            total: self.total,
        });
    }
}

fn ensure_within(root: &Path, path: &Path) -> io::Result<()> {
    let resolved = path.canonicalize()?;
    if resolved.starts_with(root) {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            format!("{} resolves outside {}", path.display(), root.display()),
        ))
    }
}

/// Drop the leading path component; reject paths escaping the destination.
pub fn strip_first_component(path: &Path) -> Option<PathBuf> {
    let mut components = path.components().filter(|c| !matches!(c, Component::CurDir));
    match components.next() {
        Some(Component::Normal(_)) => {}
        _ => return None,
    }

    let mut out = PathBuf::new();
    for component in components {
        match component {
            Component::Normal(part) => out.push(part),
            _ => return None,
        }
    }

    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}
