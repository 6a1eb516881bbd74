//! Content-addressed cache store on the local filesystem
//!
//! Layout under the cache root:
//!
//! ```text
//! index-v1/<sha256(key)>.json          index entry: key, integrity, metadata
//! content-v1/sha256/<aa>/<rest-of-hex> content blob named by its digest
//! ```
//!
//! Content is immutable once written; updating a key writes new content
//! and repoints the index, then drops the old blob once no index entry
//! refers to it. Reads recompute the digest so a flipped byte
//! surfaces as `CacheCorruption` instead of a bad binary.

use crate::error::{InstallError, InstallResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const INDEX_DIR: &str = "index-v1";
const CONTENT_DIR: &str = "content-v1";
const ALGORITHM: &str = "sha256";

/// Metadata recorded with the cached binary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// `<version>-<os>-<arch>` the binary was installed for
    pub id: String,
    /// Unix permission bits of the installed file
    pub mode: u32,
    pub size: u64,
}

/// One index record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub key: String,
    /// `sha256-<hex digest>` of the content
    pub integrity: String,
    pub size: u64,
    pub time: DateTime<Utc>,
    pub metadata: EntryMetadata,
}

impl IndexEntry {
    fn digest(&self) -> InstallResult<&str> {
        self.integrity
            .strip_prefix("sha256-")
            .filter(|hex| hex.len() == 64 && hex.bytes().all(|b| b.is_ascii_hexdigit()))
            .ok_or_else(|| {
                InstallError::CacheCorruption(format!(
                    "unsupported integrity {:?} for {}",
                    self.integrity, self.key
                ))
            })
    }
}

/// Outcome of a store-wide verification pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyStats {
    /// Content blobs whose digest matched
    pub verified: usize,
    /// Content blobs dropped for a digest mismatch or for being unreferenced
    pub removed_content: usize,
    /// Index entries dropped because they were unreadable or dangling
    pub removed_index: usize,
    /// Bytes freed
    pub reclaimed: u64,
}

/// Persistent keyed store for installed binaries
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Find the index entry for `key`
    async fn lookup(&self, key: &str) -> InstallResult<Option<IndexEntry>>;

    /// Read and integrity-check the content of `entry`
    async fn read(&self, entry: &IndexEntry) -> InstallResult<Vec<u8>>;

    /// Store `data` under `key`, replacing any previous entry
    async fn write(&self, key: &str, data: &[u8], metadata: EntryMetadata)
        -> InstallResult<IndexEntry>;

    /// Drop the index entry for `key`; returns whether one existed
    async fn remove(&self, key: &str) -> InstallResult<bool>;

    /// Check every blob and index entry, removing what is broken
    async fn verify(&self) -> InstallResult<VerifyStats>;
}

/// [`CacheStore`] rooted at a directory
#[derive(Debug, Clone)]
pub struct FsCacheStore {
    root: PathBuf,
}

impl FsCacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn index_path(&self, key: &str) -> PathBuf {
        self.root
            .join(INDEX_DIR)
            .join(format!("{}.json", hex::encode(Sha256::digest(key.as_bytes()))))
    }

    fn content_path(&self, digest: &str) -> PathBuf {
        let (head, rest) = digest.split_at(2);
        self.root.join(CONTENT_DIR).join(ALGORITHM).join(head).join(rest)
    }

    /// All readable index entries
    pub async fn entries(&self) -> InstallResult<Vec<IndexEntry>> {
        let mut entries = Vec::new();
        for path in list_files(&self.root.join(INDEX_DIR)).await? {
            if let Ok(entry) = read_index(&path).await {
                entries.push(entry);
            }
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    /// Total bytes of stored content
    pub async fn disk_usage(&self) -> InstallResult<u64> {
        let mut total = 0;
        for path in list_files(&self.root.join(CONTENT_DIR)).await? {
            if let Ok(meta) = tokio::fs::metadata(&path).await {
                total += meta.len();
            }
        }
        Ok(total)
    }

    /// Delete a content blob no index entry points at any more
    async fn drop_unreferenced(&self, digest: &str) {
        let still_used = match self.entries().await {
            Ok(entries) => entries.iter().any(|e| e.digest().ok() == Some(digest)),
            Err(_) => true,
        };
        if still_used {
            return;
        }
        let path = self.content_path(digest);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!("Dropped replaced cache content {}", path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Could not drop {}: {}", path.display(), e),
        }
    }

    /// Remove the whole store
    pub async fn clear(&self) -> InstallResult<()> {
        for dir in [INDEX_DIR, CONTENT_DIR] {
            let path = self.root.join(dir);
            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(InstallError::io(format!("removing {}", path.display()), e))
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for FsCacheStore {
    async fn lookup(&self, key: &str) -> InstallResult<Option<IndexEntry>> {
        let path = self.index_path(key);
        match tokio::fs::try_exists(&path).await {
            Ok(false) => return Ok(None),
            Ok(true) => {}
            Err(e) => return Err(InstallError::io(format!("checking {}", path.display()), e)),
        }

        let entry = read_index(&path).await?;
        if entry.key != key {
            return Err(InstallError::CacheCorruption(format!(
                "index {} holds key {:?}",
                path.display(),
                entry.key
            )));
        }
        debug!("Cache index hit for {}: {}", key, entry.metadata.id);
        Ok(Some(entry))
    }

    async fn read(&self, entry: &IndexEntry) -> InstallResult<Vec<u8>> {
        let digest = entry.digest()?;
        let path = self.content_path(digest);
        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| InstallError::io(format!("reading cached content {}", path.display()), e))?;

        let actual = hex::encode(Sha256::digest(&data));
        if actual != digest {
            return Err(InstallError::CacheCorruption(format!(
                "content for {} has digest {}, expected {}",
                entry.key, actual, digest
            )));
        }
        Ok(data)
    }

    async fn write(
        &self,
        key: &str,
        data: &[u8],
        metadata: EntryMetadata,
    ) -> InstallResult<IndexEntry> {
        let digest = hex::encode(Sha256::digest(data));
        let index = self.index_path(key);
        let previous = match read_index(&index).await {
            Ok(entry) => entry.digest().ok().map(str::to_string),
            Err(_) => None,
        };
        let content = self.content_path(&digest);
        write_atomic(&content, data).await?;

        let entry = IndexEntry {
            key: key.to_string(),
            integrity: format!("sha256-{}", digest),
            size: data.len() as u64,
            time: Utc::now(),
            metadata,
        };
        let json = serde_json::to_vec_pretty(&entry)?;
        write_atomic(&index, &json).await?;

        if let Some(previous) = previous.filter(|p| *p != digest) {
            self.drop_unreferenced(&previous).await;
        }

        debug!("Cached {} ({} bytes) as {}", key, entry.size, entry.integrity);
        Ok(entry)
    }

    async fn remove(&self, key: &str) -> InstallResult<bool> {
        let path = self.index_path(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(InstallError::io(format!("removing {}", path.display()), e)),
        }
    }

    async fn verify(&self) -> InstallResult<VerifyStats> {
        let mut stats = VerifyStats::default();
        let mut good = HashSet::new();

        for path in list_files(&self.root.join(CONTENT_DIR).join(ALGORITHM)).await? {
            let expected = content_digest_from_path(&path);
            let data = match tokio::fs::read(&path).await {
                Ok(data) => data,
                Err(e) => {
                    warn!("Unreadable cache content {}: {}", path.display(), e);
                    remove_counted(&path, &mut stats).await;
                    continue;
                }
            };
            let actual = hex::encode(Sha256::digest(&data));
            if expected.as_deref() == Some(actual.as_str()) {
                stats.verified += 1;
                good.insert(actual);
            } else {
                warn!("Dropping corrupt cache content {}", path.display());
                remove_counted(&path, &mut stats).await;
            }
        }

        let mut referenced = HashSet::new();
        for path in list_files(&self.root.join(INDEX_DIR)).await? {
            let keep = match read_index(&path).await {
                Ok(entry) => match entry.digest() {
                    Ok(digest) if good.contains(digest) => {
                        referenced.insert(digest.to_string());
                        true
                    }
                    _ => false,
                },
                Err(_) => false,
            };
            if !keep {
                debug!("Dropping dangling index {}", path.display());
                if tokio::fs::remove_file(&path).await.is_ok() {
                    stats.removed_index += 1;
                }
            }
        }

        let orphans: Vec<String> = good.difference(&referenced).cloned().collect();
        for digest in &orphans {
            remove_counted(&self.content_path(digest), &mut stats).await;
        }
        stats.verified -= orphans.len();

        Ok(stats)
    }
}

async fn read_index(path: &Path) -> InstallResult<IndexEntry> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| InstallError::io(format!("reading {}", path.display()), e))?;
    serde_json::from_slice(&bytes).map_err(|e| {
        InstallError::CacheCorruption(format!("unreadable index {}: {}", path.display(), e))
    })
}

async fn write_atomic(path: &Path, data: &[u8]) -> InstallResult<()> {
    let parent = path
        .parent()
        .ok_or_else(|| InstallError::CacheCorruption(format!("bad cache path {}", path.display())))?;
    tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| InstallError::io(format!("creating {}", parent.display()), e))?;

    let tmp = parent.join(format!(".tmp-{}", uuid::Uuid::new_v4()));
    tokio::fs::write(&tmp, data)
        .await
        .map_err(|e| InstallError::io(format!("writing {}", tmp.display()), e))?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(InstallError::io(format!("moving into {}", path.display()), e));
    }
    Ok(())
}

async fn remove_counted(path: &Path, stats: &mut VerifyStats) {
    let size = tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0);
    if tokio::fs::remove_file(path).await.is_ok() {
        stats.removed_content += 1;
        stats.reclaimed += size;
    }
}

/// Rebuild the hex digest from `<aa>/<rest>`
fn content_digest_from_path(path: &Path) -> Option<String> {
    let rest = path.file_name()?.to_str()?;
    let head = path.parent()?.file_name()?.to_str()?;
    Some(format!("{}{}", head, rest))
}

/// Regular files under `dir`, recursively; empty when `dir` is missing
async fn list_files(dir: &Path) -> InstallResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let mut read_dir = match tokio::fs::read_dir(&current).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => {
                return Err(InstallError::io(format!("listing {}", current.display()), e))
            }
        };
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| InstallError::io(format!("listing {}", current.display()), e))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| InstallError::io(format!("inspecting {}", entry.path().display()), e))?;
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(".tmp-") {
                continue;
            }
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                files.push(entry.path());
            }
        }
    }

    files.sort();
    Ok(files)
}
