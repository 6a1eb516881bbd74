//! End-to-end install runs against an in-memory archive source and fake
//! `purs` / `stack` executables

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use futures_util::StreamExt;
use purs_install::cache::{
    CacheStore, EntryMetadata, FsCacheStore, IndexEntry, VerifyStats, CACHE_KEY,
};
use purs_install::install::event::check_sequence;
use purs_install::install::fetch::{extract_stream, ProgressFn};
use purs_install::install::{
    cancellation, ArchiveSource, BuildOptions, CancellationToken, Completion, Event, FetchRequest,
    FetchSummary, Installer, Origin, Platform, Progress, Stage, Status,
};
use purs_install::{InstallError, InstallResult};
use std::collections::HashMap;
use std::convert::Infallible;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const PREBUILT_BASE: &str = "https://prebuilt.test/download";
const SOURCE_BASE: &str = "https://source.test/archive";

const GOOD_PURS: &[u8] = b"#!/bin/sh\necho 0.15.15\n";
const OLDER_PURS: &[u8] = b"#!/bin/sh\necho 0.15.14\n";
const BROKEN_PURS: &[u8] = b"#!/bin/sh\necho 'cannot execute binary file' >&2\nexit 126\n";

/// Serves canned archives by URL and records every request
#[derive(Default)]
struct MemorySource {
    archives: HashMap<String, Vec<u8>>,
    requests: Mutex<Vec<String>>,
}

impl MemorySource {
    fn with(mut self, url: &str, archive: Vec<u8>) -> Self {
        self.archives.insert(url.to_string(), archive);
        self
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArchiveSource for MemorySource {
    async fn fetch(
        &self,
        request: &FetchRequest,
        cancel: &CancellationToken,
        on_progress: ProgressFn,
    ) -> InstallResult<FetchSummary> {
        self.requests.lock().unwrap().push(request.url.clone());
        let Some(archive) = self.archives.get(&request.url) else {
            return Err(InstallError::HttpStatus {
                url: request.url.clone(),
                status: 404,
            });
        };

        let chunks: Vec<Result<Vec<u8>, Infallible>> =
            archive.chunks(1024).map(|c| Ok(c.to_vec())).collect();
        extract_stream(
            futures_util::stream::iter(chunks),
            Some(archive.len() as u64),
            request,
            cancel,
            on_progress,
        )
        .await
    }
}

/// Serves the first half of one archive, then never sends another byte
struct StallingSource {
    url: String,
    archive: Vec<u8>,
    requests: Mutex<Vec<FetchRequest>>,
}

impl StallingSource {
    fn new(url: String, archive: Vec<u8>) -> Self {
        Self {
            url,
            archive,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn destinations(&self) -> Vec<(String, PathBuf)> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| (r.url.clone(), r.dest.clone()))
            .collect()
    }
}

#[async_trait]
impl ArchiveSource for StallingSource {
    async fn fetch(
        &self,
        request: &FetchRequest,
        cancel: &CancellationToken,
        on_progress: ProgressFn,
    ) -> InstallResult<FetchSummary> {
        self.requests.lock().unwrap().push(request.clone());
        if request.url != self.url {
            return Err(InstallError::HttpStatus {
                url: request.url.clone(),
                status: 404,
            });
        }

        let head = self.archive[..self.archive.len() / 2].to_vec();
        let stream = futures_util::stream::iter(vec![Ok::<_, Infallible>(head)])
            .chain(futures_util::stream::pending());
        extract_stream(
            stream,
            Some(self.archive.len() as u64),
            request,
            cancel,
            on_progress,
        )
        .await
    }
}

/// Cache that never has an entry and refuses every write
struct ReadOnlyCache;

#[async_trait]
impl CacheStore for ReadOnlyCache {
    async fn lookup(&self, _key: &str) -> InstallResult<Option<IndexEntry>> {
        Ok(None)
    }

    async fn read(&self, entry: &IndexEntry) -> InstallResult<Vec<u8>> {
        Err(InstallError::CacheCorruption(format!("no content for {}", entry.key)))
    }

    async fn write(
        &self,
        key: &str,
        _data: &[u8],
        _metadata: EntryMetadata,
    ) -> InstallResult<IndexEntry> {
        Err(InstallError::io(
            format!("writing cache entry {}", key),
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        ))
    }

    async fn remove(&self, _key: &str) -> InstallResult<bool> {
        Ok(false)
    }

    async fn verify(&self) -> InstallResult<VerifyStats> {
        Ok(VerifyStats::default())
    }
}

fn tar_gz(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (path, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(data.len() as u64);
        header.set_mode(0o755);
        builder.append_data(&mut header, path, *data).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

fn prebuilt_archive(purs: &[u8]) -> Vec<u8> {
    tar_gz(&[("linux64/README.md", b"# purs"), ("linux64/purs", purs)])
}

fn source_archive() -> Vec<u8> {
    tar_gz(&[
        ("purescript-0.15.15/stack.yaml", b"resolver: lts-20.9\n"),
        ("purescript-0.15.15/purescript.cabal", b"name: purescript\n"),
        ("purescript-0.15.15/LICENSE", b"BSD-3-Clause"),
        ("purescript-0.15.15/README.md", b"# PureScript"),
        ("purescript-0.15.15/.gitignore", b".stack-work\n"),
        ("purescript-0.15.15/ci/build.sh", b"#!/bin/sh\n"),
        ("purescript-0.15.15/app/Main.hs", b"main = pure ()\n"),
    ])
}

fn prebuilt_url(version: &str) -> String {
    format!("{}/v{}/linux64.tar.gz", PREBUILT_BASE, version)
}

fn source_url(version: &str) -> String {
    format!("{}/v{}.tar.gz", SOURCE_BASE, version)
}

fn write_script(path: &Path, body: &str) {
    std::fs::write(path, body).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

/// Scratch directories plus a fake stack that logs its invocations
struct Sandbox {
    temp: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        let sandbox = Self {
            temp: TempDir::new().unwrap(),
        };
        sandbox.write_stack("");
        sandbox
    }

    fn path(&self, name: &str) -> PathBuf {
        self.temp.path().join(name)
    }

    fn bin_dir(&self) -> PathBuf {
        self.path("bin")
    }

    fn stack(&self) -> PathBuf {
        self.path("stack")
    }

    /// `setup_extra` runs inside the `setup` branch
    fn write_stack(&self, setup_extra: &str) {
        let script = format!(
            r#"#!/bin/sh
for arg in "$@"; do
  if [ "$arg" = "--version" ]; then echo "2.15.1"; exit 0; fi
done
cmd=""
bin=""
for arg in "$@"; do
  case "$arg" in
    --local-bin-path=*) bin="${{arg#--local-bin-path=}}" ;;
    setup|install) if [ -z "$cmd" ]; then cmd="$arg"; fi ;;
  esac
done
echo "$*" >> "{log}"
pwd > "{cwd}"
case "$cmd" in
  setup)
    [ -f stack.yaml ] || exit 3
    echo "Preparing to install GHC to an isolated location." >&2
    {setup_extra}
    ;;
  install)
    find . -type f | LC_ALL=C sort > "{listing}"
    echo "Warning: filepath wildcard 'tests/support/*.md' does not match any files" >&2
    echo "Copying from dist/build/purs to $bin/purs" >&2
    mkdir -p "$bin"
    printf '#!/bin/sh\necho 0.15.15\n' > "$bin/purs"
    chmod 755 "$bin/purs"
    ;;
esac
"#,
            log = self.path("stack.log").display(),
            cwd = self.path("stack.cwd").display(),
            listing = self.path("listing.txt").display(),
            setup_extra = setup_extra,
        );
        write_script(&self.stack(), &script);
    }

    fn stack_calls(&self) -> Vec<String> {
        std::fs::read_to_string(self.path("stack.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn options(&self, version: &str, arch: &str) -> BuildOptions {
        BuildOptions::builder()
            .version(version)
            .target_dir(self.bin_dir())
            .cache_root(self.path("cache"))
            .prebuilt_base_url(PREBUILT_BASE)
            .source_base_url(SOURCE_BASE)
            .build_tool(self.stack())
            .platform(Platform::new("linux", arch))
            .build()
            .unwrap()
    }
}

type Recorded = Arc<Mutex<Vec<Event>>>;

fn recording(options: BuildOptions, source: Arc<MemorySource>) -> (Installer, Recorded) {
    let events: Recorded = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let installer = Installer::new(options)
        .unwrap()
        .with_source(source)
        .on_event(Arc::new(move |event: Event| sink.lock().unwrap().push(event)));
    (installer, events)
}

/// Start/terminal event names, progress dropped
fn milestones(events: &Recorded) -> Vec<String> {
    events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e.status {
            Status::Start => Some(format!("{}:start", e.stage)),
            Status::Progress(_) => None,
            _ => Some(e.name()),
        })
        .collect()
}

fn completion(events: &Recorded, stage: Stage) -> Option<Completion> {
    events.lock().unwrap().iter().find_map(|e| match &e.status {
        Status::Complete(c) if e.stage == stage => Some(c.clone()),
        _ => None,
    })
}

fn output_lines(events: &Recorded, stage: Stage) -> Vec<String> {
    events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match &e.status {
            Status::Progress(Progress::Output(line)) if e.stage == stage => Some(line.clone()),
            _ => None,
        })
        .collect()
}

fn assert_ordered(events: &Recorded) {
    let events = events.lock().unwrap();
    if let Err(e) = check_sequence(&events) {
        panic!("bad event order: {e}");
    }
}

/// Run an install that is canceled shortly after `stage` starts
async fn cancel_after_start(
    options: BuildOptions,
    source: Arc<StallingSource>,
    stage: Stage,
) -> (InstallError, Recorded) {
    let (handle, token) = cancellation();
    let started = Arc::new(tokio::sync::Notify::new());
    let waiter = Arc::clone(&started);
    tokio::spawn(async move {
        waiter.notified().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.cancel();
    });

    let events: Recorded = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let installer = Installer::new(options)
        .unwrap()
        .with_source(source)
        .with_cancellation(token)
        .on_event(Arc::new(move |event: Event| {
            if event.stage == stage && event.is_start() {
                started.notify_one();
            }
            sink.lock().unwrap().push(event);
        }));

    let err = tokio::time::timeout(Duration::from_secs(10), installer.install())
        .await
        .expect("cancellation should end the install")
        .unwrap_err();
    (err, events)
}

fn run_binary(path: &Path) -> String {
    let output = std::process::Command::new(path).output().unwrap();
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

#[tokio::test]
async fn prebuilt_install_then_cache_hit() {
    let sandbox = Sandbox::new();
    let source = Arc::new(
        MemorySource::default().with(&prebuilt_url("0.15.15"), prebuilt_archive(GOOD_PURS)),
    );

    let (installer, events) = recording(sandbox.options("0.15.15", "x86_64"), Arc::clone(&source));
    let outcome = installer.install().await.unwrap();

    assert_eq!(outcome.origin, Origin::Prebuilt);
    assert!(outcome.cached);
    assert_eq!(outcome.path, sandbox.bin_dir().join("purs"));
    assert_eq!(run_binary(&outcome.path), "0.15.15");
    assert!(!sandbox.bin_dir().join("README.md").exists());
    assert_ordered(&events);
    assert_eq!(
        milestones(&events),
        [
            "search-cache:start",
            "search-cache:complete",
            "head:start",
            "head:complete",
            "download-binary:start",
            "download-binary:complete",
            "check-binary:start",
            "check-binary:complete",
            "write-cache:start",
            "write-cache:complete",
        ]
    );
    assert_eq!(
        completion(&events, Stage::SearchCache),
        Some(Completion::Found(false))
    );

    // Second run restores from the cache without touching the network
    std::fs::remove_file(&outcome.path).unwrap();
    let (installer, events) = recording(sandbox.options("0.15.15", "x86_64"), Arc::clone(&source));
    let outcome = installer.install().await.unwrap();

    assert_eq!(outcome.origin, Origin::Cache);
    assert_eq!(source.requests().len(), 1);
    assert_eq!(run_binary(&outcome.path), "0.15.15");
    assert_ordered(&events);
    assert_eq!(
        milestones(&events),
        [
            "search-cache:start",
            "search-cache:complete",
            "restore-cache:start",
            "restore-cache:complete",
            "check-binary:start",
            "check-binary:complete",
        ]
    );
    assert_eq!(
        completion(&events, Stage::SearchCache),
        Some(Completion::Found(true))
    );
    assert_eq!(
        completion(&events, Stage::CheckBinary),
        Some(Completion::Version("0.15.15".to_string()))
    );
}

#[tokio::test]
async fn other_version_misses_cache() {
    let sandbox = Sandbox::new();
    let source = Arc::new(
        MemorySource::default()
            .with(&prebuilt_url("0.15.15"), prebuilt_archive(GOOD_PURS))
            .with(&prebuilt_url("0.15.14"), prebuilt_archive(OLDER_PURS)),
    );

    let (installer, _) = recording(sandbox.options("0.15.15", "x86_64"), Arc::clone(&source));
    installer.install().await.unwrap();

    let (installer, events) = recording(sandbox.options("0.15.14", "x86_64"), Arc::clone(&source));
    let outcome = installer.install().await.unwrap();

    assert_eq!(outcome.origin, Origin::Prebuilt);
    assert_eq!(
        completion(&events, Stage::SearchCache),
        Some(Completion::Found(false))
    );
    assert_eq!(
        source.requests(),
        [prebuilt_url("0.15.15"), prebuilt_url("0.15.14")]
    );

    // The 0.15.15 binary is gone from the store, not just unindexed
    let blobs = files_under(&sandbox.path("cache").join("content-v1"));
    assert_eq!(blobs.len(), 1);
    assert_eq!(std::fs::read(&blobs[0]).unwrap(), OLDER_PURS);
}

#[tokio::test]
async fn broken_cached_binary_is_reinstalled() {
    let sandbox = Sandbox::new();
    let source = Arc::new(
        MemorySource::default().with(&prebuilt_url("0.15.15"), prebuilt_archive(GOOD_PURS)),
    );

    let (installer, _) = recording(sandbox.options("0.15.15", "x86_64"), Arc::clone(&source));
    installer.install().await.unwrap();

    // Intact content whose binary no longer runs
    let store = FsCacheStore::new(sandbox.path("cache"));
    store
        .write(
            CACHE_KEY,
            BROKEN_PURS,
            EntryMetadata {
                id: sandbox.options("0.15.15", "x86_64").cache_id(),
                mode: 0o755,
                size: BROKEN_PURS.len() as u64,
            },
        )
        .await
        .unwrap();

    let (installer, events) = recording(sandbox.options("0.15.15", "x86_64"), Arc::clone(&source));
    let outcome = installer.install().await.unwrap();

    assert_eq!(outcome.origin, Origin::Prebuilt);
    assert!(outcome.cached);
    assert_eq!(run_binary(&outcome.path), "0.15.15");
    assert_eq!(source.requests().len(), 2);
    assert_ordered(&events);
    assert_eq!(
        milestones(&events),
        [
            "search-cache:start",
            "search-cache:complete",
            "restore-cache:start",
            "restore-cache:complete",
            "check-binary:start",
            "check-binary:fail",
            "head:start",
            "head:complete",
            "download-binary:start",
            "download-binary:complete",
            "check-binary:start",
            "check-binary:complete",
            "write-cache:start",
            "write-cache:complete",
        ]
    );

    let entry = store.lookup(CACHE_KEY).await.unwrap().unwrap();
    assert_eq!(store.read(&entry).await.unwrap(), GOOD_PURS);
    assert_eq!(files_under(&sandbox.path("cache").join("content-v1")).len(), 1);
}

#[tokio::test]
async fn failed_cache_write_keeps_install() {
    let sandbox = Sandbox::new();
    let source = Arc::new(
        MemorySource::default().with(&prebuilt_url("0.15.15"), prebuilt_archive(GOOD_PURS)),
    );

    let (installer, events) = recording(sandbox.options("0.15.15", "x86_64"), Arc::clone(&source));
    let outcome = installer
        .with_cache(Arc::new(ReadOnlyCache))
        .install()
        .await
        .unwrap();

    assert_eq!(outcome.origin, Origin::Prebuilt);
    assert!(!outcome.cached);
    assert_eq!(run_binary(&outcome.path), "0.15.15");
    assert!(!sandbox.path("cache").exists());
    assert_ordered(&events);
    assert_eq!(
        milestones(&events).last().map(String::as_str),
        Some("write-cache:fail")
    );
}

#[tokio::test]
async fn corrupted_cache_is_replaced() {
    let sandbox = Sandbox::new();
    let source = Arc::new(
        MemorySource::default().with(&prebuilt_url("0.15.15"), prebuilt_archive(GOOD_PURS)),
    );

    let (installer, _) = recording(sandbox.options("0.15.15", "x86_64"), Arc::clone(&source));
    installer.install().await.unwrap();

    for blob in files_under(&sandbox.path("cache").join("content-v1")) {
        std::fs::write(blob, b"not the binary").unwrap();
    }

    let (installer, events) = recording(sandbox.options("0.15.15", "x86_64"), Arc::clone(&source));
    let outcome = installer.install().await.unwrap();

    assert_eq!(outcome.origin, Origin::Prebuilt);
    assert!(outcome.cached);
    assert_eq!(source.requests().len(), 2);
    assert_ordered(&events);
    let names = milestones(&events);
    assert!(names.contains(&"restore-cache:fail".to_string()));
    assert_eq!(names.last().map(String::as_str), Some("write-cache:complete"));
}

#[tokio::test]
async fn unsupported_arch_builds_from_source() {
    let sandbox = Sandbox::new();
    let source = Arc::new(MemorySource::default().with(&source_url("0.15.15"), source_archive()));

    let options = BuildOptions::builder()
        .version("0.15.15")
        .binary_name("purs-0.15.15")
        .target_dir(sandbox.bin_dir())
        .cache_root(sandbox.path("cache"))
        .prebuilt_base_url(PREBUILT_BASE)
        .source_base_url(SOURCE_BASE)
        .build_tool(sandbox.stack())
        .platform(Platform::new("linux", "aarch64"))
        .extra_args(["--jobs=2", "--fast"])
        .build()
        .unwrap();

    let (installer, events) = recording(options, Arc::clone(&source));
    let outcome = installer.install().await.unwrap();

    assert_eq!(outcome.origin, Origin::Source);
    assert_eq!(outcome.path, sandbox.bin_dir().join("purs-0.15.15"));
    assert!(!sandbox.bin_dir().join("purs").exists());
    assert_eq!(run_binary(&outcome.path), "0.15.15");
    assert_eq!(source.requests(), [source_url("0.15.15")]);

    assert_ordered(&events);
    assert_eq!(
        milestones(&events),
        [
            "search-cache:start",
            "search-cache:complete",
            "head:start",
            "head:fail",
            "check-stack:start",
            "check-stack:complete",
            "download-source:start",
            "download-source:complete",
            "setup:start",
            "setup:complete",
            "build:start",
            "build:complete",
            "write-cache:start",
            "write-cache:complete",
        ]
    );
    assert_eq!(
        completion(&events, Stage::CheckStack),
        Some(Completion::Version("2.15.1".to_string()))
    );

    // Only build inputs reach the build directory
    let listing = std::fs::read_to_string(sandbox.path("listing.txt")).unwrap();
    let files: Vec<&str> = listing.lines().collect();
    assert_eq!(
        files,
        ["./LICENSE", "./app/Main.hs", "./purescript.cabal", "./stack.yaml"]
    );

    // Shared flags reach both calls, install-only flags only `install`
    let calls = sandbox.stack_calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0], "--allow-different-user setup --jobs=2");
    assert!(calls[1].starts_with("--allow-different-user install --local-bin-path="));
    assert!(calls[1].ends_with("--flag=purescript:RELEASE --jobs=2 --fast"));

    // Build output is streamed with known noise filtered out
    let build_output = output_lines(&events, Stage::Build);
    assert!(build_output.iter().any(|l| l.starts_with("Copying from")));
    assert!(!build_output.iter().any(|l| l.contains("filepath wildcard")));
    let setup_output = output_lines(&events, Stage::Setup);
    assert!(setup_output.iter().any(|l| l.contains("Preparing to install GHC")));

    let build_dir = std::fs::read_to_string(sandbox.path("stack.cwd")).unwrap();
    assert!(!Path::new(build_dir.trim()).exists());
}

#[tokio::test]
async fn broken_prebuilt_falls_back_to_source() {
    let sandbox = Sandbox::new();
    let source = Arc::new(
        MemorySource::default()
            .with(&prebuilt_url("0.15.15"), prebuilt_archive(BROKEN_PURS))
            .with(&source_url("0.15.15"), source_archive()),
    );

    let (installer, events) = recording(sandbox.options("0.15.15", "x86_64"), Arc::clone(&source));
    let outcome = installer.install().await.unwrap();

    assert_eq!(outcome.origin, Origin::Source);
    assert_eq!(run_binary(&outcome.path), "0.15.15");
    assert_ordered(&events);
    let names = milestones(&events);
    let failed = names.iter().position(|n| n == "check-binary:fail").unwrap();
    assert_eq!(names[failed + 1], "check-stack:start");
}

#[tokio::test]
async fn missing_prebuilt_falls_back_to_source() {
    let sandbox = Sandbox::new();
    let source = Arc::new(MemorySource::default().with(&source_url("0.15.15"), source_archive()));

    let (installer, events) = recording(sandbox.options("0.15.15", "x86_64"), Arc::clone(&source));
    let outcome = installer.install().await.unwrap();

    assert_eq!(outcome.origin, Origin::Source);
    assert_eq!(
        source.requests(),
        [prebuilt_url("0.15.15"), source_url("0.15.15")]
    );
    assert_ordered(&events);
    assert!(milestones(&events).contains(&"download-binary:fail".to_string()));
}

#[tokio::test]
async fn missing_stack_is_fatal() {
    let sandbox = Sandbox::new();
    let source = Arc::new(MemorySource::default().with(&source_url("0.15.15"), source_archive()));

    let options = BuildOptions::builder()
        .version("0.15.15")
        .target_dir(sandbox.bin_dir())
        .cache_root(sandbox.path("cache"))
        .prebuilt_base_url(PREBUILT_BASE)
        .source_base_url(SOURCE_BASE)
        .build_tool(sandbox.path("no-such-stack"))
        .platform(Platform::new("linux", "aarch64"))
        .build()
        .unwrap();

    let (installer, events) = recording(options, Arc::clone(&source));
    let err = installer.install().await.unwrap_err();

    assert!(matches!(err.root(), InstallError::ToolNotFound { .. }));
    assert!(err.hint().is_some());
    assert!(source.requests().is_empty());
    assert!(!sandbox.bin_dir().join("purs").exists());
    assert_ordered(&events);
    assert_eq!(
        milestones(&events).last().map(String::as_str),
        Some("check-stack:fail")
    );
}

#[tokio::test]
async fn cancel_during_setup_cleans_up() {
    let sandbox = Sandbox::new();
    sandbox.write_stack("exec sleep 30");
    let source = Arc::new(MemorySource::default().with(&source_url("0.15.15"), source_archive()));

    let (handle, token) = cancellation();
    let events: Recorded = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let installer = Installer::new(sandbox.options("0.15.15", "aarch64"))
        .unwrap()
        .with_source(source)
        .with_cancellation(token)
        .on_event(Arc::new(move |event: Event| {
            if event.stage == Stage::Setup && event.is_start() {
                handle.cancel();
            }
            sink.lock().unwrap().push(event);
        }));

    let started = std::time::Instant::now();
    let err = installer.install().await.unwrap_err();

    assert!(err.is_canceled());
    assert!(started.elapsed() < std::time::Duration::from_secs(20));
    assert!(!sandbox.bin_dir().join("purs").exists());
    assert!(!sandbox.path("cache").join("index-v1").exists());
    assert_ordered(&events);
    assert_eq!(
        milestones(&events).last().map(String::as_str),
        Some("setup:fail")
    );

    let build_dir = std::fs::read_to_string(sandbox.path("stack.cwd")).unwrap();
    assert!(!Path::new(build_dir.trim()).exists());
}

#[tokio::test]
async fn cancel_during_binary_download_cleans_up() {
    let sandbox = Sandbox::new();
    let source = Arc::new(StallingSource::new(
        prebuilt_url("0.15.15"),
        prebuilt_archive(GOOD_PURS),
    ));

    let (err, events) = cancel_after_start(
        sandbox.options("0.15.15", "x86_64"),
        Arc::clone(&source),
        Stage::DownloadBinary,
    )
    .await;

    assert!(err.is_canceled());
    assert!(!sandbox.bin_dir().join("purs").exists());
    assert!(!sandbox.path("cache").join("index-v1").exists());
    assert!(sandbox.stack_calls().is_empty());
    assert_eq!(
        source.destinations(),
        [(prebuilt_url("0.15.15"), sandbox.bin_dir())]
    );
    assert_ordered(&events);
    assert_eq!(
        milestones(&events).last().map(String::as_str),
        Some("download-binary:fail")
    );
}

#[tokio::test]
async fn cancel_during_source_download_cleans_up() {
    let sandbox = Sandbox::new();
    let source = Arc::new(StallingSource::new(source_url("0.15.15"), source_archive()));

    let (err, events) = cancel_after_start(
        sandbox.options("0.15.15", "aarch64"),
        Arc::clone(&source),
        Stage::DownloadSource,
    )
    .await;

    assert!(err.is_canceled());
    assert!(!sandbox.bin_dir().join("purs").exists());
    assert!(!sandbox.path("cache").join("index-v1").exists());
    assert_ordered(&events);
    assert_eq!(
        milestones(&events).last().map(String::as_str),
        Some("download-source:fail")
    );

    let destinations = source.destinations();
    assert_eq!(destinations.len(), 1);
    let (url, build_dir) = &destinations[0];
    assert_eq!(url, &source_url("0.15.15"));
    assert!(build_dir
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("purs-install-"));
    assert!(!build_dir.exists());
}

#[tokio::test]
async fn renamed_source_build_keeps_existing_purs() {
    let sandbox = Sandbox::new();
    std::fs::create_dir_all(sandbox.bin_dir()).unwrap();
    write_script(&sandbox.bin_dir().join("purs"), "#!/bin/sh\necho 0.14.0\n");
    let source = Arc::new(MemorySource::default().with(&source_url("0.15.15"), source_archive()));

    let options = BuildOptions::builder()
        .version("0.15.15")
        .binary_name("purs-0.15.15")
        .target_dir(sandbox.bin_dir())
        .cache_root(sandbox.path("cache"))
        .prebuilt_base_url(PREBUILT_BASE)
        .source_base_url(SOURCE_BASE)
        .build_tool(sandbox.stack())
        .platform(Platform::new("linux", "aarch64"))
        .build()
        .unwrap();

    let (installer, events) = recording(options, Arc::clone(&source));
    let err = installer.install().await.unwrap_err();

    assert!(matches!(err.root(), InstallError::BuildOutputOccupied(_)));
    assert!(err.hint().is_some());
    assert_eq!(run_binary(&sandbox.bin_dir().join("purs")), "0.14.0");
    assert!(!sandbox.bin_dir().join("purs-0.15.15").exists());
    assert!(source.requests().is_empty());
    assert!(sandbox.stack_calls().is_empty());
    assert_ordered(&events);
}

#[tokio::test]
async fn directory_at_target_is_fatal() {
    let sandbox = Sandbox::new();
    std::fs::create_dir_all(sandbox.bin_dir().join("purs")).unwrap();
    let source = Arc::new(
        MemorySource::default()
            .with(&prebuilt_url("0.15.15"), prebuilt_archive(GOOD_PURS))
            .with(&source_url("0.15.15"), source_archive()),
    );

    let (installer, events) = recording(sandbox.options("0.15.15", "x86_64"), Arc::clone(&source));
    let err = installer.install().await.unwrap_err();

    assert!(matches!(err.root(), InstallError::PathCollision(_)));
    assert!(sandbox.bin_dir().join("purs").is_dir());
    assert!(sandbox.stack_calls().is_empty());
    assert_ordered(&events);
}

fn files_under(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                pending.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files
}
