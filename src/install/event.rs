//! Progress events emitted by the install workflow
//!
//! Every stage emits a start event, any number of progress events, then
//! exactly one `:complete` or `:fail` event. Consumers (the terminal UI,
//! tests) subscribe through an [`EventSink`].

use crate::error::InstallError;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Workflow stage identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    SearchCache,
    RestoreCache,
    CheckBinary,
    Head,
    DownloadBinary,
    CheckStack,
    DownloadSource,
    Setup,
    Build,
    WriteCache,
}

impl Stage {
    /// Stable identifier used in event names
    pub fn id(&self) -> &'static str {
        match self {
            Self::SearchCache => "search-cache",
            Self::RestoreCache => "restore-cache",
            Self::CheckBinary => "check-binary",
            Self::Head => "head",
            Self::DownloadBinary => "download-binary",
            Self::CheckStack => "check-stack",
            Self::DownloadSource => "download-source",
            Self::Setup => "setup",
            Self::Build => "build",
            Self::WriteCache => "write-cache",
        }
    }

    /// Stages that may directly follow this one.
    ///
    /// `None` as a predecessor means the start of a run.
    pub fn may_follow(self, previous: Option<Stage>) -> bool {
        use Stage::*;
        match previous {
            None => self == SearchCache,
            Some(SearchCache) => matches!(self, RestoreCache | Head | CheckStack),
            Some(RestoreCache) => matches!(self, CheckBinary | Head | CheckStack),
            Some(CheckBinary) => matches!(self, Head | CheckStack | WriteCache),
            Some(Head) => matches!(self, DownloadBinary | CheckStack),
            Some(DownloadBinary) => matches!(self, CheckBinary | CheckStack),
            Some(CheckStack) => self == DownloadSource,
            Some(DownloadSource) => self == Setup,
            Some(Setup) => self == Build,
            Some(Build) => self == WriteCache,
            Some(WriteCache) => false,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Payload of a progress event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// An archive entry started or had a chunk written
    Entry {
        /// Entry path relative to the destination (after stripping)
        path: PathBuf,
        /// Bytes of this entry written so far
        written: u64,
        /// Declared size of the entry
        size: u64,
        /// Bytes received on the network stream so far
        received: u64,
        /// `Content-Length` of the response, when known
        total: Option<u64>,
    },
    /// One line of subprocess diagnostic output
    Output(String),
}

/// Detail attached to a `:complete` event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    None,
    /// Result of the cache lookup
    Found(bool),
    /// Version reported by a probed binary
    Version(String),
    /// Number of bytes stored or restored
    Bytes(u64),
}

/// Status part of an event
#[derive(Debug, Clone)]
pub enum Status {
    Start,
    Progress(Progress),
    Complete(Completion),
    Fail(Arc<InstallError>),
}

/// A single progress event
#[derive(Debug, Clone)]
pub struct Event {
    pub stage: Stage,
    pub status: Status,
}

impl Event {
    /// Event name in `<stage>[:suffix]` form
    pub fn name(&self) -> String {
        match &self.status {
            Status::Start | Status::Progress(_) => self.stage.id().to_string(),
            Status::Complete(_) => format!("{}:complete", self.stage),
            Status::Fail(_) => format!("{}:fail", self.stage),
        }
    }

    pub fn is_start(&self) -> bool {
        matches!(self.status, Status::Start)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, Status::Complete(_) | Status::Fail(_))
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            Status::Start => write!(f, "{}", self.stage),
            Status::Progress(Progress::Output(line)) => write!(f, "{} {}", self.stage, line),
            Status::Progress(Progress::Entry {
                path,
                written,
                received,
                ..
            }) => write!(
                f,
                "{} {} {}B (received {}B)",
                self.stage,
                path.display(),
                written,
                received
            ),
            Status::Complete(Completion::None) => write!(f, "{}:complete", self.stage),
            Status::Complete(Completion::Found(found)) => {
                write!(f, "{}:complete found={}", self.stage, found)
            }
            Status::Complete(Completion::Version(v)) => {
                write!(f, "{}:complete version={}", self.stage, v)
            }
            Status::Complete(Completion::Bytes(n)) => {
                write!(f, "{}:complete bytes={}", self.stage, n)
            }
            Status::Fail(err) => write!(f, "{}:fail {}", self.stage, err),
        }
    }
}

/// Callback receiving every event of a run
pub type EventSink = Arc<dyn Fn(Event) + Send + Sync>;

/// A sink that drops every event
pub fn discard() -> EventSink {
    Arc::new(|_| {})
}

/// Ordered stage reporter owned by one workflow run.
///
/// Tracks the open stage so a terminal event is only sent for the stage
/// that was started, and logs any ordering violation.
#[derive(Clone)]
pub struct Reporter {
    sink: EventSink,
    open: Arc<Mutex<Option<Stage>>>,
}

impl Reporter {
    pub fn new(sink: EventSink) -> Self {
        Self {
            sink,
            open: Arc::new(Mutex::new(None)),
        }
    }

    fn set_open(&self, stage: Option<Stage>) -> Option<Stage> {
        match self.open.lock() {
            Ok(mut guard) => std::mem::replace(&mut *guard, stage),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), stage),
        }
    }

    pub fn start(&self, stage: Stage) {
        if let Some(previous) = self.set_open(Some(stage)) {
            warn!("stage {} started while {} is still open", stage, previous);
        }
        debug!("stage {} started", stage);
        (self.sink)(Event {
            stage,
            status: Status::Start,
        });
    }

    pub fn progress(&self, stage: Stage, progress: Progress) {
        (self.sink)(Event {
            stage,
            status: Status::Progress(progress),
        });
    }

    pub fn output(&self, stage: Stage, line: String) {
        self.progress(stage, Progress::Output(line));
    }

    pub fn complete(&self, stage: Stage, completion: Completion) {
        self.close(stage);
        debug!("stage {} complete", stage);
        (self.sink)(Event {
            stage,
            status: Status::Complete(completion),
        });
    }

    pub fn fail(&self, stage: Stage, error: &InstallError) {
        self.close(stage);
        debug!("stage {} failed: {}", stage, error);
        (self.sink)(Event {
            stage,
            status: Status::Fail(Arc::new(clone_for_event(error))),
        });
    }

    fn close(&self, stage: Stage) {
        match self.set_open(None) {
            Some(open) if open == stage => {}
            other => warn!("stage {} finished but open stage was {:?}", stage, other),
        }
    }
}

/// Rebuild an error for an event payload.
///
/// `InstallError` holds `io::Error`s and is not `Clone`, so the event carries
/// an equivalent error rebuilt from kind and message.
fn clone_for_event(error: &InstallError) -> InstallError {
    use InstallError as E;
    match error {
        E::HttpStatus { url, status } => E::HttpStatus {
            url: url.clone(),
            status: *status,
        },
        E::Network { url, reason } => E::Network {
            url: url.clone(),
            reason: reason.clone(),
        },
        E::Io { context, source } => E::Io {
            context: context.clone(),
            source: std::io::Error::new(source.kind(), source.to_string()),
        },
        E::PathCollision(p) => E::PathCollision(p.clone()),
        E::BuildOutputOccupied(p) => E::BuildOutputOccupied(p.clone()),
        E::ArchiveEntryMissing { url, entry } => E::ArchiveEntryMissing {
            url: url.clone(),
            entry: entry.clone(),
        },
        E::CommandFailed { command, source } => E::CommandFailed {
            command: command.clone(),
            source: std::io::Error::new(source.kind(), source.to_string()),
        },
        E::Process {
            command,
            status,
            stderr,
        } => E::Process {
            command: command.clone(),
            status: *status,
            stderr: stderr.clone(),
        },
        E::Timeout { command, secs } => E::Timeout {
            command: command.clone(),
            secs: *secs,
        },
        E::ToolNotFound {
            tool,
            reason,
            guidance_url,
        } => E::ToolNotFound {
            tool: tool.clone(),
            reason: reason.clone(),
            guidance_url,
        },
        E::UnsupportedPlatform(p) => E::UnsupportedPlatform(p.clone()),
        E::UnsupportedArchitecture(a) => E::UnsupportedArchitecture(a.clone()),
        E::CacheCorruption(m) => E::CacheCorruption(m.clone()),
        E::Canceled => E::Canceled,
        E::InvalidOptions(m) => E::InvalidOptions(m.clone()),
        E::ConfigInvalid { path, reason } => E::ConfigInvalid {
            path: path.clone(),
            reason: reason.clone(),
        },
        E::Json(e) => E::InvalidOptions(e.to_string()),
        E::TomlSerialize(e) => E::InvalidOptions(e.to_string()),
        E::Stage { stage, source } => E::Stage {
            stage: *stage,
            source: Box::new(clone_for_event(source)),
        },
    }
}

/// Check that a recorded event sequence respects stage ordering:
/// each terminal event closes the one open stage, progress only occurs
/// inside an open stage, and consecutive stages follow the stage graph.
pub fn check_sequence(events: &[Event]) -> Result<(), String> {
    let mut open: Option<Stage> = None;
    let mut last: Option<Stage> = None;

    for (i, event) in events.iter().enumerate() {
        match &event.status {
            Status::Start => {
                if let Some(stage) = open {
                    return Err(format!("#{i}: {} started while {stage} open", event.stage));
                }
                if !event.stage.may_follow(last) {
                    return Err(format!("#{i}: {} may not follow {:?}", event.stage, last));
                }
                open = Some(event.stage);
            }
            Status::Progress(_) => {
                if open != Some(event.stage) {
                    return Err(format!("#{i}: progress for {} outside its stage", event.stage));
                }
            }
            Status::Complete(_) | Status::Fail(_) => {
                if open != Some(event.stage) {
                    return Err(format!("#{i}: {} without matching start", event.name()));
                }
                open = None;
                last = Some(event.stage);
            }
        }
    }

    match open {
        Some(stage) => Err(format!("{stage} never finished")),
        None => Ok(()),
    }
}
