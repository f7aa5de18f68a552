//! The storage-backend contract (spec.md §4.5 / §6).
//!
//! `wharf` is an embeddable engine: it does not ship a filesystem driver.
//! A host application implements [`Authenticator`] and [`StorageBackend`]
//! and hands them to [`crate::server::Server::builder`]. Concrete on-disk
//! implementations (directory-jail drivers, hash algorithms used inside a
//! backend's own `hash` method) are out of scope for this crate; see
//! `tests/support` for a minimal in-memory implementation used only to
//! exercise the session state machine in this crate's own test suite.
use std::future::Future;
use std::net::IpAddr;
use std::time::SystemTime;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::hash::HashAlgorithm;

/// The three sentinel error categories spec.md §4.5 requires a backend to
/// map its errors onto, plus an escape hatch for anything else.
#[derive(Debug, Clone)]
pub enum BackendErrorKind {
    NotFound,
    PermissionDenied,
    AlreadyExists,
    /// Sanitized, path-free description of an unexpected failure.
    Other(String),
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("backend error: {kind:?}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
}

impl BackendError {
    pub fn not_found() -> Self {
        Self { kind: BackendErrorKind::NotFound }
    }
    pub fn permission_denied() -> Self {
        Self { kind: BackendErrorKind::PermissionDenied }
    }
    pub fn already_exists() -> Self {
        Self { kind: BackendErrorKind::AlreadyExists }
    }
    pub fn other(msg: impl Into<String>) -> Self {
        Self { kind: BackendErrorKind::Other(msg.into()) }
    }
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Flags requested of [`StorageBackend::open_file`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags {
    pub write: bool,
    pub create: bool,
    pub truncate: bool,
    pub append: bool,
}

impl OpenFlags {
    pub const READ: Self = Self { write: false, create: false, truncate: false, append: false };
    pub const WRITE_CREATE_TRUNCATE: Self = Self { write: true, create: true, truncate: true, append: false };
    pub const WRITE_CREATE: Self = Self { write: true, create: true, truncate: false, append: false };
    pub const WRITE_CREATE_APPEND: Self = Self { write: true, create: true, truncate: false, append: true };
}

/// File metadata as produced by the backend. Read-only to the core.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub mode: u32,
    pub modified: SystemTime,
    pub is_dir: bool,
}

/// A parsed/rendered MLST/MLSD fact line (spec.md §3, §6).
#[derive(Debug, Clone)]
pub struct MlEntry {
    pub name: String,
    pub entry_type: MlEntryType,
    pub size: u64,
    pub modify: SystemTime,
    pub perm: String,
    pub unix_mode: u32,
    pub facts: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MlEntryType {
    File,
    Dir,
    Link,
    Cdir,
    Pdir,
}

impl MlEntryType {
    pub fn as_str(self) -> &'static str {
        match self {
            MlEntryType::File => "file",
            MlEntryType::Dir => "dir",
            MlEntryType::Link => "link",
            MlEntryType::Cdir => "cdir",
            MlEntryType::Pdir => "pdir",
        }
    }
}

impl MlEntry {
    /// Render as `fact1=value1;fact2=value2;...; <name>`. `type`, `size`,
    /// `modify` are always emitted (spec.md §6 mandatory facts).
    pub fn render(&self) -> String {
        let modify = chrono::DateTime::<chrono::Utc>::from(self.modify).format("%Y%m%d%H%M%S");
        let mut line = format!("type={};size={};modify={};", self.entry_type.as_str(), self.size, modify);
        for (k, v) in &self.facts {
            line.push_str(&format!("{k}={v};"));
        }
        line.push(' ');
        line.push_str(&self.name);
        line
    }

    /// Parse a previously-rendered fact line back into an [`MlEntry`]-shaped
    /// raw fact map. Only used by tests and by callers that want to verify
    /// a round trip; case-insensitive on fact names per spec.md §6.
    pub fn parse_facts(line: &str) -> Option<(Vec<(String, String)>, &str)> {
        let (facts_part, name) = line.split_once(' ')?;
        let mut facts = Vec::new();
        for fact in facts_part.split(';') {
            if fact.is_empty() {
                continue;
            }
            let (k, v) = fact.split_once('=')?;
            facts.push((k.to_ascii_lowercase(), v.to_string()));
        }
        Some((facts, name))
    }
}

/// The settings a backend publishes for the core to use when brokering
/// data connections (spec.md §4.5: "a `GetSettings` returning the passive
/// port range and public host").
#[derive(Debug, Clone, Default)]
pub struct BackendSettings {
    pub passive_ports: Option<std::ops::Range<u16>>,
    pub public_host: Option<String>,
}

/// Authenticates a USER/PASS/HOST triple into a per-session backend handle.
pub trait Authenticator: Send + Sync {
    type Session: StorageBackend;

    fn authenticate(
        &self,
        user: &str,
        pass: &str,
        host: Option<&str>,
        peer: IpAddr,
    ) -> impl Future<Output = BackendResult<Self::Session>> + Send;
}

/// The per-session filesystem view a successful authentication yields.
///
/// Implementations MUST confine every path operation to the user's root
/// (spec.md §4.5, §9): a symlink escape must be rejected even where naive
/// resolution would succeed. Read-only backends MUST refuse write flags at
/// `open_file` and return `PermissionDenied` from all mutating operations.
pub trait StorageBackend: Send + Sync + 'static {
    type File: AsyncRead + AsyncWrite + Send + Unpin;

    fn settings(&self) -> BackendSettings;

    /// Whether `file` supports a restart seek. Backends over non-seekable
    /// storage (streaming, some object stores) return `false`; REST against
    /// such a backend yields `550 Resume not supported` (spec.md §4.4/§8).
    fn is_seekable(&self, file: &Self::File) -> bool;

    /// Seek `file` to `offset` bytes from the start. Only ever called when
    /// [`StorageBackend::is_seekable`] returned `true`.
    fn seek(&self, file: &mut Self::File, offset: u64) -> impl Future<Output = BackendResult<()>> + Send;

    fn cwd(&self) -> impl Future<Output = String> + Send;
    fn change_dir(&self, path: &str) -> impl Future<Output = BackendResult<()>> + Send;
    fn make_dir(&self, path: &str) -> impl Future<Output = BackendResult<()>> + Send;
    fn remove_dir(&self, path: &str) -> impl Future<Output = BackendResult<()>> + Send;
    fn delete_file(&self, path: &str) -> impl Future<Output = BackendResult<()>> + Send;
    fn rename(&self, from: &str, to: &str) -> impl Future<Output = BackendResult<()>> + Send;
    fn list_dir(&self, path: &str) -> impl Future<Output = BackendResult<Vec<FileInfo>>> + Send;
    fn open_file(&self, path: &str, flags: OpenFlags) -> impl Future<Output = BackendResult<Self::File>> + Send;
    fn stat(&self, path: &str) -> impl Future<Output = BackendResult<FileInfo>> + Send;
    fn hash(&self, path: &str, algo: HashAlgorithm) -> impl Future<Output = BackendResult<String>> + Send;
    fn set_modified(&self, path: &str, when: SystemTime) -> impl Future<Output = BackendResult<()>> + Send;
    fn chmod(&self, path: &str, mode: u32) -> impl Future<Output = BackendResult<()>> + Send;
    /// A server-chosen unique filename for STOU, rooted at the current directory.
    fn unique_name(&self) -> impl Future<Output = String> + Send;
    fn close(&self) -> impl Future<Output = ()> + Send {
        async {}
    }
}
