//! In-memory `Authenticator`/`StorageBackend` used only to exercise the
//! session state machine end to end. Not a reference storage driver: paths
//! are a flat map keyed by normalized absolute string, good enough to drive
//! CWD/MKD/LIST/RETR/STOR without a real filesystem.
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::SystemTime;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use wharf::{
    Authenticator, BackendError, BackendResult, BackendSettings, FileInfo, HashAlgorithm, OpenFlags,
    StorageBackend,
};

struct FileRecord {
    bytes: Arc<Mutex<Vec<u8>>>,
    mode: Mutex<u32>,
    modified: Mutex<SystemTime>,
}

enum Entry {
    File(Arc<FileRecord>),
    Dir,
}

#[derive(Clone)]
pub struct MemFs {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    stou_counter: Arc<AtomicU64>,
}

impl MemFs {
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        entries.insert("/".to_string(), Entry::Dir);
        Self { entries: Arc::new(Mutex::new(entries)), stou_counter: Arc::new(AtomicU64::new(0)) }
    }

    /// Seeds a file directly, bypassing STOR, for test setup.
    pub fn seed_file(&self, path: &str, contents: &[u8]) {
        let record = FileRecord {
            bytes: Arc::new(Mutex::new(contents.to_vec())),
            mode: Mutex::new(0o644),
            modified: Mutex::new(SystemTime::now()),
        };
        self.entries.lock().unwrap().insert(path.to_string(), Entry::File(Arc::new(record)));
    }
}

/// An in-memory file handle. Reads/writes never actually suspend, so every
/// poll resolves immediately.
pub struct MemFile {
    bytes: Arc<Mutex<Vec<u8>>>,
    pos: usize,
}

impl AsyncRead for MemFile {
    fn poll_read(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let data = this.bytes.lock().unwrap();
        let remaining = &data[this.pos.min(data.len())..];
        let n = remaining.len().min(buf.remaining());
        buf.put_slice(&remaining[..n]);
        this.pos += n;
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MemFile {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, data: &[u8]) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        let mut bytes = this.bytes.lock().unwrap();
        if this.pos + data.len() > bytes.len() {
            bytes.resize(this.pos + data.len(), 0);
        }
        bytes[this.pos..this.pos + data.len()].copy_from_slice(data);
        this.pos += data.len();
        Poll::Ready(Ok(data.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

fn normalize(base: &str, path: &str) -> String {
    let mut parts: Vec<&str> = if path.starts_with('/') {
        Vec::new()
    } else {
        base.split('/').filter(|s| !s.is_empty()).collect()
    };
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

pub struct MemBackend {
    fs: MemFs,
    cwd: Mutex<String>,
}

impl StorageBackend for MemBackend {
    type File = MemFile;

    fn settings(&self) -> BackendSettings {
        BackendSettings::default()
    }

    fn is_seekable(&self, _file: &Self::File) -> bool {
        true
    }

    async fn seek(&self, file: &mut Self::File, offset: u64) -> BackendResult<()> {
        file.pos = offset as usize;
        Ok(())
    }

    async fn cwd(&self) -> String {
        self.cwd.lock().unwrap().clone()
    }

    async fn change_dir(&self, path: &str) -> BackendResult<()> {
        let target = normalize(&self.cwd.lock().unwrap(), path);
        let entries = self.fs.entries.lock().unwrap();
        match entries.get(&target) {
            Some(Entry::Dir) => {
                drop(entries);
                *self.cwd.lock().unwrap() = target;
                Ok(())
            }
            Some(Entry::File(_)) => Err(BackendError::other("not a directory")),
            None => Err(BackendError::not_found()),
        }
    }

    async fn make_dir(&self, path: &str) -> BackendResult<()> {
        let target = normalize(&self.cwd.lock().unwrap(), path);
        let mut entries = self.fs.entries.lock().unwrap();
        if entries.contains_key(&target) {
            return Err(BackendError::already_exists());
        }
        entries.insert(target, Entry::Dir);
        Ok(())
    }

    async fn remove_dir(&self, path: &str) -> BackendResult<()> {
        let target = normalize(&self.cwd.lock().unwrap(), path);
        let mut entries = self.fs.entries.lock().unwrap();
        match entries.remove(&target) {
            Some(Entry::Dir) => Ok(()),
            Some(other) => {
                entries.insert(target, other);
                Err(BackendError::other("not a directory"))
            }
            None => Err(BackendError::not_found()),
        }
    }

    async fn delete_file(&self, path: &str) -> BackendResult<()> {
        let target = normalize(&self.cwd.lock().unwrap(), path);
        let mut entries = self.fs.entries.lock().unwrap();
        match entries.remove(&target) {
            Some(Entry::File(_)) => Ok(()),
            Some(other) => {
                entries.insert(target, other);
                Err(BackendError::other("not a file"))
            }
            None => Err(BackendError::not_found()),
        }
    }

    async fn rename(&self, from: &str, to: &str) -> BackendResult<()> {
        let base = self.cwd.lock().unwrap().clone();
        let from = normalize(&base, from);
        let to = normalize(&base, to);
        let mut entries = self.fs.entries.lock().unwrap();
        let entry = entries.remove(&from).ok_or_else(BackendError::not_found)?;
        entries.insert(to, entry);
        Ok(())
    }

    async fn list_dir(&self, path: &str) -> BackendResult<Vec<FileInfo>> {
        let target = normalize(&self.cwd.lock().unwrap(), path);
        let prefix = if target == "/" { "/".to_string() } else { format!("{target}/") };
        let entries = self.fs.entries.lock().unwrap();
        let mut out = Vec::new();
        for (key, entry) in entries.iter() {
            let Some(rest) = key.strip_prefix(&prefix) else { continue };
            if rest.is_empty() || rest.contains('/') {
                continue;
            }
            out.push(match entry {
                Entry::Dir => FileInfo { name: rest.to_string(), size: 0, mode: 0o755, modified: SystemTime::now(), is_dir: true },
                Entry::File(record) => FileInfo {
                    name: rest.to_string(),
                    size: record.bytes.lock().unwrap().len() as u64,
                    mode: *record.mode.lock().unwrap(),
                    modified: *record.modified.lock().unwrap(),
                    is_dir: false,
                },
            });
        }
        Ok(out)
    }

    async fn open_file(&self, path: &str, flags: OpenFlags) -> BackendResult<Self::File> {
        let target = normalize(&self.cwd.lock().unwrap(), path);
        let mut entries = self.fs.entries.lock().unwrap();
        let record = match entries.get(&target) {
            Some(Entry::File(record)) => {
                if flags.truncate {
                    record.bytes.lock().unwrap().clear();
                }
                record.clone()
            }
            Some(Entry::Dir) => return Err(BackendError::other("is a directory")),
            None if flags.write && flags.create => {
                let record = Arc::new(FileRecord {
                    bytes: Arc::new(Mutex::new(Vec::new())),
                    mode: Mutex::new(0o644),
                    modified: Mutex::new(SystemTime::now()),
                });
                entries.insert(target, Entry::File(record.clone()));
                record
            }
            None => return Err(BackendError::not_found()),
        };
        let pos = if flags.append { record.bytes.lock().unwrap().len() } else { 0 };
        Ok(MemFile { bytes: record.bytes.clone(), pos })
    }

    async fn stat(&self, path: &str) -> BackendResult<FileInfo> {
        let target = normalize(&self.cwd.lock().unwrap(), path);
        let entries = self.fs.entries.lock().unwrap();
        let name = target.rsplit('/').next().unwrap_or("").to_string();
        match entries.get(&target) {
            Some(Entry::Dir) => Ok(FileInfo { name, size: 0, mode: 0o755, modified: SystemTime::now(), is_dir: true }),
            Some(Entry::File(record)) => Ok(FileInfo {
                name,
                size: record.bytes.lock().unwrap().len() as u64,
                mode: *record.mode.lock().unwrap(),
                modified: *record.modified.lock().unwrap(),
                is_dir: false,
            }),
            None => Err(BackendError::not_found()),
        }
    }

    async fn hash(&self, path: &str, algo: HashAlgorithm) -> BackendResult<String> {
        let target = normalize(&self.cwd.lock().unwrap(), path);
        let entries = self.fs.entries.lock().unwrap();
        match entries.get(&target) {
            Some(Entry::File(record)) => Ok(wharf::hash::hex_digest(algo, &record.bytes.lock().unwrap())),
            Some(Entry::Dir) => Err(BackendError::other("is a directory")),
            None => Err(BackendError::not_found()),
        }
    }

    async fn set_modified(&self, path: &str, when: SystemTime) -> BackendResult<()> {
        let target = normalize(&self.cwd.lock().unwrap(), path);
        let entries = self.fs.entries.lock().unwrap();
        match entries.get(&target) {
            Some(Entry::File(record)) => {
                *record.modified.lock().unwrap() = when;
                Ok(())
            }
            _ => Err(BackendError::not_found()),
        }
    }

    async fn chmod(&self, path: &str, mode: u32) -> BackendResult<()> {
        let target = normalize(&self.cwd.lock().unwrap(), path);
        let entries = self.fs.entries.lock().unwrap();
        match entries.get(&target) {
            Some(Entry::File(record)) => {
                *record.mode.lock().unwrap() = mode;
                Ok(())
            }
            _ => Err(BackendError::not_found()),
        }
    }

    async fn unique_name(&self) -> String {
        let n = self.fs.stou_counter.fetch_add(1, Ordering::SeqCst);
        format!("stou-{n}.bin")
    }
}

pub struct MemAuthenticator {
    username: String,
    password: String,
    fs: MemFs,
}

impl MemAuthenticator {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> (Self, MemFs) {
        let fs = MemFs::new();
        (Self { username: username.into(), password: password.into(), fs: fs.clone() }, fs)
    }
}

impl Authenticator for MemAuthenticator {
    type Session = MemBackend;

    async fn authenticate(&self, user: &str, pass: &str, _host: Option<&str>, _peer: std::net::IpAddr) -> BackendResult<Self::Session> {
        if user == self.username && pass == self.password {
            Ok(MemBackend { fs: self.fs.clone(), cwd: Mutex::new("/".to_string()) })
        } else {
            Err(BackendError::permission_denied())
        }
    }
}
