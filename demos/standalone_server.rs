//! Minimal standalone FTP server demonstrating how a host application wires
//! up [`wharf::Authenticator`] and [`wharf::StorageBackend`].
//!
//! ```text
//! cargo run --example standalone-server -- --root /tmp/ftp-root --port 2121
//! ```
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::Context;
use clap::Parser;
use tokio::fs;
use tokio::net::TcpListener;

use wharf::{
    Authenticator, BackendError, BackendResult, BackendSettings, FileInfo, HashAlgorithm, OpenFlags,
    Server, StorageBackend,
};

#[derive(Parser)]
struct Args {
    /// Directory served as the FTP root.
    #[arg(long, default_value = "./ftp-root")]
    root: PathBuf,

    /// Address to bind the control listener on.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(long, default_value_t = 2121)]
    port: u16,

    #[arg(long, default_value = "anonymous")]
    username: String,

    #[arg(long, default_value = "")]
    password: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    fs::create_dir_all(&args.root).await.context("creating FTP root directory")?;
    let root = args.root.canonicalize().context("resolving FTP root directory")?;

    let authenticator = SingleUserAuthenticator { username: args.username, password: args.password, root };
    let server = Server::builder(authenticator).max_connections(64).welcome_message("wharf demo server ready.").build();

    let listener = TcpListener::bind((args.host.as_str(), args.port)).await.context("binding control listener")?;
    tracing::info!(addr = %listener.local_addr()?, "serving FTP");
    server.serve(listener).await?;
    Ok(())
}

/// Authenticates a single fixed username/password into a directory-jailed
/// view of `root`. Real deployments should hash passwords and look users up
/// from their own store; this demo exists only to show the trait shape.
struct SingleUserAuthenticator {
    username: String,
    password: String,
    root: PathBuf,
}

impl Authenticator for SingleUserAuthenticator {
    type Session = DirBackend;

    async fn authenticate(&self, user: &str, pass: &str, _host: Option<&str>, _peer: IpAddr) -> BackendResult<Self::Session> {
        if user == self.username && pass == self.password {
            Ok(DirBackend { root: self.root.clone(), cwd: tokio::sync::Mutex::new(PathBuf::from("/")) })
        } else {
            Err(BackendError::permission_denied())
        }
    }
}

struct DirBackend {
    root: PathBuf,
    cwd: tokio::sync::Mutex<PathBuf>,
}

impl DirBackend {
    /// Resolves a client-supplied path against the current directory and
    /// confines it to `root`, rejecting `..` escapes after canonicalization.
    async fn resolve(&self, path: &str) -> BackendResult<PathBuf> {
        let cwd = self.cwd.lock().await.clone();
        let joined = if path.starts_with('/') { PathBuf::from(path.trim_start_matches('/')) } else { cwd.join(path) };
        let absolute = self.root.join(joined.strip_prefix("/").unwrap_or(&joined));
        let parent = absolute.parent().unwrap_or(&self.root);
        let canonical_parent = fs::canonicalize(parent).await.map_err(|_| BackendError::not_found())?;
        if !canonical_parent.starts_with(&self.root) {
            return Err(BackendError::permission_denied());
        }
        Ok(absolute)
    }
}

impl StorageBackend for DirBackend {
    type File = fs::File;

    fn settings(&self) -> BackendSettings {
        BackendSettings::default()
    }

    fn is_seekable(&self, _file: &Self::File) -> bool {
        true
    }

    async fn seek(&self, file: &mut Self::File, offset: u64) -> BackendResult<()> {
        use tokio::io::AsyncSeekExt;
        file.seek(std::io::SeekFrom::Start(offset)).await.map_err(|e| BackendError::other(e.to_string()))?;
        Ok(())
    }

    async fn cwd(&self) -> String {
        self.cwd.lock().await.to_string_lossy().into_owned()
    }

    async fn change_dir(&self, path: &str) -> BackendResult<()> {
        let target = self.resolve(path).await?;
        let meta = fs::metadata(&target).await.map_err(|_| BackendError::not_found())?;
        if !meta.is_dir() {
            return Err(BackendError::other("not a directory"));
        }
        let relative = target.strip_prefix(&self.root).unwrap_or(Path::new("/"));
        *self.cwd.lock().await = PathBuf::from("/").join(relative);
        Ok(())
    }

    async fn make_dir(&self, path: &str) -> BackendResult<()> {
        let target = self.resolve(path).await?;
        fs::create_dir(&target).await.map_err(|_| BackendError::already_exists())
    }

    async fn remove_dir(&self, path: &str) -> BackendResult<()> {
        let target = self.resolve(path).await?;
        fs::remove_dir(&target).await.map_err(|_| BackendError::not_found())
    }

    async fn delete_file(&self, path: &str) -> BackendResult<()> {
        let target = self.resolve(path).await?;
        fs::remove_file(&target).await.map_err(|_| BackendError::not_found())
    }

    async fn rename(&self, from: &str, to: &str) -> BackendResult<()> {
        let from = self.resolve(from).await?;
        let to = self.resolve(to).await?;
        fs::rename(&from, &to).await.map_err(|e| BackendError::other(e.to_string()))
    }

    async fn list_dir(&self, path: &str) -> BackendResult<Vec<FileInfo>> {
        let target = self.resolve(path).await?;
        let mut read_dir = fs::read_dir(&target).await.map_err(|_| BackendError::not_found())?;
        let mut out = Vec::new();
        while let Some(entry) = read_dir.next_entry().await.map_err(|e| BackendError::other(e.to_string()))? {
            let meta = entry.metadata().await.map_err(|e| BackendError::other(e.to_string()))?;
            out.push(FileInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                size: meta.len(),
                mode: 0o644,
                modified: meta.modified().unwrap_or(SystemTime::now()),
                is_dir: meta.is_dir(),
            });
        }
        Ok(out)
    }

    async fn open_file(&self, path: &str, flags: OpenFlags) -> BackendResult<Self::File> {
        let target = self.resolve(path).await?;
        fs::OpenOptions::new()
            .read(true)
            .write(flags.write)
            .create(flags.create)
            .truncate(flags.truncate)
            .append(flags.append)
            .open(&target)
            .await
            .map_err(|_| BackendError::not_found())
    }

    async fn stat(&self, path: &str) -> BackendResult<FileInfo> {
        let target = self.resolve(path).await?;
        let meta = fs::metadata(&target).await.map_err(|_| BackendError::not_found())?;
        Ok(FileInfo {
            name: target.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
            size: meta.len(),
            mode: 0o644,
            modified: meta.modified().unwrap_or(SystemTime::now()),
            is_dir: meta.is_dir(),
        })
    }

    async fn hash(&self, path: &str, algo: HashAlgorithm) -> BackendResult<String> {
        let target = self.resolve(path).await?;
        let data = fs::read(&target).await.map_err(|_| BackendError::not_found())?;
        Ok(wharf::hash::hex_digest(algo, &data))
    }

    async fn set_modified(&self, path: &str, when: SystemTime) -> BackendResult<()> {
        let target = self.resolve(path).await?;
        let file = fs::OpenOptions::new().write(true).open(&target).await.map_err(|_| BackendError::not_found())?;
        file.set_modified(when).await.map_err(|e| BackendError::other(e.to_string()))
    }

    async fn chmod(&self, path: &str, mode: u32) -> BackendResult<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let target = self.resolve(path).await?;
            let perms = std::fs::Permissions::from_mode(mode);
            fs::set_permissions(&target, perms).await.map_err(|e| BackendError::other(e.to_string()))
        }
        #[cfg(not(unix))]
        {
            let _ = (path, mode);
            Err(BackendError::other("chmod is not supported on this platform"))
        }
    }

    async fn unique_name(&self) -> String {
        format!("upload-{}.bin", std::process::id())
    }
}
