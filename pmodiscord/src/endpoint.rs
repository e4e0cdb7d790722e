//! Enumeration of the local sockets / named pipes Discord may listen on.

use std::fmt;
use std::io;
use std::path::PathBuf;

use tokio::io::{AsyncRead, AsyncWrite};

/// Highest pipe index Discord uses (`discord-ipc-0` .. `discord-ipc-9`).
pub const MAX_PIPE_NUMBER: u8 = 9;

/// Sub-paths tried under each base directory on Unix.
const UNIX_SUBPATHS: [&str; 4] = [
    "",
    "app/com.discordapp.Discord",
    ".flatpak/com.discordapp.Discord/xdg-run",
    "snap.discord",
];

pub trait IpcStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> IpcStream for T {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Unix(PathBuf),
    NamedPipe(String),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Unix(path) => write!(f, "{}", path.display()),
            Endpoint::NamedPipe(name) => f.write_str(name),
        }
    }
}

impl Endpoint {
    pub async fn open(&self) -> io::Result<Box<dyn IpcStream>> {
        match self {
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                let stream = tokio::net::UnixStream::connect(path).await?;
                Ok(Box::new(stream))
            }
            #[cfg(windows)]
            Endpoint::NamedPipe(name) => {
                let client = tokio::net::windows::named_pipe::ClientOptions::new().open(name)?;
                Ok(Box::new(client))
            }
            #[allow(unreachable_patterns)]
            other => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("endpoint {} is not supported on this platform", other),
            )),
        }
    }
}

/// Base directories searched for Unix sockets: runtime dir, then temp dirs.
///
/// Unset variables are skipped and duplicates removed, `/tmp` is the final fallback.
pub fn default_base_dirs() -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = Vec::new();
    let from_env = ["XDG_RUNTIME_DIR", "TMPDIR", "TMP", "TEMP"]
        .iter()
        .filter_map(|var| std::env::var_os(var))
        .filter(|v| !v.is_empty())
        .map(PathBuf::from);

    for dir in from_env.chain(std::iter::once(PathBuf::from("/tmp"))) {
        if !dirs.contains(&dir) {
            dirs.push(dir);
        }
    }
    dirs
}

/// Candidate endpoints, starting at `pipe_number` and going up to 9.
///
/// On Unix every index is tried under every base directory and sandbox
/// sub-path before moving to the next index.
pub fn candidates(pipe_number: u8, base_dirs: &[PathBuf]) -> Vec<Endpoint> {
    let start = pipe_number.min(MAX_PIPE_NUMBER);
    if cfg!(windows) {
        (start..=MAX_PIPE_NUMBER)
            .map(|n| Endpoint::NamedPipe(format!(r"\\?\pipe\discord-ipc-{}", n)))
            .collect()
    } else {
        let mut out = Vec::new();
        for n in start..=MAX_PIPE_NUMBER {
            for base in base_dirs {
                for sub in UNIX_SUBPATHS {
                    let dir = if sub.is_empty() { base.clone() } else { base.join(sub) };
                    out.push(Endpoint::Unix(dir.join(format!("discord-ipc-{}", n))));
                }
            }
        }
        out
    }
}
