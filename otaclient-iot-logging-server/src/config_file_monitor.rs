//! The config-file change monitor. Its sole contract is
//! "signal the process to exit on change" — it never mutates core state
//! directly.

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::time::Duration;

const CHECK_INTERVAL: Duration = Duration::from_secs(3);

fn digest_file(path: &PathBuf) -> Option<[u8; 32]> {
    let bytes = std::fs::read(path).ok()?;
    Some(Sha256::digest(bytes).into())
}

/// Spawns a daemon-style background thread that recomputes a digest of
/// each monitored path every 3 seconds. On first observation the digest is
/// just recorded; any subsequent mismatch logs a warning and sends
/// `SIGINT` to the current process — `sys::exit`-equivalents don't work
/// from a non-main thread, so the signal approach forces an external
/// restart instead.
pub fn spawn(monitored_paths: Vec<PathBuf>) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("config-file-monitor".to_string())
        .spawn(move || run(monitored_paths))
        .expect("failed to spawn config-file monitor thread")
}

fn run(monitored_paths: Vec<PathBuf>) {
    let mut known: Vec<(PathBuf, Option<[u8; 32]>)> = monitored_paths
        .into_iter()
        .map(|path| {
            let digest = digest_file(&path);
            (path, digest)
        })
        .collect();

    loop {
        std::thread::sleep(CHECK_INTERVAL);

        for (path, last_digest) in known.iter_mut() {
            let current = digest_file(path);
            if current != *last_digest {
                tracing::warn!(path = %path.display(), "monitored config file changed, requesting restart");
                *last_digest = current;
                signal_self_sigint();
            }
        }
    }
}

fn signal_self_sigint() {
    if let Err(err) = signal::kill(Pid::this(), Signal::SIGINT) {
        tracing::warn!(?err, "failed to signal self for config-file restart");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn digest_changes_when_file_contents_change() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "version-1").unwrap();
        let path = file.path().to_path_buf();

        let first = digest_file(&path);
        write!(file, "version-2").unwrap();
        let second = digest_file(&path);

        assert_ne!(first, second);
    }

    #[test]
    fn missing_file_has_no_digest() {
        assert!(digest_file(&PathBuf::from("/nonexistent/path")).is_none());
    }
}
