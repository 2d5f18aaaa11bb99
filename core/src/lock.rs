use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub hostname: String,
    pub acquired_at: DateTime<Utc>,
    /// Unique per acquisition; a guard only removes a file carrying its own token.
    #[serde(default)]
    pub token: String,
}

/// Advisory lock allowing one backup or restore per database at a time.
///
/// The lock is a file created with `create_new`, so it also excludes other
/// processes sharing the work directory. It is released when dropped.
///
/// A lock written on this host is taken over only once its process has
/// exited, however long the run takes. A lock from another host, or one that
/// can't be read, is taken over once it is older than `stale_after`.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    token: String,
}

impl RunLock {
    pub fn acquire(dir: &Path, database: &str, stale_after: Duration) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!(".{}.lock", sanitize(database)));

        match Self::create(&path) {
            Ok(lock) => Ok(lock),
            Err(Error::Io(e)) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = read_info(&path);

                if holder_is_gone(holder.as_ref(), &path, stale_after) {
                    warn!("Reclaiming stale run lock {} held by {:?}", path.display(), holder);
                    std::fs::remove_file(&path)?;
                    return Self::create(&path);
                }

                Err(Error::LockConflict(match holder {
                    Some(info) => format!(
                        "database '{}' is locked by pid {} on {} since {}",
                        database, info.pid, info.hostname, info.acquired_at
                    ),
                    None => format!("database '{}' is locked ({})", database, path.display()),
                }))
            }
            Err(e) => Err(e),
        }
    }

    fn create(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        let info = LockInfo {
            pid: std::process::id(),
            hostname: local_hostname(),
            acquired_at: Utc::now(),
            token: new_token(),
        };
        file.write_all(serde_json::to_string(&info)?.as_bytes())?;
        debug!("Acquired run lock {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            token: info.token,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        match read_info(&self.path) {
            Some(info) if info.token == self.token => {}
            _ => {
                warn!("Run lock {} was taken over, leaving it in place", self.path.display());
                return;
            }
        }

        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to release run lock {}: {}", self.path.display(), e);
        } else {
            debug!("Released run lock {}", self.path.display());
        }
    }
}

fn read_info(path: &Path) -> Option<LockInfo> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
}

fn holder_is_gone(holder: Option<&LockInfo>, path: &Path, stale_after: Duration) -> bool {
    match holder {
        Some(info) if sysinfo::IS_SUPPORTED_SYSTEM && info.hostname == local_hostname() => {
            !process_alive(info.pid)
        }
        _ => is_older_than(path, stale_after),
    }
}

fn process_alive(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).is_some()
}

fn is_older_than(path: &Path, stale_after: Duration) -> bool {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|age| age > stale_after)
}

fn local_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

fn new_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);
    const BRIEF: Duration = Duration::from_millis(1);

    /// Well above any kernel's pid limit, so never a running process.
    const DEAD_PID: u32 = 0x3fff_fff0;

    fn write_holder(dir: &Path, database: &str, pid: u32, hostname: &str) -> PathBuf {
        let path = dir.join(format!(".{}.lock", database));
        let info = LockInfo {
            pid,
            hostname: hostname.to_string(),
            acquired_at: Utc::now(),
            token: "other-run".to_string(),
        };
        std::fs::write(&path, serde_json::to_string(&info).unwrap()).unwrap();
        path
    }

    #[test]
    fn test_second_acquire_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let first = RunLock::acquire(dir.path(), "app", HOUR).unwrap();
        assert!(first.path().exists());

        let second = RunLock::acquire(dir.path(), "app", HOUR);
        match second {
            Err(Error::LockConflict(msg)) => assert!(msg.contains("app")),
            other => panic!("expected lock conflict, got {:?}", other),
        }

        // Different databases don't contend.
        let _other = RunLock::acquire(dir.path(), "analytics", HOUR).unwrap();
    }

    #[test]
    fn test_drop_releases() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let lock = RunLock::acquire(dir.path(), "app", HOUR).unwrap();
            lock.path().to_path_buf()
        };
        assert!(!path.exists());
        let _again = RunLock::acquire(dir.path(), "app", HOUR).unwrap();
    }

    #[test]
    fn test_live_holder_outlasts_stale_age() {
        let dir = tempfile::tempdir().unwrap();
        let running = RunLock::acquire(dir.path(), "app", HOUR).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let next = RunLock::acquire(dir.path(), "app", BRIEF);
        assert!(matches!(next, Err(Error::LockConflict(_))));

        drop(running);
        let _next = RunLock::acquire(dir.path(), "app", BRIEF).unwrap();
    }

    #[test]
    fn test_dead_local_holder_is_reclaimed_immediately() {
        let dir = tempfile::tempdir().unwrap();
        write_holder(dir.path(), "app", DEAD_PID, &local_hostname());

        let reclaimed = RunLock::acquire(dir.path(), "app", HOUR).unwrap();
        let info = read_info(reclaimed.path()).unwrap();
        assert_eq!(info.pid, std::process::id());
    }

    #[test]
    fn test_remote_holder_is_reclaimed_by_age() {
        let dir = tempfile::tempdir().unwrap();
        write_holder(dir.path(), "app", std::process::id(), "some-other-host");

        assert!(matches!(
            RunLock::acquire(dir.path(), "app", HOUR),
            Err(Error::LockConflict(_))
        ));

        std::thread::sleep(Duration::from_millis(20));
        let _reclaimed = RunLock::acquire(dir.path(), "app", BRIEF).unwrap();
    }

    #[test]
    fn test_drop_leaves_lock_taken_over_by_another_run() {
        let dir = tempfile::tempdir().unwrap();
        let original = RunLock::acquire(dir.path(), "app", HOUR).unwrap();
        let path = write_holder(dir.path(), "app", std::process::id(), &local_hostname());

        drop(original);
        assert!(path.exists());
        assert!(matches!(
            RunLock::acquire(dir.path(), "app", HOUR),
            Err(Error::LockConflict(_))
        ));
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("my db/../x"), "my_db____x");
    }
}
