//! The staleness oracle. Every output that is derived from a single source
//! file goes through [`Syncer::copy`] or [`Syncer::write`], which decide
//! between skipping, creating, and updating the destination in one place.
//! Generated outputs without a source file (listings, the home page, the
//! feed) go through [`Syncer::publish`].

use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::Path;
use std::time::SystemTime;
use tracing::{info, warn};

/// The canonical timestamp format stored in the cache and in front matter.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Formats a [`SystemTime`] as a canonical UTC timestamp.
pub fn timestamp(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).format(TIMESTAMP_FORMAT).to_string()
}

/// Returns the current time as a canonical timestamp.
pub fn now() -> String {
    timestamp(SystemTime::now())
}

/// Returns the modification time of `path`.
pub fn mtime(path: &Path) -> io::Result<SystemTime> {
    fs::metadata(path)?.modified()
}

/// The outcome of a sync operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Synced {
    /// Nothing was written: the source is missing or the destination is
    /// already up to date.
    Unchanged,

    /// The destination didn't exist and was created. Holds the source's
    /// modification timestamp.
    Created(String),

    /// An older destination was overwritten. Holds the source's
    /// modification timestamp.
    Updated(String),
}

impl Synced {
    /// The source timestamp, unless nothing changed.
    pub fn timestamp(&self) -> Option<&str> {
        match self {
            Synced::Unchanged => None,
            Synced::Created(ts) | Synced::Updated(ts) => Some(ts),
        }
    }

    /// Whether an existing destination was overwritten.
    pub fn is_update(&self) -> bool {
        matches!(self, Synced::Updated(_))
    }
}

/// Decides whether destinations are stale and brings them up to date. With
/// `rebuild` set every existing destination counts as stale.
#[derive(Clone, Copy, Debug, Default)]
pub struct Syncer {
    pub rebuild: bool,
}

/// What to do with a destination, as decided by [`Syncer::check`].
enum Action {
    Skip,
    Create(String),
    Update(String),
}

impl Syncer {
    pub fn new(rebuild: bool) -> Syncer {
        Syncer { rebuild }
    }

    fn check(&self, label: &str, src: &Path, dst: &Path) -> io::Result<Action> {
        let src_mtime = match fs::metadata(src) {
            Ok(meta) if meta.is_file() => meta.modified()?,
            Ok(_) => {
                warn!("not a regular file: {} ({})", label, src.display());
                return Ok(Action::Skip);
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!("missing source: {} ({})", label, src.display());
                return Ok(Action::Skip);
            }
            Err(err) => return Err(err),
        };

        match fs::metadata(dst) {
            Ok(meta) => {
                if self.rebuild || src_mtime > meta.modified()? {
                    Ok(Action::Update(timestamp(src_mtime)))
                } else {
                    Ok(Action::Skip)
                }
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Ok(Action::Create(timestamp(src_mtime)))
            }
            Err(err) => Err(err),
        }
    }

    /// Copies `src` to `dst` if `dst` is missing or older than `src`.
    pub fn copy(&self, label: &str, src: &Path, dst: &Path) -> io::Result<Synced> {
        let synced = match self.check(label, src, dst)? {
            Action::Skip => return Ok(Synced::Unchanged),
            Action::Create(ts) => {
                info!("copy: {}", label);
                Synced::Created(ts)
            }
            Action::Update(ts) => {
                info!("update: {}", label);
                Synced::Updated(ts)
            }
        };
        create_parent(dst)?;
        fs::copy(src, dst)?;
        Ok(synced)
    }

    /// Writes `content` to `dst` if `dst` is missing or older than `src`.
    pub fn write(&self, label: &str, content: &[u8], src: &Path, dst: &Path) -> io::Result<Synced> {
        let synced = match self.check(label, src, dst)? {
            Action::Skip => return Ok(Synced::Unchanged),
            Action::Create(ts) => {
                info!("create: {}", label);
                Synced::Created(ts)
            }
            Action::Update(ts) => {
                info!("update: {}", label);
                Synced::Updated(ts)
            }
        };
        create_parent(dst)?;
        fs::write(dst, content)?;
        Ok(synced)
    }

    /// Unconditionally writes a generated output that has no single source
    /// file. Returns `true` if an existing file was overwritten.
    pub fn publish(&self, label: &str, content: &[u8], dst: &Path) -> io::Result<bool> {
        let existed = dst.is_file();
        if existed {
            info!("update: {}", label);
        } else {
            info!("create: {}", label);
        }
        create_parent(dst)?;
        fs::write(dst, content)?;
        Ok(existed)
    }
}

fn create_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => fs::create_dir_all(dir),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use filetime::{set_file_mtime, FileTime};
    use tempfile::TempDir;

    fn set_mtime(path: &Path, secs: i64) {
        set_file_mtime(path, FileTime::from_unix_time(secs, 0)).unwrap();
    }

    #[test]
    fn test_timestamp_format() {
        let t = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(86_400 + 61);
        assert_eq!("1970-01-02T00:01:01Z", timestamp(t));
    }

    #[test]
    fn test_missing_source_is_unchanged() -> io::Result<()> {
        let dir = TempDir::new()?;
        let dst = dir.path().join("out/a.txt");
        let synced = Syncer::new(false).copy("a", &dir.path().join("nope"), &dst)?;
        assert_eq!(Synced::Unchanged, synced);
        assert!(!dst.exists());
        Ok(())
    }

    #[test]
    fn test_directory_source_is_unchanged() -> io::Result<()> {
        let dir = TempDir::new()?;
        let synced = Syncer::new(true).copy("d", dir.path(), &dir.path().join("x"))?;
        assert_eq!(Synced::Unchanged, synced);
        Ok(())
    }

    #[test]
    fn test_copy_creates_then_skips() -> io::Result<()> {
        let dir = TempDir::new()?;
        let src = dir.path().join("src.txt");
        let dst = dir.path().join("deep/nested/dst.txt");
        fs::write(&src, "hello")?;
        set_mtime(&src, 1_000_000);

        let syncer = Syncer::new(false);
        let first = syncer.copy("src", &src, &dst)?;
        assert_eq!(Synced::Created(timestamp(mtime(&src)?)), first);
        assert_eq!("hello", fs::read_to_string(&dst)?);

        for _ in 0..3 {
            assert_eq!(Synced::Unchanged, syncer.copy("src", &src, &dst)?);
        }
        Ok(())
    }

    #[test]
    fn test_write_updates_older_destination() -> io::Result<()> {
        let dir = TempDir::new()?;
        let src = dir.path().join("doc.md");
        let dst = dir.path().join("doc.html");
        fs::write(&src, "source")?;
        fs::write(&dst, "old")?;
        set_mtime(&dst, 1_000_000);
        set_mtime(&src, 2_000_000);

        let synced = Syncer::new(false).write("doc", b"new", &src, &dst)?;
        assert!(synced.is_update());
        assert_eq!("new", fs::read_to_string(&dst)?);
        Ok(())
    }

    #[test]
    fn test_equal_mtimes_skip() -> io::Result<()> {
        let dir = TempDir::new()?;
        let src = dir.path().join("doc.md");
        let dst = dir.path().join("doc.html");
        fs::write(&src, "source")?;
        fs::write(&dst, "old")?;
        set_mtime(&dst, 1_000_000);
        set_mtime(&src, 1_000_000);

        assert_eq!(Synced::Unchanged, Syncer::new(false).write("doc", b"new", &src, &dst)?);
        assert_eq!("old", fs::read_to_string(&dst)?);
        Ok(())
    }

    #[test]
    fn test_rebuild_forces_update() -> io::Result<()> {
        let dir = TempDir::new()?;
        let src = dir.path().join("doc.md");
        let dst = dir.path().join("doc.html");
        fs::write(&src, "source")?;
        fs::write(&dst, "old")?;
        set_mtime(&src, 1_000_000);
        set_mtime(&dst, 2_000_000);

        let synced = Syncer::new(true).write("doc", b"new", &src, &dst)?;
        assert_eq!(Synced::Updated(timestamp(mtime(&src)?)), synced);
        assert_eq!("new", fs::read_to_string(&dst)?);
        Ok(())
    }

    #[test]
    fn test_publish_reports_existing() -> io::Result<()> {
        let dir = TempDir::new()?;
        let dst = dir.path().join("a/index.html");
        let syncer = Syncer::default();
        assert!(!syncer.publish("a", b"1", &dst)?);
        assert!(syncer.publish("a", b"2", &dst)?);
        assert_eq!("2", fs::read_to_string(&dst)?);
        Ok(())
    }
}
