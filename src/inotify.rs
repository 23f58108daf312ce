//! Native Linux change-notification source.

use std::ffi::{CString, OsString};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::error::{CollectorError, Result};
use crate::record::RecordDecoder;
use crate::watcher::CreationSource;

/// An inotify descriptor watching one directory for `IN_CREATE`.
///
/// The watch is removed and the descriptor closed on drop.
#[derive(Debug)]
pub struct InotifySource {
    fd: OwnedFd,
    watch: libc::c_int,
    path: PathBuf,
    buffer: Vec<u8>,
}

impl InotifySource {
    pub fn open(path: &Path, buffer_size: usize) -> Result<Self> {
        // SAFETY: takes only flags; the result is checked before use.
        let raw = unsafe { libc::inotify_init1(libc::IN_NONBLOCK | libc::IN_CLOEXEC) };
        if raw < 0 {
            return Err(CollectorError::SubscriptionUnavailable {
                source: io::Error::last_os_error(),
            });
        }
        // SAFETY: `raw` is a freshly created descriptor owned by nobody else.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| {
            CollectorError::WatchTargetUnavailable {
                path: path.to_path_buf(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "path contains a NUL byte"),
            }
        })?;

        // SAFETY: `fd` is a live inotify descriptor and `c_path` is a
        // NUL-terminated string that outlives the call.
        let watch =
            unsafe { libc::inotify_add_watch(fd.as_raw_fd(), c_path.as_ptr(), libc::IN_CREATE) };
        if watch < 0 {
            return Err(CollectorError::WatchTargetUnavailable {
                path: path.to_path_buf(),
                source: io::Error::last_os_error(),
            });
        }

        debug!("inotify watch {} registered on {}", watch, path.display());
        Ok(Self {
            fd,
            watch,
            path: path.to_path_buf(),
            buffer: vec![0; buffer_size],
        })
    }

    /// Read and decode until the descriptor would block.
    fn drain(&mut self, names: &mut Vec<OsString>) -> Result<()> {
        loop {
            // SAFETY: the pointer and length describe `self.buffer`, which is
            // exclusively borrowed for the duration of the call.
            let n = unsafe {
                libc::read(
                    self.fd.as_raw_fd(),
                    self.buffer.as_mut_ptr().cast::<libc::c_void>(),
                    self.buffer.len(),
                )
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                match err.kind() {
                    io::ErrorKind::WouldBlock => return Ok(()),
                    io::ErrorKind::Interrupted => continue,
                    _ => return Err(CollectorError::EventRead { source: err }),
                }
            }
            if n == 0 {
                return Ok(());
            }

            for record in RecordDecoder::new(&self.buffer[..n as usize]) {
                let record = record?;
                if record.is_create() {
                    names.push(record.name);
                }
            }
        }
    }
}

impl CreationSource for InotifySource {
    fn poll_created(&mut self, timeout: Duration) -> Result<Vec<OsString>> {
        let mut pfd = libc::pollfd {
            fd: self.fd.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;

        // SAFETY: `pfd` is a single valid pollfd, matching the count of 1.
        let ready = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if ready < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Err(CollectorError::Interrupted);
            }
            return Err(CollectorError::EventRead { source: err });
        }

        let mut names = Vec::new();
        if ready > 0 && pfd.revents & libc::POLLIN != 0 {
            self.drain(&mut names)?;
        }
        Ok(names)
    }
}

impl Drop for InotifySource {
    fn drop(&mut self) {
        // SAFETY: `fd` is still open here; it is closed after this body runs.
        let removed = unsafe { libc::inotify_rm_watch(self.fd.as_raw_fd(), self.watch) };
        if removed < 0 {
            debug!(
                "inotify watch on {} already gone: {}",
                self.path.display(),
                io::Error::last_os_error()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_reports_created_names() {
        let dir = TempDir::new().unwrap();
        let mut source = InotifySource::open(dir.path(), 4096).unwrap();

        std::fs::write(dir.path().join("first"), b"1").unwrap();
        std::fs::create_dir(dir.path().join("second")).unwrap();

        let mut names = Vec::new();
        for _ in 0..20 {
            names.extend(source.poll_created(Duration::from_millis(50)).unwrap());
            if names.len() >= 2 {
                break;
            }
        }
        assert_eq!(names, vec![OsString::from("first"), OsString::from("second")]);
    }

    #[test]
    fn test_ignores_modification() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("existing");
        std::fs::write(&file, b"1").unwrap();

        let mut source = InotifySource::open(dir.path(), 4096).unwrap();
        std::fs::write(&file, b"22").unwrap();
        std::fs::remove_file(&file).unwrap();

        let names = source.poll_created(Duration::from_millis(100)).unwrap();
        assert!(names.is_empty());
    }

    #[test]
    fn test_missing_target_is_fatal_at_init() {
        let dir = TempDir::new().unwrap();
        let err = InotifySource::open(&dir.path().join("missing"), 4096).unwrap_err();
        assert!(matches!(err, CollectorError::WatchTargetUnavailable { .. }));
        assert_eq!(err.kind(), crate::error::ErrorKind::FatalAtInit);
    }

    #[test]
    fn test_drop_releases_descriptor() {
        // More iterations than the default per-user instance limit (128).
        let dir = TempDir::new().unwrap();
        for _ in 0..300 {
            let source = InotifySource::open(dir.path(), 4096).unwrap();
            drop(source);
        }
    }

    #[test]
    fn test_timeout_without_events() {
        let dir = TempDir::new().unwrap();
        let mut source = InotifySource::open(dir.path(), 4096).unwrap();
        let names = source.poll_created(Duration::from_millis(10)).unwrap();
        assert!(names.is_empty());
    }
}
