use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, error, info};

use crate::config::WatchBackend;
use crate::error::{CollectorError, ErrorKind, Result};
use crate::events::{CollectionEvent, EventSink};
use crate::filter::NameFilter;
use crate::queue::WorkQueue;
use crate::shutdown::{ShutdownReason, ShutdownSignal};

/// A subscription to creation events in one directory.
pub trait CreationSource: Send {
    /// Wait up to `timeout` for notifications and return the names of
    /// entries created since the last call, in delivery order.
    ///
    /// [`CollectorError::Interrupted`] means the wait should simply be
    /// retried.
    fn poll_created(&mut self, timeout: Duration) -> Result<Vec<OsString>>;
}

/// Creation events delivered through the `notify` crate.
pub struct NotifySource {
    _watcher: RecommendedWatcher,
    event_rx: Receiver<notify::Result<Event>>,
}

impl NotifySource {
    pub fn open(path: &Path) -> Result<Self> {
        let (tx, event_rx) = mpsc::channel::<notify::Result<Event>>();

        let mut watcher = notify::recommended_watcher(tx).map_err(|err| {
            CollectorError::SubscriptionUnavailable {
                source: io::Error::new(io::ErrorKind::Other, err),
            }
        })?;

        watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|err| CollectorError::WatchTargetUnavailable {
                path: path.to_path_buf(),
                source: io::Error::new(io::ErrorKind::Other, err),
            })?;

        Ok(Self {
            _watcher: watcher,
            event_rx,
        })
    }
}

impl CreationSource for NotifySource {
    fn poll_created(&mut self, timeout: Duration) -> Result<Vec<OsString>> {
        let first = match self.event_rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => return Ok(Vec::new()),
            Err(RecvTimeoutError::Disconnected) => {
                return Err(CollectorError::EventRead {
                    source: io::Error::new(io::ErrorKind::BrokenPipe, "notify channel closed"),
                })
            }
        };

        let mut names = Vec::new();
        for result in std::iter::once(first).chain(self.event_rx.try_iter()) {
            let event = result?;
            if !matches!(event.kind, EventKind::Create(_)) {
                continue;
            }
            names.extend(
                event
                    .paths
                    .iter()
                    .filter_map(|path| path.file_name().map(|name| name.to_os_string())),
            );
        }
        Ok(names)
    }
}

/// Open a creation subscription on `path` with the requested backend.
pub fn open_source(
    backend: WatchBackend,
    path: &Path,
    read_buffer_size: usize,
) -> Result<Box<dyn CreationSource>> {
    match backend {
        #[cfg(target_os = "linux")]
        WatchBackend::Auto | WatchBackend::Inotify => Ok(Box::new(
            crate::inotify::InotifySource::open(path, read_buffer_size)?,
        )),
        #[cfg(not(target_os = "linux"))]
        WatchBackend::Inotify => {
            let _ = read_buffer_size;
            Err(CollectorError::Config(
                "the inotify backend is only available on Linux".to_string(),
            ))
        }
        #[cfg(not(target_os = "linux"))]
        WatchBackend::Auto => Ok(Box::new(NotifySource::open(path)?)),
        WatchBackend::Notify => Ok(Box::new(NotifySource::open(path)?)),
    }
}

/// Producer half of the pipeline: turns creation notifications for
/// matching names into queued trigger paths.
pub struct EventWatcher {
    source: Box<dyn CreationSource>,
    input_path: PathBuf,
    filter: NameFilter,
    queue: Arc<WorkQueue<PathBuf>>,
    shutdown: ShutdownSignal,
    poll_timeout: Duration,
    sink: EventSink,
}

impl EventWatcher {
    pub fn new(
        source: Box<dyn CreationSource>,
        input_path: PathBuf,
        filter: NameFilter,
        queue: Arc<WorkQueue<PathBuf>>,
        shutdown: ShutdownSignal,
        poll_timeout: Duration,
        sink: EventSink,
    ) -> Self {
        Self {
            source,
            input_path,
            filter,
            queue,
            shutdown,
            poll_timeout,
            sink,
        }
    }

    /// Queue `input_path/name` if `name` matches. Returns whether it did.
    pub fn handle_created(&self, name: &OsString) -> bool {
        if !self.filter.matches(name) {
            debug!("Ignoring created entry {:?}", name);
            return false;
        }

        let trigger = self.input_path.join(name);
        info!("New matching file/directory {:?} created", name);
        self.sink.emit(CollectionEvent::matched(trigger.clone()));
        self.queue.push(trigger);
        true
    }

    /// Run until shutdown is requested or the subscription fails.
    ///
    /// A failure requests shutdown for the whole pipeline before returning.
    pub fn run(mut self) -> Result<()> {
        info!("Start monitoring {}", self.input_path.display());

        let outcome = loop {
            if self.shutdown.is_requested() {
                break Ok(());
            }
            match self.source.poll_created(self.poll_timeout) {
                Ok(names) => {
                    for name in &names {
                        self.handle_created(name);
                    }
                }
                Err(err) if err.kind() == ErrorKind::Transient => continue,
                Err(err) => break Err(err),
            }
        };

        if let Err(err) = &outcome {
            error!("Error while watching {}: {}", self.input_path.display(), err);
            self.shutdown
                .request(ShutdownReason::WatcherFailed(err.to_string()));
        }

        info!("Stop monitoring {}", self.input_path.display());
        drop(self.source);
        info!("Monitor thread finished");
        outcome
    }
}
