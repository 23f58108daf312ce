//! Top-level entity tying the watcher, the aggregator and the stop
//! protocol together.
//!
//! ```text
//!  OS ──► EventWatcher ──► WorkQueue ──► Aggregator ──► du / tar ──► archive
//!              ▲                              ▲
//!              └──────── ShutdownSignal ──────┘
//!                              ▲
//!                 run_until_quit (control input)
//! ```
//!
//! Shutdown is strictly cooperative. The watcher notices a stop request
//! after its current bounded wait; the aggregator once it has collected
//! every trigger already queued, so accepted work is never dropped.

use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{error, info, warn};

use crate::aggregator::Aggregator;
use crate::config::CollectorConfig;
use crate::error::{CollectorError, Result};
use crate::events::EventSink;
use crate::filter::NameFilter;
use crate::queue::WorkQueue;
use crate::shutdown::{ShutdownReason, ShutdownSignal};
use crate::watcher::{open_source, EventWatcher};

/// Line that stops a run started with [`Collector::run_until_quit`].
pub const QUIT_TOKEN: &str = "q";

pub struct Collector {
    config: CollectorConfig,
    filter: NameFilter,
    queue: Arc<WorkQueue<PathBuf>>,
    shutdown: ShutdownSignal,
    sink: EventSink,
    watcher: Option<JoinHandle<Result<()>>>,
    aggregator: Option<JoinHandle<()>>,
}

impl Collector {
    /// Validate `config` and prepare a collector. Nothing runs until
    /// [`Collector::start`].
    ///
    /// Input and output paths are made absolute, so queued triggers and
    /// reported archives never depend on the working directory.
    pub fn new(mut config: CollectorConfig) -> Result<Self> {
        config.validate()?;
        config.input_path = std::fs::canonicalize(&config.input_path)?;
        config.output_path = absolute_path(&config.output_path)?;
        let filter = config.name_filter()?;
        let sink = EventSink::new(config.output);

        Ok(Self {
            config,
            filter,
            queue: Arc::new(WorkQueue::new()),
            shutdown: ShutdownSignal::new(),
            sink,
            watcher: None,
            aggregator: None,
        })
    }

    pub fn with_sink(mut self, sink: EventSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Number of triggers waiting for the aggregator.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn is_running(&self) -> bool {
        self.watcher.is_some() && !self.shutdown.is_requested()
    }

    /// Subscribe to the input directory and spawn both workers.
    ///
    /// The subscription is opened on the calling thread, so an unusable
    /// input directory fails here instead of leaving an idle pipeline.
    pub fn start(&mut self) -> Result<()> {
        if self.watcher.is_some() {
            return Err(CollectorError::Config("collector already started".to_string()));
        }
        if self.shutdown.is_requested() {
            return Err(CollectorError::Config("collector has been stopped".to_string()));
        }

        let source = open_source(
            self.config.watcher.backend,
            &self.config.input_path,
            self.config.watcher.read_buffer_size,
        )?;

        let watcher = EventWatcher::new(
            source,
            self.config.input_path.clone(),
            self.filter.clone(),
            Arc::clone(&self.queue),
            self.shutdown.clone(),
            self.config.watcher.poll_timeout(),
            self.sink.clone(),
        );
        let aggregator = Aggregator::new(
            Arc::clone(&self.queue),
            self.shutdown.clone(),
            self.config.output_path.clone(),
            self.config.selection,
            self.config.aggregator.clone(),
            self.sink.clone(),
        );

        let watcher_handle = thread::Builder::new()
            .name("corecollect-watcher".to_owned())
            .spawn(move || watcher.run())?;
        self.watcher = Some(watcher_handle);

        let aggregator_handle = thread::Builder::new()
            .name("corecollect-aggregator".to_owned())
            .spawn(move || aggregator.run());
        match aggregator_handle {
            Ok(handle) => self.aggregator = Some(handle),
            Err(err) => {
                // Tear down the watcher we already spawned; the spawn error wins.
                if let Err(stop_err) = self.stop() {
                    warn!("Failed to stop watcher after spawn failure: {}", stop_err);
                }
                return Err(err.into());
            }
        }

        info!("Worker threads started");
        Ok(())
    }

    /// Request shutdown and join both workers.
    ///
    /// The watcher is joined before the queue is closed, so every trigger it
    /// accepted is still collected before the aggregator exits. Returns the
    /// watcher's error if it stopped because of one.
    pub fn stop(&mut self) -> Result<()> {
        self.shutdown.request(ShutdownReason::UserRequest);

        if self.watcher.is_none() && self.aggregator.is_none() {
            self.queue.close();
            return Ok(());
        }
        info!("Stopping worker threads");

        let watcher = self.watcher.take().map(JoinHandle::join);
        self.queue.close();
        let aggregator = self.aggregator.take().map(JoinHandle::join);

        if let Some(Err(_)) = aggregator {
            return Err(CollectorError::WorkerPanicked("aggregator"));
        }
        match watcher {
            Some(Ok(outcome)) => outcome,
            Some(Err(_)) => Err(CollectorError::WorkerPanicked("watcher")),
            None => Ok(()),
        }
    }

    /// Block until something requests shutdown, then stop.
    pub fn wait(&mut self) -> Result<()> {
        let poll = self.config.control_poll();
        while !self.shutdown.wait_timeout(poll) {}
        self.stop()
    }

    /// Run the pipeline until [`QUIT_TOKEN`] is read from `input`, the input
    /// ends or fails, or another party requests shutdown. Starts the workers
    /// first if needed.
    pub fn run_until_quit<R>(&mut self, input: R) -> Result<()>
    where
        R: BufRead + Send + 'static,
    {
        if self.watcher.is_none() {
            self.start()?;
        }
        info!("Please type <{}> and press <RETURN> to stop the program and quit.", QUIT_TOKEN);

        let lines = spawn_input_reader(input)?;
        let poll = self.config.control_poll();
        let mut console_error = None;

        while !self.shutdown.is_requested() {
            match lines.recv_timeout(poll) {
                Ok(Ok(line)) => {
                    if line.trim() == QUIT_TOKEN {
                        self.shutdown.request(ShutdownReason::QuitToken);
                    }
                }
                Ok(Err(source)) => {
                    error!("Error while reading control input: {}", source);
                    self.shutdown
                        .request(ShutdownReason::ConsoleClosed(source.to_string()));
                    console_error = Some(CollectorError::Console { source });
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    info!("Control input closed");
                    self.shutdown
                        .request(ShutdownReason::ConsoleClosed("end of input".to_string()));
                }
            }
        }

        let stopped = self.stop();
        match console_error {
            Some(err) => stopped.and(Err(err)),
            None => stopped,
        }
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        if self.watcher.is_some() || self.aggregator.is_some() {
            if let Err(err) = self.stop() {
                warn!("Collector stopped with error: {}", err);
            }
        }
    }
}

/// Canonical form of `path`, or `path` resolved against the working
/// directory if it does not exist yet.
fn absolute_path(path: &Path) -> Result<PathBuf> {
    match std::fs::canonicalize(path) {
        Ok(resolved) => Ok(resolved),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            if path.is_absolute() {
                Ok(path.to_path_buf())
            } else {
                Ok(std::env::current_dir()?.join(path))
            }
        }
        Err(err) => Err(err.into()),
    }
}

/// Forward lines from `input` on a detached thread, so the controller can
/// wait on them with a timeout.
fn spawn_input_reader<R>(input: R) -> Result<Receiver<io::Result<String>>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("corecollect-control".to_owned())
        .spawn(move || {
            for line in input.lines() {
                let failed = line.is_err();
                if tx.send(line).is_err() || failed {
                    break;
                }
            }
        })?;
    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OutputFormat, SelectionMode};
    use std::io::Cursor;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn quiet_config(dir: &TempDir) -> CollectorConfig {
        let input = dir.path().join("in");
        let output = dir.path().join("out");
        std::fs::create_dir_all(&input).unwrap();
        std::fs::create_dir_all(&output).unwrap();
        let mut config = CollectorConfig::new(input, output, SelectionMode::FilesOnly);
        config.output = OutputFormat::Quiet;
        config
    }

    #[test]
    fn test_quit_token_stops_idle_pipeline() {
        let dir = TempDir::new().unwrap();
        let mut collector = Collector::new(quiet_config(&dir)).unwrap();

        let start = Instant::now();
        collector
            .run_until_quit(Cursor::new("status\nq\n"))
            .unwrap();

        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(!collector.is_running());
        assert_eq!(
            collector.shutdown_signal().reason(),
            Some(ShutdownReason::QuitToken)
        );
    }

    #[test]
    fn test_end_of_input_stops() {
        let dir = TempDir::new().unwrap();
        let mut collector = Collector::new(quiet_config(&dir)).unwrap();

        collector.run_until_quit(Cursor::new("")).unwrap();
        assert!(matches!(
            collector.shutdown_signal().reason(),
            Some(ShutdownReason::ConsoleClosed(_))
        ));
    }

    #[test]
    fn test_external_request_stops_wait() {
        let dir = TempDir::new().unwrap();
        let mut collector = Collector::new(quiet_config(&dir)).unwrap();
        collector.start().unwrap();

        let signal = collector.shutdown_signal();
        let trigger = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            signal.request(ShutdownReason::Interrupt);
        });

        collector.wait().unwrap();
        trigger.join().unwrap();
        assert!(!collector.is_running());
    }

    #[test]
    fn test_paths_are_made_absolute() {
        let dir = TempDir::new().unwrap();
        let mut config = quiet_config(&dir);
        config.input_path = dir.path().join("in").join("..").join("in");
        config.output_path = PathBuf::from("relative-out");

        let collector = Collector::new(config).unwrap();
        assert_eq!(
            collector.config().input_path,
            std::fs::canonicalize(dir.path().join("in")).unwrap()
        );
        assert!(collector.config().output_path.is_absolute());
        assert!(collector.config().output_path.ends_with("relative-out"));
    }

    #[test]
    fn test_cannot_start_twice() {
        let dir = TempDir::new().unwrap();
        let mut collector = Collector::new(quiet_config(&dir)).unwrap();
        collector.start().unwrap();
        assert!(collector.start().is_err());
        collector.stop().unwrap();
        assert!(collector.start().is_err());
    }
}
