use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::collect::{
    archive_path, collect_disk_usage, collect_files, remove_temporaries, store_files, FileSet,
};
use crate::config::{AggregatorConfig, SelectionMode};
use crate::error::{CollectorError, Result};
use crate::events::{CollectionEvent, EventSink};
use crate::queue::WorkQueue;
use crate::shutdown::ShutdownSignal;

/// Consumer half of the pipeline.
///
/// Each trigger causes its whole parent directory to be collected again, so
/// several matches landing in one directory each produce a complete, fresh
/// bundle of that directory.
pub struct Aggregator {
    queue: Arc<WorkQueue<PathBuf>>,
    shutdown: ShutdownSignal,
    output_path: PathBuf,
    selection: SelectionMode,
    config: AggregatorConfig,
    sink: EventSink,
}

impl Aggregator {
    pub fn new(
        queue: Arc<WorkQueue<PathBuf>>,
        shutdown: ShutdownSignal,
        output_path: PathBuf,
        selection: SelectionMode,
        config: AggregatorConfig,
        sink: EventSink,
    ) -> Self {
        Self {
            queue,
            shutdown,
            output_path,
            selection,
            config,
            sink,
        }
    }

    /// Collect and bundle the directory containing `trigger`. Returns the
    /// archive path.
    pub fn process(&self, trigger: &Path) -> Result<PathBuf> {
        let dir = trigger.parent().ok_or_else(|| {
            CollectorError::Config(format!("trigger has no parent: {}", trigger.display()))
        })?;

        let mut set = FileSet::new(collect_files(dir, self.selection)?);
        let archive = archive_path(&self.output_path, trigger);

        if let Err(err) = collect_disk_usage(
            &mut set,
            dir,
            &self.config.usage_report_name,
            &self.config.usage_program,
        ) {
            if self.config.delete_temporaries {
                if let Err(cleanup) = remove_temporaries(&set.temporaries) {
                    warn!("Failed to remove temporaries: {}", cleanup);
                }
            }
            return Err(err);
        }

        store_files(
            &set,
            &archive,
            &self.config.archive_program,
            self.config.delete_temporaries,
        )?;

        info!(
            "Archived {} entries from {} into {}",
            set.files.len(),
            dir.display(),
            archive.display()
        );
        self.sink.emit(CollectionEvent::archived(
            trigger.to_path_buf(),
            archive.clone(),
            set.files.len(),
        ));
        Ok(archive)
    }

    fn collect(&self, trigger: PathBuf) {
        if let Err(err) = self.process(&trigger) {
            error!("Collection for {} failed: {}", trigger.display(), err);
            self.sink
                .emit(CollectionEvent::failed(trigger, err.to_string()));
        }
    }

    /// Drain the queue until shutdown. A failed trigger is reported and
    /// skipped; the loop keeps running.
    ///
    /// Triggers accepted before the stop request are still collected: after
    /// shutdown is observed the loop keeps popping and only returns once the
    /// queue is empty and stays empty for one drain interval, or is closed.
    pub fn run(self) {
        let idle = self.config.drain_interval();
        let mut draining = false;

        loop {
            if !draining && self.shutdown.is_requested() {
                draining = true;
                let backlog = self.queue.len();
                if backlog > 0 {
                    info!("Stop requested, collecting {} queued trigger(s) first", backlog);
                }
            }

            match self.queue.wait_pop(idle) {
                Some(trigger) => self.collect(trigger),
                None if draining || self.queue.is_closed() => break,
                None => {}
            }
        }

        info!("Collector thread finished");
    }
}
