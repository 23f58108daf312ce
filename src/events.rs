use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::OutputFormat;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CollectionEventKind {
    /// A created entry matched the name pattern and was queued.
    Matched,
    /// The trigger's directory was bundled.
    Archived { archive: PathBuf, file_count: usize },
    /// Collecting for the trigger failed.
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionEvent {
    pub trigger: PathBuf,
    #[serde(flatten)]
    pub kind: CollectionEventKind,
    pub timestamp: DateTime<Utc>,
}

impl CollectionEvent {
    pub fn new(trigger: PathBuf, kind: CollectionEventKind) -> Self {
        Self {
            trigger,
            kind,
            timestamp: Utc::now(),
        }
    }

    pub fn matched(trigger: PathBuf) -> Self {
        Self::new(trigger, CollectionEventKind::Matched)
    }

    pub fn archived(trigger: PathBuf, archive: PathBuf, file_count: usize) -> Self {
        Self::new(trigger, CollectionEventKind::Archived { archive, file_count })
    }

    pub fn failed(trigger: PathBuf, error: String) -> Self {
        Self::new(trigger, CollectionEventKind::Failed { error })
    }

    pub fn to_text(&self) -> String {
        let time_str = self.timestamp.format("%H:%M:%S");
        match &self.kind {
            CollectionEventKind::Matched => {
                format!("[{}] MATCHED {}", time_str, self.trigger.display())
            }
            CollectionEventKind::Archived { archive, file_count } => format!(
                "[{}] ARCHIVED {} -> {} ({} files)",
                time_str,
                self.trigger.display(),
                archive.display(),
                file_count
            ),
            CollectionEventKind::Failed { error } => {
                format!("[{}] FAILED {}: {}", time_str, self.trigger.display(), error)
            }
        }
    }
}

/// Destination for collection events, shared by both worker threads.
///
/// Events are printed to stdout in the configured format and, when history
/// is enabled, kept in memory for inspection.
#[derive(Debug, Clone)]
pub struct EventSink {
    format: OutputFormat,
    history: Option<Arc<Mutex<Vec<CollectionEvent>>>>,
}

impl EventSink {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            history: None,
        }
    }

    pub fn with_history(mut self) -> Self {
        self.history = Some(Arc::new(Mutex::new(Vec::new())));
        self
    }

    pub fn emit(&self, event: CollectionEvent) {
        let line = match self.format {
            OutputFormat::Text => Some(event.to_text()),
            OutputFormat::Json => match serde_json::to_string(&event) {
                Ok(json) => Some(json),
                Err(err) => {
                    tracing::warn!("Failed to serialize collection event: {}", err);
                    None
                }
            },
            OutputFormat::Quiet => None,
        };

        if let Some(line) = line {
            let mut stdout = std::io::stdout().lock();
            if let Err(err) = writeln!(stdout, "{}", line) {
                tracing::warn!("Failed to write collection event: {}", err);
            }
        }

        if let Some(history) = &self.history {
            history
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(event);
        }
    }

    /// Events recorded so far, oldest first. Empty unless history is enabled.
    pub fn history(&self) -> Vec<CollectionEvent> {
        self.history
            .as_ref()
            .map(|h| h.lock().unwrap_or_else(PoisonError::into_inner).clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_shape() {
        let event = CollectionEvent::archived(
            PathBuf::from("/in/core.a.0.lz4"),
            PathBuf::from("/out/archive.0011.tar"),
            3,
        );
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();

        assert_eq!(json["event"], "archived");
        assert_eq!(json["trigger"], "/in/core.a.0.lz4");
        assert_eq!(json["archive"], "/out/archive.0011.tar");
        assert_eq!(json["file_count"], 3);
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_event_text() {
        let event = CollectionEvent::failed(PathBuf::from("/in/x"), "tar exited".to_string());
        let text = event.to_text();
        assert!(text.contains("FAILED /in/x: tar exited"));
    }

    #[test]
    fn test_sink_history() {
        let sink = EventSink::new(OutputFormat::Quiet).with_history();
        let remote = sink.clone();
        remote.emit(CollectionEvent::matched(PathBuf::from("/in/a")));
        sink.emit(CollectionEvent::matched(PathBuf::from("/in/b")));

        let history = sink.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].trigger, PathBuf::from("/in/a"));
        assert_eq!(history[1].kind, CollectionEventKind::Matched);
    }

    #[test]
    fn test_sink_without_history() {
        let sink = EventSink::new(OutputFormat::Quiet);
        sink.emit(CollectionEvent::matched(PathBuf::from("/in/a")));
        assert!(sink.history().is_empty());
    }
}
