pub mod aggregator;
pub mod cli;
pub mod collect;
pub mod collector;
pub mod config;
pub mod error;
pub mod events;
pub mod filter;
#[cfg(target_os = "linux")]
pub mod inotify;
pub mod queue;
#[cfg(unix)]
pub mod record;
pub mod shutdown;
pub mod watcher;

pub use aggregator::Aggregator;
pub use collect::*;
pub use collector::{Collector, QUIT_TOKEN};
pub use config::*;
pub use error::{CollectorError, ErrorKind, Result};
pub use events::*;
pub use filter::*;
pub use queue::WorkQueue;
pub use shutdown::*;
pub use watcher::*;
