//! File change notification.
//!
//! A [`FileWatcher`] wraps one `notify::RecommendedWatcher` and fans every
//! changed path out to its subscribers:
//!
//! ```text
//! FileWatcher (content root, recursive)
//!    |-> ChangeStream -> cache invalidator
//!    |-> ChangeStream -> index updater
//!
//! FileWatcher (config file)
//!    |-> ChangeStream -> config reloader
//! ```
//!
//! Streams are unbounded and deliver paths in the order notify reports them.
//! They end once the watcher is stopped or dropped.

mod error;
mod file_watcher;

pub use error::WatchError;
pub use file_watcher::{ChangeStream, FileWatcher};
