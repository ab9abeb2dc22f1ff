use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tracing::{debug, warn};

/// Ordered, user-visible log of mint-progress entries.
///
/// `append` preserves insertion order; `clear` discards everything shown so
/// far. Implementations must treat a missing rendering surface as a logged
/// no-op, never an error.
pub trait StatusSink: Send + Sync {
    fn clear(&self);
    fn append(&self, entry: &str);
}

/// Transient alert surface for recoverable failures (wrong network, declined
/// consent, malformed account payloads). Distinct from the status feed, which
/// only carries mint progress.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: &str);
}

/// In-memory sink used by tests and local harnesses.
#[derive(Default)]
pub struct MemorySink {
    entries: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the visible entries in insertion order.
    pub fn entries(&self) -> Vec<String> {
        self.entries
            .lock()
            .expect("status feed mutex poisoned")
            .clone()
    }
}

impl StatusSink for MemorySink {
    fn clear(&self) {
        self.entries
            .lock()
            .expect("status feed mutex poisoned")
            .clear();
    }

    fn append(&self, entry: &str) {
        self.entries
            .lock()
            .expect("status feed mutex poisoned")
            .push(entry.to_string());
    }
}

/// Terminal-backed sink used by the CLI.
///
/// A terminal cannot be un-printed, so `clear` renders a divider instead of
/// erasing. Once detached, both operations become logged no-ops.
pub struct StdoutSink {
    attached: AtomicBool,
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self {
            attached: AtomicBool::new(true),
        }
    }
}

impl StdoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Detach the rendering surface; subsequent calls warn and drop.
    pub fn detach(&self) {
        self.attached.store(false, Ordering::SeqCst);
    }

    fn surface_present(&self, operation: &str) -> bool {
        if self.attached.load(Ordering::SeqCst) {
            return true;
        }
        warn!(operation, "status feed surface is detached; dropping");
        false
    }
}

impl StatusSink for StdoutSink {
    fn clear(&self) {
        if self.surface_present("clear") {
            debug!("status feed cleared");
            println!("----");
        }
    }

    fn append(&self, entry: &str) {
        if self.surface_present("append") {
            println!("{entry}");
        }
    }
}

/// Recording notifier used by tests.
#[derive(Default)]
pub struct MemoryNotifier {
    notices: Mutex<Vec<String>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<String> {
        self.notices
            .lock()
            .expect("notifier mutex poisoned")
            .clone()
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, notice: &str) {
        self.notices
            .lock()
            .expect("notifier mutex poisoned")
            .push(notice.to_string());
    }
}

/// Terminal-backed notifier used by the CLI.
#[derive(Default)]
pub struct StderrNotifier;

impl StderrNotifier {
    pub fn new() -> Self {
        Self
    }
}

impl Notifier for StderrNotifier {
    fn notify(&self, notice: &str) {
        eprintln!("! {notice}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_preserves_insertion_order() {
        let sink = MemorySink::new();
        sink.append("a");
        sink.append("b");
        assert_eq!(sink.entries(), vec!["a".to_string(), "b".to_string()]);
        sink.clear();
        assert!(sink.entries().is_empty());
        sink.append("c");
        assert_eq!(sink.entries(), vec!["c".to_string()]);
    }

    #[test]
    fn detached_stdout_sink_is_a_no_op() {
        let sink = StdoutSink::new();
        sink.detach();
        // Must not panic or error once the surface is gone.
        sink.clear();
        sink.append("dropped");
    }

    #[test]
    fn memory_notifier_records_notices() {
        let notifier = MemoryNotifier::new();
        notifier.notify("wrong network");
        assert_eq!(notifier.notices(), vec!["wrong network".to_string()]);
    }
}
