//! Capability traits standing in for the original's `__weak`-symbol
//! platform overlays (spec.md §9: "Weak symbols & platform overlays").

use std::time::{SystemTime, UNIX_EPOCH};

/// A monotonic millisecond clock, the one timekeeping primitive the core
/// requires of its embedder (spec.md §1).
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Default [`Clock`] backed by the OS wall clock. Embedders targeting a
/// platform without a real-time clock supply their own.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
    }
}

/// Registered callbacks for the service handler's `REBOOT`/`SHUTDOWN`
/// ports (spec.md §4.M).
pub trait Rebooter: Send + Sync {
    fn reboot(&self);
    fn shutdown(&self);
}

#[derive(Debug, Clone)]
pub struct TaskInfo {
    pub name: String,
    pub state: String,
}

/// Backs the service handler's `PS` port.
pub trait TaskLister: Send + Sync {
    fn list(&self) -> Vec<TaskInfo>;
}

/// Embedder-supplied hooks, gathered at [`crate::stack::Stack`]
/// construction (spec.md §9's "capability record").
#[derive(Clone)]
pub struct Capabilities {
    pub clock: std::sync::Arc<dyn Clock>,
    pub rebooter: Option<std::sync::Arc<dyn Rebooter>>,
    pub task_lister: Option<std::sync::Arc<dyn TaskLister>>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self { clock: std::sync::Arc::new(SystemClock), rebooter: None, task_lister: None }
    }
}
