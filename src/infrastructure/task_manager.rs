use std::collections::HashMap;
use tokio::task::JoinHandle;

/// Background timers owned by the connection driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Retry,
    Heartbeat,
    HealthProbe,
}

/// Tracks at most one task per [`TaskKind`]; aborting is synchronous.
pub struct TaskManager {
    handles: HashMap<TaskKind, JoinHandle<()>>,
}

impl TaskManager {
    /// Create a new empty task manager
    pub fn new() -> Self {
        Self {
            handles: HashMap::new(),
        }
    }

    /// Track `handle` under `kind`, aborting whatever ran there before
    pub fn replace(&mut self, kind: TaskKind, handle: JoinHandle<()>) {
        if let Some(previous) = self.handles.insert(kind, handle) {
            previous.abort();
        }
    }

    /// Abort the task under `kind`. Returns whether one was tracked.
    pub fn cancel(&mut self, kind: TaskKind) -> bool {
        match self.handles.remove(&kind) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Abort all tasks without waiting
    pub fn abort_all(&mut self) {
        for (_, handle) in self.handles.drain() {
            handle.abort();
        }
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TaskManager {
    fn drop(&mut self) {
        self.abort_all();
    }
}
