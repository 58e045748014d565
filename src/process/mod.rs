//! Processes backing terminals.
//!
//! Two variants behind one closed enum:
//!
//! - [`TaskProcess`]: in-process shell, driven entirely by [`Process::tick`].
//! - [`ExternalProcess`]: an OS command on a PTY with its own I/O threads.
//!
//! Both expose the same contract: an id, an inbound [`Mailbox`], a
//! non-blocking tick that handles only what was queued at call time, and a
//! delete that closes the mailbox exactly once.

// Rust guideline compliant 2026-02

pub mod external;
pub mod spawn;
pub mod task;

pub use external::ExternalProcess;
pub use spawn::ExternalSpawnConfig;
pub use task::TaskProcess;

use std::collections::BTreeMap;

use thiserror::Error;

use crate::ids::ProcessId;
use crate::mailbox::Mailbox;

/// Process lifecycle and addressing errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProcessError {
    /// `delete` was called on an already-deleted process.
    #[error("process {0} was already deleted")]
    AlreadyDeleted(ProcessId),
    /// No process is registered under this id.
    #[error("unknown process {0}")]
    UnknownProcess(ProcessId),
    /// The process exists but is not a task.
    #[error("process {0} is not a task")]
    NotATask(ProcessId),
    /// The task already forwards to an external process.
    #[error("task process {task} already runs process {external}")]
    AlreadyAttached {
        /// Task process.
        task: ProcessId,
        /// External process already attached.
        external: ProcessId,
    },
}

/// A process of either variant.
#[derive(Debug)]
pub enum Process {
    /// In-process task.
    Task(TaskProcess),
    /// OS command on a PTY.
    External(ExternalProcess),
}

impl Process {
    /// Process id.
    pub fn id(&self) -> ProcessId {
        match self {
            Self::Task(p) => p.id(),
            Self::External(p) => p.id(),
        }
    }

    /// Inbound mailbox.
    pub fn incoming_channel(&self) -> &Mailbox {
        match self {
            Self::Task(p) => p.incoming_channel(),
            Self::External(p) => p.incoming_channel(),
        }
    }

    /// Handle everything queued at call time. Never blocks.
    pub fn tick(&mut self) {
        match self {
            Self::Task(p) => p.tick(),
            Self::External(p) => p.tick(),
        }
    }

    /// Close the inbound mailbox. A second call fails.
    pub fn delete(&mut self) -> Result<(), ProcessError> {
        match self {
            Self::Task(p) => p.delete(),
            Self::External(p) => p.delete(),
        }
    }

    /// Whether `delete` has been called.
    pub fn is_deleted(&self) -> bool {
        match self {
            Self::Task(p) => p.is_deleted(),
            Self::External(p) => p.is_deleted(),
        }
    }

    /// Short description for logs and listings.
    pub fn label(&self) -> String {
        match self {
            Self::Task(p) => format!("task {}", p.task_id()),
            Self::External(p) => p.label().to_string(),
        }
    }

    /// The task variant, if this is one.
    pub fn as_task_mut(&mut self) -> Option<&mut TaskProcess> {
        match self {
            Self::Task(p) => Some(p),
            Self::External(_) => None,
        }
    }
}

/// All live processes, keyed by id.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    processes: BTreeMap<ProcessId, Process>,
}

impl ProcessRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a process and return its id.
    pub fn add(&mut self, process: Process) -> ProcessId {
        let id = process.id();
        log::debug!("[processes] add {id} ({})", process.label());
        self.processes.insert(id, process);
        id
    }

    /// Unregister a process without deleting it.
    pub fn remove(&mut self, id: ProcessId) -> Option<Process> {
        self.processes.remove(&id)
    }

    /// Look up a process.
    pub fn get(&self, id: ProcessId) -> Option<&Process> {
        self.processes.get(&id)
    }

    /// Look up a process mutably.
    pub fn get_mut(&mut self, id: ProcessId) -> Option<&mut Process> {
        self.processes.get_mut(&id)
    }

    /// Look up a task process mutably.
    pub fn task_mut(&mut self, id: ProcessId) -> Result<&mut TaskProcess, ProcessError> {
        self.processes
            .get_mut(&id)
            .ok_or(ProcessError::UnknownProcess(id))?
            .as_task_mut()
            .ok_or(ProcessError::NotATask(id))
    }

    /// Number of registered processes.
    pub fn len(&self) -> usize {
        self.processes.len()
    }

    /// Whether no process is registered.
    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Registered ids in ascending order.
    pub fn ids(&self) -> Vec<ProcessId> {
        self.processes.keys().copied().collect()
    }

    /// Tick every process once.
    pub fn tick_all(&mut self) {
        for process in self.processes.values_mut() {
            process.tick();
        }
    }

    /// Delete a task and any external process it forwards to, then
    /// unregister the task.
    ///
    /// The external process stays registered until [`Self::reap_exited`]
    /// collects it, so teardown never blocks the caller.
    pub fn delete_task(&mut self, id: ProcessId) -> Result<(), ProcessError> {
        let task = self.task_mut(id)?;
        let external = task.detach_external();
        task.delete()?;
        self.processes.remove(&id);

        if let Some(ext_id) = external {
            if let Some(ext) = self.processes.get_mut(&ext_id) {
                if !ext.is_deleted() {
                    ext.delete()?;
                }
            }
        }
        Ok(())
    }

    /// Unregister external processes whose supervisor has finished.
    ///
    /// Tasks forwarding to a reaped process are detached. Returns each
    /// reaped id with its exit code.
    pub fn reap_exited(&mut self) -> Vec<(ProcessId, Option<i32>)> {
        let finished: Vec<ProcessId> = self
            .processes
            .iter()
            .filter_map(|(id, p)| match p {
                Process::External(ext) if !ext.is_running() => Some(*id),
                _ => None,
            })
            .collect();

        let mut reaped = Vec::with_capacity(finished.len());
        for id in finished {
            if let Some(Process::External(mut ext)) = self.processes.remove(&id) {
                if !ext.is_deleted() {
                    if let Err(e) = ext.delete() {
                        log::warn!("[processes] reaping {id}: {e}");
                    }
                }
                let code = ext.wait();
                log::info!("[processes] reaped {id} ({}) exit {code:?}", ext.label());
                reaped.push((id, code));
            }
        }

        if !reaped.is_empty() {
            for process in self.processes.values_mut() {
                if let Process::Task(task) = process {
                    if task
                        .attached_external()
                        .is_some_and(|ext| reaped.iter().any(|(id, _)| *id == ext))
                    {
                        task.detach_external();
                    }
                }
            }
        }
        reaped
    }
}
