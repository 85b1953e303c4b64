use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use itertools::Itertools;

use super::{HostThread, InterruptContext, Worker};

/// Shared handle to a registered worker.
pub type WorkerRef = Arc<Mutex<Worker>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct HostCpu {
    host: String,
    cpu: u32,
}

impl HostCpu {
    fn new(host: &str, cpu: u32) -> Self {
        Self {
            host: host.to_owned(),
            cpu,
        }
    }
}

/// Per-analysis system state shared by all handlers of one construction
/// pass: who runs on each CPU, which interrupt context each CPU is in, and
/// the registry of every worker seen so far.
///
/// Exclusively owned by the handler pipeline while events are dispatched;
/// read-only once construction finishes.
#[derive(Debug, Default)]
pub struct SystemModel {
    current_tids: HashMap<HostCpu, HostThread>,
    context_stacks: HashMap<HostCpu, Vec<InterruptContext>>,
    workers: HashMap<HostThread, WorkerRef>,
}

impl SystemModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the currently-running thread entry for a CPU.
    pub fn cache_tid_on_cpu(&mut self, host: &str, cpu: u32, host_thread: HostThread) {
        self.current_tids.insert(HostCpu::new(host, cpu), host_thread);
    }

    /// Resolve the worker currently running on a CPU, if a thread was cached
    /// for it and that thread is registered.
    pub fn worker_on_cpu(&self, host: &str, cpu: u32) -> Option<WorkerRef> {
        let host_thread = self.current_tids.get(&HostCpu::new(host, cpu))?;
        self.find_worker(host_thread)
    }

    pub fn find_worker(&self, host_thread: &HostThread) -> Option<WorkerRef> {
        self.workers.get(host_thread).cloned()
    }

    /// Register a worker under its host thread. Re-insertion with the same
    /// key replaces the previous worker; callers decide whether an existing
    /// entry should have been reused instead.
    pub fn add_worker(&mut self, worker: Worker) -> WorkerRef {
        let key = worker.host_thread().clone();
        log::trace!("registering worker {worker}");
        let worker = Arc::new(Mutex::new(worker));
        self.workers.insert(key, Arc::clone(&worker));
        worker
    }

    /// Push an interrupt context onto the stack of a CPU, creating the stack
    /// on first use.
    pub fn push_context(&mut self, host: &str, cpu: u32, context: InterruptContext) {
        self.context_stacks
            .entry(HostCpu::new(host, cpu))
            .or_default()
            .push(context);
    }

    /// The top of a CPU's interrupt-context stack, or the `None`-kind
    /// sentinel if the stack is absent or empty. Cannot be used to detect
    /// stack existence; only [`Self::pop_context`] carries that signal.
    pub fn peek_context(&self, host: &str, cpu: u32) -> InterruptContext {
        self.context_stacks
            .get(&HostCpu::new(host, cpu))
            .and_then(|stack| stack.last())
            .cloned()
            .unwrap_or_default()
    }

    pub fn pop_context(&mut self, host: &str, cpu: u32) -> Option<InterruptContext> {
        self.context_stacks
            .get_mut(&HostCpu::new(host, cpu))?
            .pop()
    }

    /// Snapshot of all registered workers, ordered by identity key so
    /// traversals are deterministic.
    pub fn workers(&self) -> Vec<WorkerRef> {
        self.workers
            .iter()
            .sorted_by(|a, b| a.0.cmp(b.0))
            .map(|(_, worker)| Arc::clone(worker))
            .collect()
    }
}
