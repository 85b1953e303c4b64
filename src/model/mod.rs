pub(crate) mod system;

use std::hash::{Hash, Hasher};
use std::mem;
use std::sync::{Arc, LazyLock};

use chrono::{Local, TimeZone};
use derive_more::derive::Display;
use serde::Serialize;
use strum::EnumIter;

use crate::events_common::Event;

pub use system::{SystemModel, WorkerRef};

/// Thread id of the synthetic "unknown" worker standing in for kernel-only
/// activity on a CPU when no real thread can be attributed.
pub const UNKNOWN_TID: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Time {
    /// Nanoseconds since the UNIX epoch (1970-01-01 00:00:00 UTC)
    timestamp: i64,
}

impl Time {
    pub const fn from_nanos(nanos: i64) -> Self {
        Self { timestamp: nanos }
    }

    pub const fn timestamp_nanos(self) -> i64 {
        self.timestamp
    }

    pub fn as_datetime(self) -> chrono::DateTime<chrono::Local> {
        Local.timestamp_nanos(self.timestamp)
    }
}

/// Identity key of a worker: one thread on one traced host.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize)]
#[display("{host}/{tid}")]
pub struct HostThread {
    host: String,
    tid: i64,
}

impl HostThread {
    pub fn new(host: impl Into<String>, tid: i64) -> Self {
        Self {
            host: host.into(),
            tid,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub const fn tid(&self) -> i64 {
        self.tid
    }

    pub const fn is_unknown(&self) -> bool {
        self.tid == UNKNOWN_TID
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, Serialize, EnumIter,
)]
pub enum ProcessStatus {
    #[default]
    Unknown,
    NotAlive,
    Exit,
    Run,
    RunSyscall,
    Interrupted,
    WaitBlocked,
    WaitCpu,
    WaitFork,
    WaitUnknown,
    Zombie,
}

/// One schedulable execution unit: a real thread, or a synthetic kernel
/// placeholder (`tid == -1`). Owns a vertical timeline of vertices in the
/// execution graph.
///
/// `previous_status` is a one-deep history: it receives the old `status`
/// every time the status is overwritten. Graph handlers rely on it because
/// the scheduler-state handler has already advanced `status` by the time
/// they see the same event.
#[derive(Debug, Display)]
#[display("{name} ({host_thread})")]
pub struct Worker {
    host_thread: HostThread,
    name: String,
    start_time: Time,
    status: ProcessStatus,
    previous_status: ProcessStatus,
}

impl Worker {
    pub fn new(host_thread: HostThread, name: impl Into<String>, start_time: Time) -> Self {
        Self {
            host_thread,
            name: name.into(),
            start_time,
            status: ProcessStatus::Unknown,
            previous_status: ProcessStatus::Unknown,
        }
    }

    pub fn host_thread(&self) -> &HostThread {
        &self.host_thread
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub const fn start_time(&self) -> Time {
        self.start_time
    }

    pub const fn status(&self) -> ProcessStatus {
        self.status
    }

    pub const fn previous_status(&self) -> ProcessStatus {
        self.previous_status
    }

    pub fn set_status(&mut self, status: ProcessStatus) {
        self.previous_status = mem::replace(&mut self.status, status);
    }

    pub const fn is_unknown(&self) -> bool {
        self.host_thread.is_unknown()
    }
}

// Worker identity is its host thread, nothing else.
impl PartialEq for Worker {
    fn eq(&self, other: &Self) -> bool {
        self.host_thread == other.host_thread
    }
}

impl Eq for Worker {}

impl Hash for Worker {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host_thread.hash(state);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, Serialize)]
pub enum ContextKind {
    #[default]
    None,
    SoftIrq,
    Irq,
    HrTimer,
    Ipi,
}

static DEFAULT_CONTEXT: LazyLock<InterruptContext> = LazyLock::new(|| InterruptContext {
    event: Arc::new(Event::new("", 0, "", Time::from_nanos(0))),
    kind: ContextKind::None,
});

/// An immutable stack frame of the per-CPU interrupt-context stack: the
/// event that entered the context, paired with its classification.
///
/// The default value (kind [`ContextKind::None`], sentinel event) models
/// "no special context" and is what [`SystemModel::peek_context`] returns
/// for an empty or never-seen stack.
#[derive(Debug, Clone, PartialEq)]
pub struct InterruptContext {
    event: Arc<Event>,
    kind: ContextKind,
}

impl InterruptContext {
    pub fn new(event: Arc<Event>, kind: ContextKind) -> Self {
        Self { event, kind }
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    pub const fn kind(&self) -> ContextKind {
        self.kind
    }
}

impl Default for InterruptContext {
    fn default() -> Self {
        DEFAULT_CONTEXT.clone()
    }
}
