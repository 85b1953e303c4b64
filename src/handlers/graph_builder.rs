use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use color_eyre::Result;
use log::debug;

use crate::events_common::Event;
use crate::graph::{EdgeDirection, EdgeType, Graph, VertexId};
use crate::layout::linux;
use crate::model::{
    ContextKind, HostThread, InterruptContext, ProcessStatus, Time, Worker, WorkerRef, UNKNOWN_TID,
};
use crate::provider::{BuildContext, EventHandler};

/// The handler that actually builds the execution graph: state-change
/// vertices on scheduler switches, causal vertical edges on wakeups, and
/// matched network send/receive pairs.
///
/// Keeps one synthetic `kernel/<cpu>` worker (`tid == -1`) per (host, CPU)
/// to attribute activity that happens in interrupt context; the provider's
/// simplification pass later collapses pass-through hops over them.
pub struct ExecutionGraphHandler {
    kernel: HashMap<(String, u32), WorkerRef>,
    /// Send endpoints awaiting their matching receive, by packet key.
    pending_sends: HashMap<u64, VertexId>,
}

impl ExecutionGraphHandler {
    pub fn new() -> Self {
        Self {
            kernel: HashMap::new(),
            pending_sends: HashMap::new(),
        }
    }

    fn kernel_worker(&mut self, event: &Event) -> WorkerRef {
        let key = (event.host().to_owned(), event.cpu());
        if let Some(worker) = self.kernel.get(&key) {
            return Arc::clone(worker);
        }
        let mut worker = Worker::new(
            HostThread::new(event.host(), UNKNOWN_TID),
            format!("kernel/{}", event.cpu()),
            event.timestamp(),
        );
        worker.set_status(ProcessStatus::Run);
        let worker = Arc::new(Mutex::new(worker));
        self.kernel.insert(key, Arc::clone(&worker));
        worker
    }

    fn edge_type_for(status: ProcessStatus) -> EdgeType {
        match status {
            ProcessStatus::Run
            | ProcessStatus::RunSyscall
            | ProcessStatus::Interrupted
            | ProcessStatus::Exit => EdgeType::Running,
            ProcessStatus::WaitBlocked => EdgeType::Blocked,
            ProcessStatus::WaitCpu | ProcessStatus::WaitFork | ProcessStatus::WaitUnknown => {
                EdgeType::Preempted
            }
            ProcessStatus::Unknown | ProcessStatus::NotAlive | ProcessStatus::Zombie => {
                EdgeType::Unknown
            }
        }
    }

    /// Extend a worker's timeline to `ts`, labelling the segment with its
    /// current state.
    fn state_extend(graph: &mut Graph, worker: &WorkerRef, ts: Time) -> VertexId {
        let kind = Self::edge_type_for(worker.lock().unwrap().status());
        graph.append(worker, ts, kind).0
    }

    /// Extend a worker's timeline to `ts`, labelling the segment with the
    /// state it just left (the scheduler handler has already advanced it).
    fn state_change(graph: &mut Graph, worker: &WorkerRef, ts: Time) -> VertexId {
        let kind = Self::edge_type_for(worker.lock().unwrap().previous_status());
        graph.append(worker, ts, kind).0
    }

    fn resolve_irq(line: Option<i64>) -> EdgeType {
        match line {
            Some(linux::IRQ_TIMER) => EdgeType::Interrupted,
            _ => EdgeType::Unknown,
        }
    }

    fn resolve_softirq(vec: Option<i64>) -> EdgeType {
        match vec {
            Some(linux::SOFTIRQ_TIMER | linux::SOFTIRQ_HRTIMER) => EdgeType::Timer,
            Some(linux::SOFTIRQ_BLOCK | linux::SOFTIRQ_BLOCK_IOPOLL) => EdgeType::BlockDevice,
            Some(linux::SOFTIRQ_NET_RX | linux::SOFTIRQ_NET_TX) => EdgeType::Network,
            Some(linux::SOFTIRQ_SCHED) => EdgeType::Interrupted,
            _ => EdgeType::Unknown,
        }
    }

    /// If `tail` was reached by an incoming network edge, that packet is
    /// what caused the wakeup: rewire the edge to point at the wakeup
    /// target directly instead of passing through the current worker.
    fn replace_incoming_network_edge(
        graph: &mut Graph,
        tail: VertexId,
        wakeup_target: VertexId,
    ) -> bool {
        let Some(edge) = graph.edge(tail, EdgeDirection::IncomingVertical) else {
            return false;
        };
        if graph.edge_kind(edge) != EdgeType::Network {
            return false;
        }
        let source = graph.edge_source(edge);
        graph.remove_edge(tail, EdgeDirection::IncomingVertical);
        graph.link_vertical(source, wakeup_target, EdgeType::Network);
        true
    }

    fn on_sched_switch(event: &Event, ctx: &mut BuildContext<'_>) {
        let layout = ctx.layout;
        let (Some(prev_tid), Some(next_tid)) = (
            event.field_i64(layout.field_prev_tid()),
            event.field_i64(layout.field_next_tid()),
        ) else {
            return;
        };
        let host = event.host();
        let (Some(prev), Some(next)) = (
            ctx.system.find_worker(&HostThread::new(host, prev_tid)),
            ctx.system.find_worker(&HostThread::new(host, next_tid)),
        ) else {
            return;
        };

        let ts = event.timestamp();
        Self::state_change(ctx.graph, &prev, ts);
        Self::state_change(ctx.graph, &next, ts);
    }

    fn on_sched_wakeup(&mut self, event: &Event, ctx: &mut BuildContext<'_>) {
        let layout = ctx.layout;
        let Some(tid) = event.field_i64(layout.field_tid()) else {
            return;
        };
        let host = event.host();
        let Some(target) = ctx.system.find_worker(&HostThread::new(host, tid)) else {
            return;
        };
        let current = ctx.system.worker_on_cpu(host, event.cpu());
        let ts = event.timestamp();

        let left_status = target.lock().unwrap().previous_status();
        match left_status {
            ProcessStatus::WaitFork => Self::wait_fork(ctx.graph, ts, &target, current.as_ref()),
            ProcessStatus::WaitBlocked => {
                self.wait_blocked(event, ctx, ts, &target, current.as_ref());
            }
            _ => {}
        }
    }

    /// A target leaving `WaitFork` was just created by the worker on the
    /// CPU: draw the fork link.
    fn wait_fork(graph: &mut Graph, ts: Time, target: &WorkerRef, current: Option<&WorkerRef>) {
        if let Some(current) = current {
            let parent = Self::state_extend(graph, current, ts);
            let child = Self::state_change(graph, target, ts);
            graph.link(parent, child, EdgeType::Wakeup);
        } else {
            Self::state_change(graph, target, ts);
        }
    }

    /// A target leaving `WaitBlocked` was woken by whatever context the CPU
    /// is currently executing in.
    fn wait_blocked(
        &mut self,
        event: &Event,
        ctx: &mut BuildContext<'_>,
        ts: Time,
        target: &WorkerRef,
        current: Option<&WorkerRef>,
    ) {
        let context = ctx.system.peek_context(event.host(), event.cpu());
        match context.kind() {
            ContextKind::HrTimer => {
                ctx.graph.append(target, ts, EdgeType::Timer);
            }
            ContextKind::Irq => {
                let kind =
                    Self::resolve_irq(context.event().field_i64(ctx.layout.field_irq()));
                ctx.graph.append(target, ts, kind);
            }
            ContextKind::SoftIrq => self.soft_irq_wakeup(event, ctx, ts, target, &context),
            ContextKind::Ipi => {
                ctx.graph.append(target, ts, EdgeType::Ipi);
            }
            ContextKind::None => {
                // Plain task-context wakeup.
                if let Some(current) = current {
                    let woken = Self::state_change(ctx.graph, target, ts);
                    let source = Self::state_extend(ctx.graph, current, ts);
                    ctx.graph.link_vertical(source, woken, EdgeType::Wakeup);
                } else {
                    Self::state_change(ctx.graph, target, ts);
                }
            }
        }
    }

    fn soft_irq_wakeup(
        &mut self,
        event: &Event,
        ctx: &mut BuildContext<'_>,
        ts: Time,
        target: &WorkerRef,
        context: &InterruptContext,
    ) {
        let vec = context.event().field_i64(ctx.layout.field_vec());
        let (woken, _) = ctx.graph.append(target, ts, Self::resolve_softirq(vec));

        // A network softirq wakeup may really be caused by an incoming
        // packet that was delivered to the kernel placeholder just before.
        if matches!(
            vec,
            Some(linux::SOFTIRQ_NET_RX | linux::SOFTIRQ_NET_TX)
        ) {
            let kernel = self.kernel_worker(event);
            if let Some(tail) = ctx.graph.tail(&kernel) {
                Self::replace_incoming_network_edge(ctx.graph, tail, woken);
            }
        }
    }

    fn on_softirq_entry(&mut self, event: &Event, ctx: &mut BuildContext<'_>) {
        let vec = event.field_i64(ctx.layout.field_vec());
        if matches!(
            vec,
            Some(linux::SOFTIRQ_NET_RX | linux::SOFTIRQ_NET_TX)
        ) {
            // Seed the placeholder timeline so a packet received inside
            // this softirq has somewhere to land.
            let kernel = self.kernel_worker(event);
            ctx.graph.add_vertex(&kernel, event.timestamp());
        }
    }

    fn on_network_send(&mut self, event: &Event, ctx: &mut BuildContext<'_>) {
        let host = event.host();
        let sender = match ctx.system.peek_context(host, event.cpu()).kind() {
            ContextKind::None => ctx.system.worker_on_cpu(host, event.cpu()),
            ContextKind::SoftIrq => Some(self.kernel_worker(event)),
            _ => None,
        };
        let Some(sender) = sender else {
            return;
        };

        let endpoint = Self::state_extend(ctx.graph, &sender, event.timestamp());
        let Some(key) = event.field_u64(ctx.layout.field_seq()) else {
            debug!("network send without a packet key, cannot match");
            return;
        };
        self.pending_sends.insert(key, endpoint);
    }

    fn on_network_receive(&mut self, event: &Event, ctx: &mut BuildContext<'_>) {
        let host = event.host();
        let receiver = match ctx.system.peek_context(host, event.cpu()).kind() {
            ContextKind::SoftIrq | ContextKind::Irq => Some(self.kernel_worker(event)),
            _ => ctx.system.worker_on_cpu(host, event.cpu()),
        };
        let Some(receiver) = receiver else {
            return;
        };

        let endpoint = Self::state_extend(ctx.graph, &receiver, event.timestamp());
        let Some(key) = event.field_u64(ctx.layout.field_seq()) else {
            debug!("network receive without a packet key, cannot match");
            return;
        };
        match self.pending_sends.remove(&key) {
            Some(send) => {
                ctx.graph.link_vertical(send, endpoint, EdgeType::Network);
            }
            None => debug!("network receive with no matching send (key {key})"),
        }
    }
}

impl Default for ExecutionGraphHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler for ExecutionGraphHandler {
    fn handle_event(&mut self, event: &Event, ctx: &mut BuildContext<'_>) -> Result<()> {
        let layout = ctx.layout;
        let name = event.name();

        if name == layout.sched_switch() {
            Self::on_sched_switch(event, ctx);
        } else if layout.sched_wakeup_events().contains(&name) {
            self.on_sched_wakeup(event, ctx);
        } else if name == layout.softirq_entry() {
            self.on_softirq_entry(event, ctx);
        } else if layout.network_receive_events().contains(&name) {
            self.on_network_receive(event, ctx);
        } else if layout.network_send_events().contains(&name) {
            self.on_network_send(event, ctx);
        }

        Ok(())
    }
}
