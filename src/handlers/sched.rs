use color_eyre::Result;
use log::debug;

use crate::events_common::Event;
use crate::layout::linux;
use crate::model::{HostThread, ProcessStatus, Time, Worker, WorkerRef};
use crate::provider::{BuildContext, EventHandler};

/// Keeps the system model in step with the scheduler: creates workers the
/// first time a (host, tid) pair is observed, tracks status transitions,
/// and caches which thread runs on each CPU.
///
/// Runs before the graph-building handler, which therefore reads the state
/// a worker *left* through [`Worker::previous_status`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SchedHandler;

impl SchedHandler {
    fn find_or_create_worker(
        ctx: &mut BuildContext<'_>,
        host: &str,
        tid: i64,
        comm: Option<&str>,
        start_time: Time,
    ) -> WorkerRef {
        let key = HostThread::new(host, tid);
        if let Some(worker) = ctx.system.find_worker(&key) {
            if let Some(comm) = comm {
                let mut worker = worker.lock().unwrap();
                if worker.name() != comm {
                    worker.set_name(comm);
                }
            }
            return worker;
        }
        let name = comm.map_or_else(|| tid.to_string(), str::to_owned);
        ctx.system.add_worker(Worker::new(key, name, start_time))
    }

    fn status_from_task_state(state: i64) -> ProcessStatus {
        if state == linux::TASK_STATE_RUNNABLE {
            ProcessStatus::WaitCpu
        } else if state & (linux::TASK_INTERRUPTIBLE | linux::TASK_UNINTERRUPTIBLE) != 0 {
            ProcessStatus::WaitBlocked
        } else {
            ProcessStatus::WaitUnknown
        }
    }

    fn on_sched_switch(event: &Event, ctx: &mut BuildContext<'_>) {
        let layout = ctx.layout;
        let (Some(prev_tid), Some(next_tid)) = (
            event.field_i64(layout.field_prev_tid()),
            event.field_i64(layout.field_next_tid()),
        ) else {
            debug!("sched switch without prev/next tid, skipping");
            return;
        };
        let host = event.host();
        let ts = event.timestamp();

        let prev = Self::find_or_create_worker(
            ctx,
            host,
            prev_tid,
            event.field_str(layout.field_prev_comm()),
            ts,
        );
        let next = Self::find_or_create_worker(
            ctx,
            host,
            next_tid,
            event.field_str(layout.field_next_comm()),
            ts,
        );

        let prev_state = event.field_i64(layout.field_prev_state()).unwrap_or(0);
        prev.lock()
            .unwrap()
            .set_status(Self::status_from_task_state(prev_state));
        next.lock().unwrap().set_status(ProcessStatus::Run);

        ctx.system
            .cache_tid_on_cpu(host, event.cpu(), HostThread::new(host, next_tid));
    }

    fn on_sched_wakeup(event: &Event, ctx: &mut BuildContext<'_>) {
        let layout = ctx.layout;
        let Some(tid) = event.field_i64(layout.field_tid()) else {
            debug!("wakeup without a target tid, skipping");
            return;
        };
        let target = Self::find_or_create_worker(
            ctx,
            event.host(),
            tid,
            event.field_str(layout.field_comm()),
            event.timestamp(),
        );

        let mut target = target.lock().unwrap();
        // Waking an already-running task changes nothing.
        if !matches!(
            target.status(),
            ProcessStatus::Run | ProcessStatus::RunSyscall
        ) {
            target.set_status(ProcessStatus::WaitCpu);
        }
    }

    fn on_process_fork(event: &Event, ctx: &mut BuildContext<'_>) {
        let layout = ctx.layout;
        let Some(child_tid) = event.field_i64(layout.field_child_tid()) else {
            debug!("fork without a child tid, skipping");
            return;
        };
        let child = Self::find_or_create_worker(
            ctx,
            event.host(),
            child_tid,
            event.field_str(layout.field_child_comm()),
            event.timestamp(),
        );
        child.lock().unwrap().set_status(ProcessStatus::WaitFork);
    }
}

impl EventHandler for SchedHandler {
    fn handle_event(&mut self, event: &Event, ctx: &mut BuildContext<'_>) -> Result<()> {
        let layout = ctx.layout;
        let name = event.name();

        if name == layout.sched_switch() {
            Self::on_sched_switch(event, ctx);
        } else if layout.sched_wakeup_events().contains(&name) {
            Self::on_sched_wakeup(event, ctx);
        } else if name == layout.sched_process_fork() {
            Self::on_process_fork(event, ctx);
        }

        Ok(())
    }
}
