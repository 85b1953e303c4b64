//! Per-trace lookup of concrete event and field names for the logical roles
//! the handlers care about. Traces that use non-standard tracepoint names
//! implement [`EventLayout`]; everything else gets [`DefaultLayout`], whose
//! defaults are the stock Linux tracepoint names.

/// Linux constants referenced by the handlers when classifying interrupts
/// and task states.
pub mod linux {
    pub const SOFTIRQ_HI: i64 = 0;
    pub const SOFTIRQ_TIMER: i64 = 1;
    pub const SOFTIRQ_NET_TX: i64 = 2;
    pub const SOFTIRQ_NET_RX: i64 = 3;
    pub const SOFTIRQ_BLOCK: i64 = 4;
    pub const SOFTIRQ_BLOCK_IOPOLL: i64 = 5;
    pub const SOFTIRQ_TASKLET: i64 = 6;
    pub const SOFTIRQ_SCHED: i64 = 7;
    pub const SOFTIRQ_HRTIMER: i64 = 8;

    /// The timer IRQ line. Other IRQ numbers cannot be classified without
    /// statedump information.
    pub const IRQ_TIMER: i64 = 0;

    pub const TASK_STATE_RUNNABLE: i64 = 0;
    pub const TASK_INTERRUPTIBLE: i64 = 1;
    pub const TASK_UNINTERRUPTIBLE: i64 = 2;
}

pub trait EventLayout {
    fn sched_switch(&self) -> &str {
        "sched_switch"
    }

    fn sched_wakeup_events(&self) -> &[&str] {
        &["sched_wakeup", "sched_wakeup_new", "sched_waking"]
    }

    fn sched_process_fork(&self) -> &str {
        "sched_process_fork"
    }

    fn irq_handler_entry(&self) -> &str {
        "irq_handler_entry"
    }

    fn irq_handler_exit(&self) -> &str {
        "irq_handler_exit"
    }

    fn softirq_entry(&self) -> &str {
        "softirq_entry"
    }

    fn softirq_exit(&self) -> &str {
        "softirq_exit"
    }

    fn hrtimer_expire_entry(&self) -> &str {
        "hrtimer_expire_entry"
    }

    fn hrtimer_expire_exit(&self) -> &str {
        "hrtimer_expire_exit"
    }

    fn ipi_entry(&self) -> &str {
        "ipi_entry"
    }

    fn ipi_exit(&self) -> &str {
        "ipi_exit"
    }

    fn network_send_events(&self) -> &[&str] {
        &["inet_sock_local_out", "net_dev_queue"]
    }

    fn network_receive_events(&self) -> &[&str] {
        &["inet_sock_local_in", "netif_receive_skb"]
    }

    fn field_prev_tid(&self) -> &str {
        "prev_tid"
    }

    fn field_next_tid(&self) -> &str {
        "next_tid"
    }

    fn field_prev_state(&self) -> &str {
        "prev_state"
    }

    fn field_prev_comm(&self) -> &str {
        "prev_comm"
    }

    fn field_next_comm(&self) -> &str {
        "next_comm"
    }

    fn field_tid(&self) -> &str {
        "tid"
    }

    fn field_comm(&self) -> &str {
        "comm"
    }

    fn field_child_tid(&self) -> &str {
        "child_tid"
    }

    fn field_child_comm(&self) -> &str {
        "child_comm"
    }

    fn field_irq(&self) -> &str {
        "irq"
    }

    fn field_vec(&self) -> &str {
        "vec"
    }

    /// Packet key used to pair a network send with its receive.
    fn field_seq(&self) -> &str {
        "seq"
    }
}

/// The fallback layout when a trace does not provide its own.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultLayout;

impl EventLayout for DefaultLayout {}
