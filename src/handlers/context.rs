use std::sync::Arc;

use color_eyre::Result;
use log::debug;

use crate::events_common::Event;
use crate::model::{ContextKind, InterruptContext};
use crate::provider::{BuildContext, EventHandler};

/// Maintains the per-(host, CPU) interrupt-context stacks: interrupt entry
/// events push a frame, the matching exits pop it. Events seen before any
/// entry leave the stack empty, which reads back as the `None` sentinel.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContextHandler;

impl ContextHandler {
    fn push(event: &Event, kind: ContextKind, ctx: &mut BuildContext<'_>) {
        let frame = InterruptContext::new(Arc::new(event.clone()), kind);
        ctx.system.push_context(event.host(), event.cpu(), frame);
    }

    fn pop(event: &Event, ctx: &mut BuildContext<'_>) {
        if ctx.system.pop_context(event.host(), event.cpu()).is_none() {
            // Exit without a matching entry, e.g. at the start of a trace
            // that began inside an interrupt.
            debug!(
                "unmatched interrupt exit `{}` on {}/{}",
                event.name(),
                event.host(),
                event.cpu()
            );
        }
    }
}

impl EventHandler for ContextHandler {
    fn handle_event(&mut self, event: &Event, ctx: &mut BuildContext<'_>) -> Result<()> {
        let layout = ctx.layout;
        let name = event.name();

        if name == layout.irq_handler_entry() {
            Self::push(event, ContextKind::Irq, ctx);
        } else if name == layout.softirq_entry() {
            Self::push(event, ContextKind::SoftIrq, ctx);
        } else if name == layout.hrtimer_expire_entry() {
            Self::push(event, ContextKind::HrTimer, ctx);
        } else if name == layout.ipi_entry() {
            Self::push(event, ContextKind::Ipi, ctx);
        } else if name == layout.irq_handler_exit()
            || name == layout.softirq_exit()
            || name == layout.hrtimer_expire_exit()
            || name == layout.ipi_exit()
        {
            Self::pop(event, ctx);
        }

        Ok(())
    }
}
