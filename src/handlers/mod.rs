mod context;
mod graph_builder;
mod sched;

pub use context::ContextHandler;
pub use graph_builder::ExecutionGraphHandler;
pub use sched::SchedHandler;
