//! The handler pipeline that owns one graph-construction pass: handler
//! registration, per-event dispatch in priority order, and the final
//! simplification rewrite that removes synthetic pass-through hops.

use color_eyre::Result;
use itertools::Itertools;
use log::{debug, warn};

use crate::events_common::Event;
use crate::graph::{EdgeDirection, Graph};
use crate::handlers::{ContextHandler, ExecutionGraphHandler, SchedHandler};
use crate::layout::EventLayout;
use crate::model::SystemModel;

/// Priority assigned to handlers registered without an explicit one. Lower
/// priorities run earlier.
pub const DEFAULT_PRIORITY: i32 = 10;

/// Everything a handler may read or mutate while consuming one event.
/// Handlers receive this explicitly on each call instead of capturing
/// provider state at construction time.
pub struct BuildContext<'a> {
    pub system: &'a mut SystemModel,
    pub graph: &'a mut Graph,
    pub layout: &'a dyn EventLayout,
}

/// One pluggable stage of the pipeline: consumes one event and may mutate
/// the system model and the graph.
pub trait EventHandler {
    fn handle_event(&mut self, event: &Event, ctx: &mut BuildContext<'_>) -> Result<()>;
}

/// Parse a handler priority carried as a configuration string. Unparsable
/// values are logged and fall back to [`DEFAULT_PRIORITY`].
pub fn parse_priority(value: Option<&str>) -> i32 {
    let Some(text) = value else {
        return DEFAULT_PRIORITY;
    };
    text.trim().parse().unwrap_or_else(|_| {
        warn!("invalid handler priority `{text}`, falling back to {DEFAULT_PRIORITY}");
        DEFAULT_PRIORITY
    })
}

struct RegisteredHandler {
    priority: i32,
    handler: Box<dyn EventHandler>,
}

/// Owns the construction lifecycle: the system model, the graph being
/// built, and the ordered handler list.
///
/// Usage is strictly sequential: assign a graph, dispatch every trace event
/// in timestamp order, then call [`GraphProvider::finish`] exactly once.
pub struct GraphProvider {
    system: SystemModel,
    layout: Box<dyn EventLayout>,
    graph: Option<Graph>,
    handlers: Vec<RegisteredHandler>,
    finished: bool,
}

impl GraphProvider {
    pub fn new(layout: impl EventLayout + 'static) -> Self {
        Self {
            system: SystemModel::new(),
            layout: Box::new(layout),
            graph: None,
            handlers: Vec::new(),
            finished: false,
        }
    }

    /// A provider with the standard kernel handlers registered: scheduler
    /// state, interrupt-context stack, and the execution-graph builder.
    pub fn with_default_handlers(layout: impl EventLayout + 'static) -> Self {
        let mut provider = Self::new(layout);
        provider.register_handler(|_| Ok(Box::new(SchedHandler)));
        provider.register_handler(|_| Ok(Box::new(ContextHandler)));
        provider
            .register_handler_with_priority(20, |_| Ok(Box::new(ExecutionGraphHandler::new())));
        provider
    }

    pub fn assign_graph(&mut self, graph: Graph) {
        self.graph = Some(graph);
    }

    /// Register a handler at [`DEFAULT_PRIORITY`].
    pub fn register_handler<F>(&mut self, create: F)
    where
        F: FnOnce(&Self) -> Result<Box<dyn EventHandler>>,
    {
        self.register_handler_with_priority(DEFAULT_PRIORITY, create);
    }

    /// Register a handler built by `create`. A handler that fails to
    /// construct is logged and skipped; the pipeline keeps the rest.
    /// Handlers with equal priority run in registration order.
    pub fn register_handler_with_priority<F>(&mut self, priority: i32, create: F)
    where
        F: FnOnce(&Self) -> Result<Box<dyn EventHandler>>,
    {
        match create(self) {
            Ok(handler) => {
                self.handlers.push(RegisteredHandler { priority, handler });
                self.handlers.sort_by_key(|registered| registered.priority);
            }
            Err(error) => {
                warn!("skipping handler that failed to construct: {error:#}");
            }
        }
    }

    /// Deliver one trace event to every registered handler, in priority
    /// order. Events must arrive in trace timestamp order; each event is
    /// delivered exactly once, with no retries.
    pub fn dispatch(&mut self, event: &Event) -> Result<()> {
        assert!(!self.finished, "dispatch called after finish");
        let graph = self
            .graph
            .as_mut()
            .expect("dispatch called before a graph was assigned");
        let mut ctx = BuildContext {
            system: &mut self.system,
            graph,
            layout: &*self.layout,
        };
        for registered in &mut self.handlers {
            registered.handler.handle_event(event, &mut ctx)?;
        }
        Ok(())
    }

    /// End the construction pass and run the simplification rewrite.
    ///
    /// Must be called exactly once, after the last event: the rewrite
    /// mutates the graph destructively and is not idempotent, so calling
    /// this twice, or without an assigned graph, panics.
    pub fn finish(&mut self) {
        assert!(
            self.graph.is_some(),
            "finish called before a graph was assigned"
        );
        assert!(!self.finished, "finish called twice");
        self.finished = true;
        self.simplify();
    }

    pub fn system(&self) -> &SystemModel {
        &self.system
    }

    pub fn layout(&self) -> &dyn EventLayout {
        &*self.layout
    }

    pub fn graph(&self) -> Option<&Graph> {
        self.graph.as_ref()
    }

    pub fn into_graph(self) -> Option<Graph> {
        self.graph
    }

    /// Collapse pass-through hops over synthetic (`tid == -1`) workers: a
    /// vertical edge into a synthetic vertex, one horizontal step, and a
    /// vertical edge out become one direct vertical edge between the real
    /// endpoints, keeping the incoming edge's kind.
    ///
    /// Single forward pass over the synthetic vertices collected up front;
    /// chains of two or more consecutive synthetic hops are not collapsed
    /// further. Partial patterns are left untouched.
    fn simplify(&mut self) {
        let graph = self.graph.as_mut().expect("no graph assigned");

        let synthetic = graph
            .workers()
            .filter(|worker| worker.lock().unwrap().is_unknown())
            .flat_map(|worker| graph.nodes_of(worker))
            .copied()
            .collect_vec();

        for vertex in synthetic {
            let Some(horizontal) = graph.edge(vertex, EdgeDirection::OutgoingHorizontal) else {
                continue;
            };
            let Some(incoming) = graph.edge(vertex, EdgeDirection::IncomingVertical) else {
                continue;
            };
            let next = graph.edge_target(horizontal);
            let Some(outgoing) = graph.edge(next, EdgeDirection::OutgoingVertical) else {
                continue;
            };

            let source = graph.edge_source(incoming);
            let target = graph.edge_target(outgoing);
            let kind = graph.edge_kind(incoming);

            graph.remove_edge(vertex, EdgeDirection::IncomingVertical);
            graph.remove_edge(next, EdgeDirection::OutgoingVertical);
            graph.link_vertical(source, target, kind);
            debug!(
                "collapsed synthetic hop at {} ns into a direct {kind} edge",
                graph.timestamp(vertex).timestamp_nanos()
            );
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::{Arc, Mutex};

    use color_eyre::eyre::eyre;

    use super::*;
    use crate::graph::EdgeType;
    use crate::layout::DefaultLayout;
    use crate::model::{HostThread, Time, Worker, WorkerRef, UNKNOWN_TID};

    fn worker(tid: i64) -> WorkerRef {
        Arc::new(Mutex::new(Worker::new(
            HostThread::new("h1", tid),
            format!("t{tid}"),
            Time::from_nanos(0),
        )))
    }

    fn ts(nanos: i64) -> Time {
        Time::from_nanos(nanos)
    }

    fn provider_with_graph() -> GraphProvider {
        let mut provider = GraphProvider::new(DefaultLayout);
        provider.assign_graph(Graph::new());
        provider
    }

    /// Every edge around every vertex of every worker, for structural
    /// comparison.
    type Snapshot = Vec<(usize, Option<(usize, usize, EdgeType)>)>;

    fn snapshot(graph: &Graph, workers: &[&WorkerRef]) -> Snapshot {
        let directions = [
            EdgeDirection::OutgoingVertical,
            EdgeDirection::IncomingVertical,
            EdgeDirection::OutgoingHorizontal,
            EdgeDirection::IncomingHorizontal,
        ];
        let mut shape = Vec::new();
        for worker in workers {
            for (i, &vertex) in graph.nodes_of(worker).iter().enumerate() {
                for direction in directions {
                    let edge = graph.edge(vertex, direction).map(|edge| {
                        (
                            graph.timestamp(graph.edge_source(edge)).timestamp_nanos() as usize,
                            graph.timestamp(graph.edge_target(edge)).timestamp_nanos() as usize,
                            graph.edge_kind(edge),
                        )
                    });
                    shape.push((i, edge));
                }
            }
        }
        shape
    }

    #[test]
    fn pass_through_hop_is_collapsed() {
        let mut provider = provider_with_graph();
        let a = worker(5);
        let k = worker(UNKNOWN_TID);
        let b = worker(7);

        let graph = provider.graph.as_mut().unwrap();
        let a1 = graph.add_vertex(&a, ts(0));
        let k1 = graph.add_vertex(&k, ts(1));
        let k2 = graph.add_vertex(&k, ts(2));
        let b1 = graph.add_vertex(&b, ts(3));
        graph.link_vertical(a1, k1, EdgeType::Wakeup);
        graph.link_horizontal(k1, k2, EdgeType::Running);
        graph.link_vertical(k2, b1, EdgeType::Unknown);

        provider.finish();

        let graph = provider.graph().unwrap();
        assert!(graph.edge(k1, EdgeDirection::IncomingVertical).is_none());
        assert!(graph.edge(k2, EdgeDirection::OutgoingVertical).is_none());

        let direct = graph.edge(a1, EdgeDirection::OutgoingVertical).unwrap();
        assert_eq!(graph.edge_target(direct), b1);
        // The new edge keeps the kind of the edge that entered the hop.
        assert_eq!(graph.edge_kind(direct), EdgeType::Wakeup);
        assert_eq!(graph.edge(b1, EdgeDirection::IncomingVertical), Some(direct));

        // The synthetic timeline itself stays in place.
        assert_eq!(
            graph.edge(k1, EdgeDirection::OutgoingHorizontal),
            graph.edge(k2, EdgeDirection::IncomingHorizontal)
        );
    }

    #[test]
    fn real_worker_graph_is_untouched() {
        let mut provider = provider_with_graph();
        let a = worker(5);
        let b = worker(7);

        let graph = provider.graph.as_mut().unwrap();
        let a1 = graph.add_vertex(&a, ts(0));
        let a2 = graph.add_vertex(&a, ts(2));
        let b1 = graph.add_vertex(&b, ts(1));
        let b2 = graph.add_vertex(&b, ts(3));
        graph.link_horizontal(a1, a2, EdgeType::Running);
        graph.link_horizontal(b1, b2, EdgeType::Blocked);
        graph.link_vertical(a2, b2, EdgeType::Wakeup);

        let before = snapshot(graph, &[&a, &b]);
        provider.finish();
        let after = snapshot(provider.graph().unwrap(), &[&a, &b]);
        assert_eq!(before, after);
    }

    #[test]
    fn partial_patterns_are_left_alone() {
        let mut provider = provider_with_graph();
        let a = worker(5);
        let k = worker(UNKNOWN_TID);
        let b = worker(7);

        let graph = provider.graph.as_mut().unwrap();
        // Incoming vertical but no outgoing horizontal.
        let a1 = graph.add_vertex(&a, ts(0));
        let k1 = graph.add_vertex(&k, ts(1));
        let entering = graph.link_vertical(a1, k1, EdgeType::Wakeup);
        // Full horizontal step but no outgoing vertical on the next vertex.
        let k2 = graph.add_vertex(&k, ts(2));
        let k3 = graph.add_vertex(&k, ts(3));
        graph.link_horizontal(k2, k3, EdgeType::Running);
        let b1 = graph.add_vertex(&b, ts(2));
        graph.link_vertical(b1, k2, EdgeType::Network);

        provider.finish();

        let graph = provider.graph().unwrap();
        assert_eq!(graph.edge(k1, EdgeDirection::IncomingVertical), Some(entering));
        assert!(graph.edge(k2, EdgeDirection::IncomingVertical).is_some());
        assert!(graph.edge(k3, EdgeDirection::OutgoingVertical).is_none());
    }

    #[test]
    #[should_panic(expected = "finish called twice")]
    fn finish_twice_is_a_programming_error() {
        let mut provider = provider_with_graph();
        provider.finish();
        provider.finish();
    }

    #[test]
    #[should_panic(expected = "before a graph was assigned")]
    fn finish_without_graph_is_a_programming_error() {
        let mut provider = GraphProvider::new(DefaultLayout);
        provider.finish();
    }

    struct Recorder {
        tag: &'static str,
        order: Arc<Mutex<Vec<&'static str>>>,
    }

    impl EventHandler for Recorder {
        fn handle_event(&mut self, _event: &Event, _ctx: &mut BuildContext<'_>) -> Result<()> {
            self.order.lock().unwrap().push(self.tag);
            Ok(())
        }
    }

    #[test]
    fn handlers_run_in_priority_order_with_stable_ties() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut provider = provider_with_graph();
        for (priority, tag) in [(20, "late"), (10, "first"), (10, "second")] {
            let order = Arc::clone(&order);
            provider.register_handler_with_priority(priority, move |_| {
                Ok(Box::new(Recorder { tag, order }))
            });
        }

        let event = Event::new("h1", 0, "sched_switch", ts(0));
        provider.dispatch(&event).unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "late"]);
    }

    #[test]
    fn failed_handler_construction_is_skipped() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut provider = provider_with_graph();
        provider.register_handler(|_| Err(eyre!("missing configuration")));
        {
            let order = Arc::clone(&order);
            provider.register_handler(move |_| Ok(Box::new(Recorder { tag: "ok", order })));
        }

        let event = Event::new("h1", 0, "sched_switch", ts(0));
        provider.dispatch(&event).unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["ok"]);
    }

    #[test]
    fn priority_strings_fall_back_to_default() {
        assert_eq!(parse_priority(None), DEFAULT_PRIORITY);
        assert_eq!(parse_priority(Some("3")), 3);
        assert_eq!(parse_priority(Some(" 25 ")), 25);
        assert_eq!(parse_priority(Some("soon")), DEFAULT_PRIORITY);
    }
}
