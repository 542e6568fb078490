//! Error types for the simulation kernel.
//!
//! Every failure here is a construction-time or programming defect: a buffer that
//! does not match a port contract, two stages that cannot be wired together, or a
//! module asked for a transform it does not provide. None of them is retried.

/// Top-level error type for all kernel operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// A buffer handed to a module transform does not match its port contract.
    #[error(
        "{module}: buffer `{port}` holds {actual} elements, expected {expected} \
         ({per_frame} per frame x {batch_width} frames)"
    )]
    SizeMismatch {
        module: String,
        port: &'static str,
        per_frame: usize,
        batch_width: usize,
        expected: usize,
        actual: usize,
    },

    /// A wiring primitive is connected to a producer or consumer of the wrong shape.
    #[error("{primitive}: port {port} carries {actual} elements per frame, expected {expected}")]
    ShapeMismatch {
        primitive: String,
        port: usize,
        expected: usize,
        actual: usize,
    },

    /// A module does not implement the requested transform variant.
    #[error("{module}: `{operation}` is unimplemented")]
    UnimplementedOperation {
        module: String,
        operation: &'static str,
    },

    /// Two adjacent stages have incompatible geometry.
    #[error("{producer} -> {consumer}: {what} is {actual}, expected {expected}")]
    ContractViolation {
        producer: String,
        consumer: String,
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Dataflow graph construction failed.
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    /// Execution plan compilation failed.
    #[error("plan error: {0}")]
    Plan(#[from] PlanError),

    /// A token arrived on an edge whose previous token was never consumed.
    #[error("edge {producer} -> {consumer} overrun: previous token not consumed")]
    Overrun { producer: String, consumer: String },

    /// The dataflow engine ran out of events before the monitor produced an outcome.
    #[error("dataflow stalled before the monitor fired; tokens pending at {pending:?}")]
    Stalled { pending: Vec<String> },

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// A simulation worker thread panicked.
    #[error("worker {worker} panicked")]
    WorkerPanic { worker: usize },
}

/// Errors raised while building a dataflow graph.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// Node does not exist.
    #[error("node does not exist")]
    InvalidNode,
    /// Port index out of bounds or on the wrong side of the node.
    #[error("port does not exist on that side of the node")]
    InvalidPort,
    /// Connected ports carry different element kinds.
    #[error("element kind mismatch")]
    KindMismatch,
    /// Adding a forward edge would create a cycle.
    #[error("forward edge would create a cycle")]
    CycleDetected,
    /// Input or output port already has a connection.
    #[error("port already connected")]
    PortAlreadyConnected,
    /// A feedback edge has already been designated.
    #[error("a feedback edge is already designated")]
    FeedbackAlreadyDesignated,
    /// The designated feedback edge does not close a cycle.
    #[error("feedback edge does not close a cycle")]
    FeedbackWithoutCycle,
}

/// Errors raised while compiling a graph into an execution plan.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    /// Batch width must be at least one frame.
    #[error("batch width must be non-zero")]
    ZeroBatchWidth,
    /// The forward edges contain a cycle.
    #[error("forward edges contain a cycle")]
    CycleDetected,
    /// A required input port has no producer.
    #[error("input port {port} of `{node}` is not connected")]
    UnconnectedInput { node: String, port: usize },
    /// A predicate exists but no feedback edge closes its loop.
    #[error("predicate `{0}` gates no feedback edge")]
    MissingFeedback(String),
    /// The feedback edge is not driven by a predicate's continue side.
    #[error("feedback edge is not gated by a predicate")]
    FeedbackNotGated,
}

/// Shorthand for the crate's result type.
pub type Result<T, E = Error> = std::result::Result<T, E>;
