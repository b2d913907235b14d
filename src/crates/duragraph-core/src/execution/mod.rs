//! Graph execution: state, executors, subgraphs and the engine

mod context;
mod engine;
mod executor;
mod outcome;
mod state;
mod stream;
mod subgraph;

pub use context::{Cancellation, ExecutionContext};
pub use engine::{EngineConfig, GraphEngine, DEFAULT_MAX_ITERATIONS, DEFAULT_MAX_SUBGRAPH_DEPTH};
pub use executor::{
    ConditionExecutor, ExecutorRegistry, HumanExecutor, LlmExecutor, LlmProvider, NodeExecutor,
    NodeResult, PassThroughExecutor, PlaceholderLlm, PlaceholderTools, ToolExecutor, ToolInvoker,
    DEFAULT_HUMAN_REASON,
};
pub use outcome::{ExecutionOutcome, Gate, InterruptSignal, ResumeFrom};
pub use state::{ExecutionState, ResumeSnapshot};
pub use stream::{StreamCallback, StreamChunk, StreamMode};
pub use subgraph::{GraphResolver, SubgraphExecutor, SubgraphRunner};
