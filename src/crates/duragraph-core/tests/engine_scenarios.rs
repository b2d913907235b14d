//! End-to-end engine scenarios
//!
//! These drive whole graphs through the engine together with the run and
//! interrupt aggregates and the in-memory repositories.

use duragraph_core::error::DomainError;
use duragraph_core::events::RecordingEventSink;
use duragraph_core::execution::{
    EngineConfig, ExecutionContext, ExecutionOutcome, ExecutionState, GraphEngine, ResumeFrom,
};
use duragraph_core::graph::Graph;
use duragraph_core::humanloop::Interrupt;
use duragraph_core::repository::{
    InMemoryInterruptRepository, InMemoryRunRepository, InterruptRepository, RunRepository,
};
use duragraph_core::run::{NewRun, Run, RunStatus};
use duragraph_core::StateMap;
use serde_json::{json, Value};
use std::sync::Arc;

fn graph(value: Value) -> Graph {
    Graph::from_value("assistant-1", value).unwrap()
}

fn map(value: Value) -> StateMap {
    value.as_object().cloned().unwrap_or_default()
}

fn approval_graph() -> Graph {
    graph(json!({
        "nodes": [
            {"id": "start", "type": "start"},
            {"id": "review", "type": "human", "config": {
                "reason": "approve refund",
                "tool_calls": [{"id": "call-1", "name": "refund"}]
            }},
            {"id": "end", "type": "end"}
        ],
        "edges": [
            {"source": "start", "target": "review"},
            {"source": "review", "target": "end"}
        ]
    }))
}

/// A chain of `levels` subgraph nodes, each embedding the next level inline
fn nested(levels: u32) -> Value {
    if levels == 0 {
        return json!({
            "nodes": [
                {"id": "start", "type": "start"},
                {"id": "leaf", "type": "tool", "config": {"tool": "lookup"}},
                {"id": "end", "type": "end"}
            ],
            "edges": [
                {"source": "start", "target": "leaf"},
                {"source": "leaf", "target": "end"}
            ]
        });
    }
    json!({
        "nodes": [
            {"id": "start", "type": "start"},
            {"id": format!("level-{levels}"), "type": "subgraph", "config": {"graph": nested(levels - 1)}},
            {"id": "end", "type": "end"}
        ],
        "edges": [
            {"source": "start", "target": format!("level-{levels}")},
            {"source": format!("level-{levels}"), "target": "end"}
        ]
    })
}

#[tokio::test]
async fn test_llm_run_lifecycle() {
    let runs = InMemoryRunRepository::new();
    let mut run = Run::create(NewRun::new("thread-1", "assistant-1").with_input(map(json!({"question": "hi"})))).unwrap();
    run.start().unwrap();
    runs.save(&run).await.unwrap();

    let graph = graph(json!({
        "nodes": [
            {"id": "start", "type": "start"},
            {"id": "answer", "type": "llm", "config": {"model": "gpt-4o"}},
            {"id": "end", "type": "end"}
        ],
        "edges": [
            {"source": "start", "target": "answer"},
            {"source": "answer", "target": "end"}
        ]
    }));

    let sink = RecordingEventSink::new();
    let ctx = ExecutionContext::new(&run.id, &run.thread_id).with_event_sink(Arc::new(sink.clone()));
    let outcome = GraphEngine::default()
        .execute(&ctx, &graph, run.input.clone())
        .await
        .unwrap();

    let ExecutionOutcome::Completed(output) = outcome else {
        panic!("expected completion");
    };
    assert_eq!(output["question"], json!("hi"));
    assert_eq!(output["response"], json!("LLM response placeholder"));
    assert_eq!(output["model"], json!("gpt-4o"));
    assert_eq!(sink.count("node.completed"), 3);

    let mut run = runs.find_by_id(&run.id).await.unwrap();
    run.complete(output).unwrap();
    runs.save(&run).await.unwrap();

    let stored = runs.find_by_id(&run.id).await.unwrap();
    assert_eq!(stored.status, RunStatus::Completed);
    assert!(stored.completed_at.is_some());
}

#[tokio::test]
async fn test_human_interrupt_then_resume() {
    let runs = InMemoryRunRepository::new();
    let interrupts = InMemoryInterruptRepository::new();
    let engine = GraphEngine::default();
    let graph = approval_graph();

    let mut run = Run::create(NewRun::new("thread-1", "assistant-1").with_input(map(json!({"amount": 40})))).unwrap();
    run.start().unwrap();
    let ctx = ExecutionContext::new(&run.id, &run.thread_id);

    let outcome = engine.execute(&ctx, &graph, run.input.clone()).await.unwrap();
    let ExecutionOutcome::Interrupted { signal, snapshot } = outcome else {
        panic!("expected interrupt");
    };
    assert_eq!(signal.node_id, "review");
    assert_eq!(signal.reason, "approve refund");

    let interrupt = Interrupt::from_signal(&run.id, &signal, &snapshot).unwrap();
    interrupts.save(&interrupt).await.unwrap();
    run.requires_action(&interrupt.id, &signal.reason, interrupt.tool_calls.clone())
        .unwrap();
    runs.save(&run).await.unwrap();
    assert_eq!(
        runs.find_by_id(&run.id).await.unwrap().status,
        RunStatus::RequiresAction
    );

    // Resume from what was persisted, not from the in-flight values.
    let mut interrupt = interrupts.find_by_id(&interrupt.id).await.unwrap();
    let mut run = runs.find_by_id(&run.id).await.unwrap();
    let tool_outputs = vec![json!({"tool_call_id": "call-1", "output": "approved"})];
    let patch = map(json!({"approved": true}));

    interrupt.resolve(tool_outputs.clone()).unwrap();
    interrupts.save(&interrupt).await.unwrap();
    run.resume(&interrupt.id, tool_outputs, patch.clone()).unwrap();
    runs.save(&run).await.unwrap();

    let state = ExecutionState::restore(&run.id, interrupt.snapshot().unwrap().unwrap());
    let outcome = engine
        .resume(
            &ctx,
            &graph,
            state,
            ResumeFrom::new(&interrupt.node_id, interrupt.gate(), patch),
        )
        .await
        .unwrap();

    let ExecutionOutcome::Completed(output) = outcome else {
        panic!("expected completion after resume");
    };
    assert_eq!(output["amount"], json!(40));
    assert_eq!(output["approved"], json!(true));
    assert!(interrupts.find_unresolved_by_run(&run.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unconditional_cycle_is_cut_off() {
    let graph = graph(json!({
        "nodes": [
            {"id": "start", "type": "start"},
            {"id": "check", "type": "condition"},
            {"id": "end", "type": "end"}
        ],
        "edges": [
            {"source": "start", "target": "check"},
            {"source": "check", "target": "check"},
            {"source": "check", "target": "end", "condition": {"condition_result": false}}
        ]
    }));

    let engine = GraphEngine::new(EngineConfig {
        max_iterations: 5,
        ..EngineConfig::default()
    });
    let err = engine
        .execute(&ExecutionContext::new("run-1", "t"), &graph, StateMap::new())
        .await
        .unwrap_err();

    match err {
        DomainError::MaxIterations { node, limit } => {
            assert_eq!(node, "check");
            assert_eq!(limit, 5);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_nested_subgraphs_within_depth_complete() {
    let engine = GraphEngine::new(EngineConfig {
        max_subgraph_depth: 2,
        ..EngineConfig::default()
    });
    let graph = graph(nested(2));

    let outcome = engine
        .execute(
            &ExecutionContext::new("run-1", "t"),
            &graph,
            map(json!({"query": "order 7"})),
        )
        .await
        .unwrap();

    let ExecutionOutcome::Completed(output) = outcome else {
        panic!("expected completion");
    };
    assert_eq!(output["tool"], json!("lookup"));
    assert_eq!(output["query"], json!("order 7"));
}

#[tokio::test]
async fn test_nesting_past_depth_limit_fails() {
    let engine = GraphEngine::new(EngineConfig {
        max_subgraph_depth: 2,
        ..EngineConfig::default()
    });
    let graph = graph(nested(3));

    let err = engine
        .execute(&ExecutionContext::new("run-1", "t"), &graph, StateMap::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DomainError::SubgraphDepthExceeded { depth: 3, max: 2 }
    ));
    assert!(err.is_execution_fatal());
}

#[tokio::test]
async fn test_interrupt_inside_subgraph_pauses_parent() {
    let graph = graph(json!({
        "nodes": [
            {"id": "start", "type": "start"},
            {"id": "approval", "type": "subgraph", "config": {"graph": {
                "id": "approval-flow",
                "nodes": [
                    {"id": "start", "type": "start"},
                    {"id": "ask", "type": "human", "config": {"reason": "sign off"}},
                    {"id": "end", "type": "end"}
                ],
                "edges": [
                    {"source": "start", "target": "ask"},
                    {"source": "ask", "target": "end"}
                ]
            }}},
            {"id": "end", "type": "end"}
        ],
        "edges": [
            {"source": "start", "target": "approval"},
            {"source": "approval", "target": "end"}
        ]
    }));

    let outcome = GraphEngine::default()
        .execute(&ExecutionContext::new("run-1", "t"), &graph, StateMap::new())
        .await
        .unwrap();

    let ExecutionOutcome::Interrupted { signal, .. } = outcome else {
        panic!("expected interrupt");
    };
    assert_eq!(signal.node_id, "approval");
    assert_eq!(signal.reason, "sign off");
    assert_eq!(signal.payload["graph_id"], json!("approval-flow"));
    assert_eq!(signal.payload["subgraph"]["node_id"], json!("ask"));
}

#[tokio::test]
async fn test_condition_routes_on_global_state() {
    let graph = graph(json!({
        "nodes": [
            {"id": "start", "type": "start"},
            {"id": "triage", "type": "condition"},
            {"id": "refund", "type": "tool", "config": {"tool": "refund"}},
            {"id": "escalate", "type": "tool", "config": {"tool": "escalate"}},
            {"id": "end_refund", "type": "end"},
            {"id": "end_escalate", "type": "end"}
        ],
        "edges": [
            {"source": "start", "target": "triage"},
            {"source": "triage", "target": "refund", "condition": {"tier": "gold"}},
            {"source": "triage", "target": "escalate", "condition": {"tier": "basic"}},
            {"source": "refund", "target": "end_refund"},
            {"source": "escalate", "target": "end_escalate"}
        ]
    }));

    let sink = RecordingEventSink::new();
    let ctx = ExecutionContext::new("run-1", "t").with_event_sink(Arc::new(sink.clone()));
    let outcome = GraphEngine::default()
        .execute(&ctx, &graph, map(json!({"tier": "gold"})))
        .await
        .unwrap();

    // Only one branch runs, so neither end node sees every node completed and
    // the queue drains back to the global state.
    let ExecutionOutcome::Completed(output) = outcome else {
        panic!("expected completion");
    };
    assert_eq!(output["tool"], json!("refund"));
    let started: Vec<String> = sink
        .events()
        .iter()
        .filter_map(|e| match e {
            duragraph_core::DomainEvent::Execution(
                duragraph_core::events::ExecutionEvent::NodeStarted { node_id, .. },
            ) => Some(node_id.clone()),
            _ => None,
        })
        .collect();
    assert!(started.contains(&"refund".to_string()));
    assert!(!started.contains(&"escalate".to_string()));
}
