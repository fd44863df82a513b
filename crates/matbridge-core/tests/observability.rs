//! Tracing events emitted along the execution path.

use std::sync::Arc;

use matbridge_core::fakes::{FakeEngine, MemoryFigureSink};
use matbridge_core::obs::{emit_session_poisoned, ExecutionSpan};
use matbridge_core::{BridgeConfig, ExecutionController, ExecutionRequest, Session};
use tracing_test::traced_test;

#[traced_test]
#[tokio::test]
async fn execution_emits_start_and_finish() {
    let controller = ExecutionController::new(
        Arc::new(BridgeConfig::default()),
        Arc::new(MemoryFigureSink::new()),
    );
    let session = Session::new(Box::new(FakeEngine::new()));
    controller
        .execute(&session, ExecutionRequest::inline("x = 1"))
        .await
        .unwrap();
    assert!(logs_contain("execution.started"));
    assert!(logs_contain("execution.finished"));
}

#[traced_test]
#[tokio::test]
async fn faults_and_marker_variables_are_logged() {
    let controller = ExecutionController::new(
        Arc::new(BridgeConfig::default()),
        Arc::new(MemoryFigureSink::new()),
    );
    let session = Session::new(Box::new(FakeEngine::new()));
    controller
        .execute(&session, ExecutionRequest::inline("h = opaque\nerror('nope')"))
        .await
        .unwrap();
    assert!(logs_contain("execution.fault"));
    assert!(logs_contain("snapshot.variable_fault"));
}

#[traced_test]
#[test]
fn poisoned_session_logs_warning() {
    emit_session_poisoned("s-1", "execution exceeded 10 ms");
    assert!(logs_contain("session.poisoned"));
}

#[traced_test]
#[test]
fn execution_span_enters() {
    let _span = ExecutionSpan::enter("s-2", 9);
    tracing::info!("inside span");
    assert!(logs_contain("inside span"));
}
