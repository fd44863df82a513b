//! Tool calls routed to the built-in interpreter.

use std::path::Path;
use std::sync::Arc;

use matbridge_core::fakes::MemoryFigureSink;
use matbridge_core::tools::{
    CREATE_SCRIPT, EXECUTE_SCRIPT, EXECUTE_SCRIPT_SECTION, GET_SCRIPT_SECTIONS,
    GET_SESSION_STATUS, GET_WORKSPACE,
};
use matbridge_core::{BridgeConfig, ExecutionController, SessionPool, ToolRouter};
use matbridge_interp::{InterpEngine, DEFAULT_STEP_LIMIT};
use serde_json::{json, Value};

struct Harness {
    router: ToolRouter,
    sink: Arc<MemoryFigureSink>,
    _dir: tempfile::TempDir,
}

fn harness_with_limit(step_limit: u64) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(BridgeConfig {
        scripts_dir: dir.path().join("scripts"),
        output_dir: dir.path().join("output"),
        ..BridgeConfig::default()
    });
    let pool = Arc::new(SessionPool::new(
        Arc::new(InterpEngine::factory(step_limit)),
        &config,
    ));
    let sink = Arc::new(MemoryFigureSink::new());
    let controller = ExecutionController::new(config, sink.clone());
    Harness {
        router: ToolRouter::new(pool, controller),
        sink,
        _dir: dir,
    }
}

fn harness() -> Harness {
    harness_with_limit(DEFAULT_STEP_LIMIT)
}

async fn run(h: &Harness, code: &str) -> Value {
    h.router.call(EXECUTE_SCRIPT, json!({ "code": code })).await
}

async fn create(h: &Harness, name: &str, code: &str) -> String {
    let out = h
        .router
        .call(CREATE_SCRIPT, json!({ "name": name, "code": code }))
        .await;
    assert_eq!(out["success"], json!(true), "{out}");
    out["path"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn small_matrix_comes_back_in_full() {
    let h = harness();
    let out = run(&h, "A = [1 2 3; 4 5 6; 7 8 10];").await;
    assert_eq!(out["success"], json!(true), "{out}");
    let a = &out["workspace"]["A"];
    assert_eq!(a["_type"], json!("full"));
    assert_eq!(a["shape"], json!([3, 3]));
    assert_eq!(a["dtype"], json!("double"));
    assert_eq!(
        a["data"],
        json!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 10.0]])
    );
}

#[tokio::test]
async fn medium_signal_is_summarized() {
    let h = harness();
    let out = run(&h, "t = linspace(0, 10, 500);\ny = sin(t);").await;
    assert_eq!(out["success"], json!(true), "{out}");
    let y = &out["workspace"]["y"];
    assert_eq!(y["_type"], json!("summary"));
    assert_eq!(y["shape"], json!([1, 500]));
    assert_eq!(y["total_elements"], json!(500));
    assert_eq!(y["memory_usage_bytes"], json!(4000));

    let step = 10.0 / 499.0;
    let mut t: Vec<f64> = (0..500).map(|i| step * i as f64).collect();
    t[499] = 10.0;
    let expected: Vec<f64> = t.iter().map(|v| v.sin()).collect();
    let min = expected.iter().copied().fold(f64::INFINITY, f64::min);
    let max = expected.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mean = expected.iter().sum::<f64>() / 500.0;

    assert_eq!(y["min"].as_f64().unwrap(), min);
    assert_eq!(y["max"].as_f64().unwrap(), max);
    assert!((y["mean"].as_f64().unwrap() - mean).abs() < 1e-12);

    let sample: Vec<f64> = y["sample_data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_f64().unwrap())
        .collect();
    assert_eq!(sample, expected[..10].to_vec());
}

#[tokio::test]
async fn large_matrix_is_reduced_to_metadata() {
    let h = harness();
    let out = run(&h, "big = zeros(500);").await;
    assert_eq!(out["success"], json!(true), "{out}");
    let big = &out["workspace"]["big"];
    assert_eq!(big["_type"], json!("metadata"));
    assert_eq!(big["shape"], json!([500, 500]));
    assert!(big["note"].as_str().unwrap().contains("250000"));
    assert!(big["sample_data"].as_array().unwrap().len() <= 3);
}

#[tokio::test]
async fn workspace_persists_between_calls() {
    let h = harness();
    run(&h, "counter = 1;").await;
    let out = run(&h, "counter = counter + 41;").await;
    assert_eq!(out["workspace"]["counter"]["data"], json!(42.0));

    let ws = h.router.call(GET_WORKSPACE, json!({})).await;
    assert_eq!(ws["success"], json!(true));
    assert_eq!(ws["workspace"]["counter"]["data"], json!(42.0));
}

#[tokio::test]
async fn fault_keeps_earlier_assignments() {
    let h = harness();
    let out = run(&h, "a = 1;\nb = a + 1;\nc = missing_thing + 1;\nd = 4;").await;
    assert_eq!(out["success"], json!(false));
    assert_eq!(out["error"]["line"], json!(3));
    assert_eq!(
        out["error"]["identifier"],
        json!("MATLAB:UndefinedFunction")
    );
    assert!(out["error"]["message"]
        .as_str()
        .unwrap()
        .contains("missing_thing"));
    assert_eq!(out["workspace"]["b"]["data"], json!(2.0));
    assert!(out["workspace"].get("d").is_none());
}

#[tokio::test]
async fn oversized_allocation_is_a_fault_not_a_crash() {
    let h = harness();
    run(&h, "before = 5;").await;
    let out = run(&h, "huge = zeros(1, 2^62);").await;
    assert_eq!(out["success"], json!(false));
    assert_eq!(
        out["error"]["identifier"],
        json!("MATLAB:array:SizeLimitExceeded")
    );
    assert!(out["workspace"].get("huge").is_none());

    let status = h.router.call(GET_SESSION_STATUS, json!({})).await;
    assert_eq!(status["sessions"][0]["available"], json!(true));

    let out = run(&h, "after = before + 1;").await;
    assert_eq!(out["success"], json!(true), "{out}");
    assert_eq!(out["workspace"]["after"]["data"], json!(6.0));
}

#[tokio::test]
async fn printed_output_is_captured() {
    let h = harness();
    let out = run(&h, "fprintf('%d items\\n', 3);\ndisp('done')").await;
    assert_eq!(out["success"], json!(true), "{out}");
    assert_eq!(out["output_text"], json!("3 items\ndone\n"));
}

#[tokio::test]
async fn sections_run_against_shared_workspace() {
    let h = harness();
    let code = "%% Setup\nx = 1:5;\n%% Square\ny = x .^ 2;\n%% Report\ntotal = sum(y);\n";
    let path = create(&h, "analysis", code).await;

    let sections = h
        .router
        .call(GET_SCRIPT_SECTIONS, json!({ "path": path }))
        .await;
    assert_eq!(sections["sections"].as_array().unwrap().len(), 3);
    let digest = sections["script_digest"].clone();

    let first = h
        .router
        .call(
            EXECUTE_SCRIPT_SECTION,
            json!({ "path": path, "section_start": 1, "section_end": 1 }),
        )
        .await;
    assert_eq!(first["success"], json!(true), "{first}");
    assert!(first["workspace"].get("y").is_none());

    let rest = h
        .router
        .call(
            EXECUTE_SCRIPT_SECTION,
            json!({
                "path": path,
                "section_start": 2,
                "section_end": 3,
                "expected_digest": digest,
            }),
        )
        .await;
    assert_eq!(rest["success"], json!(true), "{rest}");
    assert_eq!(rest["workspace"]["total"]["data"], json!(55.0));
    assert_eq!(rest["script_digest"], digest);
}

#[tokio::test]
async fn fresh_workspace_section_run_cannot_see_earlier_sections() {
    let h = harness();
    let path = create(&h, "fresh", "%% A\nx = 2;\n%% B\ny = x * 3;\n").await;
    run(&h, "leftover = 1;").await;

    let out = h
        .router
        .call(
            EXECUTE_SCRIPT_SECTION,
            json!({
                "path": path,
                "section_start": 2,
                "section_end": 2,
                "maintain_workspace": false,
            }),
        )
        .await;
    assert_eq!(out["success"], json!(false));
    assert!(out["workspace"].get("leftover").is_none());
}

#[tokio::test]
async fn out_of_range_section_is_a_validation_error() {
    let h = harness();
    let path = create(&h, "short", "%% Only\nx = 1;\n").await;
    let out = h
        .router
        .call(
            EXECUTE_SCRIPT_SECTION,
            json!({ "path": path, "section_start": 2, "section_end": 4 }),
        )
        .await;
    assert_eq!(out["success"], json!(false));
    assert_eq!(out["error"]["kind"], json!("validation"));
}

#[tokio::test]
async fn stale_digest_is_rejected() {
    let h = harness();
    let path = create(&h, "moving", "%% One\nx = 1;\n").await;
    let out = h
        .router
        .call(
            EXECUTE_SCRIPT_SECTION,
            json!({
                "path": path,
                "section_start": 1,
                "section_end": 1,
                "expected_digest": "0000",
            }),
        )
        .await;
    assert_eq!(out["success"], json!(false));
    assert_eq!(out["error"]["kind"], json!("validation"));
}

#[tokio::test]
async fn figure_handle_becomes_error_marker() {
    let h = harness();
    let out = run(&h, "f = figure;\nz = 3;").await;
    assert_eq!(out["success"], json!(true), "{out}");
    assert_eq!(out["workspace"]["f"]["_type"], json!("error"));
    assert_eq!(out["workspace"]["z"]["data"], json!(3.0));
}

#[tokio::test]
async fn plots_are_exported_as_svg() {
    let h = harness();
    let out = run(
        &h,
        "x = linspace(0, 1, 20);\nplot(x, x .^ 2);\ntitle('Parabola');",
    )
    .await;
    assert_eq!(out["success"], json!(true), "{out}");
    let figures = out["figures"].as_array().unwrap();
    assert_eq!(figures.len(), 1);
    assert_eq!(figures[0]["format"], json!("svg"));
    assert_eq!(figures[0]["title"], json!("Parabola"));

    let path = figures[0]["path"].as_str().unwrap();
    let bytes = h.sink.get(Path::new(path)).unwrap();
    let svg = String::from_utf8(bytes).unwrap();
    assert!(svg.starts_with("<svg"));
    assert!(svg.contains("Parabola"));

    let unchanged = run(&h, "k = 1;").await;
    assert!(unchanged["figures"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn plot_capture_can_be_disabled() {
    let h = harness();
    let out = h
        .router
        .call(
            EXECUTE_SCRIPT,
            json!({ "code": "plot(1:3)", "capture_plots": false }),
        )
        .await;
    assert_eq!(out["success"], json!(true), "{out}");
    assert!(out["figures"].as_array().unwrap().is_empty());
    assert!(h.sink.paths().is_empty());
}

#[tokio::test]
async fn workspace_vars_are_assigned_before_running() {
    let h = harness();
    let out = h
        .router
        .call(
            EXECUTE_SCRIPT,
            json!({
                "code": "w = v * 2;",
                "workspace_vars": { "v": { "_type": "full", "shape": [1, 3], "dtype": "double", "data": [1.0, 2.0, 3.0] } },
            }),
        )
        .await;
    assert_eq!(out["success"], json!(true), "{out}");
    assert_eq!(out["workspace"]["w"]["data"], json!([2.0, 4.0, 6.0]));
}

#[tokio::test]
async fn exit_replaces_the_session() {
    let h = harness();
    run(&h, "kept = 1;").await;
    run(&h, "exit").await;

    let status = h.router.call(GET_SESSION_STATUS, json!({})).await;
    let sessions = status["sessions"].as_array().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["available"], json!(false));
    assert_eq!(sessions[0]["engine"], json!("builtin"));

    let out = run(&h, "again = 2;").await;
    assert_eq!(out["success"], json!(true), "{out}");
    assert!(out["workspace"].get("kept").is_none());
    assert_eq!(out["workspace"]["again"]["data"], json!(2.0));
}

#[tokio::test]
async fn runaway_loop_hits_the_step_limit() {
    let h = harness_with_limit(10_000);
    let out = run(&h, "n = 0;\nwhile true\n  n = n + 1;\nend").await;
    assert_eq!(out["success"], json!(false));
    assert_eq!(out["error"]["identifier"], json!("matbridge:stepLimit"));
    assert!(out["workspace"]["n"]["data"].as_f64().unwrap() > 0.0);
}
