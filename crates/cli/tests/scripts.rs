//! End-to-end script evaluation: the demos under `demos/` must run clean
//! through the evaluator, as the binary would run them.

use std::path::PathBuf;
use weft_cli::config::WeftConfig;
use weft_cli::eval::Env;
use weft_runtime::value::Value;

fn demo(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../demos")
        .join(name)
}

fn fast_env() -> Env {
    Env::new(WeftConfig {
        tick_ms: Some(0),
        ..WeftConfig::default()
    })
}

#[test]
fn test_adder_demo() {
    let mut env = fast_env();
    env.load_file(&demo("adder.weft")).expect("adder runs clean");
}

#[test]
fn test_counter_demo_stops_itself() {
    let mut env = fast_env();
    env.load_file(&demo("counter.weft"))
        .expect("counter stops at 10");
    assert!(env.mesh().is_empty());
}

#[test]
fn test_subwires_demo_roundtrips() {
    let dir = tempfile::tempdir().unwrap();
    // The demo writes main.weft.bin relative to the working directory; run it
    // from a scratch dir by rewriting the paths
    let src = std::fs::read_to_string(demo("subwires.weft")).unwrap();
    let bin_path = dir.path().join("main.weft.bin");
    let src = src.replace("main.weft.bin", bin_path.to_str().unwrap());

    let mut env = fast_env();
    env.eval_str(&src).expect("subwires demo runs clean");
    assert!(bin_path.exists(), "the serialized wire landed on disk");
}

#[test]
fn test_script_error_reports() {
    let mut env = fast_env();
    let err = env.eval_str("(schedule (wire \"bad\" (Fail \"nope\"))) (run)");
    assert!(err.unwrap_err().0.contains("nope"));
}

#[test]
fn test_args_binding_shape() {
    let mut env = fast_env();
    env.define(
        "args",
        Value::Seq(vec![Value::String("one".into()), Value::String("two".into())]),
    );
    let v = env.eval_str("args").unwrap();
    assert_eq!(
        v,
        Value::Seq(vec![Value::String("one".into()), Value::String("two".into())])
    );
}
