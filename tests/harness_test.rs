use std::time::{Duration, Instant};

use anyhow::Result;
use oscsim::script::Resource;
use oscsim::{CapabilityTable, ExecutionError, ExecutionOutcome, Harness, Limits};
use serde_json::{json, Value};

fn success(outcome: ExecutionOutcome) -> (Value, String) {
    match outcome {
        ExecutionOutcome::Success { result, output } => (result, output),
        ExecutionOutcome::Failure(err) => panic!("expected success, got {err}"),
    }
}

fn failure(outcome: ExecutionOutcome) -> ExecutionError {
    match outcome {
        ExecutionOutcome::Failure(err) => err,
        ExecutionOutcome::Success { result, .. } => panic!("expected failure, got {result}"),
    }
}

#[tokio::test]
async fn simulate_result_and_output() -> Result<()> {
    let harness = Harness::default();
    let script = "result = simulate(mass=1.0, damping=0.5, t_end=1.0, dt=0.1)\nprint('samples:', 11)\n";
    let (result, output) = success(harness.execute(script).await);

    let times = result["time"].as_array().expect("time column");
    let positions = result["position"].as_array().expect("position column");
    assert_eq!(times.len(), 11);
    assert_eq!(positions.len(), 11);
    assert_eq!(times[0], json!(0.0));
    assert_eq!(positions[0], json!(1.0));
    assert_eq!(output, "samples: 11\n");
    Ok(())
}

#[tokio::test]
async fn scripts_need_not_call_simulate() -> Result<()> {
    let (result, output) = success(Harness::default().execute("result = 1 + 2\n").await);
    assert_eq!(result, json!(3));
    assert_eq!(output, "");
    Ok(())
}

#[tokio::test]
async fn names_outside_the_table_are_faults() -> Result<()> {
    let harness = Harness::default();
    for script in ["import os\n", "result = open('/etc/passwd')\n", "result = __import__\n"] {
        let err = failure(harness.execute(script).await);
        assert_eq!(err.kind(), "script_fault", "{script}: {err}");
    }

    let bare = Harness::new(CapabilityTable::empty(), Limits::default());
    let err = failure(bare.execute("result = simulate()\n").await);
    assert_eq!(err.to_string(), "line 1: NameError: name 'simulate' is not defined");
    Ok(())
}

#[tokio::test]
async fn missing_result_has_no_result_key() -> Result<()> {
    let outcome = Harness::default().execute("trajectory = simulate()\nprint('done')\n").await;
    let json = serde_json::to_value(&outcome)?;
    assert!(json.get("result").is_none());
    assert!(json.get("output").is_none());
    assert!(json["error"].as_str().unwrap_or_default().contains("`result`"));
    assert_eq!(failure(outcome).kind(), "missing_result");
    Ok(())
}

#[tokio::test]
async fn output_is_captured_verbatim() -> Result<()> {
    let script = "print('first line')\nprint('second', 2, 0.5, sep=', ')\nprint('no newline', end='')\nresult = None\n";
    let (result, output) = success(Harness::default().execute(script).await);
    assert_eq!(result, Value::Null);
    assert_eq!(output, "first line\nsecond, 2, 0.5\nno newline");
    Ok(())
}

#[tokio::test]
async fn zero_mass_is_reported_as_a_fault() -> Result<()> {
    let err = failure(Harness::default().execute("result = simulate(mass=0)\n").await);
    assert_eq!(err.kind(), "script_fault");
    assert!(err.to_string().contains("mass must be greater than zero"), "{err}");
    Ok(())
}

#[tokio::test]
async fn infinite_loop_hits_the_time_limit() -> Result<()> {
    let limits = Limits { timeout: Duration::from_millis(200), max_steps: u64::MAX, ..Limits::default() };
    let harness = Harness::new(CapabilityTable::with_defaults(), limits);

    let started = Instant::now();
    let err = failure(harness.execute("while True:\n    pass\n").await);
    assert_eq!(err.resource(), Some(Resource::Time));
    assert!(started.elapsed() < Duration::from_secs(5));
    Ok(())
}

#[tokio::test]
async fn output_ceiling_is_enforced() -> Result<()> {
    let limits = Limits { max_output_bytes: 16, ..Limits::default() };
    let harness = Harness::new(CapabilityTable::with_defaults(), limits);
    let script = "for i in [1, 2, 3, 4, 5, 6, 7, 8]:\n    print('xxxx')\nresult = 1\n";
    let err = failure(harness.execute(script).await);
    assert_eq!(err.resource(), Some(Resource::Output));
    Ok(())
}

#[tokio::test]
async fn oversized_trajectories_are_refused() -> Result<()> {
    let limits = Limits { max_samples_per_call: 100, ..Limits::default() };
    let harness = Harness::new(CapabilityTable::with_defaults(), limits);
    let err = failure(harness.execute("result = simulate(t_end=10.0, dt=0.01)\n").await);
    assert_eq!(err.resource(), Some(Resource::Memory));
    Ok(())
}

#[tokio::test]
async fn namespace_does_not_leak_between_calls() -> Result<()> {
    let harness = Harness::default();
    let (first, _) = success(harness.execute("secret = 41\nresult = secret + 1\n").await);
    assert_eq!(first, json!(42));

    let err = failure(harness.execute("result = secret\n").await);
    assert!(err.to_string().contains("name 'secret' is not defined"), "{err}");
    Ok(())
}

#[tokio::test]
async fn explicit_return_wins_over_binding() -> Result<()> {
    let harness = Harness::default();
    let (result, _) = success(harness.execute("result = 1\nreturn {'x': 2}\nresult = 3\n").await);
    assert_eq!(result, json!({ "x": 2 }));

    let (result, _) = success(harness.execute("return\n").await);
    assert_eq!(result, Value::Null);
    Ok(())
}

#[tokio::test]
async fn non_finite_floats_become_null() -> Result<()> {
    let (result, _) = success(Harness::default().execute("big = 1e308 * 10\nresult = [big, -big, 1.5]\n").await);
    assert_eq!(result, json!([null, null, 1.5]));
    Ok(())
}

#[tokio::test]
async fn identical_scripts_give_identical_outcomes() -> Result<()> {
    let harness = Harness::default();
    let script = "result = simulate(damping=0.3, stiffness=4.0, v0=-1.0, t_end=5.0, dt=0.01)\n";
    let (a, b) = tokio::join!(harness.execute(script), harness.execute(script));
    assert_eq!(a, b);
    assert_eq!(serde_json::to_string(&a)?, serde_json::to_string(&b)?);
    Ok(())
}

#[tokio::test]
async fn outcome_json_shapes() -> Result<()> {
    let harness = Harness::default();
    let ok = serde_json::to_value(harness.execute("result = 'ok'\nprint('hi')\n").await)?;
    assert_eq!(ok, json!({ "result": "ok", "output": "hi\n" }));

    let failed = serde_json::to_value(harness.execute("result = 1 / 0\n").await)?;
    let keys: Vec<&String> = failed.as_object().map(|o| o.keys().collect()).unwrap_or_default();
    assert_eq!(keys, vec!["error"]);
    assert!(failed["error"].as_str().unwrap_or_default().contains("ZeroDivisionError"));
    Ok(())
}

#[tokio::test]
async fn hostile_nesting_fails_cleanly() -> Result<()> {
    let harness = Harness::default();
    let parens = format!("result = {}1{}\n", "(".repeat(5_000), ")".repeat(5_000));
    let err = failure(harness.execute(&parens).await);
    assert_eq!(err.kind(), "script_fault");
    assert!(err.to_string().contains("too many nested parentheses"), "{err}");

    let nested = "x = []\nn = 0\nwhile n < 1000000:\n    x = [x]\n    n += 1\nresult = x\n";
    let err = failure(harness.execute(nested).await);
    assert_eq!(err.resource(), Some(Resource::Memory));

    // the harness is still usable afterwards
    let (result, _) = success(harness.execute("result = -9223372036854775808\n").await);
    assert_eq!(result, json!(i64::MIN));
    Ok(())
}

#[test]
fn blocking_entry_point_matches_async() {
    let harness = Harness::default();
    let (result, output) = success(harness.execute_blocking("result = simulate(t_end=0.0)\nprint(result['time'])\n"));
    assert_eq!(result, json!({ "time": [0.0], "position": [1.0] }));
    assert_eq!(output, "[0.0]\n");
}
