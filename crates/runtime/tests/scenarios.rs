//! End-to-end scenarios over the public surface: wires composed, scheduled
//! on a mesh, ticked to completion, serialized and reloaded.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use weft_runtime::compose::compose_wire;
use weft_runtime::context::Context;
use weft_runtime::error::ActivationError;
use weft_runtime::mesh::Mesh;
use weft_runtime::pool::run_blocking;
use weft_runtime::serialize::{decode_wire, encode_wire};
use weft_runtime::shard::{InstanceData, Shard, ShardRef, create_shard, register_shard};
use weft_runtime::types::{TypeInfo, Types, match_any};
use weft_runtime::value::{Value, ValueKind};
use weft_runtime::wire::{WireRef, WireState};

fn shard(name: &str, params: &[Value]) -> ShardRef {
    let s = create_shard(name).expect("core shard");
    for (i, p) in params.iter().enumerate() {
        s.set_param(i, p).expect("param accepted");
    }
    s
}

fn wire(name: &str, shards: Vec<ShardRef>) -> WireRef {
    let w = WireRef::new(name);
    for s in shards {
        w.add_shard(s).expect("shard added");
    }
    w
}

fn run_to_completion(mesh: &Mesh) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut ok = true;
    while !mesh.is_empty() {
        assert!(Instant::now() < deadline, "mesh did not drain in time");
        ok &= mesh.tick();
        std::thread::sleep(Duration::from_millis(1));
    }
    ok
}

// A constant through a passthrough
#[test]
fn scenario_const_passthrough() {
    let mesh = Mesh::new();
    let w = wire("const-pass", vec![shard("Const", &[Value::Int(42)]), shard("Pass", &[])]);
    mesh.schedule(w.clone(), Value::None, true).expect("schedules");
    assert!(run_to_completion(&mesh));
    assert_eq!(w.finished_output(), Value::Int(42));
    assert_eq!(w.finished_error(), None);
    assert_eq!(w.state(), WireState::Stopped);
}

// Arithmetic plus a variable; the variable holds until wire cleanup
#[test]
fn scenario_arithmetic_and_variable() {
    let mesh = Mesh::new();
    let w = wire(
        "arith-var",
        vec![
            shard("Const", &[Value::Int(3)]),
            shard("Math.Add", &[Value::Int(4)]),
            shard("Set", &[Value::String("x".into())]),
            shard("Get", &[Value::String("x".into())]),
            shard("Math.Multiply", &[Value::Int(2)]),
            // Keeps the wire alive one suspension so the variable is
            // observable before cleanup
            shard("Pause", &[Value::Float(0.0)]),
        ],
    );
    mesh.schedule(w.clone(), Value::None, true).expect("schedules");

    mesh.tick();
    assert!(w.is_running(), "parked on the pause");
    let x = w.find_local("x").expect("x exists during the run");
    assert_eq!(x.get(), Value::Int(7));
    drop(x);

    assert!(run_to_completion(&mesh));
    assert_eq!(w.finished_output(), Value::Int(14));
    assert!(w.find_local("x").is_none(), "locals are released at cleanup");
}

// A looped wire with a repeated counter body
#[test]
fn scenario_loop_with_repeat() {
    let mesh = Mesh::new();
    let body = Value::Seq(vec![
        Value::Shard(shard("Get", &[Value::String("i".into())])),
        Value::Shard(shard("Math.Add", &[Value::Int(1)])),
        Value::Shard(shard("Update", &[Value::String("i".into())])),
    ]);
    let w = wire(
        "counting",
        vec![
            shard("Const", &[Value::Int(0)]),
            shard("Set", &[Value::String("i".into())]),
            shard("Repeat", &[body, Value::Int(5)]),
        ],
    );
    w.set_looped(true);
    mesh.schedule(w.clone(), Value::None, true).expect("schedules");

    for _ in 0..5 {
        assert!(mesh.tick());
        std::thread::sleep(Duration::from_millis(10));
    }
    let i = w.find_local("i").expect("i exists while looping");
    assert_eq!(i.get(), Value::Int(5));

    for _ in 0..5 {
        assert!(mesh.tick());
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(i.get(), Value::Int(5), "steady state");

    mesh.terminate();
    assert_eq!(w.state(), WireState::Stopped);
}

// Subwire failure policies
#[test]
fn scenario_branch_failure_policies() {
    // Known: the child's failure fails the parent tick
    let mesh = Mesh::new();
    let child = wire("child-known", vec![shard("Fail", &[Value::String("boom".into())])]);
    let parent = wire(
        "parent-known",
        vec![
            shard("Const", &[Value::Int(1)]),
            shard(
                "Branch",
                &[Value::Wire(child.clone()), Value::String("Known".into())],
            ),
        ],
    );
    mesh.schedule(parent.clone(), Value::None, true).expect("schedules");
    let ok = run_to_completion(&mesh);
    assert!(!ok, "the failing tick reports false");
    assert_eq!(parent.state(), WireState::Stopped);
    assert!(
        mesh.errors().iter().any(|e| e.contains("boom")),
        "the child's message surfaces: {:?}",
        mesh.errors()
    );

    // Ignore: the child is marked failed, the parent succeeds
    let mesh = Mesh::new();
    let child = wire("child-ignored", vec![shard("Fail", &[Value::String("boom".into())])]);
    let parent = wire(
        "parent-ignored",
        vec![
            shard("Const", &[Value::Int(1)]),
            shard(
                "Branch",
                &[Value::Wire(child.clone()), Value::String("Ignore".into())],
            ),
        ],
    );
    mesh.schedule(parent.clone(), Value::None, true).expect("schedules");
    let ok = run_to_completion(&mesh);
    assert!(ok, "ignored failures do not fail the tick");
    assert_eq!(parent.finished_error(), None);
    assert_eq!(child.state(), WireState::Failed);
    assert!(child.finished_error().unwrap().contains("boom"));
}

// A blocking task must not block other wires
struct BlockingSleep {
    millis: u64,
}

impl Shard for BlockingSleep {
    fn name(&self) -> &'static str {
        "TestBlockingSleep"
    }

    fn input_types(&self) -> Types {
        vec![TypeInfo::any()]
    }

    fn output_types(&self) -> Types {
        vec![TypeInfo::int()]
    }

    fn activate(&mut self, ctx: &mut Context<'_>, _input: &Value) -> Result<Value, ActivationError> {
        let millis = self.millis;
        run_blocking(
            ctx,
            move || {
                std::thread::sleep(Duration::from_millis(millis));
                Ok(Value::Int(millis as i64))
            },
            None::<fn()>,
        )
    }
}

#[test]
fn scenario_async_offload_keeps_mesh_responsive() {
    register_shard("TestBlockingSleep", || Box::new(BlockingSleep { millis: 50 }));

    let mesh = Mesh::new();
    let blocker = wire("blocker", vec![shard("TestBlockingSleep", &[])]);
    let counter = wire(
        "counter",
        vec![
            shard("Get", &[Value::String("n".into()), Value::Int(0)]),
            shard("Math.Add", &[Value::Int(1)]),
            shard("Set", &[Value::String("n".into())]),
        ],
    );
    counter.set_looped(true);
    mesh.schedule(blocker.clone(), Value::None, true).expect("schedules");
    mesh.schedule(counter.clone(), Value::None, true).expect("schedules");

    let start = Instant::now();
    let deadline = start + Duration::from_secs(10);
    while blocker.is_running() {
        assert!(Instant::now() < deadline, "blocking work never finished");
        mesh.tick();
        std::thread::sleep(Duration::from_millis(1));
    }
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(50), "the work really slept");

    let n = match counter.find_local("n") {
        Some(cell) => match cell.get() {
            Value::Int(n) => n,
            other => panic!("unexpected counter value {:?}", other),
        },
        None => 0,
    };
    assert!(
        n >= 10,
        "other wires kept ticking during the blocking call (saw {} iterations)",
        n
    );
    assert_eq!(blocker.finished_output(), Value::Int(50));
    mesh.terminate();
}

// Serialization round-trip with every primitive kind, containers and a
// nested subwire; the second encoding is byte-identical
#[test]
fn scenario_serialization_roundtrip() {
    let primitives = vec![
        Value::None,
        Value::Bool(true),
        Value::Int(1),
        Value::Int2([1, 2]),
        Value::Int3([1, 2, 3]),
        Value::Int4([1, 2, 3, 4]),
        Value::Int8([1; 8]),
        Value::Int16([1; 16]),
        Value::Float(0.5),
        Value::Float2([1.0, 2.0]),
        Value::Float3([1.0, 2.0, 3.0]),
        Value::Float4([1.0; 4]),
        Value::Color(weft_runtime::value::Color::from_partial(&[9, 9])),
        Value::Enum(weft_runtime::value::EnumValue {
            vendor: 1,
            type_id: 2,
            value: 3,
        }),
    ];

    let subwire = wire("inner", vec![shard("Const", &[Value::Int(1)]), shard("Pass", &[])]);

    let mut shards: Vec<ShardRef> = primitives
        .iter()
        .map(|v| shard("Const", &[v.clone()]))
        .collect();
    shards.push(shard(
        "Const",
        &[Value::Seq(vec![Value::Int(1), Value::Int(2)])],
    ));
    shards.push(shard(
        "Const",
        &[Value::Table(BTreeMap::from([
            ("a".to_string(), Value::Float(1.0)),
            ("b".to_string(), Value::String("s".into())),
        ]))],
    ));
    shards.push(shard("Do", &[Value::Wire(subwire)]));

    let w = wire("kitchen-sink", shards);
    let first = encode_wire(&w).expect("encodes");
    let decoded = decode_wire(&first).expect("decodes");
    let second = encode_wire(&decoded).expect("re-encodes");
    assert_eq!(first, second, "second encoding is byte-identical");
    assert_eq!(decoded.shards().len(), w.shards().len());
}

// A looped wire advances exactly once per tick
#[test]
fn property_one_iteration_per_tick() {
    let mesh = Mesh::new();
    let w = wire(
        "per-tick",
        vec![
            shard("Get", &[Value::String("n".into()), Value::Int(0)]),
            shard("Math.Add", &[Value::Int(1)]),
            shard("Set", &[Value::String("n".into())]),
        ],
    );
    w.set_looped(true);
    mesh.schedule(w.clone(), Value::None, true).expect("schedules");

    for expected in 1..=7i64 {
        assert!(mesh.tick());
        let n = w.find_local("n").expect("counter exists").get();
        assert_eq!(n, Value::Int(expected), "exactly one iteration per tick");
    }
    mesh.terminate();
}

// A terminal Pass returns the wire input unchanged
#[test]
fn property_terminal_pass_is_identity() {
    let mesh = Mesh::new();
    let w = wire("identity", vec![shard("Pass", &[])]);
    let input = Value::Seq(vec![Value::Int(1), Value::String("x".into())]);
    mesh.schedule(w.clone(), input.clone(), true).expect("schedules");
    assert!(run_to_completion(&mesh));
    assert_eq!(w.finished_output(), input);
}

// suspend(0) yields exactly once and resumes on the next tick
#[test]
fn property_pause_zero_yields_once() {
    let mesh = Mesh::new();
    let w = wire(
        "pause0",
        vec![
            shard("Const", &[Value::Int(1)]),
            shard("Pause", &[Value::Float(0.0)]),
            shard("Math.Add", &[Value::Int(1)]),
        ],
    );
    mesh.schedule(w.clone(), Value::None, true).expect("schedules");

    mesh.tick();
    assert!(w.is_running(), "first tick parks on the pause");

    mesh.tick();
    assert!(!w.is_running(), "second tick completes the wire");
    assert_eq!(w.finished_output(), Value::Int(2));
}

// Rescheduling a completed wire reproduces the output
#[test]
fn property_rescheduling_reproduces_output() {
    let mesh = Mesh::new();
    let w = wire(
        "again",
        vec![shard("Const", &[Value::Int(5)]), shard("Math.Multiply", &[Value::Int(3)])],
    );
    mesh.schedule(w.clone(), Value::None, true).expect("first schedule");
    assert!(run_to_completion(&mesh));
    assert_eq!(w.finished_output(), Value::Int(15));

    mesh.schedule(w.clone(), Value::None, true).expect("second schedule");
    assert!(run_to_completion(&mesh));
    assert_eq!(w.finished_output(), Value::Int(15));
}

// Resolved output types match the shards' declarations
#[test]
fn property_resolved_types_match_declarations() {
    let w = wire(
        "typed",
        vec![
            shard("Const", &[Value::Int(3)]),
            shard("Math.Add", &[Value::Int(4)]),
            shard("IsMore", &[Value::Int(0)]),
            shard("Not", &[]),
        ],
    );
    compose_wire(&w, &InstanceData::default(), None).expect("composes");
    for s in w.shards() {
        let (resolved, declared) = s.with(|inst| (inst.output_type.clone(), inst.shard.output_types()));
        assert!(
            match_any(&resolved, &declared, false, true)
                || declared.iter().any(|t| t.kind == ValueKind::Any),
            "resolved {:?} must match a declared output of {}",
            resolved.kind,
            s.name()
        );
    }
}

// Graceful stop: a wire parked on a long suspend cleans up inside its
// coroutine when the mesh terminates
#[test]
fn graceful_stop_of_suspended_wire() {
    let mesh = Mesh::new();
    let w = wire(
        "sleeper",
        vec![
            shard("Const", &[Value::Int(1)]),
            shard("Set", &[Value::String("woke".into())]),
            shard("Pause", &[Value::Float(30.0)]),
        ],
    );
    w.set_looped(true);
    mesh.schedule(w.clone(), Value::None, true).expect("schedules");
    mesh.tick();
    assert!(w.is_running(), "parked on the long pause");

    let start = Instant::now();
    mesh.terminate();
    assert!(
        start.elapsed() < Duration::from_secs(5),
        "termination must not wait out the pause"
    );
    assert_eq!(w.state(), WireState::Stopped);
    assert!(w.find_local("woke").is_none(), "locals released at cleanup");
}

// Restart: the flow storage becomes the next root input
#[test]
fn restart_rewrites_root_input() {
    static RESTARTS: AtomicU32 = AtomicU32::new(0);

    struct RestartOnce;
    impl Shard for RestartOnce {
        fn name(&self) -> &'static str {
            "TestRestartOnce"
        }
        fn input_types(&self) -> Types {
            vec![TypeInfo::any()]
        }
        fn output_types(&self) -> Types {
            vec![TypeInfo::any()]
        }
        fn activate(
            &mut self,
            ctx: &mut Context<'_>,
            input: &Value,
        ) -> Result<Value, ActivationError> {
            if RESTARTS.fetch_add(1, Ordering::SeqCst) == 0 {
                ctx.restart_flow(Value::Int(100));
            }
            Ok(input.clone())
        }
    }

    register_shard("TestRestartOnce", || Box::new(RestartOnce));
    RESTARTS.store(0, Ordering::SeqCst);

    let mesh = Mesh::new();
    let w = wire(
        "restarter",
        vec![
            shard("Input", &[]),
            shard("TestRestartOnce", &[]),
            shard("Math.Add", &[Value::Int(1)]),
        ],
    );
    w.set_looped(true);
    mesh.schedule(w.clone(), Value::Int(1), true).expect("schedules");

    mesh.tick(); // restarts immediately with 100 and re-runs
    std::thread::sleep(Duration::from_millis(5));
    mesh.tick();
    mesh.terminate();

    assert!(RESTARTS.load(Ordering::SeqCst) >= 2);
    assert_eq!(
        w.finished_output(),
        Value::Int(101),
        "the restarted input flowed through the tail"
    );
}
