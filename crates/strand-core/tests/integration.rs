//! Integration tests for the strand-core graph.
//!
//! Exercises Load -> cycle -> reset -> unload through the public API only,
//! using a handful of locally defined units: a constant source, a scaler that
//! reads an aliased audio input, and a tracker that logs lifecycle calls in
//! the order they happen.

use std::cell::RefCell;
use std::sync::Arc;

use strand_core::{
    AllocContext, Args, ClassCategory, ClassDescriptor, ClassRegistry, Error, Event, EventFlags,
    Graph, GraphConfig, InstanceId, Payload, RESET_SYMBOL, Unit, UnitContext, UnitError, Value,
    VarId,
};

const FRAMES: usize = 16;

thread_local! {
    static LOG: RefCell<Vec<(&'static str, u32)>> = const { RefCell::new(Vec::new()) };
}

fn log(kind: &'static str, id: InstanceId) {
    LOG.with(|l| l.borrow_mut().push((kind, id.index())));
}

fn take_log() -> Vec<(&'static str, u32)> {
    LOG.with(|l| std::mem::take(&mut *l.borrow_mut()))
}

// ============================================================================
// Test units
// ============================================================================

struct Constant {
    level: VarId,
    out: VarId,
}

impl Unit for Constant {
    fn exec(&mut self, ctx: &mut UnitContext<'_>) -> Result<(), UnitError> {
        let level = ctx.get_f32(self.level)?;
        ctx.audio_out(self.out)?.channel_mut(0).fill(level);
        Ok(())
    }
}

fn constant(ctx: &mut AllocContext<'_>, args: &Args) -> Result<Box<dyn Unit>, UnitError> {
    let level = ctx.input("level", args.f32_or("level", 1.0)?)?;
    let out = ctx.audio_output("out", 1)?;
    Ok(Box::new(Constant { level, out }))
}

struct Scale {
    input: VarId,
    factor: VarId,
    out: VarId,
}

impl Unit for Scale {
    fn exec(&mut self, ctx: &mut UnitContext<'_>) -> Result<(), UnitError> {
        let factor = ctx.get_f32(self.factor)?;
        let (src, dst) = ctx.audio_io(self.input, self.out)?;
        dst.copy_from(src);
        dst.scale(factor);
        Ok(())
    }
}

fn scale(ctx: &mut AllocContext<'_>, args: &Args) -> Result<Box<dyn Unit>, UnitError> {
    let input = ctx.audio_input("in")?;
    let factor = ctx.input("factor", args.f32_or("factor", 1.0)?)?;
    let out = ctx.audio_output("out", 1)?;
    Ok(Box::new(Scale { input, factor, out }))
}

struct Tracker;

impl Unit for Tracker {
    fn exec(&mut self, ctx: &mut UnitContext<'_>) -> Result<(), UnitError> {
        log("exec", ctx.id());
        Ok(())
    }

    fn recv(&mut self, ctx: &mut UnitContext<'_>, event: &Event<'_>) -> Result<(), UnitError> {
        if matches!(event.payload, Payload::Symbol(_)) {
            log("broadcast", ctx.id());
        } else {
            log("recv", ctx.id());
        }
        Ok(())
    }

    fn reset(&mut self, ctx: &mut UnitContext<'_>) -> Result<(), UnitError> {
        log("reset", ctx.id());
        Ok(())
    }
}

fn tracker(ctx: &mut AllocContext<'_>, _: &Args) -> Result<Box<dyn Unit>, UnitError> {
    ctx.input("x", 0.0_f64)?;
    ctx.subscribe(RESET_SYMBOL);
    Ok(Box::new(Tracker))
}

fn registry() -> Arc<ClassRegistry> {
    let mut registry = ClassRegistry::new();
    let classes: [(&'static str, strand_core::UnitFactory); 3] =
        [("constant", constant), ("scale", scale), ("tracker", tracker)];
    for (label, factory) in classes {
        registry.register(
            ClassDescriptor {
                label,
                description: "integration test unit",
                category: ClassCategory::Debug,
            },
            factory,
        );
    }
    Arc::new(registry)
}

fn graph() -> Graph {
    Graph::new(
        registry(),
        GraphConfig {
            sample_rate: 44100.0,
            frames_per_cycle: FRAMES,
        },
    )
}

fn connect(g: &mut Graph, src: &str, dst: &str) {
    let (si, sv) = g.resolve(src, "out").unwrap();
    let (di, dv) = g.resolve(dst, "in").unwrap();
    g.connect_audio(si, sv, di, dv).unwrap();
}

fn first_sample(g: &Graph, inst: &str) -> f32 {
    let (i, v) = g.resolve(inst, "out").unwrap();
    g.audio(i, v).unwrap().channel(0)[0]
}

// ============================================================================
// 1. Audio chains
// ============================================================================

#[test]
fn chain_settles_in_one_cycle() {
    let mut g = graph();
    g.allocate_instance("constant", Some("src"), &Args::new().with("level", 0.5_f32))
        .unwrap();
    g.allocate_instance("scale", Some("x2"), &Args::new().with("factor", 2.0_f32))
        .unwrap();
    g.allocate_instance("scale", Some("x3"), &Args::new().with("factor", 3.0_f32))
        .unwrap();
    connect(&mut g, "src", "x2");
    connect(&mut g, "x2", "x3");
    g.finish_load().unwrap();

    g.execute_cycle().unwrap();
    assert_eq!(first_sample(&g, "x3"), 3.0);
}

#[test]
fn unconnected_input_reads_silence() {
    let mut g = graph();
    g.allocate_instance("scale", Some("lonely"), &Args::new().with("factor", 5.0_f32))
        .unwrap();
    g.finish_load().unwrap();
    g.execute_cycle().unwrap();
    let (i, v) = g.resolve("lonely", "out").unwrap();
    assert!(g.audio(i, v).unwrap().samples().iter().all(|&s| s == 0.0));
}

#[test]
fn independent_subgraphs_do_not_interfere() {
    let mut g = graph();
    g.allocate_instance("constant", Some("a"), &Args::new().with("level", 1.0_f32))
        .unwrap();
    g.allocate_instance("scale", Some("a_gain"), &Args::new().with("factor", 4.0_f32))
        .unwrap();
    g.allocate_instance("constant", Some("b"), &Args::new().with("level", -1.0_f32))
        .unwrap();
    g.allocate_instance("scale", Some("b_gain"), &Args::new().with("factor", 0.5_f32))
        .unwrap();
    connect(&mut g, "a", "a_gain");
    connect(&mut g, "b", "b_gain");
    g.finish_load().unwrap();
    g.execute_cycle().unwrap();

    assert_eq!(first_sample(&g, "a_gain"), 4.0);
    assert_eq!(first_sample(&g, "b_gain"), -0.5);

    let mut other = graph();
    other
        .allocate_instance("constant", Some("a"), &Args::new().with("level", 9.0_f32))
        .unwrap();
    other.finish_load().unwrap();
    other.execute_cycle().unwrap();
    assert_eq!(first_sample(&other, "a"), 9.0);
    assert_eq!(first_sample(&g, "a"), 1.0);
}

#[test]
fn ui_change_takes_effect_next_cycle() {
    let mut g = graph();
    let src = g
        .allocate_instance("constant", Some("src"), &Args::new())
        .unwrap();
    g.finish_load().unwrap();
    g.execute_cycle().unwrap();
    assert_eq!(first_sample(&g, "src"), 1.0);

    let (_, level) = g.resolve("src", "level").unwrap();
    g.deliver(src, level, &Value::Double(0.25), EventFlags::UI)
        .unwrap();
    g.execute_cycle().unwrap();
    assert_eq!(first_sample(&g, "src"), 0.25);
}

// ============================================================================
// 2. Lifecycle ordering
// ============================================================================

#[test]
fn reset_runs_each_instance_once_in_order_before_broadcast() {
    take_log();
    let mut g = graph();
    for _ in 0..3 {
        g.allocate_instance("tracker", None, &Args::new()).unwrap();
    }
    g.finish_load().unwrap();
    g.reset().unwrap();

    assert_eq!(
        take_log(),
        vec![
            ("reset", 0),
            ("reset", 1),
            ("reset", 2),
            ("broadcast", 0),
            ("broadcast", 1),
            ("broadcast", 2),
        ]
    );
}

#[test]
fn exec_order_is_registration_order() {
    take_log();
    let mut g = graph();
    for label in ["c", "a", "b"] {
        g.allocate_instance("tracker", Some(label), &Args::new())
            .unwrap();
    }
    g.finish_load().unwrap();
    g.execute_cycle().unwrap();
    let order: Vec<u32> = take_log().into_iter().map(|(_, id)| id).collect();
    assert_eq!(order, vec![0, 1, 2]);
    assert_eq!(g.instance_id("a").map(InstanceId::index), Some(1));
}

#[test]
fn reload_after_unload() {
    let mut g = graph();
    g.allocate_instance("constant", Some("src"), &Args::new())
        .unwrap();
    g.finish_load().unwrap();
    g.execute_cycle().unwrap();
    g.unload();

    assert!(matches!(g.reset(), Err(Error::NotLoaded)));
    g.allocate_instance("constant", Some("src"), &Args::new().with("level", 2.0_f32))
        .unwrap();
    g.finish_load().unwrap();
    let report = g.execute_cycle().unwrap();
    assert_eq!(report.cycle, 1);
    assert_eq!(first_sample(&g, "src"), 2.0);
}
