//! Per-cycle execution: the exec sweep and control-write routing.
//!
//! The sweep walks instances in registration order. After each instance runs,
//! the control writes it queued are routed to their subscribers (which may
//! queue further writes) and remote writes are copied to the outbox. The
//! write queue, outbox and failure list are sized at
//! [`finish_load`](crate::Graph::finish_load), so a cycle that routes only
//! numeric values does not allocate.

use std::time::{Duration, Instant};

use thiserror::Error;

use crate::event::EventFlags;
use crate::graph::{Graph, InstanceId};
use crate::unit::{UnitContext, UnitError};
use crate::value::Value;
use crate::var::VarId;

/// Upper bound on writes routed in one pass; breaks callback loops.
pub const MAX_ROUTED_WRITES: usize = 4096;

/// Running timing statistics of the exec sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CycleStats {
    /// Cycles executed since load.
    pub cycles: u64,
    /// Cycles in which at least one instance failed.
    pub failed_cycles: u64,
    /// Duration of the most recent sweep.
    pub last: Duration,
    /// Longest sweep seen.
    pub max: Duration,
    /// Sum of all sweeps.
    pub total: Duration,
}

impl CycleStats {
    fn record(&mut self, duration: Duration, failed: bool) {
        self.cycles += 1;
        if failed {
            self.failed_cycles += 1;
        }
        self.last = duration;
        self.max = self.max.max(duration);
        self.total += duration;
    }

    /// Mean sweep duration.
    pub fn mean(&self) -> Duration {
        if self.cycles == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.total.as_secs_f64() / self.cycles as f64)
    }

    /// Fraction of the block period spent in the sweep, on average.
    pub fn load(&self, block: Duration) -> f64 {
        if block.is_zero() {
            return 0.0;
        }
        self.mean().as_secs_f64() / block.as_secs_f64()
    }
}

/// Outcome of a successful cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleReport {
    /// Cycle number, 1-based.
    pub cycle: u64,
    /// Wall-clock duration of the sweep.
    pub duration: Duration,
    /// Instances whose `exec` ran.
    pub executed: usize,
}

/// One instance's failure during a cycle.
#[derive(Debug)]
pub struct ExecFailure {
    /// Failing instance.
    pub instance: InstanceId,
    /// What it reported.
    pub error: UnitError,
}

/// Exec failures collected over one sweep.
#[derive(Debug, Error)]
#[error("cycle {cycle}: {} instance(s) failed", .failures.len())]
pub struct CycleError {
    /// Cycle number.
    pub cycle: u64,
    /// Failures in the order they occurred.
    pub failures: Vec<ExecFailure>,
}

impl Graph {
    /// Runs one cycle: `exec` on every exec-enabled instance in order.
    ///
    /// A failing instance does not stop the sweep; all failures are returned
    /// together afterwards.
    pub fn execute_cycle(&mut self) -> Result<CycleReport, CycleError> {
        let start = Instant::now();
        self.cycle += 1;
        let cycle = self.cycle;
        let config = self.config();
        let mut executed = 0;

        for idx in 0..self.instances.len() {
            let instance = &mut self.instances[idx];
            if !instance.exec_enabled {
                continue;
            }
            executed += 1;
            let mut ctx = UnitContext {
                id: instance.id,
                vars: &mut instance.vars,
                pool: &mut self.pool,
                writes: &mut self.writes,
                config,
                cycle,
            };
            if let Err(error) = instance.unit.exec(&mut ctx) {
                #[cfg(feature = "tracing")]
                tracing::trace!("cycle {cycle}: {} failed: {error}", instance.id);
                self.failures.push(ExecFailure {
                    instance: instance.id,
                    error,
                });
            }
            if !self.writes.is_empty() {
                self.route_pending();
            }
        }

        let duration = start.elapsed();
        let failed = !self.failures.is_empty();
        self.stats.record(duration, failed);
        if failed {
            let capacity = self.failures.capacity();
            let failures = std::mem::replace(&mut self.failures, Vec::with_capacity(capacity));
            return Err(CycleError { cycle, failures });
        }
        Ok(CycleReport {
            cycle,
            duration,
            executed,
        })
    }

    /// Routes queued writes until the queue drains or the hop limit trips.
    pub(crate) fn route_pending(&mut self) {
        let mut cursor = 0;
        while cursor < self.writes.len() {
            if cursor == MAX_ROUTED_WRITES {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    "route: dropped {} writes past the routing limit",
                    self.writes.len() - cursor
                );
                break;
            }
            let entry = &mut self.writes[cursor];
            let (inst, var) = (entry.0, entry.1);
            let value = std::mem::replace(&mut entry.2, Value::Bool(false));
            cursor += 1;
            self.route_write(inst, var, &value);
        }
        self.writes.clear();
    }

    /// Forwards one queued write; `value` is what was written, not the
    /// variable's current value.
    fn route_write(&mut self, inst: InstanceId, var: VarId, value: &Value) {
        let Some(source) = self
            .instances
            .get(inst.0 as usize)
            .and_then(|i| i.vars().get(var))
        else {
            return;
        };
        let fanout = source.subscribers().len();
        if source.is_remote() {
            self.outbox.push((inst, var, value.clone()));
        }
        for i in 0..fanout {
            let Some(sub) = self
                .instances
                .get(inst.0 as usize)
                .and_then(|s| s.vars().get(var))
                .and_then(|v| v.subscribers().get(i).copied())
            else {
                break;
            };
            if let Err(err) = self.deliver_from(
                Some((inst, var)),
                sub.inst,
                sub.var,
                value,
                EventFlags::CALLBACK,
            ) {
                self.record_failure(sub.inst, err);
            }
        }
    }

    /// Timing statistics since load.
    pub fn stats(&self) -> &CycleStats {
        &self.stats
    }

    /// Number of cycles executed since load.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }
}
