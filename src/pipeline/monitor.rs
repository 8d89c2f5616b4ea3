use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{CpuExt, Pid, ProcessExt, System, SystemExt};

use crate::pipeline::events::{EventBus, PipelineEvent};
use crate::pipeline::runtime::PipelineRuntime;
use crate::pipeline::stage::{Stage, StageContext, StageExit, StagePhase, StageStatus};

/// One memory reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemorySample {
    pub total_bytes: u64,
    pub available_bytes: u64,
    pub process_bytes: Option<u64>,
    pub cpu_usage: f32,
}

impl MemorySample {
    pub fn format(&self) -> String {
        let mb = |bytes: u64| bytes as f64 / (1024.0 * 1024.0);
        let process = self
            .process_bytes
            .map(|b| format!("{:.1} MB", mb(b)))
            .unwrap_or_else(|| "n/a".to_string());
        format!(
            "free {:.1} MB of {:.1} MB, process {}, cpu {:.1}%",
            mb(self.available_bytes),
            mb(self.total_bytes),
            process,
            self.cpu_usage
        )
    }
}

/// Periodically logs system and process memory together with pool usage
pub struct MemoryChecker {
    runtime: Arc<PipelineRuntime>,
    system: System,
    pid: Option<Pid>,
    interval: Duration,
}

impl MemoryChecker {
    pub fn new(runtime: Arc<PipelineRuntime>) -> Self {
        let interval = runtime.config().monitor_interval();
        let mut system = System::new();
        system.refresh_memory();

        Self {
            runtime,
            system,
            pid: sysinfo::get_current_pid().ok(),
            interval,
        }
    }

    pub fn sample(&mut self) -> MemorySample {
        self.system.refresh_memory();
        self.system.refresh_cpu();

        let process_bytes = self.pid.and_then(|pid| {
            self.system.refresh_process(pid);
            self.system.process(pid).map(|p| p.memory())
        });

        MemorySample {
            total_bytes: self.system.total_memory(),
            available_bytes: self.system.available_memory(),
            process_bytes,
            cpu_usage: self.system.global_cpu_info().cpu_usage(),
        }
    }

    fn report(&mut self) {
        let sample = self.sample();
        info!("Memory: {}", sample.format());

        for pool in self.runtime.pool_stats() {
            debug!(
                "Pool {}: active {}, idle {}, created {}, reused {}",
                pool.name, pool.active, pool.idle, pool.created, pool.reused
            );
        }
    }
}

impl Stage for MemoryChecker {
    fn name(&self) -> &'static str {
        "memory-checker"
    }

    fn run(&mut self, ctx: &StageContext) -> StageExit {
        while ctx.sleep(self.interval) {
            self.report();
        }
        StageExit::Cancelled
    }
}

/// Statuses of the stage threads currently running, replaced whenever they are respawned
#[derive(Debug, Clone, Default)]
pub struct WatchList {
    stages: Arc<Mutex<Vec<Arc<StageStatus>>>>,
}

impl WatchList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&self, stages: Vec<Arc<StageStatus>>) {
        *self.stages.lock() = stages;
    }

    pub fn snapshot(&self) -> Vec<Arc<StageStatus>> {
        self.stages.lock().clone()
    }
}

/// Warns when a stage thread has died instead of draining or being cancelled
pub struct ThreadWatchdog {
    stages: WatchList,
    events: EventBus,
    interval: Duration,
    /// Held so a respawned stage with the same name is still reported
    reported: Vec<Arc<StageStatus>>,
}

impl ThreadWatchdog {
    pub fn new(stages: WatchList, events: EventBus, interval: Duration) -> Self {
        Self {
            stages,
            events,
            interval,
            reported: Vec::new(),
        }
    }

    /// Names of stages found dead since the last check
    pub fn check(&mut self) -> Vec<String> {
        let mut newly_dead = Vec::new();

        for stage in self.stages.snapshot() {
            if stage.phase() != StagePhase::Died || self.reported.iter().any(|s| Arc::ptr_eq(s, &stage)) {
                continue;
            }
            warn!("Stage '{}' is no longer alive", stage.name());
            self.events.publish(PipelineEvent::Error(format!(
                "pipeline stage '{}' stopped unexpectedly",
                stage.name()
            )));
            newly_dead.push(stage.name().to_string());
            self.reported.push(stage);
        }

        newly_dead
    }
}

impl Stage for ThreadWatchdog {
    fn name(&self) -> &'static str {
        "thread-watchdog"
    }

    fn run(&mut self, ctx: &StageContext) -> StageExit {
        while ctx.sleep(self.interval) {
            self.check();
        }
        StageExit::Cancelled
    }
}
