//! Timeline engine replaying a plan against a running swarm.
//!
//! The engine never sleeps or awaits. An external scheduler calls
//! [`ScenarioTimeline::on_tick`] with the current instant and the engine fires
//! whatever became due since the timeline started. Dispatch is a bus enqueue,
//! so a tick is short and synchronous.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use swarmhive_shared::timeline::GroupOwner;
use swarmhive_shared::{PlanError, Scope, StepType, TimelinePlan, TimelineStep};

use super::observer::TimelineObserver;
use crate::bus::BusError;
use crate::fanout::ConfigFanout;

/// Origin recorded on signals sent by timeline steps
pub const SCENARIO_ORIGIN: &str = "scenario";

/// Result reported when at least one step failed
pub const PARTIAL_FAILURE: &str = "partial-failure";

#[derive(Error, Debug)]
pub enum StepError {
    #[error("dispatch failed: {0}")]
    Dispatch(#[from] BusError),

    #[error("lifecycle operation failed: {0}")]
    Lifecycle(String),
}

/// Lifecycle steps (`start`/`stop`) are delegated here.
pub trait LifecycleOperations: Send + Sync {
    fn start(&self, scope: &Scope) -> Result<(), StepError>;

    fn stop(&self, scope: &Scope) -> Result<(), StepError>;
}

/// Workers are switched on and off through their configuration.
impl LifecycleOperations for ConfigFanout {
    fn start(&self, scope: &Scope) -> Result<(), StepError> {
        self.set_enabled(scope, true, SCENARIO_ORIGIN)?;
        Ok(())
    }

    fn stop(&self, scope: &Scope) -> Result<(), StepError> {
        self.set_enabled(scope, false, SCENARIO_ORIGIN)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimelineStatus {
    #[default]
    Idle,
    Loaded,
    Running,
    Completed,
}

/// What the engine knows about the swarm it drives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwarmView {
    pub swarm_id: String,
}

impl SwarmView {
    pub fn new(swarm_id: impl Into<String>) -> Self {
        Self {
            swarm_id: swarm_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanSummary {
    pub bee_count: usize,
    pub swarm_step_count: usize,
    pub total_steps: usize,
    pub looping: bool,
}

/// (group index, step index within the group)
type StepKey = (usize, usize);

#[derive(Debug, Clone)]
struct ScheduledStep {
    key: StepKey,
    owner: GroupOwner,
    step: TimelineStep,
}

#[derive(Debug, Default)]
struct RunState {
    status: TimelineStatus,
    started_at: Option<Instant>,
    fired: HashSet<StepKey>,
    failed: Vec<String>,
    cycle: u64,
}

pub struct ScenarioTimeline {
    fanout: ConfigFanout,
    lifecycle: Arc<dyn LifecycleOperations>,
    observer: Arc<dyn TimelineObserver>,
    /// Every step, sorted by offset
    schedule: Vec<ScheduledStep>,
    looping: bool,
    run: RunState,
}

impl ScenarioTimeline {
    pub fn new(
        fanout: ConfigFanout,
        lifecycle: Arc<dyn LifecycleOperations>,
        observer: Arc<dyn TimelineObserver>,
    ) -> Self {
        Self {
            fanout,
            lifecycle,
            observer,
            schedule: Vec::new(),
            looping: false,
            run: RunState::default(),
        }
    }

    /// Engine whose lifecycle steps go through the same fanout
    pub fn with_fanout(fanout: ConfigFanout, observer: Arc<dyn TimelineObserver>) -> Self {
        let lifecycle = Arc::new(fanout.clone());
        Self::new(fanout, lifecycle, observer)
    }

    /// Validate and load a plan document. On error nothing changes.
    pub fn apply_plan(&mut self, document: &Value) -> Result<PlanSummary, PlanError> {
        let plan = TimelinePlan::parse(document)?;
        Ok(self.load(plan))
    }

    /// Load an already validated plan, discarding any previous run state.
    pub fn load(&mut self, plan: TimelinePlan) -> PlanSummary {
        let summary = PlanSummary {
            bee_count: plan.bees.len(),
            swarm_step_count: plan.swarm.steps.len(),
            total_steps: plan.total_steps(),
            looping: plan.looping,
        };

        let mut schedule: Vec<ScheduledStep> = plan
            .groups()
            .enumerate()
            .flat_map(|(g, group)| {
                group.steps.iter().enumerate().map(move |(i, step)| ScheduledStep {
                    key: (g, i),
                    owner: group.owner.clone(),
                    step: step.clone(),
                })
            })
            .collect();
        // Stable: equal offsets keep group order, then declaration order
        schedule.sort_by_key(|s| s.step.offset);

        self.schedule = schedule;
        self.looping = plan.looping;
        self.run = RunState {
            status: TimelineStatus::Loaded,
            ..RunState::default()
        };

        self.observer
            .on_plan_loaded(summary.bee_count, summary.swarm_step_count);
        summary
    }

    /// Fire every step that is due at `now`.
    pub fn on_tick(&mut self, view: &SwarmView, now: Instant) {
        let Self {
            fanout,
            lifecycle,
            observer,
            schedule,
            looping,
            run,
        } = self;

        match run.status {
            TimelineStatus::Idle | TimelineStatus::Completed => return,
            TimelineStatus::Loaded => {
                run.status = TimelineStatus::Running;
                run.started_at = Some(now);
                observer.on_timeline_started(&view.swarm_id);
            }
            TimelineStatus::Running => {}
        }

        let Some(started_at) = run.started_at else {
            return;
        };
        let elapsed = now.saturating_duration_since(started_at);

        for scheduled in schedule.iter() {
            if scheduled.step.offset > elapsed {
                break;
            }
            if run.fired.contains(&scheduled.key) {
                continue;
            }

            let target = target_scope(view, &scheduled.owner);
            observer.on_step_started(&scheduled.step, &target);
            let outcome = execute(fanout, &**lifecycle, &scheduled.step, &target);
            run.fired.insert(scheduled.key);
            match outcome {
                Ok(()) => observer.on_step_completed(&scheduled.step, &target),
                Err(e) => {
                    run.failed.push(scheduled.step.step_id.clone());
                    observer.on_step_failed(&scheduled.step, &target, &e);
                }
            }
        }

        if run.fired.len() < schedule.len() {
            return;
        }

        if *looping && !schedule.is_empty() {
            run.fired.clear();
            run.failed.clear();
            run.started_at = Some(now);
            run.cycle += 1;
            debug!("[TIMELINE] {}: starting cycle {}", view.swarm_id, run.cycle);
            return;
        }

        run.status = TimelineStatus::Completed;
        if run.failed.is_empty() {
            observer.on_plan_completed(None, None);
        } else {
            let notes = format!("failed steps: {}", run.failed.join(", "));
            observer.on_plan_completed(Some(PARTIAL_FAILURE), Some(notes.as_str()));
        }
    }

    pub fn status(&self) -> TimelineStatus {
        self.run.status
    }

    /// Completed cycles of a looping plan
    pub fn cycle(&self) -> u64 {
        self.run.cycle
    }

    /// Steps fired in the current cycle
    pub fn fired_count(&self) -> usize {
        self.run.fired.len()
    }

    pub fn total_steps(&self) -> usize {
        self.schedule.len()
    }
}

fn target_scope(view: &SwarmView, owner: &GroupOwner) -> Scope {
    match owner {
        GroupOwner::Bee { role, instance_id } => Scope::instance(&view.swarm_id, role, instance_id),
        GroupOwner::Swarm => Scope::swarm(&view.swarm_id),
    }
}

fn execute(
    fanout: &ConfigFanout,
    lifecycle: &dyn LifecycleOperations,
    step: &TimelineStep,
    target: &Scope,
) -> Result<(), StepError> {
    match step.step_type {
        StepType::ConfigUpdate => {
            fanout.publish_config_update(target, step.config.clone(), SCENARIO_ORIGIN)?;
            Ok(())
        }
        StepType::Start => lifecycle.start(target),
        StepType::Stop => lifecycle.stop(target),
    }
}
