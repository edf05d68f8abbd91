//! Integration tests for scenario timelines
//!
//! Ticks are driven with synthetic instants so the schedule is deterministic.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::{Value, json};

use swarmhive_backend::bus::{BusSubscription, ControlPlaneBus, InMemoryBus};
use swarmhive_backend::fanout::ConfigFanout;
use swarmhive_backend::scenario::{
    LifecycleOperations, ScenarioTimeline, StepError, SwarmView, TimelineObserver, TimelineStatus,
};
use swarmhive_shared::{Scope, SignalEnvelope, TimelinePlan, TimelineStep};

// Observer recording completions and step outcomes
#[derive(Default)]
pub struct MockObserver {
    pub completions: Mutex<Vec<(Option<String>, Option<String>)>>,
    pub fired: Mutex<Vec<String>>,
    pub failed: Mutex<Vec<String>>,
}

impl TimelineObserver for MockObserver {
    fn on_step_completed(&self, step: &TimelineStep, _target: &Scope) {
        self.fired.lock().unwrap().push(step.step_id.clone());
    }

    fn on_step_failed(&self, step: &TimelineStep, _target: &Scope, _error: &StepError) {
        self.failed.lock().unwrap().push(step.step_id.clone());
    }

    fn on_plan_completed(&self, result: Option<&str>, notes: Option<&str>) {
        self.completions
            .lock()
            .unwrap()
            .push((result.map(str::to_string), notes.map(str::to_string)));
    }
}

// Lifecycle operations that fail for one scope
pub struct MockLifecycle {
    pub failing_role: String,
    pub calls: Mutex<Vec<String>>,
}

impl LifecycleOperations for MockLifecycle {
    fn start(&self, scope: &Scope) -> Result<(), StepError> {
        self.calls.lock().unwrap().push(format!("start {:?}", scope.role));
        if scope.role.as_deref() == Some(self.failing_role.as_str()) {
            return Err(StepError::Lifecycle("container not running".to_string()));
        }
        Ok(())
    }

    fn stop(&self, scope: &Scope) -> Result<(), StepError> {
        self.calls.lock().unwrap().push(format!("stop {:?}", scope.role));
        Ok(())
    }
}

async fn setup(plan: Value) -> (ScenarioTimeline, Arc<MockObserver>, BusSubscription) {
    let bus = InMemoryBus::new();
    let signals = bus.subscribe("sig.#").await.unwrap();
    let observer = Arc::new(MockObserver::default());
    let mut timeline =
        ScenarioTimeline::with_fanout(ConfigFanout::new(Arc::new(bus)), observer.clone());
    timeline.apply_plan(&plan).unwrap();
    (timeline, observer, signals)
}

fn drain(signals: &mut BusSubscription) -> Vec<SignalEnvelope> {
    let mut out = Vec::new();
    while let Ok(message) = signals.try_recv() {
        out.push(message.decode().unwrap());
    }
    out
}

fn mixed_plan() -> Value {
    json!({
        "bees": [
            {"instanceId": "gen-1", "role": "generator", "steps": [
                {"stepId": "g-1", "time": "PT0S", "type": "config-update", "config": {"rate": 10}},
                {"stepId": "g-2", "time": "PT0.3S", "type": "config-update", "config": {"rate": 50}},
                {"stepId": "g-3", "time": "PT1S", "type": "stop"}
            ]},
            {"instanceId": "proc-1", "role": "processor", "steps": [
                {"stepId": "p-1", "time": "PT0.25S", "type": "start"},
                {"stepId": "p-2", "time": "PT0.9S", "type": "config-update", "config": {"batch": 4}}
            ]}
        ],
        "swarm": [
            {"stepId": "s-1", "time": "PT0.5S", "type": "config-update", "config": {"phase": "steady"}}
        ]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_start_plan_completes_once_over_two_ticks() {
        let plan = json!({"swarm": [{"stepId": "s-1", "time": "PT0S", "type": "start"}]});
        let (mut timeline, observer, _signals) = setup(plan).await;
        let view = SwarmView::new("sw1");
        let now = Instant::now();

        timeline.on_tick(&view, now);
        timeline.on_tick(&view, now + Duration::from_millis(10));

        assert_eq!(*observer.completions.lock().unwrap(), vec![(None, None)]);
        assert_eq!(timeline.status(), TimelineStatus::Completed);
    }

    #[tokio::test]
    async fn test_bee_config_update_reaches_instance_scope() {
        let plan = json!({"bees": [{"instanceId": "gen-1", "role": "generator", "steps": [
            {"time": "PT0S", "type": "config-update", "config": {"hello": "world"}}
        ]}]});
        let (mut timeline, _observer, mut signals) = setup(plan).await;

        timeline.on_tick(&SwarmView::new("sw1"), Instant::now());

        let sent = drain(&mut signals);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].signal, "config-update");
        assert_eq!(sent[0].scope(), Scope::instance("sw1", "generator", "gen-1"));
        assert_eq!(sent[0].payload, json!({"hello": "world"}));
        assert_eq!(sent[0].origin.as_deref(), Some("scenario"));
    }

    #[tokio::test]
    async fn test_every_step_fires_once_at_any_tick_frequency() {
        let total = TimelinePlan::parse(&mixed_plan()).unwrap().total_steps();
        let end = TimelinePlan::parse(&mixed_plan())
            .unwrap()
            .max_offset()
            .unwrap();

        for cadence_ms in [1u64, 7, 100, 333, 2000] {
            let (mut timeline, observer, mut signals) = setup(mixed_plan()).await;
            let view = SwarmView::new("sw1");
            let start = Instant::now();
            let cadence = Duration::from_millis(cadence_ms);

            let mut elapsed = Duration::ZERO;
            loop {
                timeline.on_tick(&view, start + elapsed);
                if elapsed >= end {
                    break;
                }
                elapsed += cadence;
            }
            // Extra ticks after the end change nothing
            timeline.on_tick(&view, start + elapsed + cadence);

            let fired = observer.fired.lock().unwrap().clone();
            assert_eq!(fired.len(), total, "cadence {}ms", cadence_ms);
            let mut unique = fired.clone();
            unique.sort();
            unique.dedup();
            assert_eq!(unique.len(), total, "cadence {}ms", cadence_ms);
            assert_eq!(observer.completions.lock().unwrap().len(), 1);
            assert_eq!(drain(&mut signals).len(), total);
        }
    }

    #[tokio::test]
    async fn test_offset_ties_follow_group_order() {
        let plan = json!({
            "bees": [
                {"instanceId": "b-1", "role": "a", "steps": [{"stepId": "a-1", "time": "PT1S", "type": "start"}]},
                {"instanceId": "b-2", "role": "b", "steps": [{"stepId": "b-1", "time": "PT1S", "type": "start"}]}
            ],
            "swarm": [{"stepId": "s-1", "time": "PT1S", "type": "stop"}]
        });
        let (mut timeline, observer, _signals) = setup(plan).await;
        let start = Instant::now();
        timeline.on_tick(&SwarmView::new("sw1"), start);
        timeline.on_tick(&SwarmView::new("sw1"), start + Duration::from_secs(1));

        assert_eq!(*observer.fired.lock().unwrap(), vec!["a-1", "b-1", "s-1"]);
    }

    #[tokio::test]
    async fn test_failed_lifecycle_step_yields_partial_failure() {
        let bus = InMemoryBus::new();
        let observer = Arc::new(MockObserver::default());
        let lifecycle = Arc::new(MockLifecycle {
            failing_role: "processor".to_string(),
            calls: Mutex::new(Vec::new()),
        });
        let mut timeline = ScenarioTimeline::new(
            ConfigFanout::new(Arc::new(bus)),
            lifecycle.clone(),
            observer.clone(),
        );
        timeline.apply_plan(&mixed_plan()).unwrap();

        let start = Instant::now();
        timeline.on_tick(&SwarmView::new("sw1"), start);
        timeline.on_tick(&SwarmView::new("sw1"), start + Duration::from_secs(2));

        assert_eq!(*observer.failed.lock().unwrap(), vec!["p-1"]);
        assert_eq!(lifecycle.calls.lock().unwrap().len(), 2);
        assert_eq!(
            *observer.completions.lock().unwrap(),
            vec![(
                Some("partial-failure".to_string()),
                Some("failed steps: p-1".to_string())
            )]
        );
    }

    #[tokio::test]
    async fn test_looping_plan_never_completes() {
        let mut plan = mixed_plan();
        plan["loop"] = json!(true);
        let (mut timeline, observer, mut signals) = setup(plan).await;
        let view = SwarmView::new("sw1");
        let start = Instant::now();

        // Cycle 0 finishes at 1s; cycle 1 starts from that tick
        timeline.on_tick(&view, start);
        timeline.on_tick(&view, start + Duration::from_secs(1));
        assert_eq!(timeline.cycle(), 1);
        assert_eq!(timeline.fired_count(), 0);

        timeline.on_tick(&view, start + Duration::from_secs(1));
        assert_eq!(timeline.fired_count(), 1);

        assert!(observer.completions.lock().unwrap().is_empty());
        assert_eq!(timeline.status(), TimelineStatus::Running);
        assert_eq!(drain(&mut signals).len(), 7);
    }
}
