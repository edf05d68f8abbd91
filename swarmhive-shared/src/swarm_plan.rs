//! Scenario definitions and the per-swarm plans built from them.
//!
//! A [`ScenarioPlan`] is a reusable template loaded from a json5 file. Creating a
//! swarm turns one into a [`SwarmPlan`]: bees get concrete instance ids and
//! their work endpoints are qualified with the swarm id so two swarms created
//! from the same scenario never share queues.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Input/output endpoints a bee consumes from and produces to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkEndpoints {
    #[serde(default, rename = "in", skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(default, rename = "out", skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl WorkEndpoints {
    fn qualified(&self, swarm_id: &str) -> Self {
        let qualify = |name: &Option<String>| {
            name.as_ref().map(|n| {
                let prefix = format!("{swarm_id}.");
                if n.starts_with(&prefix) {
                    n.clone()
                } else {
                    format!("{prefix}{n}")
                }
            })
        };
        Self {
            input: qualify(&self.input),
            output: qualify(&self.output),
        }
    }
}

/// A bee as declared in a scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeeTemplate {
    pub role: String,
    pub image: String,
    #[serde(default)]
    pub work: WorkEndpoints,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Reusable swarm definition returned by a scenario repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioPlan {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Overrides the orchestrator's default controller image
    #[serde(default)]
    pub controller_image: Option<String>,
    #[serde(default)]
    pub bees: Vec<BeeTemplate>,
    /// Timeline document replayed by the controller once the swarm starts
    #[serde(default)]
    pub plan: Option<Value>,
}

/// A bee with its concrete identity inside one swarm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bee {
    pub role: String,
    pub instance_id: String,
    pub image: String,
    pub work: WorkEndpoints,
    pub env: BTreeMap<String, String>,
}

/// Everything a controller needs to run one swarm. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwarmPlan {
    pub id: String,
    pub scenario_id: String,
    pub controller_image: String,
    pub bees: Vec<Bee>,
    #[serde(default)]
    pub timeline: Option<Value>,
}

impl SwarmPlan {
    /// Materialize a scenario for `swarm_id`.
    pub fn from_scenario(swarm_id: &str, scenario: &ScenarioPlan, default_image: &str) -> Self {
        let mut per_role: BTreeMap<&str, usize> = BTreeMap::new();
        let bees = scenario
            .bees
            .iter()
            .map(|template| {
                let n = per_role.entry(template.role.as_str()).or_insert(0);
                *n += 1;
                Bee {
                    role: template.role.clone(),
                    instance_id: format!("{}-{}-{}", swarm_id, template.role, n),
                    image: template.image.clone(),
                    work: template.work.qualified(swarm_id),
                    env: template.env.clone(),
                }
            })
            .collect();

        Self {
            id: swarm_id.to_string(),
            scenario_id: scenario.id.clone(),
            controller_image: scenario
                .controller_image
                .clone()
                .filter(|image| !image.trim().is_empty())
                .unwrap_or_else(|| default_image.to_string()),
            bees,
            timeline: scenario
                .plan
                .as_ref()
                .map(|plan| qualify_timeline(plan, swarm_id)),
        }
    }
}

/// Scenario timelines name bees as `<role>-<n>`; prefix those with the swarm id
/// so they address the instances built above.
fn qualify_timeline(plan: &Value, swarm_id: &str) -> Value {
    let mut plan = plan.clone();
    let prefix = format!("{swarm_id}-");
    if let Some(groups) = plan.get_mut("bees").and_then(Value::as_array_mut) {
        for group in groups {
            if let Some(Value::String(instance)) = group.get_mut("instanceId") {
                let trimmed = instance.trim().to_string();
                if !trimmed.is_empty() && !trimmed.starts_with(&prefix) {
                    *instance = format!("{prefix}{trimmed}");
                }
            }
        }
    }
    plan
}

/// Error type for scenario json5 parsing
#[derive(Debug, thiserror::Error)]
pub enum ScenarioParseError {
    #[error("JSON5 parse error: {0}")]
    Json5Error(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Parse a scenario from json5 text.
pub fn parse_scenario_str(text: &str) -> Result<ScenarioPlan, ScenarioParseError> {
    let scenario: ScenarioPlan =
        json5::from_str(text).map_err(|e| ScenarioParseError::Json5Error(e.to_string()))?;

    if scenario.id.trim().is_empty() {
        return Err(ScenarioParseError::ValidationError(
            "scenario 'id' cannot be empty".to_string(),
        ));
    }
    for (index, bee) in scenario.bees.iter().enumerate() {
        if bee.role.trim().is_empty() || bee.image.trim().is_empty() {
            return Err(ScenarioParseError::ValidationError(format!(
                "bee {} needs both 'role' and 'image'",
                index
            )));
        }
    }
    if let Some(plan) = &scenario.plan {
        crate::timeline::TimelinePlan::parse(plan)
            .map_err(|e| ScenarioParseError::ValidationError(e.to_string()))?;
    }

    Ok(scenario)
}

/// Parse a scenario file.
pub fn parse_scenario_file(path: &Path) -> Result<ScenarioPlan, ScenarioParseError> {
    let text = std::fs::read_to_string(path)?;
    parse_scenario_str(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"{
        // comments are fine in json5
        id: "rest-basic",
        name: "REST basic",
        bees: [
            { role: "generator", image: "hive/generator:1", work: { "out": "gen" } },
            { role: "processor", image: "hive/processor:1", work: { "in": "gen", "out": "final" },
              env: { LOG_LEVEL: "debug" } },
            { role: "processor", image: "hive/processor:1", work: { "in": "gen" } },
        ],
        plan: {
            swarm: [ { stepId: "s-1", time: "PT0S", type: "start" } ],
        },
    }"#;

    #[test]
    fn test_parse_scenario_json5() {
        let scenario = parse_scenario_str(SCENARIO).unwrap();
        assert_eq!(scenario.id, "rest-basic");
        assert_eq!(scenario.bees.len(), 3);
        assert_eq!(scenario.bees[1].env.get("LOG_LEVEL").map(String::as_str), Some("debug"));
        assert!(scenario.plan.is_some());
    }

    #[test]
    fn test_swarm_plan_qualifies_endpoints_and_numbers_instances() {
        let scenario = parse_scenario_str(SCENARIO).unwrap();
        let plan = SwarmPlan::from_scenario("sw1", &scenario, "hive/controller:latest");

        assert_eq!(plan.id, "sw1");
        assert_eq!(plan.controller_image, "hive/controller:latest");
        assert_eq!(plan.bees[0].instance_id, "sw1-generator-1");
        assert_eq!(plan.bees[1].instance_id, "sw1-processor-1");
        assert_eq!(plan.bees[2].instance_id, "sw1-processor-2");
        assert_eq!(plan.bees[0].work.output.as_deref(), Some("sw1.gen"));
        assert_eq!(plan.bees[1].work.input.as_deref(), Some("sw1.gen"));
        assert!(plan.timeline.is_some());
    }

    #[test]
    fn test_timeline_bee_ids_follow_the_swarm() {
        let text = r#"{
            id: "ramp",
            bees: [ { role: "generator", image: "hive/generator:1" } ],
            plan: { bees: [
                { instanceId: "generator-1", role: "generator", steps: [] },
                { instanceId: "sw1-generator-1", role: "generator", steps: [] },
            ] },
        }"#;
        let scenario = parse_scenario_str(text).unwrap();
        let plan = SwarmPlan::from_scenario("sw1", &scenario, "hive/controller:latest");

        let timeline = plan.timeline.unwrap();
        assert_eq!(timeline["bees"][0]["instanceId"], "sw1-generator-1");
        assert_eq!(timeline["bees"][1]["instanceId"], "sw1-generator-1");
        // The scenario itself is left untouched
        assert_eq!(scenario.plan.unwrap()["bees"][0]["instanceId"], "generator-1");
    }

    #[test]
    fn test_scenario_with_invalid_plan_is_rejected() {
        let text = r#"{ id: "bad", plan: { swarm: [ { time: "PT0S", type: "teleport" } ] } }"#;
        assert!(matches!(
            parse_scenario_str(text),
            Err(ScenarioParseError::ValidationError(_))
        ));
    }

    #[test]
    fn test_parse_scenario_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("basic.json5");
        std::fs::write(&path, SCENARIO).unwrap();
        assert_eq!(parse_scenario_file(&path).unwrap().id, "rest-basic");
    }
}
