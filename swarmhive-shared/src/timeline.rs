//! Timeline plan documents and their validation.
//!
//! A timeline is a declarative script replayed against a running swarm:
//!
//! ```json
//! { "bees":  [ {"instanceId": "gen-1", "role": "generator",
//!               "steps": [ {"stepId": "g-1", "name": "warm up", "time": "PT0S",
//!                           "type": "config-update", "config": {"rate": 5}} ]} ],
//!   "swarm": [ {"stepId": "s-1", "time": "PT30S", "type": "stop"} ],
//!   "loop":  false }
//! ```
//!
//! Step times are offsets from the moment the timeline starts running, written
//! as ISO-8601 durations (`PT1M30S`). The short forms understood by
//! `duration-string` (`90s`, `1m30s`) are accepted as well.
//!
//! [`TimelinePlan::parse`] validates the whole document before returning, so a
//! caller that only mutates its state on `Ok` never observes a half-loaded plan.

use std::time::Duration;

use duration_string::DurationString;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// What a step does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepType {
    /// Push the step's config document to the owning scope
    ConfigUpdate,
    /// Enable the owning scope's workload
    Start,
    /// Disable the owning scope's workload
    Stop,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::ConfigUpdate => "config-update",
            StepType::Start => "start",
            StepType::Stop => "stop",
        }
    }
}

impl std::str::FromStr for StepType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "config-update" => Ok(StepType::ConfigUpdate),
            "start" => Ok(StepType::Start),
            "stop" => Ok(StepType::Stop),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One validated step.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineStep {
    pub step_id: String,
    pub name: String,
    pub offset: Duration,
    pub step_type: StepType,
    pub config: Value,
}

/// Which part of the swarm a step group belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupOwner {
    Bee { role: String, instance_id: String },
    Swarm,
}

/// Ordered steps for one owner. Offsets never decrease within a group.
#[derive(Debug, Clone, PartialEq)]
pub struct StepGroup {
    pub owner: GroupOwner,
    pub steps: Vec<TimelineStep>,
}

/// A validated timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelinePlan {
    /// Bee groups in declaration order
    pub bees: Vec<StepGroup>,
    /// Swarm-level steps
    pub swarm: StepGroup,
    /// Replay the plan in repeating cycles
    pub looping: bool,
}

/// Reasons a plan document is rejected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlanError {
    #[error("Plan document is not valid: {0}")]
    InvalidDocument(String),

    #[error("Step '{step_id}' has an unparseable time '{time}'")]
    InvalidTime { step_id: String, time: String },

    #[error("Step '{step_id}' has negative offset '{time}'")]
    NegativeOffset { step_id: String, time: String },

    #[error("Step '{step_id}' has unknown type '{step_type}'")]
    UnknownStepType { step_id: String, step_type: String },

    #[error("Step '{step_id}' is scheduled before the step declared ahead of it")]
    OffsetsNotOrdered { step_id: String },

    #[error("Bee group {index} is missing '{field}'")]
    MissingBeeField { index: usize, field: &'static str },
}

#[derive(Debug, Deserialize)]
struct PlanDocument {
    #[serde(default)]
    bees: Vec<BeeGroupDocument>,
    #[serde(default)]
    swarm: Vec<StepDocument>,
    #[serde(default, rename = "loop")]
    looping: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BeeGroupDocument {
    instance_id: Option<String>,
    role: Option<String>,
    #[serde(default)]
    steps: Vec<StepDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StepDocument {
    step_id: Option<String>,
    name: Option<String>,
    time: Option<String>,
    #[serde(rename = "type")]
    step_type: String,
    #[serde(default)]
    config: Option<Value>,
}

impl TimelinePlan {
    /// Parse and validate a plan document.
    pub fn parse(document: &Value) -> Result<Self, PlanError> {
        let doc: PlanDocument = serde_json::from_value(document.clone())
            .map_err(|e| PlanError::InvalidDocument(e.to_string()))?;

        let mut bees = Vec::with_capacity(doc.bees.len());
        for (index, group) in doc.bees.into_iter().enumerate() {
            let role = crate::identity::normalize(group.role)
                .ok_or(PlanError::MissingBeeField { index, field: "role" })?;
            let instance_id = crate::identity::normalize(group.instance_id)
                .ok_or(PlanError::MissingBeeField { index, field: "instanceId" })?;
            let steps = parse_group(&format!("bee-{index}"), group.steps)?;
            bees.push(StepGroup {
                owner: GroupOwner::Bee { role, instance_id },
                steps,
            });
        }

        let swarm = StepGroup {
            owner: GroupOwner::Swarm,
            steps: parse_group("swarm", doc.swarm)?,
        };

        Ok(Self {
            bees,
            swarm,
            looping: doc.looping,
        })
    }

    /// Number of steps across every group.
    pub fn total_steps(&self) -> usize {
        self.groups().map(|g| g.steps.len()).sum()
    }

    /// Bee groups in declaration order, then the swarm group.
    pub fn groups(&self) -> impl Iterator<Item = &StepGroup> {
        self.bees.iter().chain(std::iter::once(&self.swarm))
    }

    /// Offset of the last step to fire, if any.
    pub fn max_offset(&self) -> Option<Duration> {
        self.groups()
            .flat_map(|g| g.steps.iter().map(|s| s.offset))
            .max()
    }
}

fn parse_group(group: &str, steps: Vec<StepDocument>) -> Result<Vec<TimelineStep>, PlanError> {
    let mut parsed: Vec<TimelineStep> = Vec::with_capacity(steps.len());

    for (index, step) in steps.into_iter().enumerate() {
        let step_id = crate::identity::normalize(step.step_id)
            .unwrap_or_else(|| format!("{group}-{index}"));
        let time = step.time.unwrap_or_else(|| "PT0S".to_string());

        let offset = match parse_offset(&time) {
            Some(Ok(offset)) => offset,
            Some(Err(())) => {
                return Err(PlanError::NegativeOffset {
                    step_id,
                    time,
                });
            }
            None => return Err(PlanError::InvalidTime { step_id, time }),
        };

        let step_type = step.step_type.parse::<StepType>().map_err(|_| {
            PlanError::UnknownStepType {
                step_id: step_id.clone(),
                step_type: step.step_type.clone(),
            }
        })?;

        if let Some(previous) = parsed.last() {
            if offset < previous.offset {
                return Err(PlanError::OffsetsNotOrdered { step_id });
            }
        }

        parsed.push(TimelineStep {
            name: crate::identity::normalize(step.name).unwrap_or_else(|| step_id.clone()),
            step_id,
            offset,
            step_type,
            config: step.config.unwrap_or_else(|| Value::Object(Default::default())),
        });
    }

    Ok(parsed)
}

/// Parse a step time.
///
/// Returns `None` when the text is not a duration, `Some(Err(()))` when it is a
/// negative one.
pub fn parse_offset(text: &str) -> Option<Result<Duration, ()>> {
    let text = text.trim();
    if let Some(rest) = text.strip_prefix('-') {
        return parse_offset(rest).map(|parsed| match parsed {
            Ok(d) if d.is_zero() => Ok(d),
            _ => Err(()),
        });
    }
    if text.starts_with('P') || text.starts_with('p') {
        return parse_iso8601(text).map(Ok);
    }
    text.parse::<DurationString>()
        .ok()
        .map(|d| Ok(Duration::from(d)))
}

/// Parse an ISO-8601 duration of the form `PnDTnHnMnS` (weeks as `PnW`).
fn parse_iso8601(text: &str) -> Option<Duration> {
    let body = text.get(1..)?.to_ascii_uppercase();
    if body.is_empty() {
        return None;
    }

    let (date_part, time_part) = match body.split_once('T') {
        Some((date, time)) => {
            if time.is_empty() {
                return None;
            }
            (date.to_string(), Some(time.to_string()))
        }
        None => (body.clone(), None),
    };

    let mut seconds = 0f64;
    for (value, unit) in components(&date_part)? {
        seconds += value
            * match unit {
                'W' => 7.0 * 86_400.0,
                'D' => 86_400.0,
                _ => return None,
            };
    }
    if let Some(time_part) = time_part {
        for (value, unit) in components(&time_part)? {
            seconds += value
                * match unit {
                    'H' => 3_600.0,
                    'M' => 60.0,
                    'S' => 1.0,
                    _ => return None,
                };
        }
    }

    Duration::try_from_secs_f64(seconds).ok()
}

/// Split `1H30M` into `[(1.0, 'H'), (30.0, 'M')]`.
fn components(text: &str) -> Option<Vec<(f64, char)>> {
    let mut out = Vec::new();
    let mut number = String::new();
    for c in text.chars() {
        if c.is_ascii_digit() || c == '.' || c == ',' {
            number.push(if c == ',' { '.' } else { c });
        } else {
            if number.is_empty() {
                return None;
            }
            out.push((number.parse::<f64>().ok()?, c));
            number.clear();
        }
    }
    if number.is_empty() { Some(out) } else { None }
}
