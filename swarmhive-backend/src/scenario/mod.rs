//! Scenario timelines and the repository scenarios are resolved from.

pub mod driver;
pub mod observer;
pub mod repository;
pub mod timeline;

pub use driver::TimelineDriver;
pub use observer::{NoopObserver, TimelineObserver, TracingObserver};
pub use repository::{InMemoryScenarios, ScenarioLoader, ScenarioRepository};
pub use timeline::{
    LifecycleOperations, PlanSummary, ScenarioTimeline, StepError, SwarmView, TimelineStatus,
};
