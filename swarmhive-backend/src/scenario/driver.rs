//! Fixed-cadence scheduler that ticks a [`ScenarioTimeline`].

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use super::timeline::{ScenarioTimeline, SwarmView, TimelineStatus};

/// Internal control messages for the tick task
#[derive(Debug, Clone)]
enum DriverControl {
    Stop,
}

/// Owns the tick task. Dropping the driver closes the control channel, which
/// ends the task and discards the timeline's run state.
pub struct TimelineDriver {
    control_sender: mpsc::UnboundedSender<DriverControl>,
    task_handle: JoinHandle<TimelineStatus>,
}

impl TimelineDriver {
    /// Start ticking `timeline` every `cadence`
    pub fn spawn(mut timeline: ScenarioTimeline, view: SwarmView, cadence: Duration) -> Self {
        let (control_sender, mut control_receiver) = mpsc::unbounded_channel();

        let task_handle = tokio::spawn(async move {
            let mut ticker = interval(cadence);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(
                "[TIMELINE] {}: driver ticking every {:?}",
                view.swarm_id, cadence
            );

            loop {
                tokio::select! {
                    instant = ticker.tick() => {
                        timeline.on_tick(&view, instant.into_std());
                        if timeline.status() == TimelineStatus::Completed {
                            debug!("[TIMELINE] {}: completed, driver exiting", view.swarm_id);
                            break;
                        }
                    }
                    control = control_receiver.recv() => match control {
                        Some(DriverControl::Stop) | None => {
                            info!("[TIMELINE] {}: driver stopped", view.swarm_id);
                            break;
                        }
                    },
                }
            }

            timeline.status()
        });

        Self {
            control_sender,
            task_handle,
        }
    }

    /// Stop ticking and wait for the task. Returns the status the timeline
    /// reached, if the task ended cleanly.
    pub async fn stop(self) -> Option<TimelineStatus> {
        // The task may already have exited on completion
        let _ = self.control_sender.send(DriverControl::Stop);
        match self.task_handle.await {
            Ok(status) => Some(status),
            Err(e) => {
                warn!("[TIMELINE] driver task ended abnormally: {}", e);
                None
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task_handle.is_finished()
    }
}
