//! Dispatch task engine
//!
//! This module handles:
//! - Zone and mission writes with broadcast fan-out
//! - Mission start/stop and task cancellation
//! - Binding pending tasks to connected rovers
//! - Validating and persisting rover progress reports
//!
//! The engine is the only writer of task state. Every change is pushed to
//! subscribers over a broadcast channel; a slow console lags on its own
//! receiver and never blocks a mutation here.

use chrono::Utc;
use drover_shared::dispatch::{
    BroadcastMessage, DispatchToRover, Mission, MissionDraft, RoutePlan, RoverStatus, Task, Zone,
    ZoneDraft,
};
use drover_shared::tasking::{check_transition, TaskStatus, TransitionError};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::registry::FleetRegistry;
use crate::store::{DispatchStore, TaskCreation, TaskFilter};

/// Broadcast buffer per subscriber; a console this far behind starts lagging
const BROADCAST_CAPACITY: usize = 256;

/// Failures surfaced to the HTTP and WebSocket layers
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("zone not found")]
    UnknownZone,
    #[error("mission not found")]
    UnknownMission,
    #[error("task not found")]
    UnknownTask,
    #[error("mission is disabled")]
    MissionDisabled,
    #[error("no task in flight for mission")]
    NoTaskInFlight,
    #[error("task is not bound to rover {0}")]
    NotBound(String),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// Server-authoritative coordinator for zones, missions, and tasks
pub struct DispatchEngine {
    store: DispatchStore,
    registry: FleetRegistry,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
}

impl Default for DispatchEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchEngine {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            store: DispatchStore::new(),
            registry: FleetRegistry::new(),
            broadcast_tx,
        }
    }

    pub fn store(&self) -> &DispatchStore {
        &self.store
    }

    pub fn registry(&self) -> &FleetRegistry {
        &self.registry
    }

    /// Subscribe to the state-change fan-out
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastMessage> {
        self.broadcast_tx.subscribe()
    }

    /// Send with no subscribers is not an error
    fn publish(&self, message: BroadcastMessage) {
        let _ = self.broadcast_tx.send(message);
    }

    // Zones

    pub async fn create_zone(&self, draft: ZoneDraft) -> Zone {
        let zone = self.store.create_zone(draft).await;
        info!("Zone created: {} ({})", zone.name, zone.id);
        self.publish(BroadcastMessage::ZoneUpdate { zone: zone.clone() });
        zone
    }

    pub async fn update_zone(&self, id: Uuid, draft: ZoneDraft) -> Result<Zone, EngineError> {
        let zone = self
            .store
            .update_zone(id, draft)
            .await
            .ok_or(EngineError::UnknownZone)?;
        self.publish(BroadcastMessage::ZoneUpdate { zone: zone.clone() });
        Ok(zone)
    }

    /// Delete a zone and everything under it
    ///
    /// Rovers bound to a removed in-flight task are told to abandon it.
    pub async fn delete_zone(&self, id: Uuid) -> Result<(), EngineError> {
        let (zone, missions, tasks) = self
            .store
            .remove_zone(id)
            .await
            .ok_or(EngineError::UnknownZone)?;
        info!(
            "Zone {} deleted ({} missions, {} tasks)",
            zone.id,
            missions.len(),
            tasks.len()
        );
        self.release_rovers_from(&tasks).await;
        Ok(())
    }

    // Missions

    pub async fn create_mission(&self, draft: MissionDraft) -> Result<Mission, EngineError> {
        self.store
            .get_zone(draft.zone_id)
            .await
            .ok_or(EngineError::UnknownZone)?;
        let mission = self.store.create_mission(draft).await;
        info!("Mission created: {} ({})", mission.name, mission.id);
        self.publish(BroadcastMessage::MissionUpdate {
            mission: mission.clone(),
        });
        Ok(mission)
    }

    pub async fn update_mission(&self, id: Uuid, draft: MissionDraft) -> Result<Mission, EngineError> {
        self.store
            .get_zone(draft.zone_id)
            .await
            .ok_or(EngineError::UnknownZone)?;
        let mission = self
            .store
            .update_mission(id, draft)
            .await
            .ok_or(EngineError::UnknownMission)?;
        self.publish(BroadcastMessage::MissionUpdate {
            mission: mission.clone(),
        });
        Ok(mission)
    }

    pub async fn delete_mission(&self, id: Uuid) -> Result<(), EngineError> {
        let (mission, tasks) = self
            .store
            .remove_mission(id)
            .await
            .ok_or(EngineError::UnknownMission)?;
        info!("Mission {} deleted ({} tasks)", mission.id, tasks.len());
        self.release_rovers_from(&tasks).await;
        Ok(())
    }

    /// Start a mission, or return its task unchanged if one is in flight
    pub async fn start_mission(&self, id: Uuid) -> Result<Task, EngineError> {
        let mission = self
            .store
            .get_mission(id)
            .await
            .ok_or(EngineError::UnknownMission)?;
        if !mission.enabled {
            return Err(EngineError::MissionDisabled);
        }
        let zone = self
            .store
            .get_zone(mission.zone_id)
            .await
            .ok_or(EngineError::UnknownZone)?;

        match self.store.create_task_for_mission(mission.id).await {
            TaskCreation::Existing(task) => {
                debug!("Start of mission {} is a no-op, task {} in flight", mission.id, task.id);
                Ok(task)
            }
            TaskCreation::Created(task) => {
                info!("Mission {} started, task {}", mission.id, task.id);
                self.publish(BroadcastMessage::TaskUpdate { task: task.clone() });
                Ok(self.try_assign(task, &mission, &zone).await)
            }
        }
    }

    /// Cancel whatever task is in flight for a mission
    pub async fn stop_mission(&self, id: Uuid) -> Result<Task, EngineError> {
        self.store
            .get_mission(id)
            .await
            .ok_or(EngineError::UnknownMission)?;
        let tasks = self
            .store
            .list_tasks(&TaskFilter {
                mission_id: Some(id),
                ..Default::default()
            })
            .await;
        let in_flight = tasks
            .into_iter()
            .find(|task| !task.status.is_terminal())
            .ok_or(EngineError::NoTaskInFlight)?;
        self.cancel_task(in_flight.id).await
    }

    /// Cancel a task and tell its rover to abandon the waypoint sequence
    pub async fn cancel_task(&self, id: Uuid) -> Result<Task, EngineError> {
        let task = self
            .store
            .update_task(id, |task| -> Result<Task, EngineError> {
                check_transition(task.status, TaskStatus::Cancelled)?;
                task.status = TaskStatus::Cancelled;
                task.ended_at = Some(Utc::now());
                Ok(task.clone())
            })
            .await
            .ok_or(EngineError::UnknownTask)??;

        info!("Task {} cancelled", task.id);
        if let Some(rover_id) = task.rover_id.clone() {
            self.notify_abandon(&rover_id, task.id).await;
        }
        self.publish(BroadcastMessage::TaskUpdate { task: task.clone() });
        Ok(task)
    }

    /// Persist a rover's execution report verbatim after validating it
    #[allow(clippy::too_many_arguments)]
    pub async fn report_progress(
        &self,
        rover_id: &str,
        task_id: Uuid,
        status: TaskStatus,
        progress: Option<i32>,
        waypoint: Option<i32>,
        lap: Option<i32>,
        error: Option<String>,
    ) -> Result<Task, EngineError> {
        let task = self
            .store
            .update_task(task_id, |task| -> Result<Task, EngineError> {
                if task.rover_id.as_deref() != Some(rover_id) {
                    return Err(EngineError::NotBound(rover_id.to_string()));
                }
                check_transition(task.status, status)?;
                task.status = status;
                if let Some(progress) = progress {
                    task.progress = progress;
                }
                if let Some(waypoint) = waypoint {
                    task.waypoint = waypoint;
                }
                if let Some(lap) = lap {
                    task.lap = lap;
                }
                if error.is_some() {
                    task.error = error;
                }
                if status == TaskStatus::Active && task.started_at.is_none() {
                    task.started_at = Some(Utc::now());
                }
                if status.is_terminal() {
                    task.ended_at = Some(Utc::now());
                }
                Ok(task.clone())
            })
            .await
            .ok_or(EngineError::UnknownTask)??;

        if task.status.is_terminal() {
            info!("Task {} reached terminal state: {}", task.id, task.status);
            if let Some(status) = self.registry.set_task(rover_id, None).await {
                self.publish(BroadcastMessage::RoverUpdate { rover: status });
            }
        } else {
            debug!("Task {} progress: {}% at waypoint {}", task.id, task.progress, task.waypoint);
        }
        self.publish(BroadcastMessage::TaskUpdate { task: task.clone() });
        Ok(task)
    }

    // Rover sessions

    /// Called once a rover's register message arrives on its socket
    pub async fn rover_connected(
        &self,
        status: RoverStatus,
        sender: mpsc::UnboundedSender<DispatchToRover>,
    ) {
        info!("Rover connected: {} at {}", status.id, status.address);
        self.registry.register(status.clone(), sender).await;
        self.publish(BroadcastMessage::RoverUpdate {
            rover: status.clone(),
        });
        self.assign_waiting_task(&status.id).await;
    }

    /// Called when a rover's socket closes for any reason
    ///
    /// Its in-flight task is left untouched; the rover resumes reporting if
    /// it reconnects, and an operator can cancel otherwise.
    pub async fn rover_disconnected(&self, rover_id: &str) {
        if let Some(mut status) = self.registry.unregister(rover_id).await {
            info!("Rover disconnected: {}", rover_id);
            status.connected = false;
            self.publish(BroadcastMessage::RoverUpdate { rover: status });
        }
    }

    /// Bind the oldest pending task this rover is eligible for, if any
    async fn assign_waiting_task(&self, rover_id: &str) {
        let mut pending = self
            .store
            .list_tasks(&TaskFilter {
                status: Some(TaskStatus::Pending),
                ..Default::default()
            })
            .await;
        pending.sort_by_key(|task| task.created_at);

        for task in pending {
            let Some(mission) = self.store.get_mission(task.mission_id).await else {
                continue;
            };
            let eligible = mission
                .rover_id
                .as_deref()
                .map(|pinned| pinned == rover_id)
                .unwrap_or(true);
            if !eligible {
                continue;
            }
            let Some(zone) = self.store.get_zone(mission.zone_id).await else {
                continue;
            };
            let still_free = self
                .registry
                .get(rover_id)
                .await
                .map(|status| status.task_id.is_none())
                .unwrap_or(false);
            if !still_free {
                return;
            }
            self.assign_to(task, rover_id, &mission, &zone).await;
            return;
        }
    }

    /// Pick a rover for a fresh task: the pinned one if set, else any free one
    async fn try_assign(&self, task: Task, mission: &Mission, zone: &Zone) -> Task {
        let candidate = match &mission.rover_id {
            Some(pinned) => self
                .registry
                .get(pinned)
                .await
                .filter(|status| status.task_id.is_none()),
            None => self.registry.free_rovers().await.into_iter().next(),
        };
        match candidate {
            Some(rover) => self.assign_to(task, &rover.id, mission, zone).await,
            None => {
                debug!("No eligible rover, task {} stays pending", task.id);
                task
            }
        }
    }

    /// Bind a pending task to a rover and push the route to it
    async fn assign_to(&self, task: Task, rover_id: &str, mission: &Mission, zone: &Zone) -> Task {
        let assigned = self
            .store
            .update_task(task.id, |task| {
                if check_transition(task.status, TaskStatus::Assigned).is_err() {
                    return None;
                }
                task.status = TaskStatus::Assigned;
                task.rover_id = Some(rover_id.to_string());
                Some(task.clone())
            })
            .await
            .flatten();
        let Some(task) = assigned else {
            // Raced with a cancel; nothing to bind
            return task;
        };

        info!("Task {} assigned to rover {}", task.id, rover_id);
        if let Some(status) = self.registry.set_task(rover_id, Some(task.id)).await {
            self.publish(BroadcastMessage::RoverUpdate { rover: status });
        }
        let message = DispatchToRover::Task {
            task_id: task.id,
            mission_id: mission.id,
            zone: RoutePlan {
                waypoints: zone.waypoints.clone(),
                r#loop: mission.schedule.r#loop,
            },
        };
        if let Err(error) = self.registry.send_to(rover_id, message).await {
            warn!("Failed to push assignment to {}: {}", rover_id, error);
        }
        self.publish(BroadcastMessage::TaskUpdate { task: task.clone() });
        task
    }

    /// Tell the rover bound to each removed in-flight task to abandon it
    async fn release_rovers_from(&self, tasks: &[Task]) {
        for task in tasks {
            if task.status.is_terminal() {
                continue;
            }
            let Some(rover_id) = &task.rover_id else {
                continue;
            };
            self.notify_abandon(rover_id, task.id).await;
        }
    }

    async fn notify_abandon(&self, rover_id: &str, task_id: Uuid) {
        if let Err(error) = self
            .registry
            .send_to(rover_id, DispatchToRover::Cancel { task_id })
            .await
        {
            debug!("Abandon notice not delivered to {}: {}", rover_id, error);
        }
        if let Some(status) = self.registry.set_task(rover_id, None).await {
            self.publish(BroadcastMessage::RoverUpdate { rover: status });
        }
    }
}
