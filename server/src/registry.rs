//! Fleet registry for connected rovers
//!
//! Tracks which rovers are currently reachable, their channel addresses, and
//! which task each is bound to. Consoles read it for address resolution; the
//! engine reads it for assignment candidates.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::anyhow;
use drover_shared::dispatch::{DispatchToRover, RoverStatus};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

struct RoverEntry {
    status: RoverStatus,
    sender: mpsc::UnboundedSender<DispatchToRover>,
}

/// All currently connected rovers
#[derive(Default)]
pub struct FleetRegistry {
    rovers: Arc<RwLock<HashMap<String, RoverEntry>>>,
}

impl FleetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rover session; replaces any previous entry for the id
    pub async fn register(&self, status: RoverStatus, sender: mpsc::UnboundedSender<DispatchToRover>) {
        let mut rovers = self.rovers.write().await;
        rovers.insert(status.id.clone(), RoverEntry { status, sender });
    }

    /// Remove a rover session, returning its last status
    pub async fn unregister(&self, rover_id: &str) -> Option<RoverStatus> {
        let mut rovers = self.rovers.write().await;
        rovers.remove(rover_id).map(|entry| entry.status)
    }

    pub async fn get(&self, rover_id: &str) -> Option<RoverStatus> {
        let rovers = self.rovers.read().await;
        rovers.get(rover_id).map(|entry| entry.status.clone())
    }

    /// All connected rovers, ordered by id for stable listings
    pub async fn connected(&self) -> Vec<RoverStatus> {
        let rovers = self.rovers.read().await;
        let mut statuses: Vec<RoverStatus> =
            rovers.values().map(|entry| entry.status.clone()).collect();
        statuses.sort_by(|a, b| a.id.cmp(&b.id));
        statuses
    }

    /// Connected rovers with no task bound, ordered by id
    pub async fn free_rovers(&self) -> Vec<RoverStatus> {
        let mut statuses = self.connected().await;
        statuses.retain(|status| status.task_id.is_none());
        statuses
    }

    /// Bind or clear the task on a rover, returning the updated status
    pub async fn set_task(&self, rover_id: &str, task_id: Option<Uuid>) -> Option<RoverStatus> {
        let mut rovers = self.rovers.write().await;
        let entry = rovers.get_mut(rover_id)?;
        entry.status.task_id = task_id;
        Some(entry.status.clone())
    }

    /// Push a dispatch message to a rover's session
    pub async fn send_to(&self, rover_id: &str, message: DispatchToRover) -> anyhow::Result<()> {
        let rovers = self.rovers.read().await;
        let entry = rovers
            .get(rover_id)
            .ok_or_else(|| anyhow!("rover not connected: {rover_id}"))?;
        entry
            .sender
            .send(message)
            .map_err(|_| anyhow!("rover session closed: {rover_id}"))
    }

    pub async fn count(&self) -> usize {
        self.rovers.read().await.len()
    }
}
