//! In-process store for zones, missions, and tasks
//!
//! Keeps the relational shape of the dispatch schema behind a narrow API so
//! the engine never reaches into the tables directly. All mutations take the
//! single write lock, which is what serializes the check-and-create on
//! mission start.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;

use drover_shared::dispatch::{Mission, MissionDraft, Task, Zone, ZoneDraft};
use drover_shared::tasking::TaskStatus;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Filters for task listings
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub rover_id: Option<String>,
    pub mission_id: Option<Uuid>,
}

impl TaskFilter {
    fn matches(&self, task: &Task) -> bool {
        if let Some(status) = self.status {
            if task.status != status {
                return false;
            }
        }
        if let Some(rover_id) = &self.rover_id {
            if task.rover_id.as_deref() != Some(rover_id.as_str()) {
                return false;
            }
        }
        if let Some(mission_id) = self.mission_id {
            if task.mission_id != mission_id {
                return false;
            }
        }
        true
    }
}

/// Outcome of a task creation attempt for a mission
#[derive(Debug, Clone)]
pub enum TaskCreation {
    /// A fresh pending task was inserted
    Created(Task),
    /// The mission already had a non-terminal task; returned unchanged
    Existing(Task),
}

#[derive(Default)]
struct Tables {
    zones: HashMap<Uuid, Zone>,
    missions: HashMap<Uuid, Mission>,
    tasks: HashMap<Uuid, Task>,
}

/// Shared handle to the dispatch tables
#[derive(Clone, Default)]
pub struct DispatchStore {
    inner: Arc<RwLock<Tables>>,
}

impl DispatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Zones

    /// All zones, newest first
    pub async fn list_zones(&self) -> Vec<Zone> {
        let tables = self.inner.read().await;
        let mut zones: Vec<Zone> = tables.zones.values().cloned().collect();
        zones.sort_by_key(|zone| Reverse(zone.created_at));
        zones
    }

    pub async fn get_zone(&self, id: Uuid) -> Option<Zone> {
        self.inner.read().await.zones.get(&id).cloned()
    }

    pub async fn create_zone(&self, draft: ZoneDraft) -> Zone {
        let zone = Zone::new(draft);
        let mut tables = self.inner.write().await;
        tables.zones.insert(zone.id, zone.clone());
        zone
    }

    pub async fn update_zone(&self, id: Uuid, draft: ZoneDraft) -> Option<Zone> {
        let mut tables = self.inner.write().await;
        let zone = tables.zones.get_mut(&id)?;
        zone.apply(draft);
        Some(zone.clone())
    }

    /// Remove a zone, its missions, and their tasks in one pass
    ///
    /// Returns everything removed so the caller can notify affected rovers.
    pub async fn remove_zone(&self, id: Uuid) -> Option<(Zone, Vec<Mission>, Vec<Task>)> {
        let mut tables = self.inner.write().await;
        let zone = tables.zones.remove(&id)?;

        let mission_ids: Vec<Uuid> = tables
            .missions
            .values()
            .filter(|mission| mission.zone_id == id)
            .map(|mission| mission.id)
            .collect();

        let mut missions = Vec::new();
        let mut tasks = Vec::new();
        for mission_id in mission_ids {
            if let Some(mission) = tables.missions.remove(&mission_id) {
                missions.push(mission);
            }
            let task_ids: Vec<Uuid> = tables
                .tasks
                .values()
                .filter(|task| task.mission_id == mission_id)
                .map(|task| task.id)
                .collect();
            for task_id in task_ids {
                if let Some(task) = tables.tasks.remove(&task_id) {
                    tasks.push(task);
                }
            }
        }

        Some((zone, missions, tasks))
    }

    // Missions

    /// All missions, newest first
    pub async fn list_missions(&self) -> Vec<Mission> {
        let tables = self.inner.read().await;
        let mut missions: Vec<Mission> = tables.missions.values().cloned().collect();
        missions.sort_by_key(|mission| Reverse(mission.created_at));
        missions
    }

    pub async fn get_mission(&self, id: Uuid) -> Option<Mission> {
        self.inner.read().await.missions.get(&id).cloned()
    }

    pub async fn create_mission(&self, draft: MissionDraft) -> Mission {
        let mission = Mission::new(draft);
        let mut tables = self.inner.write().await;
        tables.missions.insert(mission.id, mission.clone());
        mission
    }

    pub async fn update_mission(&self, id: Uuid, draft: MissionDraft) -> Option<Mission> {
        let mut tables = self.inner.write().await;
        let mission = tables.missions.get_mut(&id)?;
        mission.apply(draft);
        Some(mission.clone())
    }

    /// Remove a mission and its tasks
    pub async fn remove_mission(&self, id: Uuid) -> Option<(Mission, Vec<Task>)> {
        let mut tables = self.inner.write().await;
        let mission = tables.missions.remove(&id)?;

        let task_ids: Vec<Uuid> = tables
            .tasks
            .values()
            .filter(|task| task.mission_id == id)
            .map(|task| task.id)
            .collect();
        let mut tasks = Vec::new();
        for task_id in task_ids {
            if let Some(task) = tables.tasks.remove(&task_id) {
                tasks.push(task);
            }
        }

        Some((mission, tasks))
    }

    // Tasks

    /// Tasks matching the filter, newest first
    pub async fn list_tasks(&self, filter: &TaskFilter) -> Vec<Task> {
        let tables = self.inner.read().await;
        let mut tasks: Vec<Task> = tables
            .tasks
            .values()
            .filter(|task| filter.matches(task))
            .cloned()
            .collect();
        tasks.sort_by_key(|task| Reverse(task.created_at));
        tasks
    }

    pub async fn get_task(&self, id: Uuid) -> Option<Task> {
        self.inner.read().await.tasks.get(&id).cloned()
    }

    /// Create a pending task for a mission unless one is already in flight
    ///
    /// The existing-task check and the insert hold the same write guard, so
    /// two concurrent starts serialize and the second sees the first's row.
    pub async fn create_task_for_mission(&self, mission_id: Uuid) -> TaskCreation {
        let mut tables = self.inner.write().await;
        if let Some(existing) = tables
            .tasks
            .values()
            .find(|task| task.mission_id == mission_id && !task.status.is_terminal())
        {
            return TaskCreation::Existing(existing.clone());
        }

        let task = Task::new(mission_id);
        tables.tasks.insert(task.id, task.clone());
        TaskCreation::Created(task)
    }

    /// Run a closure against a task under the write lock
    ///
    /// The closure sees the current row and mutates it in place; transition
    /// checks belong inside it so validate-and-write stays atomic.
    pub async fn update_task<T>(&self, id: Uuid, mutate: impl FnOnce(&mut Task) -> T) -> Option<T> {
        let mut tables = self.inner.write().await;
        let task = tables.tasks.get_mut(&id)?;
        Some(mutate(task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_shared::dispatch::{Schedule, Waypoint, ZoneKind};

    fn zone_draft(name: &str) -> ZoneDraft {
        ZoneDraft {
            name: name.into(),
            kind: ZoneKind::Route,
            waypoints: vec![Waypoint {
                x: 0.0,
                y: 0.0,
                theta: None,
            }],
            polygon: None,
            map_id: None,
        }
    }

    fn mission_draft(zone_id: Uuid) -> MissionDraft {
        MissionDraft {
            name: "patrol".into(),
            zone_id,
            rover_id: None,
            schedule: Schedule::default(),
            enabled: true,
        }
    }

    #[tokio::test]
    async fn test_zone_crud() {
        let store = DispatchStore::new();
        let zone = store.create_zone(zone_draft("a")).await;

        assert_eq!(store.get_zone(zone.id).await.map(|z| z.name), Some("a".into()));

        let updated = store
            .update_zone(zone.id, zone_draft("b"))
            .await
            .expect("zone exists");
        assert_eq!(updated.name, "b");
        assert_eq!(updated.id, zone.id);

        assert!(store.update_zone(Uuid::new_v4(), zone_draft("x")).await.is_none());
    }

    #[tokio::test]
    async fn test_zone_delete_cascades() {
        let store = DispatchStore::new();
        let zone = store.create_zone(zone_draft("field")).await;
        let other_zone = store.create_zone(zone_draft("yard")).await;

        let mission = store.create_mission(mission_draft(zone.id)).await;
        let other_mission = store.create_mission(mission_draft(other_zone.id)).await;

        let task = match store.create_task_for_mission(mission.id).await {
            TaskCreation::Created(task) => task,
            TaskCreation::Existing(_) => panic!("no task existed yet"),
        };

        let (removed_zone, removed_missions, removed_tasks) =
            store.remove_zone(zone.id).await.expect("zone exists");
        assert_eq!(removed_zone.id, zone.id);
        assert_eq!(removed_missions.len(), 1);
        assert_eq!(removed_tasks.len(), 1);
        assert_eq!(removed_tasks[0].id, task.id);

        assert!(store.get_mission(mission.id).await.is_none());
        assert!(store.get_task(task.id).await.is_none());

        // Unrelated rows stay
        assert!(store.get_mission(other_mission.id).await.is_some());
    }

    #[tokio::test]
    async fn test_one_task_in_flight_per_mission() {
        let store = DispatchStore::new();
        let zone = store.create_zone(zone_draft("field")).await;
        let mission = store.create_mission(mission_draft(zone.id)).await;

        let first = match store.create_task_for_mission(mission.id).await {
            TaskCreation::Created(task) => task,
            TaskCreation::Existing(_) => panic!("no task existed yet"),
        };
        let second = match store.create_task_for_mission(mission.id).await {
            TaskCreation::Existing(task) => task,
            TaskCreation::Created(_) => panic!("duplicate task created"),
        };
        assert_eq!(first.id, second.id);

        // A terminal task frees the slot
        store
            .update_task(first.id, |task| {
                task.status = TaskStatus::Cancelled;
            })
            .await
            .expect("task exists");
        assert!(matches!(
            store.create_task_for_mission(mission.id).await,
            TaskCreation::Created(_)
        ));
    }

    #[tokio::test]
    async fn test_task_filters() {
        let store = DispatchStore::new();
        let zone = store.create_zone(zone_draft("field")).await;
        let mission_a = store.create_mission(mission_draft(zone.id)).await;
        let mission_b = store.create_mission(mission_draft(zone.id)).await;

        let task_a = match store.create_task_for_mission(mission_a.id).await {
            TaskCreation::Created(task) => task,
            TaskCreation::Existing(_) => unreachable!(),
        };
        let _task_b = match store.create_task_for_mission(mission_b.id).await {
            TaskCreation::Created(task) => task,
            TaskCreation::Existing(_) => unreachable!(),
        };

        store
            .update_task(task_a.id, |task| {
                task.status = TaskStatus::Assigned;
                task.rover_id = Some("bvr-01".into());
            })
            .await
            .expect("task exists");

        let all = store.list_tasks(&TaskFilter::default()).await;
        assert_eq!(all.len(), 2);

        let assigned = store
            .list_tasks(&TaskFilter {
                status: Some(TaskStatus::Assigned),
                ..Default::default()
            })
            .await;
        assert_eq!(assigned.len(), 1);
        assert_eq!(assigned[0].id, task_a.id);

        let by_rover = store
            .list_tasks(&TaskFilter {
                rover_id: Some("bvr-01".into()),
                ..Default::default()
            })
            .await;
        assert_eq!(by_rover.len(), 1);

        let by_mission = store
            .list_tasks(&TaskFilter {
                mission_id: Some(mission_b.id),
                ..Default::default()
            })
            .await;
        assert_eq!(by_mission.len(), 1);
    }
}
