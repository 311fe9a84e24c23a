//! Console-side fleet view
//!
//! Kept eventually consistent by applying dispatch broadcasts with an
//! upsert-by-id merge. Re-delivery and reordering across unrelated ids are
//! tolerated; a disconnected rover is removed rather than kept as a stale
//! record.

use drover_shared::dispatch::{BroadcastMessage, Mission, RoverStatus, Task, Zone};
use uuid::Uuid;

/// Everything the console knows about the fleet
#[derive(Debug, Default)]
pub struct FleetView {
    pub zones: Vec<Zone>,
    pub missions: Vec<Mission>,
    pub tasks: Vec<Task>,
    /// Currently connected rovers only
    pub rovers: Vec<RoverStatus>,
}

impl FleetView {
    /// Apply one broadcast envelope
    pub fn apply(&mut self, message: BroadcastMessage) {
        match message {
            BroadcastMessage::TaskUpdate { task } => {
                let id = task.id;
                upsert(&mut self.tasks, |t| t.id == id, task);
            }
            BroadcastMessage::ZoneUpdate { zone } => {
                let id = zone.id;
                upsert(&mut self.zones, |z| z.id == id, zone);
            }
            BroadcastMessage::MissionUpdate { mission } => {
                let id = mission.id;
                upsert(&mut self.missions, |m| m.id == id, mission);
            }
            BroadcastMessage::RoverUpdate { rover } => {
                if rover.connected {
                    let id = rover.id.clone();
                    upsert(&mut self.rovers, |r| r.id == id, rover);
                } else {
                    self.rovers.retain(|r| r.id != rover.id);
                }
            }
            // Forward compatibility: unknown kinds are dropped
            BroadcastMessage::Unknown => {}
        }
    }

    pub fn rover(&self, id: &str) -> Option<&RoverStatus> {
        self.rovers.iter().find(|r| r.id == id)
    }

    pub fn mission(&self, id: Uuid) -> Option<&Mission> {
        self.missions.iter().find(|m| m.id == id)
    }
}

/// Replace in place when the id is known, preserving position; otherwise
/// insert newest first
fn upsert<T>(items: &mut Vec<T>, same: impl Fn(&T) -> bool, item: T) {
    match items.iter().position(same) {
        Some(index) => items[index] = item,
        None => items.insert(0, item),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_shared::dispatch::{MissionDraft, Schedule, ZoneDraft, ZoneKind};

    fn task_update(task: &Task) -> BroadcastMessage {
        BroadcastMessage::TaskUpdate { task: task.clone() }
    }

    fn rover(id: &str, connected: bool) -> RoverStatus {
        RoverStatus {
            id: id.into(),
            name: None,
            address: format!("ws://{}:8765", id),
            video_address: format!("ws://{}:8766", id),
            connected,
            task_id: None,
        }
    }

    #[test]
    fn test_unseen_ids_prepend_and_known_ids_replace_in_place() {
        let mut view = FleetView::default();
        let mut first = Task::new(Uuid::new_v4());
        let second = Task::new(Uuid::new_v4());

        view.apply(task_update(&first));
        view.apply(task_update(&second));
        // Newest first
        assert_eq!(view.tasks[0].id, second.id);
        assert_eq!(view.tasks[1].id, first.id);

        first.progress = 50;
        view.apply(task_update(&first));
        assert_eq!(view.tasks.len(), 2);
        // The update landed in place, not at the head
        assert_eq!(view.tasks[1].id, first.id);
        assert_eq!(view.tasks[1].progress, 50);
    }

    #[test]
    fn test_reapplying_an_envelope_is_idempotent() {
        let mut view = FleetView::default();
        let mut task = Task::new(Uuid::new_v4());
        task.progress = 33;

        view.apply(task_update(&task));
        view.apply(task_update(&task));

        assert_eq!(view.tasks.len(), 1);
        assert_eq!(view.tasks[0].progress, 33);
    }

    #[test]
    fn test_disconnected_rover_is_removed() {
        let mut view = FleetView::default();
        view.apply(BroadcastMessage::RoverUpdate {
            rover: rover("bvr-01", true),
        });
        view.apply(BroadcastMessage::RoverUpdate {
            rover: rover("bvr-02", true),
        });
        assert_eq!(view.rovers.len(), 2);

        view.apply(BroadcastMessage::RoverUpdate {
            rover: rover("bvr-01", false),
        });
        assert!(view.rover("bvr-01").is_none());
        assert!(view.rover("bvr-02").is_some());

        // Re-delivered removal is harmless
        view.apply(BroadcastMessage::RoverUpdate {
            rover: rover("bvr-01", false),
        });
        assert_eq!(view.rovers.len(), 1);
    }

    #[test]
    fn test_unknown_envelope_kind_is_ignored() {
        let mut view = FleetView::default();
        let message: BroadcastMessage =
            serde_json::from_str(r#"{"type":"telemetry_digest","snr":17}"#)
                .expect("unknown kinds still deserialize");

        view.apply(message);

        assert!(view.zones.is_empty());
        assert!(view.tasks.is_empty());
        assert!(view.rovers.is_empty());
    }

    #[test]
    fn test_interleaved_updates_across_unrelated_ids() {
        let mut view = FleetView::default();
        let zone = Zone::new(ZoneDraft {
            name: "North lot".into(),
            kind: ZoneKind::Route,
            waypoints: Vec::new(),
            polygon: None,
            map_id: None,
        });
        let mission = Mission::new(MissionDraft {
            name: "Perimeter".into(),
            zone_id: zone.id,
            rover_id: None,
            schedule: Schedule::default(),
            enabled: true,
        });
        let task = Task::new(mission.id);

        // Deliveries arrive out of creation order, one of them twice
        view.apply(BroadcastMessage::TaskUpdate { task: task.clone() });
        view.apply(BroadcastMessage::ZoneUpdate { zone: zone.clone() });
        view.apply(BroadcastMessage::TaskUpdate { task: task.clone() });
        view.apply(BroadcastMessage::MissionUpdate {
            mission: mission.clone(),
        });

        assert_eq!(view.zones.len(), 1);
        assert_eq!(view.missions.len(), 1);
        assert_eq!(view.tasks.len(), 1);
        assert_eq!(view.mission(mission.id).map(|m| m.zone_id), Some(zone.id));
    }
}
