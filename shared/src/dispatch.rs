//! Dispatch Data Model and Message Envelopes
//!
//! Zones, missions, and tasks as stored by the dispatch server, plus the JSON
//! envelopes exchanged over its WebSocket endpoints:
//!
//! - `DispatchToRover` / `RoverToDispatch`: the rover link
//! - `BroadcastMessage`: server-to-console fan-out, merged by consoles with an
//!   upsert-by-id rule
//!
//! Entities serialize camelCase for the HTTP surface; envelope tags and fields
//! stay snake_case.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tasking::TaskStatus;

/// One waypoint in the zone's local planar frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub x: f64,
    pub y: f64,
    /// Optional target heading at this waypoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theta: Option<f64>,
}

/// A GPS vertex of a zone's outer polygon
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsCoord {
    pub lat: f64,
    pub lon: f64,
}

/// What the zone's geometry means
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneKind {
    /// Ordered waypoints driven start to end
    Route,
    /// Area bounded by the waypoint ring
    Polygon,
    /// Single point of interest
    Point,
}

/// What starts a mission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    #[default]
    Manual,
    Once,
    Cron,
}

/// When and how a mission runs
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    #[serde(default)]
    pub trigger: TriggerKind,
    /// Cron expression, only meaningful with `TriggerKind::Cron`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    /// Repeat the waypoint sequence until stopped
    #[serde(default)]
    pub r#loop: bool,
}

/// A named area or route that missions operate over
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Zone {
    pub id: Uuid,
    pub name: String,
    pub kind: ZoneKind,
    #[serde(default)]
    pub waypoints: Vec<Waypoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polygon: Option<Vec<GpsCoord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Caller-supplied fields for creating or updating a zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneDraft {
    pub name: String,
    pub kind: ZoneKind,
    #[serde(default)]
    pub waypoints: Vec<Waypoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polygon: Option<Vec<GpsCoord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map_id: Option<String>,
}

impl Zone {
    /// Create a zone from a draft with a fresh id
    pub fn new(draft: ZoneDraft) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: draft.name,
            kind: draft.kind,
            waypoints: draft.waypoints,
            polygon: draft.polygon,
            map_id: draft.map_id,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace the mutable fields from a draft
    pub fn apply(&mut self, draft: ZoneDraft) {
        self.name = draft.name;
        self.kind = draft.kind;
        self.waypoints = draft.waypoints;
        self.polygon = draft.polygon;
        self.map_id = draft.map_id;
        self.updated_at = Utc::now();
    }
}

/// A standing order to run a zone, manually triggered or scheduled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mission {
    pub id: Uuid,
    pub name: String,
    pub zone_id: Uuid,
    /// Pinned rover; `None` means any free rover is eligible
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rover_id: Option<String>,
    #[serde(default)]
    pub schedule: Schedule,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Caller-supplied fields for creating or updating a mission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionDraft {
    pub name: String,
    pub zone_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rover_id: Option<String>,
    #[serde(default)]
    pub schedule: Schedule,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Mission {
    /// Create a mission from a draft with a fresh id
    pub fn new(draft: MissionDraft) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: draft.name,
            zone_id: draft.zone_id,
            rover_id: draft.rover_id,
            schedule: draft.schedule,
            enabled: draft.enabled,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace the mutable fields from a draft
    pub fn apply(&mut self, draft: MissionDraft) {
        self.name = draft.name;
        self.zone_id = draft.zone_id;
        self.rover_id = draft.rover_id;
        self.schedule = draft.schedule;
        self.enabled = draft.enabled;
        self.updated_at = Utc::now();
    }
}

/// One execution instance of a mission
///
/// Status is authoritative and moves only along the edges in
/// [`crate::tasking`]; progress, waypoint, and lap are the rover's
/// self-reported values, persisted verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: Uuid,
    pub mission_id: Uuid,
    /// Unset until a rover is bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rover_id: Option<String>,
    pub status: TaskStatus,
    pub progress: i32,
    pub waypoint: i32,
    pub lap: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a pending, unbound task for a mission
    pub fn new(mission_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            mission_id,
            rover_id: None,
            status: TaskStatus::Pending,
            progress: 0,
            waypoint: 0,
            lap: 0,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }
}

/// A connected rover as seen by the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoverStatus {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Command/telemetry channel address
    pub address: String,
    /// Video channel address
    pub video_address: String,
    pub connected: bool,
    /// Task currently bound to this rover, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<Uuid>,
}

/// The waypoint route pushed to a rover with an assignment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutePlan {
    pub waypoints: Vec<Waypoint>,
    #[serde(default)]
    pub r#loop: bool,
}

/// Server-to-rover dispatch messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DispatchToRover {
    /// Assign a task; the rover acknowledges by reporting `active`
    Task {
        task_id: Uuid,
        mission_id: Uuid,
        zone: RoutePlan,
    },
    /// Abandon the current waypoint sequence
    Cancel { task_id: Uuid },
}

/// Rover-to-server dispatch messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RoverToDispatch {
    /// First message after connect; addresses feed the registry
    Register {
        rover_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        address: String,
        video_address: String,
    },
    /// Periodic execution report while a task runs
    Progress {
        task_id: Uuid,
        progress: i32,
        waypoint: i32,
        lap: i32,
    },
    /// Waypoint sequence finished
    Complete { task_id: Uuid, laps: i32 },
    /// Unrecoverable execution error
    Failed { task_id: Uuid, error: String },
}

/// Server-to-console broadcast envelopes
///
/// Consoles merge these by id: a known id replaces the held record in place,
/// an unseen id is inserted, and `RoverUpdate { connected: false }` removes
/// the rover. Kinds added later deserialize to `Unknown` and are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BroadcastMessage {
    TaskUpdate { task: Task },
    ZoneUpdate { zone: Zone },
    MissionUpdate { mission: Mission },
    RoverUpdate { rover: RoverStatus },
    #[serde(other)]
    Unknown,
}
