//! Event Types
//!
//! Envelope, category and context types shared by every signal on the bus.

use crate::domain::{
    DirtyData, Disk, HomeAssistantState, MountPointData, Partition, SambaStatus, Setting,
    SharedResource, User, Volume,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What happened to the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Add,
    Remove,
    Update,
    Error,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Add => write!(f, "add"),
            EventKind::Remove => write!(f, "remove"),
            EventKind::Update => write!(f, "update"),
            EventKind::Error => write!(f, "error"),
        }
    }
}

/// Event envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event<P> {
    pub kind: EventKind,
    pub payload: P,
}

impl<P> Event<P> {
    pub fn new(kind: EventKind, payload: P) -> Self {
        Self { kind, payload }
    }

    pub fn add(payload: P) -> Self {
        Self::new(EventKind::Add, payload)
    }

    pub fn remove(payload: P) -> Self {
        Self::new(EventKind::Remove, payload)
    }

    pub fn update(payload: P) -> Self {
        Self::new(EventKind::Update, payload)
    }

    pub fn error(payload: P) -> Self {
        Self::new(EventKind::Error, payload)
    }
}

/// Event categories, one signal each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Disk,
    Partition,
    Share,
    MountPoint,
    User,
    Setting,
    Samba,
    Volume,
    DirtyData,
    HomeAssistant,
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EventCategory::Disk => "disk",
            EventCategory::Partition => "partition",
            EventCategory::Share => "share",
            EventCategory::MountPoint => "mount_point",
            EventCategory::User => "user",
            EventCategory::Setting => "setting",
            EventCategory::Samba => "samba",
            EventCategory::Volume => "volume",
            EventCategory::DirtyData => "dirty_data",
            EventCategory::HomeAssistant => "home_assistant",
        };
        write!(f, "{}", name)
    }
}

/// Operation-scoped data travelling with an emission
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventContext {
    correlation_id: Option<Uuid>,
}

impl EventContext {
    /// A context with a fresh correlation id
    pub fn new() -> Self {
        Self {
            correlation_id: Some(Uuid::new_v4()),
        }
    }

    pub fn with_correlation_id(id: Uuid) -> Self {
        Self {
            correlation_id: Some(id),
        }
    }

    pub fn correlation_id(&self) -> Option<Uuid> {
        self.correlation_id
    }

    /// This context, with a correlation id attached if it had none
    pub fn ensured(&self) -> Self {
        match self.correlation_id {
            Some(_) => *self,
            None => Self::new(),
        }
    }
}

pub type DiskEvent = Event<Disk>;
pub type PartitionEvent = Event<Partition>;
pub type ShareEvent = Event<SharedResource>;
pub type MountPointEvent = Event<MountPointData>;
pub type UserEvent = Event<User>;
pub type SettingEvent = Event<Setting>;
pub type SambaEvent = Event<SambaStatus>;
pub type VolumeEvent = Event<Volume>;
pub type DirtyDataEvent = Event<DirtyData>;
pub type HomeAssistantEvent = Event<HomeAssistantState>;
