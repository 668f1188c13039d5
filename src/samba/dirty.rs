//! Dirty-State Tracker
//!
//! Process-wide record of which configuration sections changed since the
//! last successful Samba apply. All four flags live in one atomic byte so a
//! mark from one domain can never be lost to a concurrent mark or clear from
//! another.

use crate::domain::DirtySections;
use crate::events::{EventBus, Subscription};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tracing::trace;

/// A configuration section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    Shares,
    Users,
    Volumes,
    Settings,
}

impl Section {
    pub const ALL: [Section; 4] = [
        Section::Shares,
        Section::Users,
        Section::Volumes,
        Section::Settings,
    ];

    const fn bit(self) -> u8 {
        match self {
            Section::Shares => 1 << 0,
            Section::Users => 1 << 1,
            Section::Volumes => 1 << 2,
            Section::Settings => 1 << 3,
        }
    }
}

impl std::fmt::Display for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Section::Shares => write!(f, "shares"),
            Section::Users => write!(f, "users"),
            Section::Volumes => write!(f, "volumes"),
            Section::Settings => write!(f, "settings"),
        }
    }
}

fn to_bits(sections: DirtySections) -> u8 {
    let mut bits = 0;
    if sections.shares {
        bits |= Section::Shares.bit();
    }
    if sections.users {
        bits |= Section::Users.bit();
    }
    if sections.volumes {
        bits |= Section::Volumes.bit();
    }
    if sections.settings {
        bits |= Section::Settings.bit();
    }
    bits
}

fn from_bits(bits: u8) -> DirtySections {
    DirtySections {
        shares: bits & Section::Shares.bit() != 0,
        users: bits & Section::Users.bit() != 0,
        volumes: bits & Section::Volumes.bit() != 0,
        settings: bits & Section::Settings.bit() != 0,
    }
}

#[derive(Debug, Default)]
pub struct DirtyStateTracker {
    bits: AtomicU8,
    changed: Notify,
}

impl DirtyStateTracker {
    /// A tracker with every section clean
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self, section: Section) {
        let before = self.bits.fetch_or(section.bit(), Ordering::AcqRel);
        trace!("Marked {} dirty (was {:#06b})", section, before);
        self.changed.notify_one();
    }

    pub fn mark_all(&self) {
        let all = Section::ALL.iter().fold(0, |acc, s| acc | s.bit());
        self.bits.fetch_or(all, Ordering::AcqRel);
        self.changed.notify_one();
    }

    pub fn is_dirty(&self, section: Section) -> bool {
        self.bits.load(Ordering::Acquire) & section.bit() != 0
    }

    pub fn is_clean(&self) -> bool {
        self.bits.load(Ordering::Acquire) == 0
    }

    pub fn snapshot(&self) -> DirtySections {
        from_bits(self.bits.load(Ordering::Acquire))
    }

    /// Clear the sections set in `applied`.
    ///
    /// Pass the snapshot taken before rendering: a section marked after it
    /// stays dirty for the next cycle.
    pub fn clear(&self, applied: DirtySections) {
        self.bits.fetch_and(!to_bits(applied), Ordering::AcqRel);
    }

    /// Resolves after the next mark (or immediately if one happened since
    /// the last wait)
    pub fn changed(&self) -> Notified<'_> {
        self.changed.notified()
    }

    /// Wake the waiter without marking anything
    pub fn poke(&self) {
        self.changed.notify_one();
    }

    /// Mark sections from domain events: share, user, setting, mount point
    /// and volume changes.
    pub fn attach(self: &Arc<Self>, bus: &EventBus) -> Vec<Subscription> {
        let shares = self.clone();
        let users = self.clone();
        let settings = self.clone();
        let mounts = self.clone();
        let volumes = self.clone();

        vec![
            bus.on_share(move |_, _| {
                shares.mark(Section::Shares);
                Ok(())
            }),
            bus.on_user(move |_, _| {
                users.mark(Section::Users);
                Ok(())
            }),
            bus.on_setting(move |_, _| {
                settings.mark(Section::Settings);
                Ok(())
            }),
            bus.on_mount_point(move |_, _| {
                mounts.mark(Section::Volumes);
                Ok(())
            }),
            bus.on_volume(move |_, _| {
                volumes.mark(Section::Volumes);
                Ok(())
            }),
        ]
    }
}
