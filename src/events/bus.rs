//! Event Bus
//!
//! One synchronous signal per event category. Emission runs every listener
//! on the caller's thread in registration order. A listener that returns an
//! error or panics is logged and skipped; delivery to the remaining listeners
//! continues and the emitter never sees the failure.

use super::types::{Event, EventCategory, EventContext, EventKind};
use crate::domain::{
    DirtyData, Disk, HomeAssistantState, MountPointData, Partition, SambaStatus, Setting,
    SharedResource, User, Volume,
};
use crate::error::Result;
use parking_lot::RwLock;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{error, trace, warn};

// =============================================================================
// Listener Keys
// =============================================================================

static NEXT_LISTENER: AtomicU64 = AtomicU64::new(1);

/// Process-unique listener identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerKey(u64);

impl ListenerKey {
    fn next() -> Self {
        ListenerKey(NEXT_LISTENER.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ListenerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "listener_{}", self.0)
    }
}

// =============================================================================
// Subscription
// =============================================================================

/// Handle returned by every `on_*` registration.
///
/// Dropping it leaves the handler registered; call [`Subscription::unsubscribe`]
/// to remove it.
pub struct Subscription {
    key: ListenerKey,
    category: EventCategory,
    remove: Box<dyn FnOnce(ListenerKey) -> bool + Send + Sync>,
}

impl Subscription {
    pub fn key(&self) -> ListenerKey {
        self.key
    }

    pub fn category(&self) -> EventCategory {
        self.category
    }

    /// Remove exactly this handler. Returns false if the bus is gone.
    pub fn unsubscribe(self) -> bool {
        let removed = (self.remove)(self.key);
        trace!("Unsubscribed {} from {}", self.key, self.category);
        removed
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("category", &self.category)
            .finish()
    }
}

// =============================================================================
// Signal
// =============================================================================

type Handler<P> = Arc<dyn Fn(&EventContext, &Event<P>) -> Result<()> + Send + Sync>;
type Listeners<P> = RwLock<Vec<(ListenerKey, Handler<P>)>>;

/// A single typed channel
pub struct Signal<P> {
    category: EventCategory,
    listeners: Arc<Listeners<P>>,
}

impl<P: 'static> Signal<P> {
    pub fn new(category: EventCategory) -> Self {
        Self {
            category,
            listeners: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&EventContext, &Event<P>) -> Result<()> + Send + Sync + 'static,
    {
        let key = ListenerKey::next();
        self.listeners.write().push((key, Arc::new(handler)));

        let weak: Weak<Listeners<P>> = Arc::downgrade(&self.listeners);
        Subscription {
            key,
            category: self.category,
            remove: Box::new(move |key| match weak.upgrade() {
                Some(listeners) => {
                    let mut listeners = listeners.write();
                    let before = listeners.len();
                    listeners.retain(|(k, _)| *k != key);
                    listeners.len() != before
                }
                None => false,
            }),
        }
    }

    /// Deliver to every listener registered at the time of the call.
    /// Returns the number of listeners that completed without error.
    pub fn emit(&self, ctx: &EventContext, event: &Event<P>) -> usize {
        // Snapshot so handlers may (un)subscribe during dispatch.
        let snapshot: Vec<(ListenerKey, Handler<P>)> = self.listeners.read().clone();
        let correlation = ctx.correlation_id().map(|id| id.to_string()).unwrap_or_default();

        trace!(
            category = %self.category,
            kind = %event.kind,
            correlation_id = %correlation,
            listeners = snapshot.len(),
            "Emitting event"
        );

        let mut delivered = 0;
        for (key, handler) in snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(ctx, event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    warn!(
                        category = %self.category,
                        listener = %key,
                        correlation_id = %correlation,
                        "Event handler failed: {}",
                        e
                    );
                }
                Err(payload) => {
                    error!(
                        category = %self.category,
                        listener = %key,
                        correlation_id = %correlation,
                        "Event handler panicked: {}",
                        panic_message(payload.as_ref())
                    );
                }
            }
        }
        delivered
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// =============================================================================
// Event Bus
// =============================================================================

macro_rules! event_bus {
    ($( $field:ident: $payload:ty => $category:ident, $on:ident, $emit:ident, $emit_in:ident; )*) => {
        /// Typed publish/subscribe hub, one signal per category
        pub struct EventBus {
            $( $field: Signal<$payload>, )*
        }

        impl EventBus {
            pub fn new() -> Self {
                Self {
                    $( $field: Signal::new(EventCategory::$category), )*
                }
            }

            $(
                #[doc = concat!("Register a handler for `", stringify!($field), "` events")]
                pub fn $on<F>(&self, handler: F) -> Subscription
                where
                    F: Fn(&EventContext, &Event<$payload>) -> Result<()> + Send + Sync + 'static,
                {
                    self.$field.subscribe(handler)
                }

                #[doc = concat!("Emit a `", stringify!($field), "` event under a fresh correlation id")]
                pub fn $emit(&self, event: Event<$payload>) -> EventContext {
                    let ctx = EventContext::new();
                    self.$field.emit(&ctx, &event);
                    ctx
                }

                #[doc = concat!("Emit a `", stringify!($field), "` event within an existing operation")]
                pub fn $emit_in(&self, ctx: &EventContext, event: Event<$payload>) -> EventContext {
                    let ctx = ctx.ensured();
                    self.$field.emit(&ctx, &event);
                    ctx
                }
            )*

            /// Number of listeners currently registered for a category
            pub fn listener_count(&self, category: EventCategory) -> usize {
                match category {
                    $( EventCategory::$category => self.$field.len(), )*
                }
            }
        }
    };
}

event_bus! {
    disk: Disk => Disk, on_disk, emit_disk, emit_disk_in;
    partition: Partition => Partition, on_partition, emit_partition, emit_partition_in;
    share: SharedResource => Share, on_share, emit_share, emit_share_in;
    mount_point: MountPointData => MountPoint, on_mount_point, emit_mount_point, emit_mount_point_in;
    user: User => User, on_user, emit_user, emit_user_in;
    setting: Setting => Setting, on_setting, emit_setting, emit_setting_in;
    samba: SambaStatus => Samba, on_samba, emit_samba, emit_samba_in;
    volume: Volume => Volume, on_volume, emit_volume, emit_volume_in;
    dirty_data: DirtyData => DirtyData, on_dirty_data, emit_dirty_data, emit_dirty_data_in;
    home_assistant: HomeAssistantState => HomeAssistant, on_home_assistant, emit_home_assistant, emit_home_assistant_in;
}

impl EventBus {
    /// Emit the disk event, then one partition event per partition, all
    /// sharing one correlation id.
    pub fn emit_disk_and_partition(&self, kind: EventKind, disk: Disk) -> EventContext {
        let ctx = EventContext::new();
        let partitions = disk.partitions.clone();
        self.disk.emit(&ctx, &Event::new(kind, disk));
        for partition in partitions {
            self.partition.emit(&ctx, &Event::new(kind, partition));
        }
        ctx
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ApplyPhase;
    use crate::domain::DirtySections;
    use crate::error::Error;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    fn setting(key: &str) -> Setting {
        Setting {
            key: key.to_string(),
            value: serde_json::json!(true),
        }
    }

    fn disk_with_partitions(name: &str, parts: &[&str]) -> Disk {
        Disk {
            name: name.to_string(),
            device_path: format!("/dev/{}", name),
            stable_id: None,
            size_bytes: 0,
            model: None,
            serial: None,
            partitions: parts
                .iter()
                .map(|p| Partition {
                    name: p.to_string(),
                    disk: name.to_string(),
                    device_path: format!("/dev/{}", p),
                    stable_id: None,
                    size_bytes: 0,
                    label: "unknown".into(),
                    partition_label: "unknown".into(),
                    fs_type: "ext4".into(),
                    mountpoint: String::new(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_fan_out_to_all_listeners() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for _ in 0..5 {
            let seen = seen.clone();
            let _ = bus.on_setting(move |_, event| {
                seen.lock().push(event.payload.key.clone());
                Ok(())
            });
        }

        bus.emit_setting(Event::update(setting("workgroup")));

        let seen = seen.lock();
        assert_eq!(seen.len(), 5);
        assert!(seen.iter().all(|k| k == "workgroup"));
    }

    #[test]
    fn test_unsubscribe_removes_only_that_listener() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut subs = Vec::new();
        for _ in 0..4 {
            let calls = calls.clone();
            subs.push(bus.on_user(move |_, _| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }));
        }
        assert_eq!(bus.listener_count(EventCategory::User), 4);

        let second = subs.remove(1);
        assert!(second.unsubscribe());
        assert_eq!(bus.listener_count(EventCategory::User), 3);

        bus.emit_user(Event::add(User {
            username: "alice".into(),
            is_admin: false,
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_registration_order_preserved() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = order.clone();
            let _ = bus.on_setting(move |_, _| {
                order.lock().push(i);
                Ok(())
            });
        }
        bus.emit_setting(Event::update(setting("x")));

        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let bus = EventBus::new();
        let after = Arc::new(AtomicUsize::new(0));

        let _ = bus.on_setting(|_, _| panic!("listener exploded"));
        let counter = after.clone();
        let _ = bus.on_setting(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.emit_setting(Event::update(setting("x")));
        assert_eq!(after.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failing_listener_does_not_stop_delivery() {
        let signal: Signal<Setting> = Signal::new(EventCategory::Setting);
        let after = Arc::new(AtomicUsize::new(0));

        let _ = signal.subscribe(|_, _| Err(Error::Internal("boom".into())));
        let counter = after.clone();
        let _ = signal.subscribe(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let delivered = signal.emit(&EventContext::new(), &Event::update(setting("x")));
        assert_eq!(delivered, 1);
        assert_eq!(after.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_disk_events_precede_partition_events() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let l = log.clone();
        let _ = bus.on_partition(move |ctx, e| {
            l.lock().push((format!("part:{}", e.payload.name), ctx.correlation_id()));
            Ok(())
        });
        let l = log.clone();
        let _ = bus.on_disk(move |ctx, e| {
            l.lock().push((format!("disk:{}", e.payload.name), ctx.correlation_id()));
            Ok(())
        });

        let ctx = bus.emit_disk_and_partition(EventKind::Add, disk_with_partitions("sda", &["sda1", "sda2"]));

        let log = log.lock();
        let names: Vec<_> = log.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["disk:sda", "part:sda1", "part:sda2"]);
        assert!(log.iter().all(|(_, id)| *id == ctx.correlation_id()));
        assert!(ctx.correlation_id().is_some());
    }

    #[test]
    fn test_correlation_id_attached_when_missing() {
        let bus = EventBus::new();
        let ids = Arc::new(Mutex::new(Vec::new()));

        let i = ids.clone();
        let _ = bus.on_dirty_data(move |ctx, _| {
            i.lock().push(ctx.correlation_id());
            Ok(())
        });

        let payload = DirtyData {
            sections: DirtySections::all(),
            phase: ApplyPhase::Pending,
        };
        bus.emit_dirty_data_in(&EventContext::default(), Event::update(payload));

        let fixed = EventContext::with_correlation_id(uuid::Uuid::new_v4());
        bus.emit_dirty_data_in(&fixed, Event::update(payload));

        let ids = ids.lock();
        assert!(ids[0].is_some());
        assert_eq!(ids[1], fixed.correlation_id());
    }

    #[test]
    fn test_subscribe_during_dispatch_does_not_deadlock() {
        let bus = Arc::new(EventBus::new());
        let inner_bus = bus.clone();

        let _ = bus.on_setting(move |_, _| {
            let _ = inner_bus.on_setting(|_, _| Ok(()));
            Ok(())
        });

        bus.emit_setting(Event::update(setting("x")));
        assert_eq!(bus.listener_count(EventCategory::Setting), 2);
    }

    #[test]
    fn test_listener_keys_unique() {
        let bus = EventBus::new();
        let a = bus.on_share(|_, _| Ok(()));
        let b = bus.on_volume(|_, _| Ok(()));
        assert_ne!(a.key(), b.key());
        assert_eq!(b.category(), EventCategory::Volume);
    }
}
