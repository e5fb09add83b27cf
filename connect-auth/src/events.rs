//! Lifecycle notifications.
//!
//! Components that change add-on state publish a [`LifecycleEvent`] on the
//! [`EventBus`] they were constructed with. Every event is logged under the
//! `connect_auth::lifecycle` target and then handed to each registered
//! [`LifecycleObserver`].
//!
//! # Examples
//!
//! ```
//! use connect_auth::events::{ChannelObserver, EventBus, LifecycleEvent};
//!
//! let (observer, mut rx) = ChannelObserver::new();
//! let bus = EventBus::new().with_observer(observer);
//!
//! bus.emit(LifecycleEvent::Uninstalled { client_key: "jira:1".to_owned() });
//! assert!(matches!(rx.try_recv(), Ok(LifecycleEvent::Uninstalled { .. })));
//! ```

use std::{fmt, sync::Arc};

use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Tracing target for lifecycle events.
pub const LIFECYCLE_TARGET: &str = "connect_auth::lifecycle";

/// Something that happened to the add-on or one of its tenants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// A host completed the installation handshake.
    Installed {
        /// Tenant key of the installation.
        client_key: String,
        /// Host base URL.
        base_url: String,
    },
    /// The tenant's credential was persisted.
    HostSettingsSaved {
        /// Tenant key of the installation.
        client_key: String,
    },
    /// A host removed the add-on.
    Uninstalled {
        /// Tenant key of the removed installation.
        client_key: String,
    },
    /// Startup registration finished with at least one host.
    AddonRegistered {
        /// Hosts now listing the add-on, credentials removed.
        hosts: Vec<String>,
    },
    /// Shutdown deregistration finished.
    AddonDeregistered {
        /// Hosts the add-on was removed from, credentials removed.
        hosts: Vec<String>,
    },
    /// A tunnel now exposes the local port.
    TunnelStarted {
        /// Public URL of the tunnel.
        url: String,
    },
    /// A webhook request entered verification.
    WebhookAuthVerificationTriggered,
    /// A webhook request passed verification.
    WebhookAuthVerificationSuccessful {
        /// Tenant the webhook came from.
        client_key: String,
    },
}

impl LifecycleEvent {
    /// Stable event name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Installed { .. } => "installed",
            Self::HostSettingsSaved { .. } => "host_settings_saved",
            Self::Uninstalled { .. } => "uninstalled",
            Self::AddonRegistered { .. } => "addon_registered",
            Self::AddonDeregistered { .. } => "addon_deregistered",
            Self::TunnelStarted { .. } => "tunnel_started",
            Self::WebhookAuthVerificationTriggered => "webhook_auth_verification_triggered",
            Self::WebhookAuthVerificationSuccessful { .. } => {
                "webhook_auth_verification_successful"
            }
        }
    }
}

/// Receives lifecycle events.
///
/// Observers run synchronously inside [`EventBus::emit`] and must not block.
pub trait LifecycleObserver: Send + Sync {
    /// Called once per emitted event.
    fn on_event(&self, event: &LifecycleEvent);
}

/// Fan-out of lifecycle events to registered observers.
#[derive(Clone, Default)]
pub struct EventBus {
    observers: Vec<Arc<dyn LifecycleObserver>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus").field("observers", &self.observers.len()).finish()
    }
}

impl EventBus {
    /// Bus that only logs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an observer.
    #[must_use]
    pub fn with_observer(mut self, observer: impl LifecycleObserver + 'static) -> Self {
        self.observers.push(Arc::new(observer));
        self
    }

    /// Logs `event` and delivers it to every observer in registration order.
    pub fn emit(&self, event: LifecycleEvent) {
        let event_id = Uuid::new_v4();
        tracing::info!(
            target: LIFECYCLE_TARGET,
            %event_id,
            event = event.name(),
            details = ?event,
            "lifecycle event"
        );
        for observer in &self.observers {
            observer.on_event(&event);
        }
    }
}

/// Observer forwarding events into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<LifecycleEvent>,
}

impl ChannelObserver {
    /// Creates the observer and the receiving end of its channel.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl LifecycleObserver for ChannelObserver {
    fn on_event(&self, event: &LifecycleEvent) {
        // A dropped receiver means nobody is listening any more.
        let _ = self.tx.send(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<&'static str>>);

    impl LifecycleObserver for Arc<Recorder> {
        fn on_event(&self, event: &LifecycleEvent) {
            self.0.lock().unwrap().push(event.name());
        }
    }

    #[test]
    fn test_observers_receive_in_order() {
        let recorder = Arc::new(Recorder::default());
        let bus = EventBus::new().with_observer(Arc::clone(&recorder));

        bus.emit(LifecycleEvent::Installed {
            client_key: "t".to_owned(),
            base_url: "https://h".to_owned(),
        });
        bus.emit(LifecycleEvent::HostSettingsSaved { client_key: "t".to_owned() });

        assert_eq!(*recorder.0.lock().unwrap(), vec!["installed", "host_settings_saved"]);
    }

    #[test]
    fn test_dropped_receiver_is_ignored() {
        let (observer, rx) = ChannelObserver::new();
        drop(rx);
        let bus = EventBus::new().with_observer(observer);
        bus.emit(LifecycleEvent::WebhookAuthVerificationTriggered);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = LifecycleEvent::TunnelStarted { url: "https://x.localtunnel.me".to_owned() };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "tunnel_started");
        assert_eq!(json["url"], "https://x.localtunnel.me");
    }
}
