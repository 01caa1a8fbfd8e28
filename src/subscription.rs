// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Subscription management and notification fan-out.
//!
//! The [`SubscriptionManager`] maintains exactly one subscription with one
//! monitored item per configured tag. Rebuilding is idempotent: every
//! [`build`] bumps a generation counter, tears down the previous
//! subscription, and starts a fresh drain task, so notifications belonging
//! to a replaced subscription are never delivered.
//!
//! Observers run in registration order inside an error boundary; one
//! failing observer never prevents the others from running. Failures are
//! collected and reported afterwards as a single aggregated error.
//!
//! [`build`]: SubscriptionManager::build

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::coerce;
use crate::error::{
    ClientError, ClientResult, ObserverFailure, OperationError, SubscriptionError,
};
use crate::session::Session;
use crate::tags::TagSet;
use crate::transport::{
    MonitoredItemRequest, RawNotification, StatusCode, TransportSession, UaTransport, UaValue,
};
use crate::types::NodeId;

// =============================================================================
// MonitoredItem
// =============================================================================

/// One monitored item of the active subscription.
#[derive(Debug, Clone)]
pub struct MonitoredItem {
    /// Client-assigned handle echoed back in notifications.
    pub client_handle: u32,

    /// The monitored node.
    pub node_id: NodeId,

    /// Name of the tag the item belongs to.
    pub name: String,
}

// =============================================================================
// NotificationEvent
// =============================================================================

/// A data change reported for one tag.
#[derive(Debug, Clone)]
pub struct NotificationEvent {
    /// The monitored node in OPC string form.
    pub tag: String,

    /// Name of the tag the change belongs to.
    pub name: String,

    /// The sampled value.
    pub value: UaValue,

    /// Per-sample status.
    pub status: StatusCode,

    /// Source timestamp reported by the server.
    pub source_timestamp: Option<DateTime<Utc>>,
}

impl fmt::Display for NotificationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.tag, self.value)
    }
}

// =============================================================================
// NotificationObserver
// =============================================================================

/// Consumer of notification events.
///
/// Observers are called on the notification drain task and must not block;
/// hand the event off to a channel or task for heavy work. An `Err` return
/// is isolated from the other observers and aggregated afterwards.
#[async_trait]
pub trait NotificationObserver: Send + Sync {
    /// Handles one data change event.
    async fn on_notification(&self, event: &NotificationEvent) -> ClientResult<()>;
}

/// Observer that forwards events into an `mpsc` channel.
pub struct ChannelObserver {
    tx: mpsc::Sender<NotificationEvent>,
}

impl ChannelObserver {
    /// Creates the observer and the receiving half.
    pub fn new(capacity: usize) -> (Arc<Self>, mpsc::Receiver<NotificationEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait]
impl NotificationObserver for ChannelObserver {
    async fn on_notification(&self, event: &NotificationEvent) -> ClientResult<()> {
        self.tx.send(event.clone()).await.map_err(|_| {
            ClientError::Subscription(SubscriptionError::DeliveryFailed {
                reason: "notification channel closed".to_string(),
            })
        })
    }
}

// =============================================================================
// SubscriptionManager
// =============================================================================

struct ActiveSubscription {
    server_id: u32,
    session_handle: TransportSession,
    item_count: usize,
    drain: JoinHandle<()>,
}

/// Owns the single subscription and its monitored items.
///
/// # Thread Safety
///
/// Shared behind an `Arc` between the controller and the drain task; the
/// drain task holds only a `Weak` reference.
pub struct SubscriptionManager {
    transport: Arc<dyn UaTransport>,
    tags: Arc<TagSet>,
    publishing_interval: Duration,
    request_timeout: Duration,
    // Handle to ourselves for the drain task.
    self_ref: Weak<SubscriptionManager>,
    observers: RwLock<Vec<Arc<dyn NotificationObserver>>>,
    active: Mutex<Option<ActiveSubscription>>,
    generation: AtomicU64,
    stats: SubscriptionStats,
}

impl SubscriptionManager {
    /// Creates a manager over the configured tag set.
    pub fn new(
        transport: Arc<dyn UaTransport>,
        tags: Arc<TagSet>,
        publishing_interval: Duration,
        request_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            transport,
            tags,
            publishing_interval,
            request_timeout,
            self_ref: self_ref.clone(),
            observers: RwLock::new(Vec::new()),
            active: Mutex::new(None),
            generation: AtomicU64::new(0),
            stats: SubscriptionStats::default(),
        })
    }

    /// Registers an observer. Delivery order is registration order.
    pub async fn register_observer(&self, observer: Arc<dyn NotificationObserver>) {
        self.observers.write().await.push(observer);
    }

    /// Returns `true` if a subscription is currently established.
    pub async fn is_active(&self) -> bool {
        self.active.lock().await.is_some()
    }

    /// Returns the server-assigned id of the active subscription.
    pub async fn subscription_id(&self) -> Option<u32> {
        self.active.lock().await.as_ref().map(|a| a.server_id)
    }

    /// Returns the subscription statistics.
    pub fn stats(&self) -> &SubscriptionStats {
        &self.stats
    }

    /// (Re)creates the subscription on the given session.
    ///
    /// One monitored item per configured tag, keyed by node ID. Any prior
    /// subscription is torn down first and its pending notifications are
    /// dropped. Safe to call repeatedly; an empty tag set builds nothing.
    pub async fn build(&self, session: &Session) -> ClientResult<()> {
        self.teardown().await;

        if self.tags.is_empty() {
            debug!("No tags configured; skipping subscription");
            return Ok(());
        }

        let mut items: HashMap<u32, MonitoredItem> = HashMap::with_capacity(self.tags.len());
        let mut requests = Vec::with_capacity(self.tags.len());
        for (index, tag) in self.tags.iter().enumerate() {
            let client_handle = index as u32 + 1;
            let item = MonitoredItem {
                client_handle,
                node_id: tag.node_id.clone(),
                name: tag.name.clone(),
            };
            requests.push(MonitoredItemRequest {
                node_id: item.node_id.clone(),
                client_handle,
            });
            items.insert(client_handle, item);
        }

        let (server_id, mut rx) = tokio::time::timeout(
            self.request_timeout,
            self.transport
                .subscribe(session.handle, self.publishing_interval, &requests),
        )
        .await
        .map_err(|_| OperationError::timeout("create_subscription", self.request_timeout))??;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.rebuilds.fetch_add(1, Ordering::Relaxed);

        let items = Arc::new(items);
        let weak = self.self_ref.clone();
        let drain = tokio::spawn(async move {
            while let Some(raw) = rx.recv().await {
                let Some(manager) = weak.upgrade() else {
                    return;
                };
                if manager.generation.load(Ordering::SeqCst) != generation {
                    manager.stats.stale_dropped.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                manager.dispatch(raw, &items).await;
            }
        });

        *self.active.lock().await = Some(ActiveSubscription {
            server_id,
            session_handle: session.handle,
            item_count: requests.len(),
            drain,
        });

        info!(
            subscription_id = server_id,
            items = requests.len(),
            publishing_interval = ?self.publishing_interval,
            "Subscription built"
        );
        Ok(())
    }

    /// Tears down the subscription, if any. Idempotent.
    pub async fn stop(&self) {
        self.teardown().await;
    }

    async fn teardown(&self) {
        // Invalidate any notification that is already in flight.
        self.generation.fetch_add(1, Ordering::SeqCst);

        let Some(ActiveSubscription {
            server_id,
            session_handle,
            item_count,
            drain,
        }) = self.active.lock().await.take()
        else {
            return;
        };

        // Wait for the cancellation so the old receiver is closed before a
        // replacement subscription exists.
        drain.abort();
        let _ = drain.await;

        // Best-effort: the session backing it may already be gone.
        let delete = tokio::time::timeout(
            self.request_timeout,
            self.transport.delete_subscription(session_handle, server_id),
        )
        .await;
        match delete {
            Ok(Ok(())) => debug!(
                subscription_id = server_id,
                items = item_count,
                "Subscription deleted"
            ),
            Ok(Err(err)) => debug!(
                subscription_id = server_id,
                error = %err,
                "Subscription delete failed"
            ),
            Err(_) => debug!(subscription_id = server_id, "Subscription delete timed out"),
        }
    }

    /// Fans one raw notification out to the tag table and the observers.
    async fn dispatch(&self, raw: RawNotification, items: &HashMap<u32, MonitoredItem>) {
        let Some(item) = items.get(&raw.client_handle) else {
            debug!(
                client_handle = raw.client_handle,
                "Notification for unknown monitored item"
            );
            return;
        };

        for sample in raw.values {
            self.stats.notifications.fetch_add(1, Ordering::Relaxed);

            if sample.status.is_good() {
                self.tags
                    .set_value(&item.node_id, coerce::text_of(&sample.value))
                    .await;
            }

            let event = NotificationEvent {
                tag: item.node_id.to_string(),
                name: item.name.clone(),
                value: sample.value,
                status: sample.status,
                source_timestamp: sample.source_timestamp,
            };

            if let Err(err) = self.notify_observers(&event).await {
                error!(tag = %event.tag, error = %err, "Notification observers failed");
            }
        }
    }

    /// Invokes every observer; failures are aggregated, never short-circuit.
    async fn notify_observers(&self, event: &NotificationEvent) -> ClientResult<()> {
        let observers: Vec<_> = self.observers.read().await.clone();
        let mut failures = Vec::new();

        for (index, observer) in observers.iter().enumerate() {
            if let Err(err) = observer.on_notification(event).await {
                failures.push(ObserverFailure {
                    index,
                    message: err.to_string(),
                });
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            self.stats
                .observer_failures
                .fetch_add(failures.len() as u64, Ordering::Relaxed);
            Err(ClientError::Observers { failures })
        }
    }
}

impl fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("tags", &self.tags.len())
            .field("publishing_interval", &self.publishing_interval)
            .finish()
    }
}

// =============================================================================
// SubscriptionStats
// =============================================================================

/// Counters for subscription activity.
#[derive(Debug, Default)]
pub struct SubscriptionStats {
    rebuilds: AtomicU64,
    notifications: AtomicU64,
    stale_dropped: AtomicU64,
    observer_failures: AtomicU64,
}

impl SubscriptionStats {
    /// Number of times the subscription was (re)built.
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds.load(Ordering::Relaxed)
    }

    /// Number of samples dispatched.
    pub fn notifications(&self) -> u64 {
        self.notifications.load(Ordering::Relaxed)
    }

    /// Number of notifications dropped for carrying a stale generation.
    pub fn stale_dropped(&self) -> u64 {
        self.stale_dropped.load(Ordering::Relaxed)
    }

    /// Number of individual observer failures.
    pub fn observer_failures(&self) -> u64 {
        self.observer_failures.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientResult;
    use crate::tags::{DataItemConfig, TagSet};
    use crate::transport::{
        DataValue, EndpointDescription, ReadResult, WriteRequest,
    };
    use crate::types::{SecurityMode, SecurityPolicy, SemanticType};
    use std::sync::Mutex as StdMutex;

    /// Transport that captures subscription requests and hands out the
    /// sending half of the notification channel.
    #[derive(Default)]
    struct PublishTransport {
        publishers: StdMutex<Vec<mpsc::Sender<RawNotification>>>,
        monitored: StdMutex<Vec<MonitoredItemRequest>>,
        deleted: StdMutex<Vec<u32>>,
        next_id: AtomicU64,
    }

    impl PublishTransport {
        fn latest_publisher(&self) -> mpsc::Sender<RawNotification> {
            self.publishers
                .lock()
                .unwrap()
                .last()
                .cloned()
                .expect("no subscription created")
        }
    }

    #[async_trait]
    impl UaTransport for PublishTransport {
        async fn select_endpoint(
            &self,
            endpoint_url: &str,
            security_mode: SecurityMode,
            security_policy: SecurityPolicy,
        ) -> ClientResult<EndpointDescription> {
            Ok(EndpointDescription {
                endpoint_url: endpoint_url.to_string(),
                security_mode,
                security_policy,
                server_certificate: None,
                token_policies: vec![crate::types::TokenPolicy::Anonymous],
            })
        }

        async fn create_session(
            &self,
            _endpoint: &EndpointDescription,
            _application_name: &str,
            _identity: &crate::security::Identity,
            _session_timeout: Duration,
        ) -> ClientResult<TransportSession> {
            Ok(TransportSession(1))
        }

        async fn close_session(&self, _session: TransportSession) -> ClientResult<()> {
            Ok(())
        }

        async fn keep_alive(&self, _session: TransportSession) -> ClientResult<StatusCode> {
            Ok(StatusCode::GOOD)
        }

        async fn read(
            &self,
            _session: TransportSession,
            _nodes: &[NodeId],
        ) -> ClientResult<Vec<ReadResult>> {
            Ok(Vec::new())
        }

        async fn write(
            &self,
            _session: TransportSession,
            _requests: &[WriteRequest],
        ) -> ClientResult<Vec<StatusCode>> {
            Ok(Vec::new())
        }

        async fn subscribe(
            &self,
            _session: TransportSession,
            _publishing_interval: Duration,
            items: &[MonitoredItemRequest],
        ) -> ClientResult<(u32, mpsc::Receiver<RawNotification>)> {
            let (tx, rx) = mpsc::channel(32);
            self.publishers.lock().unwrap().push(tx);
            *self.monitored.lock().unwrap() = items.to_vec();
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) as u32 + 1;
            Ok((id, rx))
        }

        async fn delete_subscription(
            &self,
            _session: TransportSession,
            subscription_id: u32,
        ) -> ClientResult<()> {
            self.deleted.lock().unwrap().push(subscription_id);
            Ok(())
        }
    }

    fn tags() -> Arc<TagSet> {
        Arc::new(
            TagSet::new(vec![
                DataItemConfig::new(
                    "speed",
                    NodeId::string(2, "Pump.Speed"),
                    SemanticType::Double,
                ),
                DataItemConfig::new(
                    "running",
                    NodeId::string(2, "Pump.Running"),
                    SemanticType::Bool,
                ),
            ])
            .unwrap(),
        )
    }

    fn manager(transport: Arc<PublishTransport>, tags: Arc<TagSet>) -> Arc<SubscriptionManager> {
        SubscriptionManager::new(
            transport,
            tags,
            Duration::from_millis(1000),
            Duration::from_secs(1),
        )
    }

    fn sample(value: UaValue) -> RawNotification {
        RawNotification {
            client_handle: 1,
            values: vec![DataValue {
                value,
                status: StatusCode::GOOD,
                source_timestamp: Some(Utc::now()),
            }],
        }
    }

    #[tokio::test]
    async fn test_build_creates_one_item_per_tag() {
        let transport = Arc::new(PublishTransport::default());
        let tags = tags();
        let manager = manager(Arc::clone(&transport), tags);
        let session = Session::stub(TransportSession(1));

        manager.build(&session).await.unwrap();

        assert!(manager.is_active().await);
        let monitored = transport.monitored.lock().unwrap().clone();
        assert_eq!(monitored.len(), 2);
        assert_eq!(monitored[0].client_handle, 1);
        assert_eq!(monitored[0].node_id, NodeId::string(2, "Pump.Speed"));
        assert_eq!(monitored[1].client_handle, 2);
    }

    #[tokio::test]
    async fn test_notification_updates_tag_and_observers() {
        let transport = Arc::new(PublishTransport::default());
        let tags = tags();
        let manager = manager(Arc::clone(&transport), Arc::clone(&tags));
        let (observer, mut events) = ChannelObserver::new(8);
        manager.register_observer(observer).await;

        let session = Session::stub(TransportSession(1));
        manager.build(&session).await.unwrap();

        transport
            .latest_publisher()
            .send(sample(UaValue::Double(42.5)))
            .await
            .unwrap();

        let event = events.recv().await.unwrap();
        assert_eq!(event.tag, "ns=2;s=Pump.Speed");
        assert_eq!(event.name, "speed");
        assert_eq!(event.value, UaValue::Double(42.5));

        let speed = tags.get(&NodeId::string(2, "Pump.Speed")).unwrap();
        assert_eq!(speed.value().await, "42.5");
        assert_eq!(manager.stats().notifications(), 1);
    }

    #[tokio::test]
    async fn test_rebuild_silences_previous_subscription() {
        let transport = Arc::new(PublishTransport::default());
        let tags = tags();
        let manager = manager(Arc::clone(&transport), Arc::clone(&tags));
        let (observer, mut events) = ChannelObserver::new(8);
        manager.register_observer(observer).await;

        let session = Session::stub(TransportSession(1));
        manager.build(&session).await.unwrap();
        let old_publisher = transport.latest_publisher();

        manager.build(&session).await.unwrap();
        assert_eq!(manager.stats().rebuilds(), 2);
        // The first subscription was deleted on the server.
        assert_eq!(transport.deleted.lock().unwrap().as_slice(), &[1]);

        // The old drain task is gone; its channel is closed.
        assert!(old_publisher.send(sample(UaValue::Double(1.0))).await.is_err());

        // The new subscription still delivers.
        transport
            .latest_publisher()
            .send(sample(UaValue::Double(2.0)))
            .await
            .unwrap();
        let event = events.recv().await.unwrap();
        assert_eq!(event.value, UaValue::Double(2.0));
    }

    #[tokio::test]
    async fn test_bad_sample_does_not_update_tag() {
        let transport = Arc::new(PublishTransport::default());
        let tags = tags();
        let manager = manager(Arc::clone(&transport), Arc::clone(&tags));
        let (observer, mut events) = ChannelObserver::new(8);
        manager.register_observer(observer).await;

        let session = Session::stub(TransportSession(1));
        manager.build(&session).await.unwrap();

        transport
            .latest_publisher()
            .send(RawNotification {
                client_handle: 1,
                values: vec![DataValue {
                    value: UaValue::Null,
                    status: StatusCode::BAD_NODE_ID_UNKNOWN,
                    source_timestamp: None,
                }],
            })
            .await
            .unwrap();

        // The event is still surfaced, with its bad status.
        let event = events.recv().await.unwrap();
        assert!(event.status.is_bad());

        let speed = tags.get(&NodeId::string(2, "Pump.Speed")).unwrap();
        assert_eq!(speed.value().await, "");
    }

    struct RecordingObserver {
        label: &'static str,
        seen: Arc<StdMutex<Vec<&'static str>>>,
        fail: bool,
    }

    #[async_trait]
    impl NotificationObserver for RecordingObserver {
        async fn on_notification(&self, _event: &NotificationEvent) -> ClientResult<()> {
            self.seen.lock().unwrap().push(self.label);
            if self.fail {
                Err(ClientError::Subscription(SubscriptionError::DeliveryFailed {
                    reason: format!("{} unavailable", self.label),
                }))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_observer_failure_is_isolated_and_aggregated() {
        let transport = Arc::new(PublishTransport::default());
        let manager = manager(transport, tags());
        let seen = Arc::new(StdMutex::new(Vec::new()));

        for (label, fail) in [("first", false), ("second", true), ("third", false)] {
            manager
                .register_observer(Arc::new(RecordingObserver {
                    label,
                    seen: Arc::clone(&seen),
                    fail,
                }))
                .await;
        }

        let event = NotificationEvent {
            tag: "ns=2;s=Pump.Speed".to_string(),
            name: "speed".to_string(),
            value: UaValue::Double(1.0),
            status: StatusCode::GOOD,
            source_timestamp: None,
        };

        let err = manager.notify_observers(&event).await.unwrap_err();
        // All observers ran, in registration order.
        assert_eq!(seen.lock().unwrap().as_slice(), &["first", "second", "third"]);

        match err {
            ClientError::Observers { failures } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].index, 1);
                assert!(failures[0].message.contains("second unavailable"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(manager.stats().observer_failures(), 1);
    }

    #[tokio::test]
    async fn test_empty_tag_set_builds_nothing() {
        let transport = Arc::new(PublishTransport::default());
        let manager = manager(Arc::clone(&transport), Arc::new(TagSet::new(vec![]).unwrap()));

        let session = Session::stub(TransportSession(1));
        manager.build(&session).await.unwrap();
        assert!(!manager.is_active().await);
        assert!(transport.publishers.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let transport = Arc::new(PublishTransport::default());
        let manager = manager(Arc::clone(&transport), tags());

        let session = Session::stub(TransportSession(1));
        manager.build(&session).await.unwrap();

        manager.stop().await;
        assert!(!manager.is_active().await);
        manager.stop().await;
        assert_eq!(transport.deleted.lock().unwrap().len(), 1);
    }
}
