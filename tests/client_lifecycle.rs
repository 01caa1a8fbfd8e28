// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! End-to-end client lifecycle tests against a scriptable in-process
//! transport: connect, notify, keep-alive failure and recovery, certificate
//! and identity rejection, batched access, shutdown.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use opcua_link::error::{ConnectionError, SecurityError};
use opcua_link::transport::{
    DataValue, EndpointDescription, MonitoredItemRequest, RawNotification, ReadResult,
    TransportSession, WriteRequest,
};
use opcua_link::{
    CertificateRejection, CertificateValidator, ChannelObserver, ClientConfig, ClientController,
    ClientError, ClientResult, DataItemConfig, Identity, NodeId, SecurityMode, SecurityPolicy,
    SemanticType, SessionState, StatusCode, TokenPolicy, UaTransport, UaValue,
};

// =============================================================================
// Scriptable transport
// =============================================================================

/// In-process transport whose behavior is scripted per test.
#[derive(Default)]
struct ScriptedServer {
    sessions_created: AtomicU64,
    sessions_closed: AtomicU64,
    keepalive_calls: AtomicU64,
    /// While set, keep-alive probes return a bad status. Cleared by the next
    /// successful session creation.
    broken: AtomicBool,
    refuse_connect: AtomicBool,
    connect_delay: Mutex<Duration>,
    certificate: Mutex<Option<Vec<u8>>>,
    token_policies: Mutex<Vec<TokenPolicy>>,
    read_script: Mutex<Option<Vec<ReadResult>>>,
    write_statuses: Mutex<Option<Vec<StatusCode>>>,
    written: Mutex<Vec<WriteRequest>>,
    publishers: Mutex<Vec<mpsc::Sender<RawNotification>>>,
    monitored: Mutex<Vec<Vec<MonitoredItemRequest>>>,
    subscriptions_deleted: AtomicU64,
}

impl ScriptedServer {
    fn new() -> Arc<Self> {
        let server = Self::default();
        *server.token_policies.lock().unwrap() =
            vec![TokenPolicy::Anonymous, TokenPolicy::UserName];
        Arc::new(server)
    }

    fn publisher(&self, index: usize) -> mpsc::Sender<RawNotification> {
        self.publishers.lock().unwrap()[index].clone()
    }

    fn subscriptions_created(&self) -> usize {
        self.publishers.lock().unwrap().len()
    }
}

#[async_trait]
impl UaTransport for ScriptedServer {
    async fn select_endpoint(
        &self,
        endpoint_url: &str,
        security_mode: SecurityMode,
        security_policy: SecurityPolicy,
    ) -> ClientResult<EndpointDescription> {
        if self.refuse_connect.load(Ordering::SeqCst) {
            return Err(ConnectionError::unreachable(endpoint_url, "connection refused").into());
        }
        Ok(EndpointDescription {
            endpoint_url: endpoint_url.to_string(),
            security_mode,
            security_policy,
            server_certificate: self.certificate.lock().unwrap().clone(),
            token_policies: self.token_policies.lock().unwrap().clone(),
        })
    }

    async fn create_session(
        &self,
        _endpoint: &EndpointDescription,
        _application_name: &str,
        _identity: &Identity,
        _session_timeout: Duration,
    ) -> ClientResult<TransportSession> {
        let delay = *self.connect_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let n = self.sessions_created.fetch_add(1, Ordering::SeqCst);
        self.broken.store(false, Ordering::SeqCst);
        Ok(TransportSession(n + 1))
    }

    async fn close_session(&self, _session: TransportSession) -> ClientResult<()> {
        self.sessions_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn keep_alive(&self, _session: TransportSession) -> ClientResult<StatusCode> {
        self.keepalive_calls.fetch_add(1, Ordering::SeqCst);
        if self.broken.load(Ordering::SeqCst) {
            Ok(StatusCode::BAD)
        } else {
            Ok(StatusCode::GOOD)
        }
    }

    async fn read(
        &self,
        _session: TransportSession,
        nodes: &[NodeId],
    ) -> ClientResult<Vec<ReadResult>> {
        if let Some(script) = self.read_script.lock().unwrap().clone() {
            return Ok(script);
        }
        Ok(nodes
            .iter()
            .map(|node_id| ReadResult {
                node_id: node_id.clone(),
                value: UaValue::Int32(1),
                status: StatusCode::GOOD,
                source_timestamp: None,
            })
            .collect())
    }

    async fn write(
        &self,
        _session: TransportSession,
        requests: &[WriteRequest],
    ) -> ClientResult<Vec<StatusCode>> {
        *self.written.lock().unwrap() = requests.to_vec();
        if let Some(statuses) = self.write_statuses.lock().unwrap().clone() {
            return Ok(statuses);
        }
        Ok(vec![StatusCode::GOOD; requests.len()])
    }

    async fn subscribe(
        &self,
        _session: TransportSession,
        _publishing_interval: Duration,
        items: &[MonitoredItemRequest],
    ) -> ClientResult<(u32, mpsc::Receiver<RawNotification>)> {
        let (tx, rx) = mpsc::channel(32);
        let mut publishers = self.publishers.lock().unwrap();
        publishers.push(tx);
        self.monitored.lock().unwrap().push(items.to_vec());
        Ok((publishers.len() as u32, rx))
    }

    async fn delete_subscription(
        &self,
        _session: TransportSession,
        _subscription_id: u32,
    ) -> ClientResult<()> {
        self.subscriptions_deleted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// Validators and helpers
// =============================================================================

struct AcceptAll;

impl CertificateValidator for AcceptAll {
    fn validate_or_accept(&self, _: &[u8], _: bool) -> Result<(), CertificateRejection> {
        Ok(())
    }
}

/// Rejects everything unless the auto-accept override is set.
struct TrustNothing;

impl CertificateValidator for TrustNothing {
    fn validate_or_accept(
        &self,
        _certificate: &[u8],
        auto_accept: bool,
    ) -> Result<(), CertificateRejection> {
        if auto_accept {
            Ok(())
        } else {
            Err(CertificateRejection::new("certificate is not in the trust store"))
        }
    }
}

fn config() -> ClientConfig {
    ClientConfig::builder()
        .endpoint("opc.tcp://plc01:4840")
        .application_name("lifecycle-test")
        .security(SecurityMode::None, SecurityPolicy::None)
        .keepalive_interval(Duration::from_millis(20))
        .request_timeout(Duration::from_secs(2))
        .close_timeout(Duration::from_secs(1))
        .build()
        .unwrap()
}

fn items() -> Vec<DataItemConfig> {
    vec![
        DataItemConfig::new("speed", NodeId::string(2, "Pump.Speed"), SemanticType::Double),
        DataItemConfig::new("count", NodeId::string(2, "Pump.Count"), SemanticType::Int32),
        DataItemConfig::new("label", NodeId::string(2, "Pump.Label"), SemanticType::Text),
    ]
}

async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn notification(client_handle: u32, value: UaValue) -> RawNotification {
    RawNotification {
        client_handle,
        values: vec![DataValue {
            value,
            status: StatusCode::GOOD,
            source_timestamp: None,
        }],
    }
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn connect_builds_one_item_per_tag_and_delivers_notifications() {
    let server = ScriptedServer::new();
    let controller = ClientController::start(
        config(),
        items(),
        server.clone(),
        Arc::new(AcceptAll),
    )
    .await
    .unwrap();

    let (observer, mut events) = ChannelObserver::new(16);
    controller.register_observer(observer).await;

    // One monitored item per tag, handles in configuration order.
    let monitored = server.monitored.lock().unwrap()[0].clone();
    assert_eq!(monitored.len(), 3);
    assert_eq!(monitored[0].client_handle, 1);
    assert_eq!(monitored[0].node_id, NodeId::string(2, "Pump.Speed"));
    assert_eq!(monitored[2].client_handle, 3);

    // A published sample becomes one event and updates the tag text.
    server
        .publisher(0)
        .send(notification(1, UaValue::Double(77.5)))
        .await
        .unwrap();

    let event = events.recv().await.unwrap();
    assert_eq!(event.tag, "ns=2;s=Pump.Speed");
    assert_eq!(event.name, "speed");
    assert_eq!(event.value, UaValue::Double(77.5));
    assert_eq!(
        controller
            .tags()
            .get(&NodeId::string(2, "Pump.Speed"))
            .unwrap()
            .value()
            .await,
        "77.5"
    );

    controller.stop().await;
}

#[tokio::test]
async fn keepalive_failure_reconnects_once_and_rebuilds_subscription() {
    let server = ScriptedServer::new();
    let controller = ClientController::start(
        config(),
        items(),
        server.clone(),
        Arc::new(AcceptAll),
    )
    .await
    .unwrap();

    assert_eq!(server.sessions_created.load(Ordering::SeqCst), 1);
    assert_eq!(server.subscriptions_created(), 1);

    // Slow the reconnect down so several keep-alive cycles elapse while it
    // is in flight; the in-flight guard must collapse them into one attempt.
    *server.connect_delay.lock().unwrap() = Duration::from_millis(100);
    server.broken.store(true, Ordering::SeqCst);

    wait_until("session re-established", || {
        server.sessions_created.load(Ordering::SeqCst) == 2
    })
    .await;
    wait_until("subscription rebuilt", || server.subscriptions_created() == 2).await;

    // Exactly one reconnect happened despite repeated probe failures.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.sessions_created.load(Ordering::SeqCst), 2);
    assert_eq!(controller.session_state().await, SessionState::Connected);
    assert_eq!(controller.sessions().stats().reconnect_attempts(), 1);
    assert_eq!(controller.sessions().stats().reconnects(), 1);

    // The replaced subscription is silent: its channel is closed.
    let stale = server.publisher(0);
    assert!(stale.send(notification(1, UaValue::Double(1.0))).await.is_err());

    // The new subscription still delivers.
    let (observer, mut events) = ChannelObserver::new(16);
    controller.register_observer(observer).await;
    server
        .publisher(1)
        .send(notification(2, UaValue::Int32(5)))
        .await
        .unwrap();
    let event = events.recv().await.unwrap();
    assert_eq!(event.tag, "ns=2;s=Pump.Count");

    controller.stop().await;
}

#[tokio::test]
async fn certificate_rejection_honors_auto_accept() {
    let server = ScriptedServer::new();
    *server.certificate.lock().unwrap() = Some(vec![0x30, 0x82]);

    // Untrusted certificate without the override: connect fails, and the
    // failure is not retryable.
    let err = ClientController::start(
        config(),
        items(),
        server.clone(),
        Arc::new(TrustNothing),
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        ClientError::Connection(ConnectionError::CertificateRejected { .. })
    ));
    assert!(!err.is_retryable());

    // Same validator with auto-accept configured: connect succeeds.
    let accepting = ClientConfig::builder()
        .endpoint("opc.tcp://plc01:4840")
        .security(SecurityMode::None, SecurityPolicy::None)
        .auto_accept_certificates(true)
        .build()
        .unwrap();
    let controller =
        ClientController::start(accepting, items(), server.clone(), Arc::new(TrustNothing))
            .await
            .unwrap();
    assert_eq!(controller.session_state().await, SessionState::Connected);
    controller.stop().await;
}

#[tokio::test]
async fn identity_selection_follows_credentials_and_policies() {
    // No credentials against a server without anonymous access.
    let server = ScriptedServer::new();
    *server.token_policies.lock().unwrap() = vec![TokenPolicy::UserName];

    let err = ClientController::start(config(), items(), server.clone(), Arc::new(AcceptAll))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ClientError::Security(SecurityError::NoUsableIdentity)
    ));

    // Credentials configured: the same server accepts the session.
    let with_credentials = ClientConfig::builder()
        .endpoint("opc.tcp://plc01:4840")
        .security(SecurityMode::None, SecurityPolicy::None)
        .credentials("operator", "secret")
        .build()
        .unwrap();
    let controller =
        ClientController::start(with_credentials, items(), server.clone(), Arc::new(AcceptAll))
            .await
            .unwrap();
    assert_eq!(controller.session_state().await, SessionState::Connected);
    controller.stop().await;
}

#[tokio::test]
async fn execute_reads_all_tags_and_reports_per_node_failures() {
    let server = ScriptedServer::new();
    *server.read_script.lock().unwrap() = Some(vec![
        ReadResult {
            node_id: NodeId::string(2, "Pump.Speed"),
            value: UaValue::Double(12.5),
            status: StatusCode::GOOD,
            source_timestamp: None,
        },
        ReadResult {
            node_id: NodeId::string(2, "Pump.Count"),
            value: UaValue::Null,
            status: StatusCode::BAD_NODE_ID_UNKNOWN,
            source_timestamp: None,
        },
        ReadResult {
            node_id: NodeId::string(2, "Pump.Label"),
            value: UaValue::String("mixer".into()),
            status: StatusCode::GOOD,
            source_timestamp: None,
        },
    ]);

    let controller = ClientController::start(config(), items(), server.clone(), Arc::new(AcceptAll))
        .await
        .unwrap();

    let outcome = controller.execute().await.unwrap();
    assert!(!outcome.is_all_good());
    assert_eq!(
        outcome.value_of(&NodeId::string(2, "Pump.Speed")),
        Some(&UaValue::Double(12.5))
    );
    let failures: Vec<_> = outcome.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, &NodeId::string(2, "Pump.Count"));

    // Good tags updated, the failed one untouched.
    let tags = controller.tags();
    assert_eq!(tags.get(&NodeId::string(2, "Pump.Speed")).unwrap().value().await, "12.5");
    assert_eq!(tags.get(&NodeId::string(2, "Pump.Count")).unwrap().value().await, "");
    assert_eq!(tags.get(&NodeId::string(2, "Pump.Label")).unwrap().value().await, "mixer");

    controller.stop().await;
}

#[tokio::test]
async fn write_reports_partial_failure_and_skips_uncoercible_tags() {
    let server = ScriptedServer::new();
    let controller = ClientController::start(config(), items(), server.clone(), Arc::new(AcceptAll))
        .await
        .unwrap();

    let tags = controller.tags();
    tags.set_value(&NodeId::string(2, "Pump.Speed"), "55.5").await;
    tags.set_value(&NodeId::string(2, "Pump.Count"), "not a number").await;
    tags.set_value(&NodeId::string(2, "Pump.Label"), "line 4").await;

    let outcome = controller.write_values().await.unwrap();

    // The uncoercible tag was excluded; the other two were written.
    let written = server.written.lock().unwrap().clone();
    assert_eq!(written.len(), 2);
    assert_eq!(written[0].node_id, NodeId::string(2, "Pump.Speed"));
    assert_eq!(written[0].value, UaValue::Double(55.5));
    assert_eq!(written[1].value, UaValue::String("line 4".into()));

    assert!(!outcome.is_all_good());
    let (node, err) = outcome.first_failure().unwrap();
    assert_eq!(node, &NodeId::string(2, "Pump.Count"));
    assert!(matches!(err, ClientError::Coercion(_)));

    controller.stop().await;
}

#[tokio::test]
async fn stop_closes_session_and_halts_background_activity() {
    let server = ScriptedServer::new();
    let controller = ClientController::start(config(), items(), server.clone(), Arc::new(AcceptAll))
        .await
        .unwrap();

    wait_until("keep-alive running", || {
        server.keepalive_calls.load(Ordering::SeqCst) >= 1
    })
    .await;

    controller.stop().await;
    assert_eq!(server.sessions_closed.load(Ordering::SeqCst), 1);
    assert_eq!(server.subscriptions_deleted.load(Ordering::SeqCst), 1);

    // No resurrection: keep-alive probing has stopped for good.
    let probes = server.keepalive_calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.keepalive_calls.load(Ordering::SeqCst), probes);

    // Stopping again is a no-op.
    controller.stop().await;
    assert_eq!(server.sessions_closed.load(Ordering::SeqCst), 1);
}
