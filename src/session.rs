// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Session lifecycle: connect, keep-alive, reconnect, close.
//!
//! The [`SessionManager`] owns the current [`Session`] behind an
//! `RwLock<Option<Arc<..>>>`; a reconnect builds a complete replacement and
//! swaps the `Arc`, so readers observe either the old session or the new one,
//! never a partial state. Liveness is probed by a background keep-alive task.
//! A failed probe triggers at most one in-flight reconnect, guarded by an
//! atomic flag; further failures while that attempt runs are collapsed.
//!
//! Subscription rebuild after a reconnect is signalled through a `watch`
//! channel carrying a monotonically increasing session generation.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::error::{ClientResult, ConnectionError};
use crate::security::{resolve_identity, CertificateValidator, Identity};
use crate::transport::{TransportSession, UaTransport};
use crate::types::{ClientConfig, SecurityMode, SecurityPolicy};

// =============================================================================
// SessionState
// =============================================================================

/// State of the managed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No session; nothing in progress.
    #[default]
    Disconnected,

    /// Initial connection in progress.
    Connecting,

    /// Session established and monitored.
    Connected,

    /// Keep-alive failed; a reconnect attempt is pending or running.
    Reconnecting,

    /// A non-retryable failure occurred; only an explicit connect leaves
    /// this state.
    Failed,
}

impl SessionState {
    /// Returns `true` if a session is established.
    #[inline]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns `true` if a connection attempt is in progress.
    #[inline]
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting)
    }

    /// Returns `true` if the manager gave up until an explicit connect.
    #[inline]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Reconnecting => write!(f, "Reconnecting"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

// =============================================================================
// SessionHealth
// =============================================================================

/// Shared liveness record for one session.
#[derive(Debug)]
pub struct SessionHealth {
    started: Instant,
    alive: AtomicBool,
    // Milliseconds after `started` of the last good keep-alive probe.
    last_keepalive_ms: AtomicU64,
    outstanding: AtomicU32,
}

impl SessionHealth {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            alive: AtomicBool::new(true),
            last_keepalive_ms: AtomicU64::new(0),
            outstanding: AtomicU32::new(0),
        }
    }

    /// Returns `true` until a keep-alive probe fails.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Time since the last good keep-alive probe (or session start).
    pub fn last_keepalive_age(&self) -> Duration {
        let recorded = Duration::from_millis(self.last_keepalive_ms.load(Ordering::Relaxed));
        self.started.elapsed().saturating_sub(recorded)
    }

    /// Number of requests currently issued on this session.
    pub fn outstanding_requests(&self) -> u32 {
        self.outstanding.load(Ordering::Relaxed)
    }

    fn touch(&self) {
        self.last_keepalive_ms
            .store(self.started.elapsed().as_millis() as u64, Ordering::Relaxed);
        self.alive.store(true, Ordering::SeqCst);
    }

    fn mark_dead(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub(crate) fn track_request(&self) -> RequestGuard<'_> {
        self.outstanding.fetch_add(1, Ordering::Relaxed);
        RequestGuard { health: self }
    }
}

/// Decrements the outstanding-request count on drop.
pub(crate) struct RequestGuard<'a> {
    health: &'a SessionHealth,
}

impl Drop for RequestGuard<'_> {
    fn drop(&mut self) {
        self.health.outstanding.fetch_sub(1, Ordering::Relaxed);
    }
}

// =============================================================================
// Session
// =============================================================================

/// An established session.
///
/// Immutable apart from its [`SessionHealth`]; a reconnect produces a new
/// `Session` rather than mutating this one.
#[derive(Debug)]
pub struct Session {
    /// URL of the endpoint the session runs on.
    pub endpoint_url: String,

    /// Negotiated message security mode.
    pub security_mode: SecurityMode,

    /// Negotiated security policy.
    pub security_policy: SecurityPolicy,

    /// Identity the session was activated with.
    pub identity: Identity,

    pub(crate) handle: TransportSession,
    pub(crate) health: SessionHealth,
}

impl Session {
    #[cfg(test)]
    pub(crate) fn stub(handle: TransportSession) -> Self {
        Self {
            endpoint_url: "opc.tcp://localhost:4840".to_string(),
            security_mode: SecurityMode::None,
            security_policy: SecurityPolicy::None,
            identity: Identity::Anonymous,
            handle,
            health: SessionHealth::new(),
        }
    }

    /// Returns `true` until a keep-alive probe fails.
    pub fn is_alive(&self) -> bool {
        self.health.is_alive()
    }

    /// Time since the last good keep-alive probe.
    pub fn last_keepalive_age(&self) -> Duration {
        self.health.last_keepalive_age()
    }
}

// =============================================================================
// SessionManager
// =============================================================================

/// Manages the session lifecycle against one server.
///
/// # Thread Safety
///
/// The manager is shared behind an `Arc` between the caller, the keep-alive
/// task, and reconnect tasks. Background tasks hold only a `Weak` reference
/// and exit when the manager is dropped.
pub struct SessionManager {
    config: ClientConfig,
    transport: Arc<dyn UaTransport>,
    validator: Arc<dyn CertificateValidator>,
    // Handle to ourselves for the tasks we spawn.
    self_ref: Weak<SessionManager>,
    state: RwLock<SessionState>,
    current: RwLock<Option<Arc<Session>>>,
    reconnect_in_flight: AtomicBool,
    shutdown: AtomicBool,
    generation_tx: watch::Sender<u64>,
    keepalive_task: Mutex<Option<JoinHandle<()>>>,
    stats: SessionStats,
}

impl SessionManager {
    /// Creates a manager. No connection is attempted until [`connect`].
    ///
    /// [`connect`]: SessionManager::connect
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn UaTransport>,
        validator: Arc<dyn CertificateValidator>,
    ) -> Arc<Self> {
        let (generation_tx, _) = watch::channel(0);
        Arc::new_cyclic(|self_ref| Self {
            config,
            transport,
            validator,
            self_ref: self_ref.clone(),
            state: RwLock::new(SessionState::Disconnected),
            current: RwLock::new(None),
            reconnect_in_flight: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            generation_tx,
            keepalive_task: Mutex::new(None),
            stats: SessionStats::new(),
        })
    }

    /// Returns the current state.
    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    /// Returns the current session, if one is established.
    pub async fn current(&self) -> Option<Arc<Session>> {
        self.current.read().await.clone()
    }

    /// Returns `true` if a session is established and its keep-alive is good.
    pub async fn is_alive(&self) -> bool {
        match &*self.current.read().await {
            Some(session) => session.is_alive(),
            None => false,
        }
    }

    /// Returns a receiver for the session generation.
    ///
    /// The value increases by one for every successfully established session;
    /// subscribers rebuild their server-side state when it changes.
    pub fn generation(&self) -> watch::Receiver<u64> {
        self.generation_tx.subscribe()
    }

    /// Returns the session statistics.
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Establishes a session: endpoint selection, certificate validation,
    /// identity resolution, create + activate, keep-alive arming.
    ///
    /// Does not retry; a failure leaves the manager in `Failed` and is
    /// returned to the caller. Calling while connected replaces the session.
    pub async fn connect(&self) -> ClientResult<Arc<Session>> {
        self.shutdown.store(false, Ordering::SeqCst);
        *self.state.write().await = SessionState::Connecting;

        match self.establish().await {
            Ok(session) => {
                let session = Arc::new(session);
                *self.current.write().await = Some(Arc::clone(&session));
                *self.state.write().await = SessionState::Connected;
                self.stats.record_connect();
                self.generation_tx.send_modify(|g| *g += 1);
                self.arm_keep_alive().await;
                info!(
                    endpoint = %session.endpoint_url,
                    identity = %session.identity,
                    security_mode = %session.security_mode,
                    "Session established"
                );
                Ok(session)
            }
            Err(err) => {
                *self.current.write().await = None;
                *self.state.write().await = SessionState::Failed;
                Err(err)
            }
        }
    }

    /// Closes the session and stops all background activity.
    ///
    /// The server-side close is best-effort and bounded by the configured
    /// close timeout; errors are logged, not returned. Idempotent, and no
    /// keep-alive or reconnect runs afterwards.
    pub async fn close(&self) {
        self.shutdown.store(true, Ordering::SeqCst);

        if let Some(task) = self.keepalive_task.lock().await.take() {
            task.abort();
        }

        // Hold the `current` lock across the state change so a reconnect
        // that is about to install a fresh session observes the shutdown
        // before and after this point, never in between.
        let session = {
            let mut current = self.current.write().await;
            let session = current.take();
            *self.state.write().await = SessionState::Disconnected;
            session
        };

        if let Some(session) = session {
            match tokio::time::timeout(
                self.config.close_timeout,
                self.transport.close_session(session.handle),
            )
            .await
            {
                Ok(Ok(())) => {
                    info!(endpoint = %session.endpoint_url, "Session closed");
                }
                Ok(Err(err)) => {
                    warn!(endpoint = %session.endpoint_url, error = %err, "Session close failed");
                }
                Err(_) => {
                    warn!(
                        endpoint = %session.endpoint_url,
                        timeout = ?self.config.close_timeout,
                        "Session close timed out"
                    );
                }
            }
            self.stats.record_close();
        }
    }

    /// Runs the connect sequence without touching manager state.
    async fn establish(&self) -> ClientResult<Session> {
        let endpoint = tokio::time::timeout(
            self.config.endpoint_select_timeout,
            self.transport.select_endpoint(
                &self.config.endpoint_url,
                self.config.security_mode,
                self.config.security_policy,
            ),
        )
        .await
        .map_err(|_| {
            ConnectionError::timeout("select_endpoint", self.config.endpoint_select_timeout)
        })??;

        if let Some(certificate) = &endpoint.server_certificate {
            self.validator
                .validate_or_accept(certificate, self.config.auto_accept_certificates)
                .map_err(|rejection| ConnectionError::certificate_rejected(rejection.reason))?;
        }

        let identity = resolve_identity(
            &self.config.username,
            &self.config.password,
            &endpoint.token_policies,
        )?;

        let handle = tokio::time::timeout(
            self.config.request_timeout,
            self.transport.create_session(
                &endpoint,
                &self.config.application_name,
                &identity,
                self.config.session_timeout,
            ),
        )
        .await
        .map_err(|_| ConnectionError::timeout("create_session", self.config.request_timeout))??;

        Ok(Session {
            endpoint_url: endpoint.endpoint_url,
            security_mode: endpoint.security_mode,
            security_policy: endpoint.security_policy,
            identity,
            handle,
            health: SessionHealth::new(),
        })
    }

    /// Starts the keep-alive task, replacing any previous one.
    async fn arm_keep_alive(&self) {
        let weak = self.self_ref.clone();
        let period = self.config.keepalive_interval;
        let task = tokio::spawn(keep_alive_loop(weak, period));
        if let Some(old) = self.keepalive_task.lock().await.replace(task) {
            old.abort();
        }
    }

    /// Starts one reconnect attempt unless one is already in flight.
    fn trigger_reconnect(&self) {
        if self.shutdown.load(Ordering::SeqCst) {
            return;
        }
        if self.reconnect_in_flight.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stats.record_reconnect_attempt();

        let weak = self.self_ref.clone();
        tokio::spawn(async move {
            let Some(manager) = weak.upgrade() else {
                return;
            };
            if manager.shutdown.load(Ordering::SeqCst) {
                manager.reconnect_in_flight.store(false, Ordering::SeqCst);
                return;
            }

            *manager.state.write().await = SessionState::Reconnecting;
            info!(endpoint = %manager.config.endpoint_url, "Reconnecting");

            match manager.establish().await {
                Ok(session) => {
                    let session = Arc::new(session);
                    // The shutdown check must happen under the `current`
                    // lock: a `close()` that ran while we were establishing
                    // has already taken the slot, and installing now would
                    // resurrect the manager.
                    let mut current = manager.current.write().await;
                    if manager.shutdown.load(Ordering::SeqCst) {
                        drop(current);
                        let _ = manager.transport.close_session(session.handle).await;
                    } else {
                        *current = Some(Arc::clone(&session));
                        *manager.state.write().await = SessionState::Connected;
                        drop(current);
                        manager.stats.record_reconnect();
                        manager.generation_tx.send_modify(|g| *g += 1);
                        info!(
                            endpoint = %session.endpoint_url,
                            identity = %session.identity,
                            "Session re-established"
                        );
                    }
                }
                Err(err) if err.is_retryable() => {
                    warn!(
                        endpoint = %manager.config.endpoint_url,
                        error = %err,
                        "Reconnect attempt failed; retrying on next keep-alive cycle"
                    );
                }
                Err(err) => {
                    error!(
                        endpoint = %manager.config.endpoint_url,
                        error = %err,
                        "Reconnect failed with a non-retryable error"
                    );
                    *manager.state.write().await = SessionState::Failed;
                }
            }

            manager.reconnect_in_flight.store(false, Ordering::SeqCst);
        });
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("endpoint", &self.config.endpoint_url)
            .finish()
    }
}

/// Periodic keep-alive probe.
///
/// Holds only a `Weak` reference so an abandoned manager is not kept alive
/// by its own task.
async fn keep_alive_loop(manager: Weak<SessionManager>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick of an interval fires immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let Some(manager) = manager.upgrade() else {
            return;
        };
        if manager.shutdown.load(Ordering::SeqCst) {
            return;
        }
        if manager.reconnect_in_flight.load(Ordering::SeqCst) {
            continue;
        }
        if manager.state().await.is_failed() {
            continue;
        }
        let Some(session) = manager.current().await else {
            continue;
        };

        let probe = tokio::time::timeout(
            manager.config.request_timeout,
            manager.transport.keep_alive(session.handle),
        )
        .await;

        match probe {
            Ok(Ok(status)) if status.is_good() => {
                session.health.touch();
            }
            Ok(Ok(status)) => {
                warn!(
                    endpoint = %session.endpoint_url,
                    status = %status,
                    outstanding = session.health.outstanding_requests(),
                    "Keep-alive returned bad status"
                );
                manager.on_keepalive_failure(&session);
            }
            Ok(Err(err)) => {
                warn!(
                    endpoint = %session.endpoint_url,
                    error = %err,
                    outstanding = session.health.outstanding_requests(),
                    "Keep-alive probe failed"
                );
                manager.on_keepalive_failure(&session);
            }
            Err(_) => {
                warn!(
                    endpoint = %session.endpoint_url,
                    outstanding = session.health.outstanding_requests(),
                    "Keep-alive probe timed out"
                );
                manager.on_keepalive_failure(&session);
            }
        }
    }
}

impl SessionManager {
    fn on_keepalive_failure(&self, session: &Session) {
        self.stats.record_keepalive_failure();
        session.health.mark_dead();
        self.trigger_reconnect();
    }
}

// =============================================================================
// SessionStats
// =============================================================================

/// Counters for session lifecycle events.
#[derive(Debug, Default)]
pub struct SessionStats {
    connects: AtomicU64,
    reconnect_attempts: AtomicU64,
    reconnects: AtomicU64,
    keepalive_failures: AtomicU64,
    closes: AtomicU64,
}

impl SessionStats {
    fn new() -> Self {
        Self::default()
    }

    fn record_connect(&self) {
        self.connects.fetch_add(1, Ordering::Relaxed);
    }

    fn record_reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    fn record_keepalive_failure(&self) {
        self.keepalive_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn record_close(&self) {
        self.closes.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of sessions established by explicit connect calls.
    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::Relaxed)
    }

    /// Number of reconnect attempts triggered by keep-alive failures.
    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// Number of successful reconnects.
    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    /// Number of failed keep-alive probes.
    pub fn keepalive_failures(&self) -> u64 {
        self.keepalive_failures.load(Ordering::Relaxed)
    }

    /// Number of sessions closed.
    pub fn closes(&self) -> u64 {
        self.closes.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Tests
// =============================================================================
