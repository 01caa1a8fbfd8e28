// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The top-level client facade.
//!
//! [`ClientController`] wires the session manager, the subscription manager,
//! and the batched data access together: [`start`] connects and builds the
//! subscription, [`execute`] is the periodic supervisory tick, and [`stop`]
//! tears everything down. After a background reconnect the subscription is
//! rebuilt automatically via the session generation signal.
//!
//! [`start`]: ClientController::start
//! [`execute`]: ClientController::execute
//! [`stop`]: ClientController::stop

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::access::{DataAccess, ReadOutcome, WriteOutcome};
use crate::error::{ClientError, ClientResult};
use crate::security::CertificateValidator;
use crate::session::{SessionManager, SessionState};
use crate::subscription::{NotificationObserver, SubscriptionManager};
use crate::tags::{DataItemConfig, TagSet};
use crate::transport::UaTransport;
use crate::types::ClientConfig;

/// Supervisory OPC UA tag client.
///
/// # Thread Safety
///
/// All methods take `&self`; the controller can be shared behind an `Arc`.
/// [`execute`](ClientController::execute) is idempotent and safe to call on
/// a timer regardless of connection state.
pub struct ClientController {
    config: ClientConfig,
    tags: Arc<TagSet>,
    sessions: Arc<SessionManager>,
    subscriptions: Arc<SubscriptionManager>,
    access: DataAccess,
    rebuild_task: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl std::fmt::Debug for ClientController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientController")
            .field("config", &self.config)
            .field("stopped", &self.stopped)
            .finish_non_exhaustive()
    }
}

impl ClientController {
    /// Connects, builds the subscription, and starts lifecycle monitoring.
    ///
    /// Fails fast on invalid configuration or an unreachable server; no
    /// background retry is running until the first connect has succeeded.
    pub async fn start(
        config: ClientConfig,
        items: Vec<DataItemConfig>,
        transport: Arc<dyn UaTransport>,
        validator: Arc<dyn CertificateValidator>,
    ) -> ClientResult<Self> {
        config.validate()?;
        let tags = Arc::new(TagSet::new(items)?);

        let sessions = SessionManager::new(config.clone(), Arc::clone(&transport), validator);
        let subscriptions = SubscriptionManager::new(
            Arc::clone(&transport),
            Arc::clone(&tags),
            config.publishing_interval,
            config.request_timeout,
        );
        let access = DataAccess::new(transport, Arc::clone(&tags), config.request_timeout);

        let session = sessions.connect().await?;
        if let Err(err) = subscriptions.build(&session).await {
            // Don't leak the session we just established.
            sessions.close().await;
            return Err(err);
        }

        let rebuild_task = spawn_rebuild_listener(&sessions, &subscriptions);

        info!(
            endpoint = %config.endpoint_url,
            tags = tags.len(),
            "Client started"
        );

        Ok(Self {
            config,
            tags,
            sessions,
            subscriptions,
            access,
            rebuild_task: Mutex::new(Some(rebuild_task)),
            stopped: AtomicBool::new(false),
        })
    }

    /// Runs one supervisory tick.
    ///
    /// If the session is gone or parked in `Failed`, makes one connect
    /// attempt (and rebuilds the subscription). While a connect or the
    /// background reconnect is in progress the tick is skipped. A healthy
    /// tick performs one batched read pass over all tags and returns it.
    pub async fn execute(&self) -> ClientResult<ReadOutcome> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(ClientError::not_connected());
        }

        let state = self.sessions.state().await;
        let session = match state {
            SessionState::Connected if self.sessions.is_alive().await => self
                .sessions
                .current()
                .await
                .ok_or_else(ClientError::not_connected)?,
            SessionState::Connecting | SessionState::Reconnecting | SessionState::Connected => {
                // Connected-but-dead means the keep-alive task is about to
                // reconnect; don't race it.
                debug!(state = %state, "Session not usable; skipping tick");
                return Err(ClientError::not_connected());
            }
            SessionState::Disconnected | SessionState::Failed => {
                let session = self.sessions.connect().await?;
                self.subscriptions.build(&session).await?;
                session
            }
        };

        self.access.read_values(&session).await
    }

    /// Writes every tag's current value text to the server in one batch.
    pub async fn write_values(&self) -> ClientResult<WriteOutcome> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(ClientError::not_connected());
        }
        let session = self
            .sessions
            .current()
            .await
            .ok_or_else(ClientError::not_connected)?;
        self.access.write_values(&session).await
    }

    /// Registers a notification observer.
    pub async fn register_observer(&self, observer: Arc<dyn NotificationObserver>) {
        self.subscriptions.register_observer(observer).await;
    }

    /// Returns the configured tag table.
    pub fn tags(&self) -> &Arc<TagSet> {
        &self.tags
    }

    /// Returns the current session state.
    pub async fn session_state(&self) -> SessionState {
        self.sessions.state().await
    }

    /// Returns the session manager (state, stats, generation signal).
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Returns the subscription manager (stats, activity).
    pub fn subscriptions(&self) -> &Arc<SubscriptionManager> {
        &self.subscriptions
    }

    /// Stops the client: deletes the subscription and closes the session.
    ///
    /// The close is bounded by the configured close timeout. Idempotent;
    /// after `stop` no background activity remains and [`execute`] fails
    /// with a not-connected error.
    ///
    /// [`execute`]: ClientController::execute
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(task) = self.rebuild_task.lock().await.take() {
            task.abort();
        }
        self.subscriptions.stop().await;
        self.sessions.close().await;

        info!(endpoint = %self.config.endpoint_url, "Client stopped");
    }
}

/// Rebuilds the subscription whenever a new session generation appears.
fn spawn_rebuild_listener(
    sessions: &Arc<SessionManager>,
    subscriptions: &Arc<SubscriptionManager>,
) -> JoinHandle<()> {
    let mut generation = sessions.generation();
    // The initial connect is already built; only react to later ones.
    generation.borrow_and_update();

    let sessions = Arc::downgrade(sessions);
    let subscriptions = Arc::downgrade(subscriptions);

    tokio::spawn(async move {
        while generation.changed().await.is_ok() {
            let (Some(sessions), Some(subscriptions)) =
                (sessions.upgrade(), subscriptions.upgrade())
            else {
                return;
            };
            let Some(session) = sessions.current().await else {
                continue;
            };
            if let Err(err) = subscriptions.build(&session).await {
                error!(error = %err, "Subscription rebuild failed");
            }
        }
    })
}

// =============================================================================
// Tests
// =============================================================================
