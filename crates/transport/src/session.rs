//! One supervised actor per chat instance.
//!
//! Callers never touch the gateway client directly: [`SessionRegistry`] routes
//! each send to the instance's mailbox and awaits the reply on a oneshot. A
//! connection-class failure ends the actor; its supervisor restarts it with
//! exponential backoff and marks the session failed once retries run out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use relaydesk_core::config::TransportConfig;
use relaydesk_core::domain::workspace::InstanceKey;
use relaydesk_core::transport::{OutboundDocument, Transport, TransportError};

use crate::evolution::{ChatApi, ConnectionState};

const MAILBOX_CAPACITY: usize = 64;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 5, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl From<&TransportConfig> for ReconnectPolicy {
    fn from(config: &TransportConfig) -> Self {
        Self {
            max_retries: config.restart_max_retries,
            base_delay_ms: config.restart_base_delay_ms,
            max_delay_ms: config.restart_max_delay_ms,
        }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionHealth {
    Starting,
    Running { restarts: u32 },
    Failed { reason: String },
}

enum SessionCommand {
    SendText {
        to: String,
        text: String,
        reply: oneshot::Sender<Result<(), TransportError>>,
    },
    SendDocument {
        to: String,
        document: OutboundDocument,
        reply: oneshot::Sender<Result<(), TransportError>>,
    },
}

impl SessionCommand {
    fn reject(self, error: TransportError) {
        let (Self::SendText { reply, .. } | Self::SendDocument { reply, .. }) = self;
        let _ = reply.send(Err(error));
    }
}

struct SessionActor {
    instance: InstanceKey,
    api: Arc<dyn ChatApi>,
    mailbox: mpsc::Receiver<SessionCommand>,
    /// Commands delivered since the current incarnation started.
    delivered: u64,
}

impl SessionActor {
    /// Runs until the mailbox closes (`Ok`) or the gateway connection breaks (`Err`).
    async fn run(
        &mut self,
        health: &watch::Sender<SessionHealth>,
        restarts: u32,
    ) -> Result<(), TransportError> {
        self.delivered = 0;
        let state = self.api.connection_state(&self.instance).await?;
        if state != ConnectionState::Open {
            warn!(
                event_name = "transport.session.not_open",
                instance = %self.instance,
                state = ?state,
                "chat instance is not connected; sends may be rejected"
            );
        }
        health.send_replace(SessionHealth::Running { restarts });
        info!(
            event_name = "transport.session.started",
            instance = %self.instance,
            restarts,
            "session actor running"
        );

        while let Some(command) = self.mailbox.recv().await {
            let result = match &command {
                SessionCommand::SendText { to, text, .. } => {
                    self.api.send_text(&self.instance, to, text).await
                }
                SessionCommand::SendDocument { to, document, .. } => {
                    self.api.send_media(&self.instance, to, document).await
                }
            };

            let broken =
                result.as_ref().err().filter(|error| error.is_connection_failure()).cloned();
            if result.is_ok() {
                self.delivered += 1;
            }
            let (SessionCommand::SendText { reply, .. } | SessionCommand::SendDocument { reply, .. }) =
                command;
            if reply.send(result).is_err() {
                debug!(instance = %self.instance, "send caller went away before the reply");
            }
            if let Some(error) = broken {
                return Err(error);
            }
        }

        Ok(())
    }

    /// Answers every queued and future command with `SessionUnavailable`.
    async fn drain_failed(&mut self) {
        while let Some(command) = self.mailbox.recv().await {
            command.reject(TransportError::SessionUnavailable(self.instance.0.clone()));
        }
    }
}

async fn supervise(
    mut actor: SessionActor,
    policy: ReconnectPolicy,
    health: watch::Sender<SessionHealth>,
) {
    let mut restarts = 0_u32;
    let mut attempt = 0_u32;

    loop {
        match actor.run(&health, restarts).await {
            Ok(()) => {
                info!(
                    event_name = "transport.session.stopped",
                    instance = %actor.instance,
                    "session mailbox closed"
                );
                return;
            }
            Err(error) => {
                if actor.delivered > 0 {
                    attempt = 0;
                }
                warn!(
                    event_name = "transport.session.connection_failed",
                    instance = %actor.instance,
                    attempt,
                    max_retries = policy.max_retries,
                    error = %error,
                    "session actor exited with a connection failure"
                );

                if attempt >= policy.max_retries {
                    warn!(
                        event_name = "transport.session.failed",
                        instance = %actor.instance,
                        max_retries = policy.max_retries,
                        "session restarts exhausted; sends will fail fast"
                    );
                    health.send_replace(SessionHealth::Failed { reason: error.to_string() });
                    actor.drain_failed().await;
                    return;
                }

                let delay = policy.backoff(attempt);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
                restarts += 1;
            }
        }
    }
}

struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    health: watch::Receiver<SessionHealth>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    fn is_failed(&self) -> bool {
        matches!(*self.health.borrow(), SessionHealth::Failed { .. })
    }
}

/// Owns the session actor of every opened chat instance and implements the
/// outbound [`Transport`] contract over them.
pub struct SessionRegistry {
    api: Arc<dyn ChatApi>,
    policy: ReconnectPolicy,
    sessions: RwLock<HashMap<InstanceKey, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new(api: Arc<dyn ChatApi>, policy: ReconnectPolicy) -> Self {
        Self { api, policy, sessions: RwLock::new(HashMap::new()) }
    }

    /// Starts a session for `instance` unless a healthy one already exists. A
    /// failed session is replaced.
    pub async fn open(&self, instance: &InstanceKey) {
        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.get(instance) {
            if !existing.is_failed() && !existing.task.is_finished() {
                return;
            }
        }

        let (commands, mailbox) = mpsc::channel(MAILBOX_CAPACITY);
        let (health_tx, health) = watch::channel(SessionHealth::Starting);
        let actor =
            SessionActor { instance: instance.clone(), api: self.api.clone(), mailbox, delivered: 0 };
        let task = tokio::spawn(supervise(actor, self.policy.clone(), health_tx));

        let handle = SessionHandle { commands, health, task };
        if let Some(previous) = sessions.insert(instance.clone(), handle) {
            previous.task.abort();
        }
    }

    pub async fn health(&self, instance: &InstanceKey) -> Option<SessionHealth> {
        self.sessions.read().await.get(instance).map(|handle| handle.health.borrow().clone())
    }

    /// Closes every mailbox and waits for the actors to finish their queues.
    pub async fn shutdown(&self) {
        let handles: Vec<SessionHandle> =
            self.sessions.write().await.drain().map(|(_, handle)| handle).collect();
        for handle in handles {
            drop(handle.commands);
            if let Err(error) = handle.task.await {
                warn!(error = %error, "session actor ended abnormally during shutdown");
            }
        }
    }

    async fn dispatch(
        &self,
        instance: &InstanceKey,
        command: impl FnOnce(oneshot::Sender<Result<(), TransportError>>) -> SessionCommand,
    ) -> Result<(), TransportError> {
        let commands = {
            let sessions = self.sessions.read().await;
            let handle = sessions
                .get(instance)
                .ok_or_else(|| TransportError::SessionUnavailable(instance.0.clone()))?;
            if handle.is_failed() {
                return Err(TransportError::SessionUnavailable(instance.0.clone()));
            }
            handle.commands.clone()
        };

        let (reply, response) = oneshot::channel();
        commands.send(command(reply)).await.map_err(|_| TransportError::ChannelClosed)?;
        response.await.map_err(|_| TransportError::ChannelClosed)?
    }
}

#[async_trait]
impl Transport for SessionRegistry {
    async fn send_text(
        &self,
        instance: &InstanceKey,
        to: &str,
        text: &str,
    ) -> Result<(), TransportError> {
        let (to, text) = (to.to_owned(), text.to_owned());
        self.dispatch(instance, |reply| SessionCommand::SendText { to, text, reply }).await
    }

    async fn send_document(
        &self,
        instance: &InstanceKey,
        to: &str,
        document: OutboundDocument,
    ) -> Result<(), TransportError> {
        let to = to.to_owned();
        self.dispatch(instance, |reply| SessionCommand::SendDocument { to, document, reply }).await
    }
}
