use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard, Weak};
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::SessionConfig;
use crate::dispatch::{EventDispatcher, ObserverError, SubscriptionId};
use crate::state::{ConnectionSnapshot, SessionState};
use crate::store::{ApiStatus, Message, QrCodeRecord, RecordStore, StoreError};
use crate::sync::{MessageSynchronizer, SyncError};
use crate::transport::{
    with_deadline, EventSink, Transport, TransportError, TransportEventHandler, TransportFactory,
};
use crate::types::{
    normalize_chat_id, EventKind, ParseJIDError, RawChat, RawContact, RawMessage, SendOptions,
    SessionEvent, TransportEvent,
};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("session is already initializing")]
    AlreadyInitializing,
    #[error("session is not connected; call `initialize` and wait for `ready`")]
    NotConnected,
    #[error("invalid chat id: {0}")]
    InvalidChatId(#[from] ParseJIDError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),
}

impl From<SyncError> for ClientError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::InvalidChatId(err) => ClientError::InvalidChatId(err),
            SyncError::Store(err) => ClientError::Persistence(err),
            SyncError::Transport(err) => ClientError::Transport(err),
        }
    }
}

/// Handle to the single upstream session. Clones share the session.
#[derive(Clone)]
pub struct SessionClient {
    inner: Arc<ClientInner>,
}

#[derive(Default)]
struct Session {
    state: SessionState,
    transport: Option<Arc<dyn Transport>>,
    started_at: Option<Instant>,
    /// Code issued to the current generation, cleared once scanned.
    pending_qr: Option<String>,
}

struct ClientInner {
    config: SessionConfig,
    factory: Arc<dyn TransportFactory>,
    store: Arc<dyn RecordStore>,
    sync: MessageSynchronizer,
    events: EventDispatcher,
    session: RwLock<Session>,
    /// Serializes `initialize` and `disconnect`.
    lifecycle: Mutex<()>,
}

impl SessionClient {
    pub fn new(
        config: SessionConfig,
        factory: Arc<dyn TransportFactory>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        let sync = MessageSynchronizer::new(store.clone(), &config);
        Self {
            inner: Arc::new(ClientInner {
                config,
                factory,
                store,
                sync,
                events: EventDispatcher::new(),
                session: RwLock::new(Session::default()),
                lifecycle: Mutex::new(()),
            }),
        }
    }

    /// Start a session on a fresh transport.
    ///
    /// Does nothing if a session is already connecting or connected. Fails
    /// with [`ClientError::AlreadyInitializing`] while another `initialize`
    /// or `disconnect` is running.
    pub async fn initialize(&self) -> Result<(), ClientError> {
        let Ok(_lifecycle) = self.inner.lifecycle.try_lock() else {
            log::warn!("initialize ignored: another lifecycle operation is in progress");
            return Err(ClientError::AlreadyInitializing);
        };

        let (generation, transport) = {
            let mut session = self.inner.session();
            if session.state.is_active() {
                log::info!("initialize ignored: session is {}", session.state.state);
                return Ok(());
            }
            let generation = session.state.begin_connecting();
            let transport = self.inner.factory.create();
            session.transport = Some(transport.clone());
            session.started_at = Some(Instant::now());
            session.pending_qr = None;
            (generation, transport)
        };
        log::info!(
            "connecting {} (generation {})",
            self.inner.config.device_name,
            generation
        );
        self.inner.publish_state();

        let handler: Weak<ClientInner> = Arc::downgrade(&self.inner);
        let sink = EventSink::new(generation, handler);
        let timeout = self.inner.config.command_timeout();
        let started = with_deadline(timeout, transport.start(sink)).await;
        if let Err(err) = started {
            // A half-started transport is still running; shut it down.
            if let Err(teardown) = with_deadline(timeout, transport.destroy()).await {
                log::warn!("teardown after failed start failed: {}", teardown);
            }
            self.inner.fail_start(generation, &err);
            return Err(err.into());
        }
        Ok(())
    }

    /// Tear the session down.
    ///
    /// The session ends up `Disconnected` even when the transport fails to
    /// shut down cleanly; that failure is returned afterwards.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        let _lifecycle = self.inner.lifecycle.lock().await;

        let transport = self.inner.session().transport.take();
        let Some(transport) = transport else {
            log::debug!("disconnect ignored: no active transport");
            return Ok(());
        };

        let teardown =
            with_deadline(self.inner.config.command_timeout(), transport.destroy()).await;
        let reason = match &teardown {
            Ok(()) => "disconnected by client".to_string(),
            Err(err) => {
                log::warn!("transport teardown failed: {}", err);
                err.to_string()
            }
        };
        {
            let mut session = self.inner.session();
            session.started_at = None;
            session
                .state
                .mark_disconnected(teardown.as_ref().err().map(ToString::to_string));
        }
        log::info!("session disconnected: {}", reason);
        self.inner
            .persist_status(ApiStatus::offline(reason.clone(), Utc::now()));
        self.inner.publish(SessionEvent::Disconnected { reason });
        self.inner.publish_state();

        teardown.map_err(ClientError::from)
    }

    pub fn connection_state(&self) -> ConnectionSnapshot {
        self.inner
            .session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .state
            .snapshot()
    }

    /// Send a text message and record it as `sent`.
    pub async fn send_message(
        &self,
        to: &str,
        content: &str,
        options: &SendOptions,
    ) -> Result<Message, ClientError> {
        let transport = self.inner.connected_transport()?;
        Ok(self
            .inner
            .sync
            .send(transport.as_ref(), to, content, options)
            .await?)
    }

    /// Tell the network a chat was read, then clear it locally. Returns how
    /// many messages changed to `read`.
    pub async fn mark_chat_as_read(&self, chat_id: &str) -> Result<usize, ClientError> {
        let transport = self.inner.connected_transport()?;
        let chat_id = normalize_chat_id(chat_id)?;
        with_deadline(
            self.inner.config.command_timeout(),
            transport.send_seen(&chat_id),
        )
        .await?;
        Ok(self.inner.sync.mark_as_read(&chat_id).await?)
    }

    /// Chats as the transport lists them.
    pub async fn get_chats(&self) -> Result<Vec<RawChat>, ClientError> {
        let transport = self.inner.connected_transport()?;
        Ok(with_deadline(self.inner.config.command_timeout(), transport.chats()).await?)
    }

    /// Address book as the transport lists it.
    pub async fn get_contacts(&self) -> Result<Vec<RawContact>, ClientError> {
        let transport = self.inner.connected_transport()?;
        Ok(with_deadline(self.inner.config.command_timeout(), transport.contacts()).await?)
    }

    /// Call `handler` for every message seen for the first time.
    pub fn on_message<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Message) -> Result<(), ObserverError> + Send + Sync + 'static,
    {
        self.inner
            .events
            .subscribe(EventKind::Message, move |event| match event {
                SessionEvent::Message(message) => handler(message),
                _ => Ok(()),
            })
    }

    pub fn remove_message_handler(&self, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    pub fn events(&self) -> &EventDispatcher {
        &self.inner.events
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.inner.store
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }
}

impl ClientInner {
    fn session(&self) -> RwLockWriteGuard<'_, Session> {
        self.session.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the session if `generation` still owns it.
    fn update<R>(&self, generation: u64, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        let mut session = self.session();
        if !session.state.is_current(generation) || session.transport.is_none() {
            return None;
        }
        Some(f(&mut session))
    }

    fn connected_transport(&self) -> Result<Arc<dyn Transport>, ClientError> {
        let session = self.session.read().unwrap_or_else(PoisonError::into_inner);
        match &session.transport {
            Some(transport) if session.state.is_connected() => Ok(transport.clone()),
            _ => Err(ClientError::NotConnected),
        }
    }

    fn publish(&self, event: SessionEvent) {
        self.events.dispatch(&event);
    }

    fn publish_state(&self) {
        let snapshot = self
            .session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .state
            .snapshot();
        self.publish(SessionEvent::StateChange(snapshot));
    }

    /// Log, remember and publish an error raised while handling an event.
    fn report_error(&self, message: String) {
        log::error!("{}", message);
        self.session().state.record_error(message.clone());
        self.publish(SessionEvent::Error { message });
    }

    fn persist_status(&self, status: ApiStatus) {
        if let Err(err) = self.store.append_status(status) {
            self.report_error(format!("failed to record API status: {err}"));
        }
    }

    fn fail_start(&self, generation: u64, err: &TransportError) {
        let failed = self
            .update(generation, |session| {
                session.transport = None;
                session.started_at = None;
                session.state.mark_disconnected(Some(err.to_string()));
            })
            .is_some();
        if !failed {
            return;
        }
        log::error!("session start failed: {}", err);
        self.persist_status(ApiStatus::offline(err.to_string(), Utc::now()));
        self.publish(SessionEvent::Error {
            message: err.to_string(),
        });
        self.publish_state();
    }

    fn on_qr(&self, generation: u64, code: String) {
        let accepted = self
            .update(generation, |session| {
                let accepted = session.state.set_qr_code(code.clone());
                if accepted {
                    session.pending_qr = Some(code.clone());
                }
                accepted
            })
            .unwrap_or(false);
        if !accepted {
            log::debug!("ignoring QR code outside of connecting state");
            return;
        }

        let record = QrCodeRecord::new(code.clone(), Utc::now(), self.config.qr_ttl());
        if let Err(err) = self.store.append_qr_code(record) {
            self.report_error(format!("failed to store QR code: {err}"));
        }
        self.publish(SessionEvent::Qr { code });
        self.publish_state();
    }

    fn on_authenticated(&self, generation: u64) {
        log::info!("session authenticated");
        // Restored sessions authenticate without a QR code of their own.
        let pending = self
            .update(generation, |session| session.pending_qr.take())
            .flatten();
        if let Some(code) = pending {
            if let Err(err) = self.store.mark_qr_scanned(&code, Utc::now()) {
                self.report_error(format!("failed to mark QR code scanned: {err}"));
            }
        }
        self.publish(SessionEvent::Authenticated);
    }

    fn on_auth_failure(&self, generation: u64, reason: String) {
        log::warn!("authentication failed: {}", reason);
        self.update(generation, |session| session.state.record_error(reason.clone()));
        self.publish(SessionEvent::AuthFailure { reason });
    }

    async fn on_ready(&self, generation: u64) {
        let transition = self.update(generation, |session| {
            let first = !session.state.is_connected();
            session.state.mark_connected().then(|| {
                (
                    first,
                    session.started_at.take(),
                    session.transport.clone(),
                )
            })
        });
        let Some((first, started_at, transport)) = transition.flatten() else {
            log::debug!("ignoring ready outside of an active session");
            return;
        };
        log::info!("session ready");

        let mut status = ApiStatus::online(Utc::now());
        if let Some(started_at) = started_at {
            status = status.with_response_time(started_at.elapsed().as_millis() as u64);
        }
        self.persist_status(status);
        self.publish_state();

        if let (true, Some(transport)) = (first, transport) {
            match self.sync.bulk_import(transport.as_ref()).await {
                Ok(summary) => log::info!(
                    "imported {} messages from {} chats ({} skipped, {} failed)",
                    summary.messages,
                    summary.chats,
                    summary.skipped_chats,
                    summary.failed_chats.len()
                ),
                Err(err) => self.report_error(format!("bulk import failed: {err}")),
            }
        }
        if !self.owns(generation) {
            log::debug!("session ended during bulk import; not publishing ready");
            return;
        }
        self.publish(SessionEvent::Ready);
    }

    fn on_disconnected(&self, generation: u64, reason: String) {
        let applied = self.update(generation, |session| {
            session.transport = None;
            session.started_at = None;
            session.state.mark_disconnected(Some(reason.clone()));
        });
        if applied.is_none() {
            return;
        }
        log::warn!("session disconnected: {}", reason);
        self.persist_status(ApiStatus::offline(reason.clone(), Utc::now()));
        self.publish(SessionEvent::Disconnected { reason });
        self.publish_state();
    }

    async fn on_message(&self, raw: RawMessage) {
        match self.sync.ingest(&raw).await {
            Ok(Some(ingested)) if ingested.inserted => {
                self.publish(SessionEvent::Message(ingested.message))
            }
            Ok(_) => {}
            Err(err) => self.report_error(format!("failed to ingest message {}: {err}", raw.id)),
        }
    }

    async fn on_ack(&self, raw: RawMessage, ack: i32) {
        match self.sync.ingest_ack(&raw, ack).await {
            Ok(Some(change)) => self.publish(SessionEvent::MessageStatus {
                chat_id: change.chat_id,
                message_id: change.message_id,
                status: change.status,
            }),
            Ok(None) => {}
            Err(err) => self.report_error(format!("failed to apply ack for {}: {err}", raw.id)),
        }
    }

    fn owns(&self, generation: u64) -> bool {
        let session = self.session.read().unwrap_or_else(PoisonError::into_inner);
        session.state.is_current(generation) && session.transport.is_some()
    }
}

#[async_trait]
impl TransportEventHandler for ClientInner {
    async fn handle_transport_event(&self, generation: u64, event: TransportEvent) {
        if !self.owns(generation) {
            log::debug!(
                "discarding {} event from stale generation {}",
                event.name(),
                generation
            );
            return;
        }

        match event {
            TransportEvent::Qr(code) => self.on_qr(generation, code),
            TransportEvent::Authenticated => self.on_authenticated(generation),
            TransportEvent::AuthFailure(reason) => self.on_auth_failure(generation, reason),
            TransportEvent::Ready => self.on_ready(generation).await,
            TransportEvent::Disconnected(reason) => self.on_disconnected(generation, reason),
            TransportEvent::Message(raw) => self.on_message(raw).await,
            TransportEvent::MessageAck(raw, ack) => self.on_ack(raw, ack).await,
        }
    }
}
