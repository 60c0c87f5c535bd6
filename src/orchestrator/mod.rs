//! Session orchestrator
//!
//! The control plane between a front end, a [`ModelGateway`] and a
//! [`SessionStore`]. It owns:
//!
//! - the active session pointer and the in-memory copy of every session it
//!   has loaded
//! - one turn slot per session (`Idle`, `Sending`, `Streaming`), at most one
//!   turn in flight per session
//! - the per-session save queue every store write goes through
//! - the cancellation tokens for initialization and turns
//! - the scroll-follow flag captured at the start of each turn
//!
//! Session state lives behind a short-lived mutex that is never held across
//! an await. Snapshots are enqueued for saving while that lock is held, so
//! queue order always matches the order the in-memory state changed in.

use crate::config::Config;
use crate::error::{PalaverError, Result};
use crate::gateway::{ChatTurnRequest, ModelGateway};
use crate::session::{
    derive_title, new_session_id, now_millis, ChatSession, Message, MessageStatus, SaveReceipt,
    SessionSummary, DEFAULT_TITLE,
};
use crate::storage::{validate_session_id, SessionStore, StoreError};
use crate::telemetry::TurnMetrics;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub mod events;
pub mod follow;
pub mod save_queue;
pub mod turn;

pub use events::OrchestratorEvent;
pub use follow::{FollowState, PinnedViewport, Viewport};
pub use save_queue::{SaveQueue, Ticket};
pub use turn::{SendOutcome, TurnHandle, TurnOutcome, TurnPhase};

/// Tunables for an orchestrator instance
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Capacity of the event broadcast channel
    pub event_capacity: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            event_capacity: 256,
        }
    }
}

impl From<&Config> for OrchestratorSettings {
    fn from(config: &Config) -> Self {
        Self {
            event_capacity: config.chat.event_capacity,
        }
    }
}

/// In-memory state for one loaded session
#[derive(Debug)]
struct SessionSlot {
    session: ChatSession,
    phase: TurnPhase,
    turn: Option<CancellationToken>,
    in_flight: Option<Message>,
    follow: FollowState,
}

impl SessionSlot {
    fn new(session: ChatSession, follow: FollowState) -> Self {
        Self {
            session,
            phase: TurnPhase::Idle,
            turn: None,
            in_flight: None,
            follow,
        }
    }

    /// Session as a reader should see it, including any partial reply
    fn view(&self) -> ChatSession {
        let mut session = self.session.clone();
        if let Some(message) = &self.in_flight {
            session.messages.push(message.clone());
        }
        session
    }

    fn touch(&mut self) {
        self.session.updated_at = now_millis().max(self.session.created_at);
    }
}

#[derive(Debug, Default)]
struct State {
    active: Option<String>,
    slots: HashMap<String, SessionSlot>,
}

struct Inner {
    store: Arc<dyn SessionStore>,
    gateway: Arc<dyn ModelGateway>,
    viewport: Arc<dyn Viewport>,
    state: Mutex<State>,
    saves: SaveQueue,
    events: broadcast::Sender<OrchestratorEvent>,
    alive: AtomicBool,
    root: CancellationToken,
    turns: TaskTracker,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: OrchestratorEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Whether work started under `token` may still mutate state
    fn is_live(&self, token: &CancellationToken) -> bool {
        self.alive.load(Ordering::SeqCst) && !token.is_cancelled()
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(shut_down())
        }
    }

    /// State lock, refused once shutdown has begun
    ///
    /// `shutdown` flips `alive` under this same lock, so nothing done while
    /// holding the guard can land after shutdown started.
    fn lock_live(&self) -> Result<MutexGuard<'_, State>> {
        let state = self.lock();
        if self.alive.load(Ordering::SeqCst) {
            Ok(state)
        } else {
            Err(shut_down())
        }
    }

    /// Enqueue a snapshot of `slot`; call with the state lock held
    fn enqueue_snapshot(&self, slot: &SessionSlot) -> Ticket<SaveReceipt> {
        self.saves.enqueue_save(
            &slot.session.id,
            slot.session.title.clone(),
            slot.session.messages.clone(),
        )
    }

    fn on_delta(&self, session_id: &str, text: &str) {
        let follow = {
            let mut state = self.lock();
            let Some(slot) = state.slots.get_mut(session_id) else {
                return;
            };
            if slot.phase == TurnPhase::Sending {
                slot.phase = TurnPhase::Streaming;
            }
            if let Some(message) = slot.in_flight.as_mut() {
                message.content.push_str(text);
            }
            slot.follow.is_following()
        };

        self.emit(OrchestratorEvent::Delta {
            session_id: session_id.to_string(),
            text: text.to_string(),
            follow,
        });
    }

    async fn run_turn(
        self: Arc<Self>,
        session_id: String,
        message_id: String,
        request: ChatTurnRequest,
        token: CancellationToken,
        done: oneshot::Sender<TurnOutcome>,
    ) {
        let metrics = TurnMetrics::new(request.model_id.as_str());
        let stream = self.gateway.stream(request, token.clone());

        let mut accumulator = turn::TurnAccumulator::default();
        let outcome = turn::drive(stream, &token, &mut accumulator, |text| {
            self.on_delta(&session_id, text)
        })
        .await;
        metrics.record_outcome(outcome.label(), accumulator.deltas());

        match &outcome {
            TurnOutcome::Errored(reason) => {
                tracing::warn!(session_id = %session_id, reason = %reason, "Turn errored")
            }
            other => tracing::info!(
                session_id = %session_id,
                outcome = other.label(),
                deltas = accumulator.deltas(),
                elapsed_ms = metrics.elapsed().as_millis() as u64,
                "Turn finished"
            ),
        }

        self.finish_turn(&session_id, &message_id, accumulator, &outcome);
        let _ = done.send(outcome);
    }

    fn finish_turn(
        &self,
        session_id: &str,
        message_id: &str,
        accumulator: turn::TurnAccumulator,
        outcome: &TurnOutcome,
    ) {
        {
            let mut state = self.lock();
            let slot = state.slots.get_mut(session_id).filter(|slot| {
                slot.in_flight.as_ref().map(|m| m.id.as_str()) == Some(message_id)
            });
            match slot {
                Some(slot) => {
                    if let Some(message) = slot.in_flight.take() {
                        slot.session
                            .messages
                            .push(accumulator.finalize(message, outcome));
                    }
                    slot.touch();
                    // Enqueue before going Idle so a follow-up turn's save lands after this one
                    let _ = self.enqueue_snapshot(slot);
                    slot.phase = TurnPhase::Idle;
                    slot.turn = None;
                }
                None => {
                    tracing::debug!(session_id = %session_id, "Session deleted during turn, dropping result");
                }
            }
        }

        self.emit(OrchestratorEvent::TurnFinished {
            session_id: session_id.to_string(),
            outcome: outcome.clone(),
        });
    }

    /// Most recent stored session, or a freshly created one
    ///
    /// The flag is `true` when the session was created here and still needs
    /// its first save. `None` once `token` is cancelled.
    async fn load_replacement(&self, token: &CancellationToken) -> Option<(ChatSession, bool)> {
        let summaries = tokio::select! {
            biased;
            _ = token.cancelled() => return None,
            listed = self.store.list() => listed,
        };

        let summaries = summaries.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to list sessions");
            Vec::new()
        });

        for summary in summaries {
            if let Some(session) = self.cached(&summary.id) {
                return Some((session, false));
            }
            let loaded = tokio::select! {
                biased;
                _ = token.cancelled() => return None,
                loaded = self.store.get(&summary.id) => loaded,
            };
            match loaded {
                Ok(session) => return Some((session, false)),
                Err(e) => {
                    tracing::warn!(session_id = %summary.id, error = %e, "Skipping unreadable session")
                }
            }
        }

        if !self.is_live(token) {
            return None;
        }
        Some((ChatSession::empty(new_session_id()), true))
    }

    fn cached(&self, id: &str) -> Option<ChatSession> {
        self.lock().slots.get(id).map(SessionSlot::view)
    }

    /// Insert `session` if not already loaded and make it active
    ///
    /// New sessions are enqueued for their first save. Returns `None`
    /// without touching state when `token` was cancelled or shutdown has
    /// begun.
    fn activate(
        &self,
        session: ChatSession,
        persist: bool,
        token: &CancellationToken,
    ) -> Option<String> {
        let id = session.id.clone();
        let follow = FollowState::capture(self.viewport.is_at_bottom(&id));
        {
            let mut state = self.lock();
            if !self.is_live(token) {
                tracing::debug!(session_id = %id, "Activation after shutdown, discarding");
                return None;
            }
            let slot = state
                .slots
                .entry(id.clone())
                .or_insert_with(|| SessionSlot::new(session, follow));
            slot.follow = follow;
            if persist {
                let _ = self.enqueue_snapshot(slot);
            }
            state.active = Some(id.clone());
        }

        tracing::debug!(session_id = %id, "Active session changed");
        self.emit(OrchestratorEvent::ActiveSessionChanged {
            session_id: id.clone(),
        });
        Some(id)
    }
}

fn shut_down() -> anyhow::Error {
    PalaverError::Validation("Orchestrator has been shut down".to_string()).into()
}

/// Control plane for a set of chat sessions
///
/// Cheap to clone; clones share the same state.
///
/// # Examples
///
/// ```no_run
/// use palaver::config::OllamaConfig;
/// use palaver::gateway::OllamaGateway;
/// use palaver::orchestrator::{OrchestratorSettings, PinnedViewport, SessionOrchestrator};
/// use palaver::storage::MemoryStore;
/// use std::sync::Arc;
///
/// # async fn example() -> anyhow::Result<()> {
/// let orchestrator = SessionOrchestrator::new(
///     Arc::new(MemoryStore::new()),
///     Arc::new(OllamaGateway::new(&OllamaConfig::default())?),
///     Arc::new(PinnedViewport),
///     OrchestratorSettings::default(),
/// );
/// orchestrator.initialize(None).await?;
///
/// if let Some(turn) = orchestrator.send_turn("Hello!", "llama3.2:latest")?.into_handle() {
///     println!("{:?}", turn.wait().await);
/// }
/// orchestrator.shutdown().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SessionOrchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOrchestrator")
            .field("store", &self.inner.store.backend_name())
            .field("active", &self.inner.lock().active)
            .field("alive", &self.inner.alive.load(Ordering::SeqCst))
            .finish()
    }
}

impl SessionOrchestrator {
    pub fn new(
        store: Arc<dyn SessionStore>,
        gateway: Arc<dyn ModelGateway>,
        viewport: Arc<dyn Viewport>,
        settings: OrchestratorSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(settings.event_capacity.max(1));
        let saves = SaveQueue::new(Arc::clone(&store), events.clone());

        Self {
            inner: Arc::new(Inner {
                store,
                gateway,
                viewport,
                state: Mutex::new(State::default()),
                saves,
                events,
                alive: AtomicBool::new(true),
                root: CancellationToken::new(),
                turns: TaskTracker::new(),
            }),
        }
    }

    /// Restore the last active session, or create one
    ///
    /// Loads `preferred` if it exists, otherwise the most recently updated
    /// session, otherwise creates a new empty session. Returns the active
    /// id, or `None` if the orchestrator was shut down before the sequence
    /// finished, in which case no state was touched.
    pub async fn initialize(&self, preferred: Option<&str>) -> Result<Option<String>> {
        let inner = &self.inner;
        let token = inner.root.child_token();
        inner.ensure_alive()?;

        let mut restored = None;
        if let Some(id) = preferred {
            let loaded = match validate_session_id(id) {
                Ok(()) => tokio::select! {
                    biased;
                    _ = token.cancelled() => return Ok(None),
                    loaded = inner.store.get(id) => loaded,
                },
                Err(e) => Err(e),
            };
            match loaded {
                Ok(session) => restored = Some((session, false)),
                Err(e) => {
                    tracing::warn!(session_id = %id, error = %e, "Preferred session unavailable")
                }
            }
        }

        let (session, is_new) = match restored {
            Some(found) => found,
            None => match inner.load_replacement(&token).await {
                Some(found) => found,
                None => return Ok(None),
            },
        };

        let Some(id) = inner.activate(session, is_new, &token) else {
            return Ok(None);
        };
        inner.emit(OrchestratorEvent::SessionsChanged);
        tracing::info!(session_id = %id, "Orchestrator initialized");
        Ok(Some(id))
    }

    /// Cancel every turn, drain the save queue and stop accepting work
    ///
    /// In-flight initialization is abandoned. Partial content of cancelled
    /// turns is saved before this returns. Safe to call more than once.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        let first = {
            let _state = inner.lock();
            inner.alive.swap(false, Ordering::SeqCst)
        };
        if !first {
            return;
        }
        tracing::debug!("Shutting down orchestrator");

        inner.root.cancel();
        inner.turns.close();
        inner.turns.wait().await;
        inner.saves.flush().await;
        inner.saves.close();
    }

    /// Wait for every write queued so far to settle
    pub async fn flush_saves(&self) {
        self.inner.saves.flush().await;
    }

    /// Instance-scoped event feed
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.inner.events.subscribe()
    }

    /// Stored sessions, most recently updated first
    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        Ok(self.inner.store.list().await.map_err(PalaverError::from)?)
    }

    pub fn active_session_id(&self) -> Option<String> {
        self.inner.lock().active.clone()
    }

    /// Snapshot of the active session, including a partial reply in flight
    pub fn active_session(&self) -> Option<ChatSession> {
        let state = self.inner.lock();
        let id = state.active.as_ref()?;
        state.slots.get(id).map(SessionSlot::view)
    }

    /// Snapshot of any loaded session
    pub fn session(&self, id: &str) -> Option<ChatSession> {
        self.inner.cached(id)
    }

    /// Create an empty session, persist it and make it active
    pub async fn new_session(&self) -> Result<String> {
        self.inner.ensure_alive()?;
        let session = ChatSession::empty(new_session_id());
        let id = session.id.clone();
        let follow = FollowState::capture(self.inner.viewport.is_at_bottom(&id));

        let ticket = {
            let mut state = self.inner.lock_live()?;
            let slot = state
                .slots
                .entry(id.clone())
                .or_insert_with(|| SessionSlot::new(session, follow));
            let ticket = self.inner.enqueue_snapshot(slot);
            state.active = Some(id.clone());
            ticket
        };

        match ticket.settled().await {
            Ok(receipt) => {
                if let Some(slot) = self.inner.lock().slots.get_mut(&id) {
                    slot.session.apply_receipt(&receipt);
                }
            }
            Err(e) => tracing::warn!(session_id = %id, error = %e, "New session not yet persisted"),
        }

        tracing::info!(session_id = %id, "Created session");
        self.inner.emit(OrchestratorEvent::ActiveSessionChanged {
            session_id: id.clone(),
        });
        Ok(id)
    }

    /// Make `id` the active session, loading it from the store if needed
    ///
    /// The follow flag is recaptured for the switched-to session.
    ///
    /// # Errors
    ///
    /// `NotFound` if the session does not exist, `Validation` for a
    /// malformed id.
    pub async fn switch_session(&self, id: &str) -> Result<()> {
        self.inner.ensure_alive()?;
        validate_session_id(id).map_err(PalaverError::from)?;

        let session = match self.inner.cached(id) {
            Some(session) => session,
            None => self.inner.store.get(id).await.map_err(PalaverError::from)?,
        };

        self.inner
            .activate(session, false, &self.inner.root)
            .ok_or_else(shut_down)?;
        Ok(())
    }

    /// Change a session's title and queue the save
    pub async fn rename_session(&self, id: &str, title: &str) -> Result<()> {
        self.inner.ensure_alive()?;
        let title = title.trim();
        if title.is_empty() {
            return Err(PalaverError::Validation("Title cannot be empty".to_string()).into());
        }
        validate_session_id(id).map_err(PalaverError::from)?;

        if self.inner.cached(id).is_none() {
            let session = self.inner.store.get(id).await.map_err(PalaverError::from)?;
            let follow = FollowState::capture(self.inner.viewport.is_at_bottom(id));
            self.inner
                .lock_live()?
                .slots
                .entry(id.to_string())
                .or_insert_with(|| SessionSlot::new(session, follow));
        }

        {
            let mut state = self.inner.lock_live()?;
            let slot = state
                .slots
                .get_mut(id)
                .ok_or_else(|| PalaverError::NotFound(id.to_string()))?;
            slot.session.title = title.to_string();
            slot.touch();
            let _ = self.inner.enqueue_snapshot(slot);
        }

        tracing::info!(session_id = %id, title = %title, "Renamed session");
        Ok(())
    }

    /// Delete a session, cancelling any turn it has in flight
    ///
    /// If it was the active session, the most recently updated survivor
    /// becomes active, or a new session is created when none remain.
    ///
    /// # Errors
    ///
    /// `NotFound` if the session neither exists in the store nor is loaded.
    pub async fn delete_session(&self, id: &str) -> Result<()> {
        let inner = &self.inner;
        inner.ensure_alive()?;
        validate_session_id(id).map_err(PalaverError::from)?;

        let (removed, was_active, ticket) = {
            let mut state = inner.lock_live()?;
            let removed = state.slots.remove(id);
            if let Some(token) = removed.as_ref().and_then(|slot| slot.turn.as_ref()) {
                token.cancel();
            }
            // No active session until a replacement is chosen
            let was_active = state.active.as_deref() == Some(id);
            if was_active {
                state.active = None;
            }
            (removed, was_active, inner.saves.enqueue_delete(id))
        };

        match ticket.settled().await {
            Ok(()) => {}
            Err(StoreError::NotFound(_)) if removed.is_some() => {
                tracing::debug!(session_id = %id, "Deleted session that was never persisted");
            }
            Err(e) => {
                if let Some(mut slot) = removed {
                    // Keep the session usable; the cancelled turn's result no longer applies
                    slot.phase = TurnPhase::Idle;
                    slot.turn = None;
                    if let Some(partial) = slot.in_flight.take() {
                        slot.session
                            .messages
                            .push(partial.with_status(MessageStatus::Stopped));
                    }
                    let mut state = inner.lock();
                    state.slots.entry(id.to_string()).or_insert(slot);
                    if was_active && state.active.is_none() {
                        state.active = Some(id.to_string());
                    }
                }
                return Err(PalaverError::from(e).into());
            }
        }

        tracing::info!(session_id = %id, "Deleted session");
        inner.emit(OrchestratorEvent::SessionsChanged);

        if was_active {
            let token = inner.root.child_token();
            if let Some((replacement, is_new)) = inner.load_replacement(&token).await {
                inner.activate(replacement, is_new, &token);
            }
        }
        Ok(())
    }

    /// Start a turn on the active session
    ///
    /// Appends the user message, auto-titles a still-default session from
    /// its first user message, captures the scroll-follow flag and starts
    /// streaming. Returns [`SendOutcome::Rejected`] without side effects
    /// when the session already has a turn in flight.
    ///
    /// # Errors
    ///
    /// `Validation` for empty input, a missing model id, no active session,
    /// or an orchestrator that has been shut down.
    pub fn send_turn(&self, input: &str, model_id: &str) -> Result<SendOutcome> {
        let inner = &self.inner;
        let input = input.trim();
        if input.is_empty() {
            return Err(PalaverError::Validation("Message cannot be empty".to_string()).into());
        }
        if model_id.trim().is_empty() {
            return Err(PalaverError::Validation("A model id is required".to_string()).into());
        }
        inner.ensure_alive()?;

        let session_id = self
            .active_session_id()
            .ok_or_else(|| PalaverError::Validation("No active session".to_string()))?;
        let at_bottom = inner.viewport.is_at_bottom(&session_id);

        let (request, token, message_id, follow) = {
            let mut state = inner.lock_live()?;
            let slot = state
                .slots
                .get_mut(&session_id)
                .ok_or_else(|| PalaverError::NotFound(session_id.clone()))?;

            if slot.phase.is_active() {
                tracing::debug!(session_id = %session_id, phase = %slot.phase, "Rejecting send during active turn");
                return Ok(SendOutcome::Rejected);
            }

            if slot.session.title == DEFAULT_TITLE && !slot.session.has_user_message() {
                if let Some(title) = derive_title(input) {
                    tracing::debug!(session_id = %session_id, title = %title, "Auto-titled session");
                    slot.session.title = title;
                }
            }

            slot.session.messages.push(Message::user(input, model_id));
            slot.touch();

            let request = ChatTurnRequest::from_history(
                model_id,
                &slot
                    .session
                    .messages
                    .iter()
                    .filter(|m| m.status != MessageStatus::Failed)
                    .cloned()
                    .collect::<Vec<_>>(),
            );

            let token = inner.root.child_token();
            let reply = Message::assistant("", model_id);
            let message_id = reply.id.clone();
            slot.follow = FollowState::capture(at_bottom);
            slot.phase = TurnPhase::Sending;
            slot.turn = Some(token.clone());
            slot.in_flight = Some(reply);
            (request, token, message_id, slot.follow.is_following())
        };

        tracing::info!(session_id = %session_id, model = %model_id, follow, "Turn started");
        inner.emit(OrchestratorEvent::TurnStarted {
            session_id: session_id.clone(),
            message_id: message_id.clone(),
            follow,
        });

        let (done, outcome) = oneshot::channel();
        inner.turns.spawn(Arc::clone(inner).run_turn(
            session_id.clone(),
            message_id.clone(),
            request,
            token,
            done,
        ));

        Ok(SendOutcome::Started(TurnHandle::new(
            session_id, message_id, outcome,
        )))
    }

    /// Cancel the turn in flight for `session_id`; returns whether one was
    pub fn cancel_turn(&self, session_id: &str) -> bool {
        let state = self.inner.lock();
        match state.slots.get(session_id).and_then(|slot| slot.turn.as_ref()) {
            Some(token) => {
                tracing::debug!(session_id = %session_id, "Cancelling turn");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Report an explicit user scroll in `session_id`'s view
    pub fn record_user_scroll(&self, session_id: &str) {
        let mut state = self.inner.lock();
        if let Some(slot) = state.slots.get_mut(session_id) {
            let phase = slot.phase;
            if slot.follow.user_scrolled(phase) {
                tracing::debug!(session_id = %session_id, "Stopped following after user scroll");
            }
        }
    }

    pub fn is_following(&self, session_id: &str) -> bool {
        self.inner
            .lock()
            .slots
            .get(session_id)
            .map(|slot| slot.follow.is_following())
            .unwrap_or(false)
    }

    /// Phase of `session_id`'s turn slot, `None` if the session is not loaded
    pub fn turn_phase(&self, session_id: &str) -> Option<TurnPhase> {
        self.inner.lock().slots.get(session_id).map(|slot| slot.phase)
    }
}
