//! Update scheduler: cadence and merge orchestration
//!
//! Buffers incoming transcript fragments, decides when to call the reasoning
//! services, enforces single-flight execution, requeues consumed text when a
//! call fails and applies every successful result to the structure store.
//!
//! All mutable pipeline state lives inside one task. Handles talk to it over
//! a command channel and network calls run in spawned tasks that report back
//! through the same channel, so fragments, ticks and call results are
//! applied strictly in arrival order and no state is ever shared across
//! threads.

pub(crate) mod backend;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::error::UpdateError;
use crate::session::{SessionRecord, SessionStore};
use crate::settings::InterpretationLevel;
use crate::structure::store::StructureStore;
use crate::structure::{GraphStructure, StructureMode, StructureState, TreeStructure};
use crate::transcript::{self, PendingBuffer, TranscriptFragment, TranscriptLog};
use backend::UpdateBackend;

/// Cadence for incremental update ticks.
pub(crate) const TICK_INTERVAL: Duration = Duration::from_secs(5);

/// Every Nth successful update is escalated to a full regeneration to
/// correct drift that incremental updates accumulate.
pub(crate) const FULL_REGEN_EVERY: u32 = 10;

/// Every Nth successful update triggers an autosave and a snapshot event.
pub(crate) const SNAPSHOT_EVERY: u32 = 2;

/// Scheduler configuration, resolved by the embedder and passed in rather
/// than read from ambient settings, so it can be swapped mid-session.
#[derive(Debug, Clone)]
pub(crate) struct SchedulerSettings {
    pub interpretation_level: InterpretationLevel,
    pub tick_interval: Duration,
    /// Character budget for full-regeneration payloads
    pub max_context_chars: usize,
    pub full_regen_every: u32,
    pub snapshot_every: u32,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        SchedulerSettings {
            interpretation_level: InterpretationLevel::default(),
            tick_interval: TICK_INTERVAL,
            max_context_chars: transcript::MAX_CONTEXT_CHARS,
            full_regen_every: FULL_REGEN_EVERY,
            snapshot_every: SNAPSHOT_EVERY,
        }
    }
}

/// Events broadcast to renderers and downstream consumers.
#[derive(Debug, Clone)]
pub(crate) enum SchedulerEvent {
    /// A structuring or extraction call was dispatched.
    ProcessingStarted,
    /// The outstanding call finished, successfully or not.
    ProcessingEnded,
    /// A merge was applied. The listed ids are new or relabeled.
    StructureUpdated {
        version: u64,
        changed_ids: BTreeSet<String>,
    },
    /// A call failed and its consumed text was returned to the buffer.
    UpdateFailed { message: String },
    /// Reduced-cadence transcript and structure pair for autosave and
    /// insight consumers.
    SnapshotReady {
        version: u64,
        transcript: String,
        structure: StructureState,
    },
}

/// Scheduler state observable from outside.
#[derive(Debug, Clone)]
pub(crate) struct SchedulerStatus {
    pub processing: bool,
    pub version: u64,
    pub successful_updates: u32,
    pub pending_fragments: usize,
    pub mode: StructureMode,
    pub last_error: Option<String>,
}

/// Which request shape the next dispatch uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallKind {
    Incremental,
    FullRegeneration,
    Ingest,
}

/// Result payload of a finished call.
enum MergeInput {
    Tree(TreeStructure),
    Graph(GraphStructure),
}

/// What a dispatched call consumed and what came back.
struct CallOutcome {
    kind: CallKind,
    consumed: Vec<TranscriptFragment>,
    result: Result<MergeInput, UpdateError>,
}

enum Command {
    Enqueue(TranscriptFragment),
    Boundary,
    Tick,
    ForceFullRegeneration,
    UpdateSettings(SchedulerSettings),
    DismissError,
    NewSession {
        session_id: String,
        session_title: String,
    },
    Status(oneshot::Sender<SchedulerStatus>),
    Structure(oneshot::Sender<StructureState>),
    Transcript(oneshot::Sender<String>),
    ActiveChanges(oneshot::Sender<BTreeSet<String>>),
    Stop(oneshot::Sender<SessionRecord>),
    CallFinished(Box<CallOutcome>),
}

/// Handle for driving a spawned scheduler task. Cheap to clone; the task
/// stops when asked to or when every handle is dropped.
#[derive(Clone)]
pub(crate) struct SchedulerHandle {
    tx: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<SchedulerEvent>,
}

impl SchedulerHandle {
    /// Add a finalized fragment to the pending buffer and the session log.
    pub(crate) fn enqueue(&self, fragment: TranscriptFragment) {
        let _ = self.tx.send(Command::Enqueue(fragment));
    }

    /// Signal a semantic boundary (speaker change, long pause). Triggers an
    /// update ahead of the next cadence tick.
    pub(crate) fn on_boundary(&self) {
        let _ = self.tx.send(Command::Boundary);
    }

    /// Trigger one cadence tick. The scheduler also ticks itself on its
    /// configured interval; this exists for embedders with their own timers.
    pub(crate) fn tick(&self) {
        let _ = self.tx.send(Command::Tick);
    }

    /// Escalate the next update to a full regeneration. One-shot.
    pub(crate) fn force_full_regeneration(&self) {
        let _ = self.tx.send(Command::ForceFullRegeneration);
    }

    /// Swap scheduler settings mid-session. Takes effect from the next tick.
    pub(crate) fn update_settings(&self, settings: SchedulerSettings) {
        let _ = self.tx.send(Command::UpdateSettings(settings));
    }

    /// Clear the retained last error.
    pub(crate) fn dismiss_error(&self) {
        let _ = self.tx.send(Command::DismissError);
    }

    /// Persist the current session and start a fresh one under the given
    /// identity. Buffers, structure and counters restart from zero; the
    /// result of a call still in flight belongs to the old session and is
    /// dropped instead of merged.
    pub(crate) fn start_new_session(&self, session_id: String, session_title: String) {
        let _ = self.tx.send(Command::NewSession {
            session_id,
            session_title,
        });
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.events.subscribe()
    }

    /// Current scheduler status, or None when the task is gone.
    pub(crate) async fn status(&self) -> Option<SchedulerStatus> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Command::Status(reply)).ok()?;
        rx.await.ok()
    }

    /// Current authoritative structure.
    pub(crate) async fn structure(&self) -> Option<StructureState> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Command::Structure(reply)).ok()?;
        rx.await.ok()
    }

    /// Full session transcript so far.
    pub(crate) async fn transcript(&self) -> Option<String> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Command::Transcript(reply)).ok()?;
        rx.await.ok()
    }

    /// Ids still inside the highlight window of the latest merge.
    pub(crate) async fn active_changes(&self) -> Option<BTreeSet<String>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Command::ActiveChanges(reply)).ok()?;
        rx.await.ok()
    }

    /// Stop the scheduler: cancel the cadence timer, let any outstanding
    /// call finish and apply, flush remaining buffered text with one last
    /// update, persist the session and return the final record.
    pub(crate) async fn stop(self) -> Option<SessionRecord> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Command::Stop(reply)).ok()?;
        rx.await.ok()
    }
}

/// The scheduler task and the state it owns.
pub(crate) struct UpdateScheduler<B: UpdateBackend> {
    backend: Arc<B>,
    session_store: Box<dyn SessionStore>,
    session_id: String,
    session_title: String,
    created_at: DateTime<Utc>,
    settings: SchedulerSettings,
    mode: StructureMode,
    pending: PendingBuffer,
    log: TranscriptLog,
    store: StructureStore,
    in_flight: bool,
    /// The outstanding call was dispatched before a session restart, so its
    /// result must not reach the fresh store.
    discard_in_flight: bool,
    force_full: bool,
    successful_updates: u32,
    last_error: Option<UpdateError>,
    events: broadcast::Sender<SchedulerEvent>,
    tx: mpsc::UnboundedSender<Command>,
}

/// Everything a dispatch needs, taken from scheduler state up front so the
/// network call can run detached.
struct PreparedCall {
    kind: CallKind,
    consumed: Vec<TranscriptFragment>,
    text: String,
    current: Option<TreeStructure>,
}

/// Execute one backend call. Shared by detached dispatches and the final
/// flush on stop.
async fn run_call<B: UpdateBackend>(
    backend: &B,
    session_id: String,
    level: InterpretationLevel,
    kind: CallKind,
    text: String,
    current: Option<TreeStructure>,
) -> Result<MergeInput, UpdateError> {
    match kind {
        CallKind::Ingest => backend.ingest(session_id, text).await.map(MergeInput::Graph),
        CallKind::FullRegeneration => backend
            .full_regeneration(text, level)
            .await
            .map(MergeInput::Tree),
        CallKind::Incremental => match current {
            Some(tree) => backend
                .incremental_update(tree, text, level)
                .await
                .map(MergeInput::Tree),
            None => backend
                .full_regeneration(text, level)
                .await
                .map(MergeInput::Tree),
        },
    }
}

impl<B: UpdateBackend> UpdateScheduler<B> {
    /// Spawn the scheduler task for a new session and return its handle.
    pub(crate) fn spawn(
        backend: Arc<B>,
        session_store: Box<dyn SessionStore>,
        mode: StructureMode,
        settings: SchedulerSettings,
        session_id: String,
        session_title: String,
    ) -> SchedulerHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(64);

        let scheduler = UpdateScheduler {
            backend,
            session_store,
            session_id,
            session_title,
            created_at: Utc::now(),
            settings,
            mode,
            pending: PendingBuffer::default(),
            log: TranscriptLog::default(),
            store: StructureStore::new(),
            in_flight: false,
            discard_in_flight: false,
            force_full: false,
            successful_updates: 0,
            last_error: None,
            events: events.clone(),
            tx: tx.clone(),
        };
        tokio::spawn(scheduler.run(rx));

        SchedulerHandle { tx, events }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        info!(
            session_id = %self.session_id,
            mode = %self.mode,
            tick_secs = self.settings.tick_interval.as_secs_f64(),
            "Update scheduler started"
        );
        let mut interval = tokio::time::interval(self.settings.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => self.try_dispatch(),
                command = rx.recv() => match command {
                    Some(Command::Stop(reply)) => {
                        self.finish(&mut rx, reply).await;
                        break;
                    }
                    Some(Command::UpdateSettings(settings)) => {
                        if settings.tick_interval != self.settings.tick_interval {
                            interval = tokio::time::interval(settings.tick_interval);
                            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                        }
                        info!(
                            level = %settings.interpretation_level,
                            tick_secs = settings.tick_interval.as_secs_f64(),
                            "Scheduler settings updated"
                        );
                        self.settings = settings;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        info!(session_id = %self.session_id, "All scheduler handles dropped, stopping");
                        break;
                    }
                },
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Enqueue(fragment) => {
                self.log.push(&fragment);
                self.pending.push(fragment);
            }
            Command::Boundary | Command::Tick => self.try_dispatch(),
            Command::ForceFullRegeneration => {
                self.force_full = true;
            }
            Command::DismissError => {
                self.last_error = None;
            }
            Command::NewSession {
                session_id,
                session_title,
            } => self.start_session(session_id, session_title),
            Command::Status(reply) => {
                let _ = reply.send(self.status());
            }
            Command::Structure(reply) => {
                let _ = reply.send(self.store.state().clone());
            }
            Command::Transcript(reply) => {
                let _ = reply.send(self.log.text());
            }
            Command::ActiveChanges(reply) => {
                let ids = self
                    .store
                    .active_changes()
                    .map(|changes| changes.ids().clone())
                    .unwrap_or_default();
                let _ = reply.send(ids);
            }
            Command::CallFinished(outcome) => self.apply_outcome(*outcome),
            // Handled by the run loop before delegation
            Command::UpdateSettings(_) | Command::Stop(_) => {}
        }
    }

    fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            processing: self.in_flight,
            version: self.store.version(),
            successful_updates: self.successful_updates,
            pending_fragments: self.pending.len(),
            mode: self.mode,
            last_error: self.last_error.as_ref().map(UpdateError::to_string),
        }
    }

    /// Which request shape the next dispatch takes. The first tree update of
    /// a session is always a full regeneration because there is no structure
    /// to extend yet.
    fn next_call_kind(&self) -> CallKind {
        if self.mode == StructureMode::Graph {
            return CallKind::Ingest;
        }
        if self.force_full || self.store.state().as_tree().is_none() {
            return CallKind::FullRegeneration;
        }
        if (self.successful_updates + 1) % self.settings.full_regen_every == 0 {
            return CallKind::FullRegeneration;
        }
        CallKind::Incremental
    }

    fn prepare_call(&mut self) -> PreparedCall {
        let consumed = self.pending.take_all();
        let kind = self.next_call_kind();
        self.force_full = false;

        let text = match kind {
            CallKind::FullRegeneration => {
                // The tail window must always cover the consumed fragments,
                // whatever the configured budget.
                let span = transcript::fragments_char_span(&consumed);
                self.log.tail(self.settings.max_context_chars.max(span))
            }
            _ => transcript::fragments_text(&consumed),
        };
        let current = match kind {
            CallKind::Incremental => self.store.state().as_tree().cloned(),
            _ => None,
        };

        PreparedCall {
            kind,
            consumed,
            text,
            current,
        }
    }

    /// Dispatch an update if there is pending text, no call is outstanding
    /// and a backend is configured. Cadence ticks land here, so an extra
    /// tick during a slow call is a no-op.
    fn try_dispatch(&mut self) {
        if self.in_flight || self.pending.is_empty() || !self.backend.is_configured() {
            return;
        }

        let PreparedCall {
            kind,
            consumed,
            text,
            current,
        } = self.prepare_call();
        self.in_flight = true;
        self.emit(SchedulerEvent::ProcessingStarted);
        info!(
            kind = ?kind,
            fragments = consumed.len(),
            chars = text.chars().count(),
            log_chars = self.log.char_count(),
            "Dispatching update call"
        );

        let backend = Arc::clone(&self.backend);
        let tx = self.tx.clone();
        let session_id = self.session_id.clone();
        let level = self.settings.interpretation_level;
        tokio::spawn(async move {
            let result = run_call(backend.as_ref(), session_id, level, kind, text, current).await;
            let _ = tx.send(Command::CallFinished(Box::new(CallOutcome {
                kind,
                consumed,
                result,
            })));
        });
    }

    fn apply_outcome(&mut self, outcome: CallOutcome) {
        self.in_flight = false;
        if self.discard_in_flight {
            self.discard_in_flight = false;
            info!(
                kind = ?outcome.kind,
                "Dropping result dispatched before the session restart"
            );
            self.emit(SchedulerEvent::ProcessingEnded);
            return;
        }
        match outcome.result {
            Ok(MergeInput::Tree(tree)) => {
                let changed = self.store.set_tree(tree);
                self.finish_success(changed);
            }
            Ok(MergeInput::Graph(graph)) => {
                let changed = self.store.set_graph(graph);
                self.finish_success(changed);
            }
            Err(error) => {
                warn!(
                    error = %error,
                    kind = ?outcome.kind,
                    fragments = outcome.consumed.len(),
                    "Update call failed, requeueing consumed text"
                );
                self.pending.restore(outcome.consumed);
                if self.mode == StructureMode::Graph
                    && matches!(error, UpdateError::RemoteUnreachable(_))
                {
                    warn!("Extraction service unreachable, falling back to tree structuring");
                    self.mode = StructureMode::Tree;
                    self.force_full = true;
                }
                self.emit(SchedulerEvent::UpdateFailed {
                    message: error.to_string(),
                });
                self.last_error = Some(error);
            }
        }
        self.emit(SchedulerEvent::ProcessingEnded);
    }

    fn finish_success(&mut self, changed: BTreeSet<String>) {
        self.successful_updates += 1;
        let version = self.store.version();
        info!(
            version,
            changed = changed.len(),
            updates = self.successful_updates,
            "Merged structure update"
        );
        self.emit(SchedulerEvent::StructureUpdated {
            version,
            changed_ids: changed,
        });

        if self.successful_updates % self.settings.snapshot_every == 0 {
            let record = self.session_record();
            if let Err(e) = self.session_store.save(&record) {
                warn!(error = %e, "Autosave failed");
            }
            self.emit(SchedulerEvent::SnapshotReady {
                version,
                transcript: record.transcript,
                structure: self.store.state().clone(),
            });
        }
    }

    fn session_record(&self) -> SessionRecord {
        SessionRecord {
            id: self.session_id.clone(),
            title: self.session_title.clone(),
            tree_structure: self.store.state().as_tree().cloned(),
            graph_structure: self.store.state().as_graph().cloned(),
            transcript: self.log.text(),
            created_at: self.created_at,
            updated_at: Utc::now(),
        }
    }

    /// Persist the outgoing session, then restart every per-session piece of
    /// state under the new identity.
    fn start_session(&mut self, session_id: String, session_title: String) {
        if !self.log.is_empty() {
            let record = self.session_record();
            if let Err(e) = self.session_store.save(&record) {
                warn!(error = %e, "Save before new session failed");
            }
        }
        let had_structure = !self.store.state().is_empty();
        self.store.reset();
        self.pending = PendingBuffer::default();
        self.log = TranscriptLog::default();
        self.discard_in_flight = self.in_flight;
        self.force_full = false;
        self.successful_updates = 0;
        self.last_error = None;
        self.session_id = session_id;
        self.session_title = session_title;
        self.created_at = Utc::now();
        info!(session_id = %self.session_id, "Started new session");
        // Tell renderers the canvas is blank again
        if had_structure {
            self.emit(SchedulerEvent::StructureUpdated {
                version: 0,
                changed_ids: BTreeSet::new(),
            });
        }
    }

    async fn finish(
        &mut self,
        rx: &mut mpsc::UnboundedReceiver<Command>,
        reply: oneshot::Sender<SessionRecord>,
    ) {
        info!(session_id = %self.session_id, "Stopping update scheduler");

        // Let the outstanding call complete and apply its result first.
        while self.in_flight {
            match rx.recv().await {
                Some(Command::CallFinished(outcome)) => self.apply_outcome(*outcome),
                Some(Command::Enqueue(fragment)) => {
                    self.log.push(&fragment);
                    self.pending.push(fragment);
                }
                // Cadence and queries are moot during shutdown
                Some(_) => {}
                None => break,
            }
        }

        if !self.pending.is_empty() && self.backend.is_configured() {
            self.final_flush().await;
        }

        let record = self.session_record();
        if self.log.is_empty() {
            info!("Session produced no transcript, skipping save");
        } else if let Err(e) = self.session_store.save(&record) {
            error!(error = %e, "Final session save failed");
        }
        let _ = reply.send(record);
    }

    /// One last update for whatever is still buffered, run inline so stop
    /// can hand back the fully merged record.
    async fn final_flush(&mut self) {
        let PreparedCall {
            kind,
            consumed,
            text,
            current,
        } = self.prepare_call();
        self.emit(SchedulerEvent::ProcessingStarted);
        info!(
            kind = ?kind,
            fragments = consumed.len(),
            "Dispatching final update before shutdown"
        );

        let result = run_call(
            self.backend.as_ref(),
            self.session_id.clone(),
            self.settings.interpretation_level,
            kind,
            text,
            current,
        )
        .await;
        self.apply_outcome(CallOutcome {
            kind,
            consumed,
            result,
        });
    }

    fn emit(&self, event: SchedulerEvent) {
        let _ = self.events.send(event);
    }
}
