use crate::classifier::classify;
use crate::config::BufferConfig;
use crate::error::{BufferError, ErrorSignal};
use crate::events::BufferEvent;
use crate::pool::{CancelHandle, WorkerPool};
use crate::store::{Outcome, ResultStore};
use crate::throttle::RequestThrottle;
use crate::types::{BufferStatus, FailureKind, ItemState, LimitCategory, Lookup};
use crate::ImageAnalyzer;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Longest single pause. Longer stated waits are clamped to it.
const MAX_PAUSE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Rolling look-ahead scheduler over an ordered list of images.
///
/// The buffer owns all per-item state and the result store. Consumers only
/// issue intents ([`ensure_window`](Self::ensure_window),
/// [`jump_to`](Self::jump_to), [`retry`](Self::retry),
/// [`resume_manually`](Self::resume_manually)) and read results. Every intent
/// returns immediately; remote calls run on the worker pool.
///
/// State transitions are serialized behind one mutex that is never held
/// across an `.await`.
///
/// # Example
///
/// ```ignore
/// let buffer = AnalysisBuffer::new(BufferConfig::default(), analyzer)?;
/// buffer.start_session(image_sequence(folder, SequenceOrder::OldestFirst)?)?;
/// buffer.ensure_window(0);
///
/// match buffer.get_result(0) {
///     Lookup::Done(observation) => show(observation),
///     Lookup::Failed(failure) => show_error(failure.friendly_message()),
///     Lookup::NotReady => show_spinner(),
/// }
/// ```
pub struct AnalysisBuffer<A: ImageAnalyzer> {
    inner: Arc<Inner<A>>,
}

impl<A: ImageAnalyzer> Clone for AnalysisBuffer<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<A: ImageAnalyzer> {
    config: BufferConfig,
    analyzer: A,
    throttle: RequestThrottle,
    pool: WorkerPool,
    runtime: Handle,
    state: Mutex<BufferState>,
    results: ResultStore<A::Output>,
    events: broadcast::Sender<BufferEvent>,
}

struct BufferState {
    session: Uuid,
    items: Vec<PathBuf>,
    slots: Vec<Slot>,
    active: usize,
    pause: Option<Pause>,
    next_ticket: u64,
    next_pause_epoch: u64,
    shut_down: bool,
}

/// Per-item bookkeeping. The ticket ties a worker job to the dispatch that
/// created it, so a cancelled or re-dispatched item is never run twice.
enum Slot {
    Pending,
    Queued { ticket: u64, cancel: CancelHandle },
    InFlight { ticket: u64 },
    Done,
    Failed(FailureKind),
}

impl Slot {
    fn state(&self) -> ItemState {
        match self {
            Slot::Pending => ItemState::Pending,
            Slot::Queued { .. } => ItemState::Queued,
            Slot::InFlight { .. } => ItemState::InFlight,
            Slot::Done => ItemState::Done,
            Slot::Failed(failure) => ItemState::Failed {
                failure: failure.clone(),
            },
        }
    }

    /// Settled items do not count towards the look-ahead window.
    fn is_settled(&self) -> bool {
        matches!(self, Slot::Done | Slot::Failed(FailureKind::Fatal { .. }))
    }
}

struct Pause {
    until: Instant,
    wall_until: DateTime<Utc>,
    category: LimitCategory,
    auto_resume: bool,
    epoch: u64,
    timer: Option<JoinHandle<()>>,
}

impl BufferState {
    fn empty() -> Self {
        Self {
            session: Uuid::new_v4(),
            items: Vec::new(),
            slots: Vec::new(),
            active: 0,
            pause: None,
            next_ticket: 0,
            next_pause_epoch: 0,
            shut_down: false,
        }
    }

    fn holds_ticket(&self, session: Uuid, index: usize, ticket: u64) -> bool {
        self.session == session
            && matches!(
                self.slots.get(index),
                Some(Slot::Queued { ticket: t, cancel }) if *t == ticket && !cancel.is_cancelled()
            )
    }

    fn stop_timer(&mut self) {
        if let Some(timer) = self.pause.as_mut().and_then(|p| p.timer.take()) {
            timer.abort();
        }
    }
}

impl<A: ImageAnalyzer> AnalysisBuffer<A> {
    /// Create a buffer on the current tokio runtime.
    ///
    /// Later calls may come from any thread; work is spawned on the runtime
    /// captured here.
    pub fn new(config: BufferConfig, analyzer: A) -> Result<Self, BufferError> {
        let runtime = Handle::try_current().map_err(|e| BufferError::Runtime(e.to_string()))?;
        Self::with_runtime(config, analyzer, runtime)
    }

    /// Create a buffer that spawns its work on `runtime`.
    pub fn with_runtime(
        config: BufferConfig,
        analyzer: A,
        runtime: Handle,
    ) -> Result<Self, BufferError> {
        config.validate()?;

        let (events, _) = broadcast::channel(config.event_capacity);
        let inner = Inner {
            throttle: RequestThrottle::new(config.min_spacing),
            pool: WorkerPool::new(config.pool_size, runtime.clone()),
            runtime,
            state: Mutex::new(BufferState::empty()),
            results: ResultStore::new(),
            events,
            analyzer,
            config,
        };

        debug!(
            analyzer = inner.analyzer.name(),
            window = inner.config.window_size,
            workers = inner.config.pool_size,
            "Analysis buffer created"
        );

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Reset everything for a new ordered item list. Returns the new session id.
    ///
    /// Queued work from the previous session is cancelled and a pending
    /// resume timer is dropped. In-flight calls finish, but their results are
    /// discarded.
    pub fn start_session(&self, items: Vec<PathBuf>) -> Result<Uuid, BufferError> {
        let mut state = self.inner.lock_state();
        if state.shut_down {
            return Err(BufferError::ShutDown);
        }

        for slot in &state.slots {
            if let Slot::Queued { cancel, .. } = slot {
                cancel.cancel();
            }
        }
        state.stop_timer();
        state.pause = None;

        state.session = Uuid::new_v4();
        state.slots = items.iter().map(|_| Slot::Pending).collect();
        state.items = items;
        state.active = 0;
        self.inner.results.clear();

        info!(session = %state.session, total = state.items.len(), "Analysis session started");
        self.inner.emit(BufferEvent::SessionStarted {
            session: state.session,
            total: state.items.len(),
        });
        Ok(state.session)
    }

    /// Keep the look-ahead window from `active_index` dispatched.
    ///
    /// Records `active_index` as the consumer's position. Does not dispatch
    /// while the buffer is paused for a rate limit.
    pub fn ensure_window(&self, active_index: usize) {
        let mut state = self.inner.lock_state();
        state.active = active_index;
        self.inner.ensure_window_locked(&mut state);
    }

    /// Move the active position, cancelling queued work the new window no
    /// longer needs. In-flight items keep running and their results are kept.
    pub fn jump_to(&self, new_index: usize) {
        let mut state = self.inner.lock_state();
        state.active = new_index;

        let plan = self.inner.plan_window(&state, new_index);
        let session = state.session;
        for (index, slot) in state.slots.iter_mut().enumerate() {
            if let Slot::Queued { cancel, .. } = slot {
                if !plan.contains(&index) {
                    cancel.cancel();
                    *slot = Slot::Pending;
                    debug!(index, "Cancelled queued analysis outside the new window");
                    self.inner
                        .emit(BufferEvent::ItemCancelled { session, index });
                }
            }
        }

        self.inner.ensure_window_locked(&mut state);
    }

    /// Put a permanently failed item back into play and analyze it again.
    pub fn retry(&self, index: usize) -> Result<(), BufferError> {
        let mut state = self.inner.lock_state();
        if state.shut_down {
            return Err(BufferError::ShutDown);
        }
        let len = state.slots.len();
        let slot = state
            .slots
            .get_mut(index)
            .ok_or(BufferError::IndexOutOfRange { index, len })?;

        match slot {
            Slot::Failed(FailureKind::Fatal { .. }) => {
                *slot = Slot::Pending;
                self.inner.results.remove(index);
            }
            other => {
                return Err(BufferError::NotRetryable {
                    index,
                    state: other.state().as_str().to_string(),
                })
            }
        }

        info!(index, "Retrying failed analysis");
        if state.pause.is_none() {
            self.inner.dispatch(&mut state, index);
        }
        self.inner.ensure_window_locked(&mut state);
        Ok(())
    }

    /// Clear a rate-limit pause and re-queue every rate-limited item.
    ///
    /// Required after waits at or above the automatic-resume limit. Returns
    /// whether the buffer was paused.
    pub fn resume_manually(&self) -> bool {
        let mut state = self.inner.lock_state();
        if state.shut_down {
            return false;
        }
        if state.pause.is_none() {
            return false;
        }
        self.inner.resume_locked(&mut state, true);
        true
    }

    /// Non-blocking result query.
    pub fn get_result(&self, index: usize) -> Lookup<A::Output> {
        self.inner.results.lookup(index)
    }

    /// Like [`get_result`](Self::get_result), but dispatches the item right
    /// away if nobody has asked for it yet and the buffer is not paused.
    pub fn analyze_now(&self, index: usize) -> Lookup<A::Output> {
        {
            let mut state = self.inner.lock_state();
            let can_dispatch = !state.shut_down
                && state.pause.is_none()
                && matches!(state.slots.get(index), Some(Slot::Pending));
            if can_dispatch {
                self.inner.dispatch(&mut state, index);
            }
        }
        self.inner.results.lookup(index)
    }

    pub fn item_state(&self, index: usize) -> Option<ItemState> {
        let state = self.inner.lock_state();
        state.slots.get(index).map(Slot::state)
    }

    /// Failure text for a failed item, raw or rendered for a status label.
    pub fn failure_reason(&self, index: usize, human_friendly: bool) -> Option<String> {
        match self.inner.results.get(index)? {
            Outcome::Failed(failure) if human_friendly => Some(failure.friendly_message()),
            Outcome::Failed(failure) => Some(failure.raw_message()),
            Outcome::Done(_) => None,
        }
    }

    /// Observability snapshot.
    pub fn status(&self) -> BufferStatus {
        let state = self.inner.lock_state();
        let mut status = BufferStatus {
            total: state.slots.len(),
            active_index: state.active,
            pending: 0,
            queued: 0,
            in_flight: 0,
            done: 0,
            failed: 0,
            paused_until: None,
            limit_category: None,
            manual_resume_required: false,
        };
        for slot in &state.slots {
            match slot {
                Slot::Pending => status.pending += 1,
                Slot::Queued { .. } => status.queued += 1,
                Slot::InFlight { .. } => status.in_flight += 1,
                Slot::Done => status.done += 1,
                Slot::Failed(_) => status.failed += 1,
            }
        }
        if let Some(pause) = &state.pause {
            status.paused_until = Some(pause.wall_until);
            status.limit_category = Some(pause.category);
            status.manual_resume_required = !pause.auto_resume;
        }
        status
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock_state().pause.is_some()
    }

    pub fn session_id(&self) -> Uuid {
        self.inner.lock_state().session
    }

    pub fn active_index(&self) -> usize {
        self.inner.lock_state().active
    }

    pub fn len(&self) -> usize {
        self.inner.lock_state().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn config(&self) -> &BufferConfig {
        &self.inner.config
    }

    /// Receive [`BufferEvent`]s from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<BufferEvent> {
        self.inner.events.subscribe()
    }

    /// Stop dispatching for good. Queued work is dropped, in-flight calls finish.
    pub fn shutdown(&self) {
        let mut state = self.inner.lock_state();
        if state.shut_down {
            return;
        }
        state.shut_down = true;
        for slot in state.slots.iter_mut() {
            if let Slot::Queued { cancel, .. } = slot {
                cancel.cancel();
                *slot = Slot::Pending;
            }
        }
        state.stop_timer();
        self.inner.pool.close();
        info!(session = %state.session, "Analysis buffer shut down");
    }
}

impl<A: ImageAnalyzer> Inner<A> {
    fn lock_state(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("Buffer state mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn emit(&self, event: BufferEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// The first `window_size` unsettled items from `from`, bounded by the
    /// look-ahead horizon.
    fn plan_window(&self, state: &BufferState, from: usize) -> Vec<usize> {
        let end = state
            .slots
            .len()
            .min(from.saturating_add(self.config.max_lookahead));
        let mut plan = Vec::with_capacity(self.config.window_size);
        for index in from..end {
            if plan.len() == self.config.window_size {
                break;
            }
            if !state.slots[index].is_settled() {
                plan.push(index);
            }
        }
        plan
    }

    fn ensure_window_locked(self: &Arc<Self>, state: &mut BufferState) {
        if state.shut_down || state.pause.is_some() {
            return;
        }
        for index in self.plan_window(state, state.active) {
            if matches!(state.slots[index], Slot::Pending) {
                self.dispatch(state, index);
            }
        }
    }

    /// Mark `index` Queued and hand a job to the pool.
    fn dispatch(self: &Arc<Self>, state: &mut BufferState, index: usize) {
        let ticket = state.next_ticket;
        state.next_ticket += 1;

        let session = state.session;
        let image = state.items[index].clone();
        let inner = Arc::clone(self);
        let job = self
            .pool
            .submit(async move { inner.run_job(session, index, ticket, image).await });

        state.slots[index] = Slot::Queued {
            ticket,
            cancel: job.canceller(),
        };
        debug!(index, ticket, "Queued analysis");
        self.emit(BufferEvent::ItemQueued { session, index });
    }

    async fn run_job(self: Arc<Self>, session: Uuid, index: usize, ticket: u64, image: PathBuf) {
        if !self.still_wanted(session, index, ticket) {
            return;
        }
        self.throttle.reserve_slot().await;
        if !self.begin(session, index, ticket) {
            return;
        }

        let timeout = self.config.request_timeout;
        let result =
            match tokio::time::timeout(timeout, self.analyzer.analyze(&image)).await {
                Ok(Ok(output)) => Ok(output),
                Ok(Err(signal)) => Err(classify(&signal, &self.config.rules)),
                Err(_) => Err(classify(&ErrorSignal::timeout(timeout), &self.config.rules)),
            };

        self.settle(session, index, ticket, result);
    }

    /// Whether a job that just got a worker slot should go on. A job that
    /// meets a pause hands its item back as Pending.
    fn still_wanted(&self, session: Uuid, index: usize, ticket: u64) -> bool {
        let mut state = self.lock_state();
        Self::claim(&mut state, session, index, ticket)
    }

    fn claim(state: &mut BufferState, session: Uuid, index: usize, ticket: u64) -> bool {
        if !state.holds_ticket(session, index, ticket) {
            return false;
        }
        if state.pause.is_some() {
            state.slots[index] = Slot::Pending;
            debug!(index, "Deferred queued analysis while paused");
            return false;
        }
        true
    }

    /// Queued -> InFlight, unless cancelled or paused in the meantime.
    fn begin(&self, session: Uuid, index: usize, ticket: u64) -> bool {
        let mut state = self.lock_state();
        if !Self::claim(&mut state, session, index, ticket) {
            return false;
        }
        state.slots[index] = Slot::InFlight { ticket };
        debug!(index, "Analysis started");
        self.emit(BufferEvent::ItemStarted { session, index });
        true
    }

    fn settle(
        self: &Arc<Self>,
        session: Uuid,
        index: usize,
        ticket: u64,
        result: Result<A::Output, FailureKind>,
    ) {
        let mut state = self.lock_state();
        let current = state.session == session
            && matches!(state.slots.get(index), Some(Slot::InFlight { ticket: t }) if *t == ticket);
        if !current {
            debug!(index, "Discarding result from a previous session");
            return;
        }

        match result {
            Ok(output) => {
                self.results.put(index, Outcome::Done(output));
                state.slots[index] = Slot::Done;
                info!(index, "Analysis complete");
                self.emit(BufferEvent::ItemCompleted { session, index });
                self.ensure_window_locked(&mut state);
            }
            Err(failure) => match failure {
                FailureKind::RateLimited {
                    category,
                    wait_secs,
                } => {
                    warn!(
                        index,
                        category = category.as_str(),
                        wait_secs,
                        "Rate limited"
                    );
                    self.record_failure(&mut state, index, failure);
                    self.pause_locked(&mut state, category, wait_secs);
                }
                FailureKind::Fatal { .. } => {
                    warn!(index, error = %failure.raw_message(), "Analysis failed");
                    self.record_failure(&mut state, index, failure);
                    self.ensure_window_locked(&mut state);
                }
            },
        }
    }

    fn record_failure(&self, state: &mut BufferState, index: usize, failure: FailureKind) {
        self.results.put(index, Outcome::Failed(failure.clone()));
        state.slots[index] = Slot::Failed(failure.clone());
        self.emit(BufferEvent::ItemFailed {
            session: state.session,
            index,
            failure,
        });
    }

    /// Pause dispatch until the later of the current and the new deadline,
    /// and schedule one resume timer if that deadline is short enough.
    fn pause_locked(
        self: &Arc<Self>,
        state: &mut BufferState,
        category: LimitCategory,
        wait_secs: u64,
    ) {
        let now = Instant::now();
        let mut until = now + Duration::from_secs(wait_secs).min(MAX_PAUSE);
        let mut category = category;

        state.stop_timer();
        if let Some(existing) = state.pause.take() {
            if existing.until > until {
                until = existing.until;
                category = existing.category;
            }
        }

        let remaining = until.saturating_duration_since(now);
        let auto_resume = remaining < self.config.auto_resume_limit;
        let epoch = state.next_pause_epoch;
        state.next_pause_epoch += 1;
        let session = state.session;

        let timer = auto_resume.then(|| {
            let inner = Arc::clone(self);
            self.runtime.spawn(async move {
                tokio::time::sleep_until(until).await;
                inner.auto_resume(session, epoch);
            })
        });

        let wall_until = Utc::now()
            + chrono::Duration::from_std(remaining).unwrap_or_else(|_| chrono::Duration::zero());

        if auto_resume {
            info!(wait_secs = remaining.as_secs(), "Pausing analysis, will resume automatically");
        } else {
            warn!(
                wait_secs = remaining.as_secs(),
                "Pausing analysis, manual resume required"
            );
        }

        state.pause = Some(Pause {
            until,
            wall_until,
            category,
            auto_resume,
            epoch,
            timer,
        });
        self.emit(BufferEvent::Paused {
            session,
            category,
            wait_secs: remaining.as_secs(),
            auto_resume,
            until: wall_until,
        });
    }

    fn auto_resume(self: &Arc<Self>, session: Uuid, epoch: u64) {
        let mut state = self.lock_state();
        let current = state.session == session
            && !state.shut_down
            && state.pause.as_ref().map(|p| p.epoch) == Some(epoch);
        if current {
            // This timer is the running task; detach instead of aborting it.
            if let Some(pause) = state.pause.as_mut() {
                pause.timer = None;
            }
            self.resume_locked(&mut state, false);
        }
    }

    fn resume_locked(self: &Arc<Self>, state: &mut BufferState, manual: bool) {
        state.stop_timer();
        state.pause = None;

        let mut requeued = 0;
        for (index, slot) in state.slots.iter_mut().enumerate() {
            if matches!(slot, Slot::Failed(FailureKind::RateLimited { .. })) {
                *slot = Slot::Pending;
                self.results.remove(index);
                requeued += 1;
            }
        }

        info!(manual, requeued, "Resuming analysis");
        self.emit(BufferEvent::Resumed {
            session: state.session,
            manual,
        });
        self.ensure_window_locked(state);
    }
}
