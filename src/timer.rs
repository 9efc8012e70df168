use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, TimeDelta};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::{Mutex, MutexGuard};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, TimerError};
use crate::id::TimerId;
use crate::logging::{LogContext, LogEvent, TimerLogger, Verbosity};
use crate::options::{TimerOptions, DEFAULT_DURATION, MARGIN, MAX_WAIT};
use crate::registry::{Admitted, Registry};

/// Log values passed along with a lifecycle call.
pub type LogArgs<'a> = &'a [&'a dyn fmt::Display];

type Callback = Box<dyn FnOnce() + Send>;

/// What to watch when calling [`Timer::launch_or_update`].
pub enum Action<T = (), E = TimerError> {
    /// Invoked with the timeout payload when the timer aborts.
    Callback(Box<dyn FnOnce(TimerError) + Send>),
    /// Raced against the deadline.
    Future(BoxFuture<'static, Result<T, E>>),
}

impl<T, E> Action<T, E> {
    /// Watch with a callback that receives the timeout payload.
    pub fn callback(callback: impl FnOnce(TimerError) + Send + 'static) -> Self {
        Self::Callback(Box::new(callback))
    }

    /// Race `operation` against the deadline.
    pub fn future(operation: impl Future<Output = Result<T, E>> + Send + 'static) -> Self {
        Self::Future(operation.boxed())
    }
}

/// Outcome of [`Timer::launch_or_update`].
pub enum Launched<T = (), E = TimerError> {
    /// The timer was already running and got a liveness signal.
    Updated,
    /// The timer was launched with a callback.
    Armed,
    /// The timer was launched against a future; await it for the result.
    Racing(BoxFuture<'static, Result<T, E>>),
}

/// Watchdog timer with a rolling deadline.
///
/// Once launched, the timer aborts when no [`update`](Timer::update) arrives
/// within its duration of the last one. Aborting fires the launch callback
/// exactly once. [`done`](Timer::done) stops the watch without firing.
///
/// `Timer` is a cheap handle; clones drive the same timer. The deadline is
/// serviced by a task spawned on the Tokio runtime the timer was launched
/// from.
#[derive(Clone)]
pub struct Timer {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Registry,
    logger: TimerLogger,
    auto_destroy: bool,
    created_at: DateTime<Local>,
    state: Mutex<State>,
}

struct State {
    /// `None` once destroyed.
    id: Option<TimerId>,
    /// Configured duration plus `MARGIN`.
    duration: Duration,
    started_at: Option<DateTime<Local>>,
    last_update: DateTime<Local>,
    last_signal: Instant,
    running: bool,
    aborted: bool,
    self_aborted: bool,
    callback: Option<Callback>,
    wakeup: Option<CancellationToken>,
    /// Identifies the only wakeup allowed to act.
    epoch: u64,
    runtime: Option<Handle>,
}

impl State {
    fn cancel_wakeup(&mut self) {
        if let Some(token) = self.wakeup.take() {
            token.cancel();
        }
        self.epoch = self.epoch.wrapping_add(1);
    }

    fn deadline(&self) -> DateTime<Local> {
        TimeDelta::from_std(self.duration.saturating_sub(MARGIN))
            .ok()
            .and_then(|delta| self.last_update.checked_add_signed(delta))
            .unwrap_or(self.last_update)
    }

    fn log_context(&self) -> Option<LogContext> {
        Some(LogContext {
            id: self.id.clone()?,
            deadline: self.deadline(),
        })
    }
}

impl Timer {
    /// Create a timer against `registry`.
    ///
    /// `duration_ms` defaults to two minutes.
    ///
    /// # Errors
    ///
    /// `DuplicateIdentifier` when the requested identifier is registered and
    /// `InvalidIdentifier` when it is empty or zero, unless
    /// `options.force_create` is set.
    pub fn new(registry: &Registry, duration_ms: Option<u64>, options: TimerOptions) -> Result<Self> {
        match Self::admit(registry, duration_ms, options, false)? {
            Admitted::Created(timer) | Admitted::Existing(timer) => Ok(timer),
        }
    }

    /// Return the timer registered under `options.id`, or create it with
    /// `duration_ms` under the same registry lock.
    pub(crate) fn find_or_new(
        registry: &Registry,
        duration_ms: Option<u64>,
        options: TimerOptions,
    ) -> Result<Self> {
        match Self::admit(registry, duration_ms, options, true)? {
            Admitted::Created(timer) | Admitted::Existing(timer) => Ok(timer),
        }
    }

    fn admit(
        registry: &Registry,
        duration_ms: Option<u64>,
        options: TimerOptions,
        reuse: bool,
    ) -> Result<Admitted> {
        let TimerOptions {
            id,
            force_create,
            persist,
            auto_destroy,
            verbosity,
            sink,
        } = options;
        let logger = TimerLogger::new(sink, verbosity);
        let duration = duration_ms
            .map_or(DEFAULT_DURATION, Duration::from_millis)
            .saturating_add(MARGIN);

        let admitted = registry.admit(id, force_create, persist, reuse, |id| {
            let now = Local::now();
            Timer {
                inner: Arc::new(Inner {
                    registry: registry.clone(),
                    logger,
                    auto_destroy,
                    created_at: now,
                    state: Mutex::new(State {
                        id: Some(id),
                        duration,
                        started_at: None,
                        last_update: now,
                        last_signal: Instant::now(),
                        running: false,
                        aborted: false,
                        self_aborted: false,
                        callback: None,
                        wakeup: None,
                        epoch: 0,
                        runtime: None,
                    }),
                }),
            }
        })?;

        if let Admitted::Created(timer) = &admitted {
            log::debug!("Timer '{}' created", timer);
        }
        Ok(admitted)
    }

    /// Set the duration in milliseconds.
    ///
    /// While running, the deadline moves to the last liveness signal plus
    /// the new duration; if that is already past, the timer aborts now.
    pub fn set_duration(&self, millis: u64) {
        self.apply_duration(millis);
    }

    /// Set the duration from text, accepting only the canonical decimal
    /// form of a non-negative integer. Returns whether it was applied.
    pub fn set_duration_text(&self, text: &str) -> bool {
        match text.parse::<u64>() {
            Ok(millis) if millis.to_string() == text => self.apply_duration(millis),
            _ => false,
        }
    }

    fn apply_duration(&self, millis: u64) -> bool {
        let mut state = self.state();
        if state.id.is_none() {
            return false;
        }
        state.duration = Duration::from_millis(millis).saturating_add(MARGIN);
        if state.running {
            state.cancel_wakeup();
            self.evaluate(state);
        }
        true
    }

    /// Start watching; `callback` receives [`TimerError::TimeoutFired`] if
    /// the timer aborts.
    ///
    /// # Errors
    ///
    /// `AlreadyRunning`, `EntityDestroyed`, or `InvalidInvocation` when
    /// called outside a Tokio runtime.
    pub fn launch_timer<F>(&self, callback: F, args: LogArgs<'_>) -> Result<()>
    where
        F: FnOnce(TimerError) + Send + 'static,
    {
        self.arm(
            |id: &TimerId| -> Callback {
                let timeout = TimerError::TimeoutFired(id.clone());
                Box::new(move || callback(timeout))
            },
            args,
        )
    }

    /// Like [`launch_timer`](Timer::launch_timer), handing `arg` to the
    /// callback instead of the timeout error.
    ///
    /// # Errors
    ///
    /// Same as [`launch_timer`](Timer::launch_timer).
    pub fn launch_timer_with<F, A>(&self, callback: F, arg: A, args: LogArgs<'_>) -> Result<()>
    where
        F: FnOnce(A) + Send + 'static,
        A: Send + 'static,
    {
        self.arm(|_: &TimerId| -> Callback { Box::new(move || callback(arg)) }, args)
    }

    fn arm(&self, callback: impl FnOnce(&TimerId) -> Callback, args: LogArgs<'_>) -> Result<()> {
        let mut state = self.state();
        let id = match (&state.id, state.running) {
            (None, _) => return Err(TimerError::EntityDestroyed),
            (Some(id), true) => return Err(TimerError::AlreadyRunning(id.clone())),
            (Some(id), false) => id.clone(),
        };
        let runtime = Handle::try_current()
            .map_err(|_| TimerError::InvalidInvocation("timer launched outside of a Tokio runtime"))?;

        state.callback = Some(callback(&id));
        state.aborted = false;
        state.self_aborted = false;
        state.running = true;
        let now = Local::now();
        state.started_at = Some(now);
        state.last_update = now;
        state.last_signal = Instant::now();
        state.runtime = Some(runtime);

        let delay = state.duration;
        self.schedule(&mut state, delay);
        let ctx = state.log_context();
        drop(state);

        self.emit(LogEvent::Launch, ctx, args);
        Ok(())
    }

    /// Race `operation` against the deadline.
    ///
    /// The timer is launched when this is called, not when the returned
    /// future is first polled. `Ok` completes the timer with `done`; an
    /// `Err`, an expired deadline or an external `abort` aborts it. An
    /// operation that loses the race is dropped.
    pub fn launch_timer_future<Fut, T, E>(
        &self,
        operation: Fut,
        args: LogArgs<'_>,
    ) -> impl Future<Output = Result<T, E>>
    where
        Fut: Future<Output = Result<T, E>>,
        E: From<TimerError> + Send + 'static,
    {
        self.race(operation, E::from, args)
    }

    /// Like [`launch_timer_future`](Timer::launch_timer_future), failing with
    /// `reason` instead of the timeout error.
    pub fn launch_timer_future_with<Fut, T, E>(
        &self,
        operation: Fut,
        reason: E,
        args: LogArgs<'_>,
    ) -> impl Future<Output = Result<T, E>>
    where
        Fut: Future<Output = Result<T, E>>,
        E: From<TimerError> + Send + 'static,
    {
        self.race(operation, move |_| reason, args)
    }

    fn race<Fut, T, E, R>(
        &self,
        operation: Fut,
        reason: R,
        args: LogArgs<'_>,
    ) -> impl Future<Output = Result<T, E>>
    where
        Fut: Future<Output = Result<T, E>>,
        E: From<TimerError> + Send + 'static,
        R: FnOnce(TimerError) -> E + Send + 'static,
    {
        let (tx, rx) = oneshot::channel::<E>();
        let launched = self.launch_timer(
            move |timeout| {
                let _ = tx.send(reason(timeout));
            },
            args,
        );
        let timer = self.clone();

        async move {
            if let Err(err) = launched {
                return Err(E::from(err));
            }
            tokio::select! {
                result = operation => {
                    match result {
                        Ok(value) => {
                            timer.done(&[]);
                            Ok(value)
                        }
                        Err(err) => {
                            timer.abort(&[]);
                            Err(err)
                        }
                    }
                }
                Ok(err) = rx => {
                    timer.abort(&[]);
                    Err(err)
                }
            }
        }
    }

    /// Update when running, launch otherwise.
    ///
    /// # Errors
    ///
    /// `EntityDestroyed`, or a launch error.
    pub fn launch_or_update<T, E>(&self, action: Action<T, E>, args: LogArgs<'_>) -> Result<Launched<T, E>>
    where
        T: Send + 'static,
        E: From<TimerError> + Send + 'static,
    {
        {
            let state = self.state();
            if state.id.is_none() {
                return Err(TimerError::EntityDestroyed);
            }
            if state.running {
                drop(state);
                self.update(args);
                return Ok(Launched::Updated);
            }
        }

        match action {
            Action::Callback(callback) => {
                self.launch_timer(callback, args)?;
                Ok(Launched::Armed)
            }
            Action::Future(operation) => Ok(Launched::Racing(
                self.launch_timer_future(operation, args).boxed(),
            )),
        }
    }

    /// Liveness signal: push the deadline back to now plus the duration.
    pub fn update(&self, args: LogArgs<'_>) {
        let mut state = self.state();
        if !state.running {
            return;
        }
        state.last_update = Local::now();
        state.last_signal = Instant::now();
        let ctx = state.log_context();
        drop(state);

        self.emit(LogEvent::Update, ctx, args);
    }

    /// Stop watching without firing the callback.
    pub fn done(&self, args: LogArgs<'_>) {
        let mut state = self.state();
        if !state.running {
            return;
        }
        state.running = false;
        state.cancel_wakeup();
        let ctx = if state.aborted {
            None
        } else {
            state.log_context()
        };
        drop(state);

        self.emit(LogEvent::Done, ctx, args);
        if self.inner.auto_destroy {
            if let Err(err) = self.destroy() {
                log::debug!("Timer kept after done: {}", err);
            }
        }
    }

    /// Stop watching and fire the callback.
    ///
    /// The callback runs on the calling thread, with no timer lock held; a
    /// panicking callback propagates to the caller.
    pub fn abort(&self, args: LogArgs<'_>) {
        let state = self.state();
        self.abort_locked(state, args);
    }

    fn abort_locked(&self, mut state: MutexGuard<'_, State>, args: LogArgs<'_>) {
        if !state.running {
            return;
        }
        state.aborted = true;
        let callback = state.callback.take();
        let ctx = state.log_context();
        drop(state);

        if let Some(callback) = callback {
            callback();
        }
        self.emit(LogEvent::Abort, ctx, args);
        self.done(&[]);
    }

    /// Release the timer and remove it from its registry.
    ///
    /// # Errors
    ///
    /// `CannotDestroyWhileRunning` if the timer is running and not aborted.
    pub fn destroy(&self) -> Result<()> {
        let mut state = self.state();
        let Some(id) = state.id.clone() else {
            return Ok(());
        };
        if state.running && !state.aborted {
            return Err(TimerError::CannotDestroyWhileRunning(id));
        }
        state.cancel_wakeup();
        state.id = None;
        state.running = false;
        state.callback = None;
        state.runtime = None;
        drop(state);

        self.inner.registry.remove(&id, self);
        log::debug!("Timer '{}' destroyed", id);
        Ok(())
    }

    /// Write `args` through the timer's sink, with its enrichment.
    ///
    /// # Errors
    ///
    /// `EntityDestroyed`.
    pub fn log(&self, args: LogArgs<'_>) -> Result<()> {
        let ctx = self
            .state()
            .log_context()
            .ok_or(TimerError::EntityDestroyed)?;
        self.inner.logger.emit(LogEvent::Log, &ctx, args);
        Ok(())
    }

    /// Called by the wakeup task armed for `epoch`.
    fn on_wakeup(&self, epoch: u64) -> Result<()> {
        let mut state = self.state();
        if state.id.is_none() {
            return Err(TimerError::InvalidInvocation("wakeup fired for a destroyed timer"));
        }
        if state.epoch != epoch {
            return Ok(());
        }
        state.wakeup = None;
        self.evaluate(state);
        Ok(())
    }

    /// Abort if the deadline has passed, otherwise sleep until it.
    fn evaluate(&self, mut state: MutexGuard<'_, State>) {
        if state.aborted || !state.running {
            return;
        }
        let elapsed = Instant::now().saturating_duration_since(state.last_signal);
        if elapsed >= state.duration {
            state.self_aborted = true;
            self.abort_locked(state, &[]);
            return;
        }

        let remaining = state.duration - elapsed;
        self.schedule(&mut state, remaining);
        let ctx = state.log_context();
        drop(state);
        self.emit(LogEvent::Tick, ctx, &[]);
    }

    fn schedule(&self, state: &mut State, delay: Duration) {
        state.cancel_wakeup();
        let Some(runtime) = state.runtime.clone() else {
            log::warn!("Timer has no runtime to schedule its deadline on");
            return;
        };

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let epoch = state.epoch;
        let delay = delay.min(MAX_WAIT);
        let timer = self.clone();
        runtime.spawn(async move {
            tokio::select! {
                () = cancelled.cancelled() => {}
                () = sleep(delay) => {
                    if let Err(err) = timer.on_wakeup(epoch) {
                        log::debug!("Ignoring timer wakeup: {}", err);
                    }
                }
            }
        });
        state.wakeup = Some(token);
    }

    fn emit(&self, event: LogEvent, ctx: Option<LogContext>, args: LogArgs<'_>) {
        if let Some(ctx) = ctx {
            self.inner.logger.emit(event, &ctx, args);
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock()
    }

    /// Whether both handles drive the same timer.
    #[must_use]
    pub fn ptr_eq(a: &Timer, b: &Timer) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// `None` once destroyed.
    #[must_use]
    pub fn id(&self) -> Option<TimerId> {
        self.state().id.clone()
    }

    /// Configured duration; zero once destroyed.
    #[must_use]
    pub fn duration(&self) -> Duration {
        let state = self.state();
        if state.id.is_none() {
            return Duration::ZERO;
        }
        state.duration.saturating_sub(MARGIN)
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Local> {
        self.inner.created_at
    }

    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Local>> {
        self.state().started_at
    }

    /// Time of the last liveness signal, or of creation.
    #[must_use]
    pub fn last_update(&self) -> DateTime<Local> {
        self.state().last_update
    }

    /// When the timer will abort without further updates, if running.
    #[must_use]
    pub fn next_deadline(&self) -> Option<DateTime<Local>> {
        let state = self.state();
        state.running.then(|| state.deadline())
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state().running
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.state().aborted
    }

    /// Whether the last abort came from the deadline expiring.
    #[must_use]
    pub fn is_self_aborted(&self) -> bool {
        self.state().self_aborted
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.state().id.is_none()
    }

    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        self.inner.logger.verbosity()
    }
}

impl fmt::Display for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id() {
            Some(id) => write!(f, "{id}"),
            None => f.write_str("<destroyed>"),
        }
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("Timer")
            .field("id", &state.id)
            .field("duration", &state.duration.saturating_sub(MARGIN))
            .field("running", &state.running)
            .field("aborted", &state.aborted)
            .field("self_aborted", &state.self_aborted)
            .finish_non_exhaustive()
    }
}
