//! The per-listener state machine.
//!
//! A [`Callback`] wraps one registered function with its invocation policy.
//! Its lifecycle:
//!
//! ```text
//!            delay > 0                  timer elapses
//!   Armed ──────────────▶ Delaying ─────────────────┐
//!     ▲ │                                            ▼
//!     │ └────────────────────────────────────────▶ fire ──single──▶ Exhausted
//!     │                                            │
//!     └──────── buffer window closes ◀── Throttled ◀┘ buffer > 0
//! ```
//!
//! Throttling is leading-edge: the first event in a window fires, every
//! event that arrives while the window is open is dropped.

use crate::config::CallbackConfig;
use crate::handler::{handler_addr, target_addr, Arg, Context, EventTarget, Flow, HandlerRef, ListenerId};
use crate::timer::{SharedTimer, TimerHandle};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::trace;

/// The observable state of a [`Callback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackState {
    /// Ready to fire.
    Armed,
    /// Waiting for a delay timer to fire.
    Delaying,
    /// Fired recently; events are dropped until the buffer window closes.
    Throttled,
    /// Permanently disabled, either after a single fire or after removal.
    Exhausted,
}

/// What a callback was registered from, used to find it again on removal.
#[derive(Clone)]
pub(crate) enum Source {
    Handler(HandlerRef),
    Target(Arc<dyn EventTarget>),
}

impl Source {
    fn addr(&self) -> *const () {
        match self {
            Source::Handler(handler) => handler_addr(handler),
            Source::Target(target) => target_addr(target),
        }
    }
}

#[derive(Debug, Default)]
struct Status {
    disabled: bool,
    exhausted: bool,
    fired: u64,
    delay_timer: Option<TimerHandle>,
    buffer_timer: Option<TimerHandle>,
}

/// A registered listener together with its invocation policy.
pub struct Callback {
    id: ListenerId,
    pattern: String,
    source: Source,
    handler: HandlerRef,
    ctx: Context,
    args: Vec<Arg>,
    single: bool,
    internal: bool,
    buffer: Duration,
    delay: Duration,
    timer: SharedTimer,
    revoked: Arc<AtomicBool>,
    status: Mutex<Status>,
    this: Weak<Callback>,
}

impl Callback {
    /// Creates a standalone callback.
    ///
    /// Callbacks created by an [`Observer`](crate::Observer) are bound to
    /// their pattern and to the observer's lifetime; standalone ones are
    /// driven directly through [`handle_event`](Callback::handle_event).
    pub fn new(handler: HandlerRef, config: CallbackConfig, timer: SharedTimer) -> Arc<Self> {
        Self::build(
            String::new(),
            Source::Handler(Arc::clone(&handler)),
            handler,
            config,
            timer,
            Arc::new(AtomicBool::new(false)),
        )
    }

    pub(crate) fn build(
        pattern: String,
        source: Source,
        handler: HandlerRef,
        config: CallbackConfig,
        timer: SharedTimer,
        revoked: Arc<AtomicBool>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            id: ListenerId::new(),
            pattern,
            source,
            handler,
            ctx: config.ctx,
            args: config.args,
            single: config.single,
            internal: config.internal,
            buffer: config.buffer,
            delay: config.delay,
            timer,
            revoked,
            status: Mutex::new(Status::default()),
            this: this.clone(),
        })
    }

    /// Delivers an event to this callback.
    ///
    /// Does nothing while disabled. The fixed arguments are prepended to
    /// `args`; a delayed callback then schedules the invocation and returns
    /// [`Flow::Continue`], any other callback fires immediately and returns
    /// what the listener returned.
    pub fn handle_event(&self, args: Vec<Arg>) -> Flow {
        let mut full = self.args.clone();
        full.extend(args);

        {
            let mut status = self.status.lock();
            if status.disabled || self.is_revoked() {
                return Flow::Continue;
            }

            if !self.delay.is_zero() {
                let Some(this) = self.this.upgrade() else {
                    return Flow::Continue;
                };

                if let Some(previous) = status.delay_timer.take() {
                    self.timer.cancel(previous);
                }

                trace!(listener = %self.id, delay = ?self.delay, "scheduling delayed fire");
                let handle = self.timer.after(
                    self.delay,
                    Box::new(move || {
                        this.fire(full);
                    }),
                );
                status.delay_timer = Some(handle);
                return Flow::Continue;
            }
        }

        self.fire(full)
    }

    /// Invokes the listener, updating the fire count and opening a buffer
    /// window or exhausting a single-fire callback first.
    fn fire(&self, args: Vec<Arg>) -> Flow {
        {
            let mut status = self.status.lock();
            if let Some(pending) = status.delay_timer.take() {
                self.timer.cancel(pending);
            }

            if status.disabled || self.is_revoked() {
                return Flow::Continue;
            }

            status.fired += 1;

            if self.single {
                status.disabled = true;
                status.exhausted = true;
            } else if !self.buffer.is_zero() {
                status.disabled = true;

                if let Some(previous) = status.buffer_timer.take() {
                    self.timer.cancel(previous);
                }

                let this = self.this.clone();
                let handle = self.timer.after(
                    self.buffer,
                    Box::new(move || {
                        if let Some(callback) = this.upgrade() {
                            callback.enable();
                        }
                    }),
                );
                status.buffer_timer = Some(handle);
            }
        }

        trace!(listener = %self.id, handler = self.handler.handler_name(), "firing listener");
        self.handler.call(&self.ctx, &args)
    }

    /// Closes the buffer window and re-arms the callback.
    pub fn enable(&self) {
        let mut status = self.status.lock();
        if let Some(pending) = status.buffer_timer.take() {
            self.timer.cancel(pending);
        }

        if !status.exhausted {
            status.disabled = false;
        }
    }

    /// Cancels every pending timer and disables the callback for good.
    pub(crate) fn dispose(&self) {
        let mut status = self.status.lock();
        for pending in [status.delay_timer.take(), status.buffer_timer.take()]
            .into_iter()
            .flatten()
        {
            self.timer.cancel(pending);
        }

        status.disabled = true;
        status.exhausted = true;
    }

    /// Returns whether this callback was registered from `handler` and
    /// executes against `ctx`.
    pub(crate) fn is_registration(&self, handler: &HandlerRef, ctx: &Context) -> bool {
        self.source.addr() == handler_addr(handler) && self.ctx.same(ctx)
    }

    /// Returns whether this callback was registered from `target`.
    pub(crate) fn is_target(&self, target: &Arc<dyn EventTarget>) -> bool {
        self.source.addr() == target_addr(target)
    }

    fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::Acquire)
    }

    /// Returns the unique id of this callback.
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Returns the pattern this callback is stored under.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Returns the current state.
    pub fn state(&self) -> CallbackState {
        let status = self.status.lock();
        if status.exhausted {
            CallbackState::Exhausted
        } else if status.disabled {
            CallbackState::Throttled
        } else if status.delay_timer.is_some() {
            CallbackState::Delaying
        } else {
            CallbackState::Armed
        }
    }

    /// Returns how many times the listener has been invoked.
    pub fn fired(&self) -> u64 {
        self.status.lock().fired
    }

    /// Returns whether events are currently dropped.
    pub fn is_disabled(&self) -> bool {
        self.status.lock().disabled
    }

    /// Returns whether this callback fires at most once.
    pub fn is_single(&self) -> bool {
        self.single
    }

    /// Returns whether the listener is a method of its owning observer.
    pub fn is_internal(&self) -> bool {
        self.internal
    }

    /// Returns the context the listener executes against.
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Returns the fixed leading arguments.
    pub fn args(&self) -> &[Arg] {
        &self.args
    }

    /// Returns the throttle window.
    pub fn buffer(&self) -> Duration {
        self.buffer
    }

    /// Returns the invocation delay.
    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl std::fmt::Debug for Callback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callback")
            .field("id", &self.id)
            .field("pattern", &self.pattern)
            .field("handler", &self.handler.handler_name())
            .field("single", &self.single)
            .field("internal", &self.internal)
            .field("buffer", &self.buffer)
            .field("delay", &self.delay)
            .field("state", &self.state())
            .finish()
    }
}
