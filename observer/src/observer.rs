//! The registry and dispatcher.
//!
//! An [`Observer`] stores listeners under event-name patterns and notifies
//! every listener whose pattern matches a broadcast event. Dispatch is
//! synchronous and works on a snapshot: listeners registered or removed while
//! a broadcast is in flight take effect from the next broadcast on.
//!
//! No lock is ever held while a listener runs, so listeners are free to
//! register, remove, broadcast, suspend or destroy on the same observer.

use crate::callback::{Callback, Source};
use crate::config::{CallbackConfig, ListenerConfig};
use crate::error::{ObserverError, ObserverResult, RegistrationError, RegistrationResult};
use crate::handler::{handler, Arg, Context, EventTarget, HandlerRef};
use crate::pattern::{normalize, Pattern};
use crate::registration::{ListenerKey, ListenerMap, ListenerSpec};
use crate::timer::{SharedTimer, SystemTimer};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

/// Event broadcast right before an observer stops delivering events.
pub const SUSPENDED_EVENT: &str = "observer:suspended";

/// Event broadcast right after an observer resumes delivering events.
pub const RESUMED_EVENT: &str = "observer:resumed";

/// Event whose listeners may veto a destroy by stopping propagation.
pub const BEFORE_DESTROY_EVENT: &str = "before:destroy";

/// Event broadcast while an observer is being destroyed.
pub const DESTROY_EVENT: &str = "destroy";

/// Hook run around the teardown of an observer.
pub type DestroyHook = Arc<dyn Fn(&Observer) + Send + Sync>;

/// Configuration options for an [`Observer`].
#[derive(Clone)]
pub struct ObserverConfig {
    /// Timer service used by delayed and throttled listeners.
    pub timer: SharedTimer,

    /// Runs once a destroy can no longer be vetoed, before `destroy` is
    /// broadcast.
    pub on_destroy: Option<DestroyHook>,

    /// Runs after the listeners have been released.
    pub after_destroy: Option<DestroyHook>,

    /// Additional methods listeners can be registered by name. They take
    /// precedence over the built-in ones.
    pub methods: HashMap<String, HandlerRef>,

    /// Listeners registered on construction.
    pub listeners: Option<ListenerMap>,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            timer: Arc::new(SystemTimer::new()),
            on_destroy: None,
            after_destroy: None,
            methods: HashMap::new(),
            listeners: None,
        }
    }
}

impl std::fmt::Debug for ObserverConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut methods: Vec<&String> = self.methods.keys().collect();
        methods.sort();

        f.debug_struct("ObserverConfig")
            .field("on_destroy", &self.on_destroy.is_some())
            .field("after_destroy", &self.after_destroy.is_some())
            .field("methods", &methods)
            .field("listeners", &self.listeners.as_ref().map_or(0, ListenerMap::len))
            .finish()
    }
}

/// Builder for creating observers with custom configuration.
///
/// # Examples
///
/// ```rust
/// use observer::testing::ManualClock;
/// use observer::{handler, ListenerMap, Observer};
///
/// let clock = ManualClock::new();
/// let observer = Observer::builder()
///     .with_timer(clock.shared())
///     .method("greet", handler(|_, _| println!("hello")))
///     .with_listeners(ListenerMap::new().on("user:login", "greet"))
///     .after_destroy(|_observer| println!("gone"))
///     .build();
///
/// assert_eq!(observer.listener_count("user:login"), 1);
/// ```
#[derive(Debug, Default)]
pub struct ObserverBuilder {
    config: ObserverConfig,
}

impl ObserverBuilder {
    /// Creates a new builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the timer service.
    pub fn with_timer(mut self, timer: SharedTimer) -> Self {
        self.config.timer = timer;
        self
    }

    /// Sets the hook run before `destroy` is broadcast.
    pub fn on_destroy<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Observer) + Send + Sync + 'static,
    {
        self.config.on_destroy = Some(Arc::new(hook));
        self
    }

    /// Sets the hook run after the listeners are released.
    pub fn after_destroy<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Observer) + Send + Sync + 'static,
    {
        self.config.after_destroy = Some(Arc::new(hook));
        self
    }

    /// Installs a method listeners can be registered by name.
    pub fn method(mut self, name: impl Into<String>, method: HandlerRef) -> Self {
        self.config.methods.insert(name.into(), method);
        self
    }

    /// Sets the listeners registered on construction.
    pub fn with_listeners(mut self, listeners: ListenerMap) -> Self {
        self.config.listeners = Some(listeners);
        self
    }

    /// Builds the observer.
    pub fn build(self) -> Observer {
        Observer::with_config(self.config)
    }
}

/// How a dispatch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Nothing was delivered: the observer is suspended or destroyed, or the
    /// event name was empty.
    Skipped,
    /// Every matching listener was notified.
    Completed,
    /// A listener stopped propagation.
    Stopped,
}

impl DispatchOutcome {
    /// Returns whether a listener stopped propagation.
    pub fn is_stopped(self) -> bool {
        self == DispatchOutcome::Stopped
    }
}

struct Queue {
    pattern: Pattern,
    callbacks: Vec<Arc<Callback>>,
}

impl Queue {
    fn new(pattern: Pattern) -> Self {
        Self {
            pattern,
            callbacks: Vec::new(),
        }
    }
}

#[derive(Default)]
struct State {
    /// `None` once the observer is destroyed.
    listeners: Option<IndexMap<String, Queue>>,
    broadcasting: Option<String>,
    broadcast_stack: Vec<Option<String>>,
    suspended: bool,
    /// Set while `before:destroy` listeners run.
    closing: bool,
    destroying: bool,
    destroyed: bool,
}

impl State {
    fn collect(&self, event: &str) -> Vec<Arc<Callback>> {
        self.listeners
            .iter()
            .flat_map(IndexMap::values)
            .filter(|queue| queue.pattern.matches(event))
            .flat_map(|queue| queue.callbacks.iter().cloned())
            .collect()
    }
}

struct Inner {
    timer: SharedTimer,
    on_destroy: Option<DestroyHook>,
    after_destroy: Option<DestroyHook>,
    methods: HashMap<String, HandlerRef>,
    revoked: Arc<AtomicBool>,
    state: Mutex<State>,
}

/// Restores the broadcasting marker when a dispatch ends, even by unwinding.
struct BroadcastScope<'a> {
    inner: &'a Inner,
}

impl<'a> BroadcastScope<'a> {
    fn enter(inner: &'a Inner, event: String) -> Self {
        let mut state = inner.state.lock();
        let previous = state.broadcasting.replace(event);
        state.broadcast_stack.push(previous);
        Self { inner }
    }
}

impl Drop for BroadcastScope<'_> {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        state.broadcasting = state.broadcast_stack.pop().flatten();
    }
}

/// An event hub with wildcard patterns.
///
/// `Observer` is a cheap handle: clones share the same registry. Every
/// mutating operation returns `&Self` for chaining.
///
/// # Examples
///
/// ```rust
/// use observer::{args, handler, Arg, Observer};
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// let observer = Observer::new();
/// let seen = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&seen);
///
/// observer.on("user:*", handler(move |_, args: &[Arg]| {
///     // The broadcasting observer always comes first.
///     counter.fetch_add(args.len(), Ordering::SeqCst);
/// }), None, ());
///
/// observer.trigger("User:Login", args!["alice"]);
/// assert_eq!(seen.load(Ordering::SeqCst), 2);
/// ```
#[derive(Clone)]
pub struct Observer {
    inner: Arc<Inner>,
}

/// A non-owning reference to an [`Observer`].
#[derive(Clone)]
pub struct WeakObserver {
    inner: Weak<Inner>,
}

impl WeakObserver {
    /// Returns the observer if it is still alive.
    pub fn upgrade(&self) -> Option<Observer> {
        self.inner.upgrade().map(|inner| Observer { inner })
    }

    /// Returns whether both references point to the same observer.
    pub fn ptr_eq(a: &WeakObserver, b: &WeakObserver) -> bool {
        a.inner.ptr_eq(&b.inner)
    }

    /// Returns whether this reference points to `observer`.
    pub fn is(&self, observer: &Observer) -> bool {
        std::ptr::eq(self.inner.as_ptr(), Arc::as_ptr(&observer.inner))
    }

    /// Returns the address of the referenced observer.
    pub fn as_ptr(&self) -> *const () {
        self.inner.as_ptr() as *const ()
    }
}

impl std::fmt::Debug for WeakObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WeakObserver({:p})", self.as_ptr())
    }
}

impl Observer {
    /// Creates a new observer with default configuration.
    pub fn new() -> Self {
        Self::with_config(ObserverConfig::default())
    }

    /// Creates a new observer with the given configuration.
    ///
    /// Listeners in `config.listeners` are registered before this returns.
    pub fn with_config(config: ObserverConfig) -> Self {
        let ObserverConfig {
            timer,
            on_destroy,
            after_destroy,
            methods: extra,
            listeners,
        } = config;

        let mut methods = builtin_methods();
        methods.extend(extra);

        let observer = Self {
            inner: Arc::new(Inner {
                timer,
                on_destroy,
                after_destroy,
                methods,
                revoked: Arc::new(AtomicBool::new(false)),
                state: Mutex::new(State {
                    listeners: Some(IndexMap::new()),
                    ..State::default()
                }),
            }),
        };

        if let Some(listeners) = listeners {
            observer.observe_all(listeners);
        }

        observer
    }

    /// Creates a builder for configuring an observer.
    pub fn builder() -> ObserverBuilder {
        ObserverBuilder::new()
    }

    /// Registers a listener.
    ///
    /// `ctx` defaults to this observer. `config` takes any
    /// [`ListenerConfig`] shorthand; pass `()` for none. Invalid
    /// registrations (an unresolvable method name, a destroyed observer) are
    /// logged and ignored.
    pub fn observe(
        &self,
        pattern: &str,
        listener: impl Into<ListenerSpec>,
        ctx: Option<Context>,
        config: impl Into<ListenerConfig>,
    ) -> &Self {
        if let Err(error) = self.register(pattern, listener.into(), ctx, &config.into()) {
            match error {
                ObserverError::Registration(RegistrationError::Destroyed) => {
                    debug!(pattern, "ignoring registration on destroyed observer");
                }
                error => warn!(%error, pattern, "ignoring listener registration"),
            }
        }
        self
    }

    /// Alias for [`observe`](Observer::observe).
    pub fn on(
        &self,
        pattern: &str,
        listener: impl Into<ListenerSpec>,
        ctx: Option<Context>,
        config: impl Into<ListenerConfig>,
    ) -> &Self {
        self.observe(pattern, listener, ctx, config)
    }

    /// Registers every entry of a listener map.
    pub fn observe_all(&self, listeners: ListenerMap) -> &Self {
        for registration in listeners.into_registrations() {
            match registration {
                Ok(registration) => {
                    self.observe(
                        &registration.pattern,
                        registration.listener,
                        registration.ctx,
                        registration.options,
                    );
                }
                Err(key) => {
                    let error = RegistrationError::reserved_key(key);
                    warn!(%error, "skipping listener map entry");
                }
            }
        }
        self
    }

    /// Registers a throttled listener: after firing, it ignores events for
    /// `ms` milliseconds.
    pub fn buffer(
        &self,
        ms: u64,
        pattern: &str,
        listener: impl Into<ListenerSpec>,
        ctx: Option<Context>,
        options: impl Into<ListenerConfig>,
    ) -> &Self {
        let config = options.into().with_option("buffer", Value::from(ms));
        self.observe(pattern, listener, ctx, config)
    }

    /// Registers a listener invoked `ms` milliseconds after each event.
    pub fn delay(
        &self,
        ms: u64,
        pattern: &str,
        listener: impl Into<ListenerSpec>,
        ctx: Option<Context>,
        options: impl Into<ListenerConfig>,
    ) -> &Self {
        let config = options.into().with_option("delay", Value::from(ms));
        self.observe(pattern, listener, ctx, config)
    }

    /// Registers a listener that fires at most once and then removes itself.
    pub fn once(
        &self,
        pattern: &str,
        listener: impl Into<ListenerSpec>,
        ctx: Option<Context>,
        options: impl Into<ListenerConfig>,
    ) -> &Self {
        let config = options.into().with_option("single", Value::Bool(true));
        self.observe(pattern, listener, ctx, config)
    }

    fn register(
        &self,
        pattern: &str,
        listener: ListenerSpec,
        ctx: Option<Context>,
        config: &ListenerConfig,
    ) -> ObserverResult<()> {
        let pattern = Pattern::compile(pattern)?;

        {
            let mut state = self.inner.state.lock();
            let listeners = state
                .listeners
                .as_mut()
                .ok_or(RegistrationError::Destroyed)?;
            listeners
                .entry(pattern.key().to_string())
                .or_insert_with(|| Queue::new(pattern.clone()));
        }

        match listener {
            ListenerSpec::Function(function) => {
                let source = Source::Handler(Arc::clone(&function));
                self.push(&pattern, source, function, ctx, config, false)
            }
            ListenerSpec::FunctionList(functions) => {
                for function in functions {
                    let source = Source::Handler(Arc::clone(&function));
                    self.push(&pattern, source, function, ctx.clone(), config, false)?;
                }
                Ok(())
            }
            ListenerSpec::Capability(target) => {
                let receiver = Arc::clone(&target);
                let trampoline = handler(move |_ctx: &Context, args: &[Arg]| {
                    receiver.handle_event(args)
                });
                let ctx = Context::Target(Arc::clone(&target));
                self.push(&pattern, Source::Target(target), trampoline, Some(ctx), config, false)
            }
            ListenerSpec::MethodName(name) => {
                let (method, ctx, internal) = self.resolve_method(&name, ctx)?;
                let source = Source::Handler(Arc::clone(&method));
                self.push(&pattern, source, method, Some(ctx), config, internal)
            }
        }
    }

    fn push(
        &self,
        pattern: &Pattern,
        source: Source,
        function: HandlerRef,
        ctx: Option<Context>,
        config: &ListenerConfig,
        internal: bool,
    ) -> ObserverResult<()> {
        let ctx = ctx.unwrap_or_else(|| Context::from(self));
        let config = CallbackConfig::normalize(config, ctx, internal);
        let callback = Callback::build(
            pattern.key().to_string(),
            source,
            function,
            config,
            Arc::clone(&self.inner.timer),
            Arc::clone(&self.inner.revoked),
        );

        let mut state = self.inner.state.lock();
        let queue = state
            .listeners
            .as_mut()
            .and_then(|listeners| listeners.get_mut(pattern.key()))
            .ok_or(RegistrationError::Destroyed)?;

        debug!(pattern = pattern.key(), listener = %callback.id(), "listener registered");
        queue.callbacks.push(callback);
        Ok(())
    }

    /// Resolves a method name against `ctx`, or against this observer when
    /// there is no explicit context. Only this observer's own methods are
    /// internal.
    fn resolve_method(
        &self,
        name: &str,
        ctx: Option<Context>,
    ) -> RegistrationResult<(HandlerRef, Context, bool)> {
        let unresolved = || RegistrationError::unresolved_method(name);

        match ctx {
            None => {
                let method = self.method(name).ok_or_else(unresolved)?;
                Ok((method, Context::from(self), true))
            }
            Some(Context::Observer(weak)) => {
                let owner = weak.upgrade().ok_or_else(unresolved)?;
                let method = owner.method(name).ok_or_else(unresolved)?;
                let internal = Observer::ptr_eq(&owner, self);
                Ok((method, Context::Observer(weak), internal))
            }
            Some(Context::Target(target)) => {
                let method = target.method(name).ok_or_else(unresolved)?;
                Ok((method, Context::Target(target), false))
            }
            Some(Context::Value(_)) => Err(unresolved()),
        }
    }

    /// Returns the method registered under `name`.
    pub fn method(&self, name: &str) -> Option<HandlerRef> {
        self.inner.methods.get(name).cloned()
    }

    /// Removes one listener from the queue of exactly `pattern`.
    ///
    /// Functions and method names match listeners registered with the same
    /// function and context (`ctx` defaults to this observer); capabilities
    /// match by object; ids match one specific listener. At most one listener
    /// is removed and its pending timers are cancelled.
    pub fn ignore(&self, pattern: &str, listener: impl Into<ListenerKey>, ctx: Option<Context>) -> &Self {
        let key = normalize(pattern);

        let matcher: Box<dyn Fn(&Callback) -> bool> = match listener.into() {
            ListenerKey::Function(function) => {
                let ctx = ctx.unwrap_or_else(|| Context::from(self));
                Box::new(move |callback: &Callback| callback.is_registration(&function, &ctx))
            }
            ListenerKey::MethodName(name) => match self.resolve_method(&name, ctx) {
                Ok((method, ctx, _)) => {
                    Box::new(move |callback: &Callback| callback.is_registration(&method, &ctx))
                }
                Err(error) => {
                    debug!(%error, pattern, "nothing to ignore");
                    return self;
                }
            },
            ListenerKey::Capability(target) => {
                Box::new(move |callback: &Callback| callback.is_target(&target))
            }
            ListenerKey::Id(id) => Box::new(move |callback: &Callback| callback.id() == id),
        };

        let removed = {
            let mut state = self.inner.state.lock();
            state
                .listeners
                .as_mut()
                .and_then(|listeners| listeners.get_mut(&key))
                .and_then(|queue| {
                    let index = queue
                        .callbacks
                        .iter()
                        .position(|callback| matcher(callback.as_ref()))?;
                    Some(queue.callbacks.remove(index))
                })
        };

        if let Some(callback) = removed {
            callback.dispose();
            debug!(pattern = %key, listener = %callback.id(), "listener removed");
        }

        self
    }

    /// Alias for [`ignore`](Observer::ignore).
    pub fn off(&self, pattern: &str, listener: impl Into<ListenerKey>, ctx: Option<Context>) -> &Self {
        self.ignore(pattern, listener, ctx)
    }

    /// Notifies every listener whose pattern matches `event`.
    pub fn broadcast(&self, event: &str, args: Vec<Arg>) -> &Self {
        self.dispatch(event, args);
        self
    }

    /// Alias for [`broadcast`](Observer::broadcast).
    pub fn trigger(&self, event: &str, args: Vec<Arg>) -> &Self {
        self.broadcast(event, args)
    }

    /// Broadcasts `event` and reports how the dispatch ended.
    pub fn dispatch(&self, event: &str, args: Vec<Arg>) -> DispatchOutcome {
        if event.is_empty() {
            return DispatchOutcome::Skipped;
        }

        let event = normalize(event);
        let snapshot = {
            let state = self.inner.state.lock();
            if state.destroyed || state.suspended {
                trace!(event = %event, "broadcast skipped");
                return DispatchOutcome::Skipped;
            }
            state.collect(&event)
        };

        if snapshot.is_empty() {
            return DispatchOutcome::Completed;
        }

        let _scope = BroadcastScope::enter(&self.inner, event.clone());
        trace!(event = %event, listeners = snapshot.len(), "broadcasting");

        for callback in snapshot {
            let flow = callback.handle_event(self.shape_args(&callback, &args));

            if callback.is_single() {
                self.remove_spent(&callback);
            }

            if flow.is_stop() {
                trace!(event = %event, listener = %callback.id(), "propagation stopped");
                return DispatchOutcome::Stopped;
            }
        }

        DispatchOutcome::Completed
    }

    /// Puts this observer first for ordinary listeners and strips it for
    /// internal ones.
    fn shape_args(&self, callback: &Callback, args: &[Arg]) -> Vec<Arg> {
        let leads_with_self = args.first().is_some_and(|arg| arg.is_observer(self));

        if callback.is_internal() {
            if leads_with_self {
                return args[1..].to_vec();
            }
            return args.to_vec();
        }

        if leads_with_self {
            return args.to_vec();
        }

        let mut shaped = Vec::with_capacity(args.len() + 1);
        shaped.push(Arg::from(self));
        shaped.extend_from_slice(args);
        shaped
    }

    /// Drops a fired single-use listener from its queue. Its pending delay,
    /// if any, still runs.
    fn remove_spent(&self, callback: &Arc<Callback>) {
        let mut state = self.inner.state.lock();
        if let Some(queue) = state
            .listeners
            .as_mut()
            .and_then(|listeners| listeners.get_mut(callback.pattern()))
        {
            queue.callbacks.retain(|candidate| !Arc::ptr_eq(candidate, callback));
        }
    }

    /// Stops delivering events, broadcasting `observer:suspended` first.
    pub fn suspend_events(&self) -> &Self {
        if !self.is_suspended() {
            self.broadcast(SUSPENDED_EVENT, Vec::new());
            self.inner.state.lock().suspended = true;
            debug!("events suspended");
        }
        self
    }

    /// Resumes delivering events and broadcasts `observer:resumed`.
    pub fn resume_events(&self) -> &Self {
        let was_suspended = {
            let mut state = self.inner.state.lock();
            !state.destroyed && std::mem::replace(&mut state.suspended, false)
        };

        if was_suspended {
            debug!("events resumed");
            self.broadcast(RESUMED_EVENT, Vec::new());
        }
        self
    }

    /// Forwards events matching each pattern to `target`.
    ///
    /// The target broadcasts the pattern itself with the original arguments,
    /// minus the leading reference to this observer, so its own listeners see
    /// the target first.
    pub fn relay_events<I, S>(&self, target: &Observer, patterns: I) -> &Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let source = self.downgrade();
            let event = pattern.to_string();

            let relay = handler(move |ctx: &Context, args: &[Arg]| {
                let Some(target) = ctx.observer() else {
                    return;
                };

                let forwarded = match args.split_first() {
                    Some((Arg::Observer(first), rest)) if source.is(first) => rest.to_vec(),
                    _ => args.to_vec(),
                };
                target.broadcast(&event, forwarded);
            });

            debug!(pattern, "relaying events");
            self.observe(pattern, relay, Some(Context::from(target)), ());
        }
        self
    }

    /// Removes every listener of `pattern`, or of every pattern when `None`,
    /// cancelling their pending timers.
    pub fn purge_observers(&self, pattern: Option<&str>) -> &Self {
        let removed: Vec<Arc<Callback>> = {
            let mut state = self.inner.state.lock();
            match (state.listeners.as_mut(), pattern) {
                (None, _) => Vec::new(),
                (Some(listeners), Some(pattern)) => listeners
                    .get_mut(&normalize(pattern))
                    .map(|queue| std::mem::take(&mut queue.callbacks))
                    .unwrap_or_default(),
                (Some(listeners), None) => std::mem::take(listeners)
                    .into_values()
                    .flat_map(|queue| queue.callbacks)
                    .collect(),
            }
        };

        debug!(pattern = pattern.unwrap_or("*"), removed = removed.len(), "listeners purged");
        for callback in removed {
            callback.dispose();
        }
        self
    }

    /// Destroys the observer, returning `false` if a `before:destroy`
    /// listener vetoed it.
    ///
    /// Destroying twice is a no-op returning `true`, and so is a nested call
    /// made while a destroy is already under way.
    pub fn destroy(&self) -> bool {
        self.try_destroy().is_ok()
    }

    /// Destroys the observer, reporting a veto as an error.
    pub fn try_destroy(&self) -> ObserverResult<()> {
        {
            let mut state = self.inner.state.lock();
            if state.destroyed || state.destroying || state.closing {
                return Ok(());
            }
            state.closing = true;
        }

        let vetoed = self.dispatch(BEFORE_DESTROY_EVENT, Vec::new()).is_stopped();
        {
            let mut state = self.inner.state.lock();
            state.closing = false;
            state.destroying = !vetoed;
        }

        if vetoed {
            debug!("destroy vetoed");
            return Err(ObserverError::Vetoed);
        }

        if let Some(hook) = &self.inner.on_destroy {
            hook(self);
        }

        self.broadcast(DESTROY_EVENT, Vec::new());

        let released = {
            let mut state = self.inner.state.lock();
            state.suspended = true;
            state.destroying = false;
            state.destroyed = true;
            state.listeners.take()
        };
        self.inner.revoked.store(true, Ordering::Release);

        for queue in released.into_iter().flat_map(IndexMap::into_values) {
            for callback in queue.callbacks {
                callback.dispose();
            }
        }

        if let Some(hook) = &self.inner.after_destroy {
            hook(self);
        }

        debug!("observer destroyed");
        Ok(())
    }

    /// Returns the listeners a broadcast of `event` would notify, in
    /// notification order.
    pub fn get_listeners(&self, event: &str) -> Vec<Arc<Callback>> {
        let event = normalize(event);
        self.inner.state.lock().collect(&event)
    }

    /// Returns the number of listeners stored under exactly `pattern`.
    pub fn listener_count(&self, pattern: &str) -> usize {
        let state = self.inner.state.lock();
        state
            .listeners
            .as_ref()
            .and_then(|listeners| listeners.get(&normalize(pattern)))
            .map_or(0, |queue| queue.callbacks.len())
    }

    /// Returns the registered patterns in registration order.
    pub fn patterns(&self) -> Vec<String> {
        let state = self.inner.state.lock();
        state
            .listeners
            .as_ref()
            .map(|listeners| listeners.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns whether events are suspended.
    pub fn is_suspended(&self) -> bool {
        self.inner.state.lock().suspended
    }

    /// Returns whether the observer has been destroyed.
    pub fn is_destroyed(&self) -> bool {
        self.inner.state.lock().destroyed
    }

    /// Returns whether a destroy is in progress.
    pub fn is_destroying(&self) -> bool {
        self.inner.state.lock().destroying
    }

    /// Returns the innermost event currently being broadcast.
    pub fn broadcasting(&self) -> Option<String> {
        self.inner.state.lock().broadcasting.clone()
    }

    /// Returns a non-owning reference to this observer.
    pub fn downgrade(&self) -> WeakObserver {
        WeakObserver {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Returns whether both handles refer to the same observer.
    pub fn ptr_eq(a: &Observer, b: &Observer) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Returns the address of this observer.
    pub fn as_ptr(&self) -> *const () {
        Arc::as_ptr(&self.inner) as *const ()
    }
}

impl Default for Observer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Observer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Observer")
            .field("ptr", &self.as_ptr())
            .field("patterns", &state.listeners.as_ref().map_or(0, IndexMap::len))
            .field("broadcasting", &state.broadcasting)
            .field("suspended", &state.suspended)
            .field("destroyed", &state.destroyed)
            .finish()
    }
}

/// Skips a leading observer reference, which listeners registered against
/// another observer receive first.
fn payload(args: &[Arg]) -> &[Arg] {
    match args.first() {
        Some(Arg::Observer(_)) => &args[1..],
        _ => args,
    }
}

/// Observer operations listeners can be registered by name. They act on the
/// observer in their context.
fn builtin_methods() -> HashMap<String, HandlerRef> {
    let broadcast = handler(|ctx: &Context, args: &[Arg]| {
        let Some(observer) = ctx.observer() else {
            return;
        };
        if let Some((event, rest)) = payload(args).split_first() {
            match event.as_str() {
                Some(event) => {
                    observer.broadcast(event, rest.to_vec());
                }
                None => warn!(?event, "broadcast method needs an event name"),
            }
        }
    });

    let suspend = handler(|ctx: &Context, _args: &[Arg]| {
        if let Some(observer) = ctx.observer() {
            observer.suspend_events();
        }
    });

    let resume = handler(|ctx: &Context, _args: &[Arg]| {
        if let Some(observer) = ctx.observer() {
            observer.resume_events();
        }
    });

    let purge = handler(|ctx: &Context, args: &[Arg]| {
        if let Some(observer) = ctx.observer() {
            let pattern = payload(args).first().and_then(Arg::as_str);
            observer.purge_observers(pattern);
        }
    });

    let destroy = handler(|ctx: &Context, _args: &[Arg]| {
        if let Some(observer) = ctx.observer() {
            observer.destroy();
        }
    });

    HashMap::from([
        ("broadcast".to_string(), Arc::clone(&broadcast)),
        ("trigger".to_string(), broadcast),
        ("suspend_events".to_string(), suspend),
        ("resume_events".to_string(), resume),
        ("purge_observers".to_string(), purge),
        ("destroy".to_string(), destroy),
    ])
}
