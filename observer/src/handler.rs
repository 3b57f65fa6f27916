//! Listener functions and the values that flow through them.
//!
//! A listener is any function of `(&Context, &[Arg])` returning something
//! convertible into a [`Flow`]. Listeners are stored behind a shared
//! [`HandlerRef`], whose pointer identity is what [`Observer::ignore`] uses to
//! find them again.
//!
//! [`Observer::ignore`]: crate::Observer::ignore

use crate::observer::{Observer, WeakObserver};
use serde_json::Value;
use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Unique identifier of a registered listener.
///
/// Every [`Callback`](crate::Callback) receives one on construction. Ids can be
/// read from a [`get_listeners`](crate::Observer::get_listeners) snapshot and
/// handed back to `ignore` to remove that exact listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Creates a new unique listener ID.
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the numeric value of this listener ID.
    pub fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ListenerId({})", self.0)
    }
}

/// A single broadcast argument.
///
/// Observers travel by reference and compare by identity; everything else is
/// a JSON value.
#[derive(Clone)]
pub enum Arg {
    /// A reference to an observer, usually the one that fired the event.
    Observer(Observer),
    /// Any other value.
    Value(Value),
}

impl Arg {
    /// Returns the observer this argument refers to, if any.
    pub fn as_observer(&self) -> Option<&Observer> {
        match self {
            Arg::Observer(observer) => Some(observer),
            Arg::Value(_) => None,
        }
    }

    /// Returns the JSON value of this argument, if it is not an observer.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Arg::Observer(_) => None,
            Arg::Value(value) => Some(value),
        }
    }

    /// Returns the boolean value of this argument, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        self.as_value().and_then(Value::as_bool)
    }

    /// Returns the string value of this argument, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        self.as_value().and_then(Value::as_str)
    }

    /// Returns the integer value of this argument, if it is one.
    pub fn as_i64(&self) -> Option<i64> {
        self.as_value().and_then(Value::as_i64)
    }

    /// Returns the floating point value of this argument, if it is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        self.as_value().and_then(Value::as_f64)
    }

    /// Returns whether this argument is a reference to `observer`.
    pub fn is_observer(&self, observer: &Observer) -> bool {
        self.as_observer()
            .is_some_and(|candidate| Observer::ptr_eq(candidate, observer))
    }
}

impl PartialEq for Arg {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Arg::Observer(a), Arg::Observer(b)) => Observer::ptr_eq(a, b),
            (Arg::Value(a), Arg::Value(b)) => a == b,
            _ => false,
        }
    }
}

impl std::fmt::Debug for Arg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Arg::Observer(observer) => write!(f, "Observer({:p})", observer.as_ptr()),
            Arg::Value(value) => write!(f, "{value}"),
        }
    }
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Arg::Value(value)
    }
}

impl From<Observer> for Arg {
    fn from(observer: Observer) -> Self {
        Arg::Observer(observer)
    }
}

impl From<&Observer> for Arg {
    fn from(observer: &Observer) -> Self {
        Arg::Observer(observer.clone())
    }
}

macro_rules! impl_arg_from_json {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Arg {
                fn from(value: $ty) -> Self {
                    Arg::Value(Value::from(value))
                }
            }
        )*
    };
}

impl_arg_from_json!(bool, i32, i64, u32, u64, f64, &str, String);

/// The signal a listener hands back to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flow {
    /// Keep notifying the remaining listeners.
    #[default]
    Continue,
    /// Stop propagation: no further listener sees this broadcast.
    Stop,
}

impl Flow {
    /// Returns whether this signal stops propagation.
    pub fn is_stop(self) -> bool {
        self == Flow::Stop
    }
}

impl From<()> for Flow {
    fn from(_: ()) -> Self {
        Flow::Continue
    }
}

/// Only an explicit `false` stops propagation.
impl From<bool> for Flow {
    fn from(value: bool) -> Self {
        if value {
            Flow::Continue
        } else {
            Flow::Stop
        }
    }
}

impl From<Option<bool>> for Flow {
    fn from(value: Option<bool>) -> Self {
        value.map(Flow::from).unwrap_or_default()
    }
}

/// Trait for objects that receive events directly.
///
/// Registering an `EventTarget` makes the object itself the listener's
/// context and forwards every invocation to [`handle_event`]. Targets may
/// also expose named methods, which registrations can refer to by string.
///
/// [`handle_event`]: EventTarget::handle_event
pub trait EventTarget: Send + Sync + 'static {
    /// Handles an event delivered to this target.
    fn handle_event(&self, args: &[Arg]) -> Flow;

    /// Resolves a named method of this target.
    ///
    /// Return the same `HandlerRef` on every call if registrations made by
    /// name should be removable by name.
    fn method(&self, _name: &str) -> Option<HandlerRef> {
        None
    }
}

/// The value a listener executes against.
#[derive(Clone)]
pub enum Context {
    /// An observer, held weakly so an observer can be its own listeners'
    /// context without keeping itself alive.
    Observer(WeakObserver),
    /// An arbitrary shared value.
    Value(Arc<dyn Any + Send + Sync>),
    /// An event target.
    Target(Arc<dyn EventTarget>),
}

impl Context {
    /// Wraps an arbitrary value as a context.
    pub fn value<T: Any + Send + Sync>(value: T) -> Self {
        Context::Value(Arc::new(value))
    }

    /// Wraps an event target as a context.
    pub fn target<T: EventTarget>(target: Arc<T>) -> Self {
        Context::Target(target)
    }

    /// Returns the observer this context refers to, if it is still alive.
    pub fn observer(&self) -> Option<Observer> {
        match self {
            Context::Observer(weak) => weak.upgrade(),
            _ => None,
        }
    }

    /// Downcasts a value context.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Context::Value(value) => value.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Returns whether both contexts refer to the same object.
    pub fn same(&self, other: &Context) -> bool {
        match (self, other) {
            (Context::Observer(a), Context::Observer(b)) => WeakObserver::ptr_eq(a, b),
            (Context::Value(a), Context::Value(b)) => {
                Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
            }
            (Context::Target(a), Context::Target(b)) => {
                Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
            }
            _ => false,
        }
    }

    /// Returns whether this context is the given observer.
    pub fn is_observer(&self, observer: &Observer) -> bool {
        match self {
            Context::Observer(weak) => weak.is(observer),
            _ => false,
        }
    }
}

impl From<&Observer> for Context {
    fn from(observer: &Observer) -> Self {
        Context::Observer(observer.downgrade())
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Context::Observer(weak) => write!(f, "Context::Observer({:p})", weak.as_ptr()),
            Context::Value(value) => write!(f, "Context::Value({:p})", Arc::as_ptr(value)),
            Context::Target(target) => write!(f, "Context::Target({:p})", Arc::as_ptr(target)),
        }
    }
}

/// Trait for listener functions.
///
/// Implemented for every closure of `(&Context, &[Arg])` whose return value
/// converts into a [`Flow`]: `()`, `bool`, `Option<bool>` or `Flow` itself.
pub trait Handler: Send + Sync + 'static {
    /// Invokes the listener.
    fn call(&self, context: &Context, args: &[Arg]) -> Flow;

    /// Returns the name of this handler for logging.
    fn handler_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

impl<F, R> Handler for F
where
    F: Fn(&Context, &[Arg]) -> R + Send + Sync + 'static,
    R: Into<Flow>,
{
    fn call(&self, context: &Context, args: &[Arg]) -> Flow {
        self(context, args).into()
    }
}

/// Shared handle to a listener function.
pub type HandlerRef = Arc<dyn Handler>;

/// Wraps a closure into a [`HandlerRef`].
///
/// Keep a clone of the returned handle to remove the listener later.
///
/// ```rust
/// use observer::{handler, Flow};
///
/// let stop = handler(|_ctx, _args| Flow::Stop);
/// let log = handler(|_ctx, args| println!("{args:?}"));
/// ```
pub fn handler<F, R>(f: F) -> HandlerRef
where
    F: Fn(&Context, &[Arg]) -> R + Send + Sync + 'static,
    R: Into<Flow>,
{
    Arc::new(f)
}

/// Address used to compare handler identities.
pub(crate) fn handler_addr(handler: &HandlerRef) -> *const () {
    Arc::as_ptr(handler) as *const ()
}

/// Address used to compare target identities.
pub(crate) fn target_addr(target: &Arc<dyn EventTarget>) -> *const () {
    Arc::as_ptr(target) as *const ()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_listener_id_generation() {
        let id1 = ListenerId::new();
        let id2 = ListenerId::new();

        assert_ne!(id1, id2);
        assert!(id2.value() > id1.value());
        assert!(id1.to_string().starts_with("ListenerId("));
    }

    #[test]
    fn test_flow_conversions() {
        assert_eq!(Flow::from(()), Flow::Continue);
        assert_eq!(Flow::from(true), Flow::Continue);
        assert_eq!(Flow::from(false), Flow::Stop);
        assert_eq!(Flow::from(None::<bool>), Flow::Continue);
        assert_eq!(Flow::from(Some(false)), Flow::Stop);
    }

    #[test]
    fn test_arg_accessors() {
        assert_eq!(Arg::from(true).as_bool(), Some(true));
        assert_eq!(Arg::from("x").as_str(), Some("x"));
        assert_eq!(Arg::from(7_i64).as_i64(), Some(7));
        assert_eq!(Arg::from(json!({"a": 1})).as_value(), Some(&json!({"a": 1})));
        assert!(Arg::from(1.5_f64).as_observer().is_none());
    }

    #[test]
    fn test_arg_observer_identity() {
        let first = Observer::new();
        let second = Observer::new();

        let arg = Arg::from(&first);
        assert!(arg.is_observer(&first));
        assert!(!arg.is_observer(&second));
        assert_eq!(arg, Arg::from(first.clone()));
        assert_ne!(arg, Arg::from(&second));
    }

    #[test]
    fn test_closure_handler() {
        let double = handler(|_ctx, args: &[Arg]| args.len() == 2);
        let ctx = Context::value(());

        assert_eq!(double.call(&ctx, &[Arg::from(1), Arg::from(2)]), Flow::Continue);
        assert_eq!(double.call(&ctx, &[]), Flow::Stop);
    }

    #[test]
    fn test_context_identity() {
        let shared = Context::value(String::from("ctx"));
        let copy = shared.clone();
        let other = Context::value(String::from("ctx"));

        assert!(shared.same(&copy));
        assert!(!shared.same(&other));
        assert_eq!(shared.downcast_ref::<String>().map(String::as_str), Some("ctx"));
    }

    #[test]
    fn test_observer_context_is_weak() {
        let observer = Observer::new();
        let ctx = Context::from(&observer);

        assert!(ctx.is_observer(&observer));
        assert!(ctx.observer().is_some());

        drop(observer);
        assert!(ctx.observer().is_none());
    }
}
