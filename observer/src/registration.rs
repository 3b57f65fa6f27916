//! The shapes a listener registration can take.
//!
//! A listener handed to [`Observer::observe`](crate::Observer::observe) is one
//! of the closed set of [`ListenerSpec`] variants; the observer resolves it once,
//! at registration time, into a uniform [`Callback`](crate::Callback).
//! [`ListenerMap`] bundles many registrations sharing a context and options.

use crate::callback::Callback;
use crate::config::ListenerConfig;
use crate::handler::{Context, EventTarget, HandlerRef, ListenerId};
use std::sync::Arc;

/// Keys of a listener map that hold shared defaults rather than patterns.
pub const RESERVED_KEYS: [&str; 2] = ["ctx", "options"];

/// A listener value as accepted by `observe`.
#[derive(Clone)]
pub enum ListenerSpec {
    /// A single function.
    Function(HandlerRef),
    /// Several functions, each registered separately with the same pattern,
    /// context and options.
    FunctionList(Vec<HandlerRef>),
    /// An object receiving events through [`EventTarget::handle_event`]. The
    /// object becomes the listener's context.
    Capability(Arc<dyn EventTarget>),
    /// The name of a method, resolved against the explicit context or, when
    /// there is none, against the owning observer.
    MethodName(String),
}

impl ListenerSpec {
    /// Wraps an event target as a capability listener.
    pub fn capability<T: EventTarget>(target: Arc<T>) -> Self {
        ListenerSpec::Capability(target)
    }
}

impl From<HandlerRef> for ListenerSpec {
    fn from(handler: HandlerRef) -> Self {
        ListenerSpec::Function(handler)
    }
}

impl From<&HandlerRef> for ListenerSpec {
    fn from(handler: &HandlerRef) -> Self {
        ListenerSpec::Function(Arc::clone(handler))
    }
}

impl From<Vec<HandlerRef>> for ListenerSpec {
    fn from(handlers: Vec<HandlerRef>) -> Self {
        ListenerSpec::FunctionList(handlers)
    }
}

impl From<Arc<dyn EventTarget>> for ListenerSpec {
    fn from(target: Arc<dyn EventTarget>) -> Self {
        ListenerSpec::Capability(target)
    }
}

impl From<&str> for ListenerSpec {
    fn from(name: &str) -> Self {
        ListenerSpec::MethodName(name.to_string())
    }
}

impl From<String> for ListenerSpec {
    fn from(name: String) -> Self {
        ListenerSpec::MethodName(name)
    }
}

/// Identifies a registered listener for removal.
#[derive(Clone)]
pub enum ListenerKey {
    /// The function a listener was registered with, matched together with
    /// its context.
    Function(HandlerRef),
    /// The event target a capability listener was registered with.
    Capability(Arc<dyn EventTarget>),
    /// A method name, resolved the same way as on registration.
    MethodName(String),
    /// The id of one specific listener.
    Id(ListenerId),
}

impl ListenerKey {
    /// Wraps an event target as a removal key.
    pub fn capability<T: EventTarget>(target: Arc<T>) -> Self {
        ListenerKey::Capability(target)
    }
}

impl From<HandlerRef> for ListenerKey {
    fn from(handler: HandlerRef) -> Self {
        ListenerKey::Function(handler)
    }
}

impl From<&HandlerRef> for ListenerKey {
    fn from(handler: &HandlerRef) -> Self {
        ListenerKey::Function(Arc::clone(handler))
    }
}

impl From<Arc<dyn EventTarget>> for ListenerKey {
    fn from(target: Arc<dyn EventTarget>) -> Self {
        ListenerKey::Capability(target)
    }
}

impl From<&str> for ListenerKey {
    fn from(name: &str) -> Self {
        ListenerKey::MethodName(name.to_string())
    }
}

impl From<String> for ListenerKey {
    fn from(name: String) -> Self {
        ListenerKey::MethodName(name)
    }
}

impl From<ListenerId> for ListenerKey {
    fn from(id: ListenerId) -> Self {
        ListenerKey::Id(id)
    }
}

impl From<&Arc<Callback>> for ListenerKey {
    fn from(callback: &Arc<Callback>) -> Self {
        ListenerKey::Id(callback.id())
    }
}

/// One value of a [`ListenerMap`].
#[derive(Clone)]
pub enum MapEntry {
    /// A bare listener using the map's shared context and options.
    Listener(ListenerSpec),
    /// A listener with its own context and/or options.
    Detailed {
        /// The listener.
        listener: ListenerSpec,
        /// Overrides the map's shared context.
        ctx: Option<Context>,
        /// Replaces the map's shared options.
        options: Option<ListenerConfig>,
    },
}

/// A batch of registrations keyed by pattern.
///
/// ```rust
/// use observer::{handler, Context, ListenerMap, Observer};
///
/// let ctx = Context::value("shared");
/// let map = ListenerMap::new()
///     .with_ctx(ctx)
///     .on("user:login", handler(|_, _| ()))
///     .on("user:*", vec![handler(|_, _| ()), handler(|_, _| ())]);
///
/// let observer = Observer::new();
/// observer.observe_all(map);
/// assert_eq!(observer.get_listeners("user:login").len(), 3);
/// ```
#[derive(Clone, Default)]
pub struct ListenerMap {
    ctx: Option<Context>,
    options: Option<ListenerConfig>,
    entries: Vec<(String, MapEntry)>,
}

impl ListenerMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the context shared by every entry.
    pub fn with_ctx(mut self, ctx: Context) -> Self {
        self.ctx = Some(ctx);
        self
    }

    /// Sets the options shared by every entry.
    pub fn with_options(mut self, options: impl Into<ListenerConfig>) -> Self {
        self.options = Some(options.into());
        self
    }

    /// Adds a bare listener.
    pub fn on(mut self, pattern: impl Into<String>, listener: impl Into<ListenerSpec>) -> Self {
        self.entries
            .push((pattern.into(), MapEntry::Listener(listener.into())));
        self
    }

    /// Adds a listener with its own context and options.
    pub fn on_with(
        mut self,
        pattern: impl Into<String>,
        listener: impl Into<ListenerSpec>,
        ctx: Option<Context>,
        options: Option<ListenerConfig>,
    ) -> Self {
        self.entries.push((
            pattern.into(),
            MapEntry::Detailed {
                listener: listener.into(),
                ctx,
                options,
            },
        ));
        self
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolves every entry to its listener, context and options.
    ///
    /// Entries under a reserved key are returned as errors.
    pub(crate) fn into_registrations(
        self,
    ) -> impl Iterator<Item = Result<Registration, String>> {
        let Self {
            ctx,
            options,
            entries,
        } = self;

        entries.into_iter().map(move |(pattern, entry)| {
            if RESERVED_KEYS.contains(&pattern.as_str()) {
                return Err(pattern);
            }

            let registration = match entry {
                MapEntry::Listener(listener) => Registration {
                    pattern,
                    listener,
                    ctx: ctx.clone(),
                    options: options.clone().unwrap_or_default(),
                },
                MapEntry::Detailed {
                    listener,
                    ctx: own_ctx,
                    options: own_options,
                } => Registration {
                    pattern,
                    listener,
                    ctx: own_ctx.or_else(|| ctx.clone()),
                    options: own_options.or_else(|| options.clone()).unwrap_or_default(),
                },
            };

            Ok(registration)
        })
    }
}

/// A single resolved map entry.
pub(crate) struct Registration {
    pub(crate) pattern: String,
    pub(crate) listener: ListenerSpec,
    pub(crate) ctx: Option<Context>,
    pub(crate) options: ListenerConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler;

    #[test]
    fn test_entries_inherit_shared_defaults() {
        let shared = Context::value("shared");
        let own = Context::value("own");

        let map = ListenerMap::new()
            .with_ctx(shared.clone())
            .with_options(true)
            .on("a", handler(|_, _| ()))
            .on_with("b", handler(|_, _| ()), Some(own.clone()), Some(250_u64.into()));
        assert_eq!(map.len(), 2);

        let registrations: Vec<Registration> =
            map.into_registrations().filter_map(Result::ok).collect();

        assert_eq!(registrations[0].pattern, "a");
        assert!(registrations[0].ctx.as_ref().is_some_and(|ctx| ctx.same(&shared)));
        assert_eq!(registrations[0].options, ListenerConfig::Single(true));

        assert!(registrations[1].ctx.as_ref().is_some_and(|ctx| ctx.same(&own)));
        assert_eq!(registrations[1].options, ListenerConfig::Delay(250));
    }

    #[test]
    fn test_reserved_keys_are_rejected() {
        let map = ListenerMap::new()
            .on("ctx", handler(|_, _| ()))
            .on("options", "destroy")
            .on("fine", "destroy");

        let results: Vec<_> = map.into_registrations().collect();
        assert!(matches!(&results[0], Err(key) if key == "ctx"));
        assert!(matches!(&results[1], Err(key) if key == "options"));
        assert!(results[2].is_ok());
    }

    #[test]
    fn test_listener_conversions() {
        assert!(matches!(ListenerSpec::from("destroy"), ListenerSpec::MethodName(name) if name == "destroy"));
        assert!(matches!(
            ListenerSpec::from(vec![handler(|_, _| ()), handler(|_, _| ())]),
            ListenerSpec::FunctionList(list) if list.len() == 2
        ));
    }
}
