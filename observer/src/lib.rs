//! # Observer - Pattern-Matched Event Hub for Rust
//!
//! Observer is a synchronous publish/subscribe hub. Listeners subscribe to
//! event-name patterns, optionally containing `*` wildcards, and are notified
//! in registration order whenever a matching event is broadcast.
//!
//! ## Features
//!
//! - **Wildcard Patterns**: `user:*` matches `user:login` and `user:logout`,
//!   case-insensitively
//! - **Invocation Policies**: single-fire, delayed and throttled listeners,
//!   plus fixed leading arguments
//! - **Stop Propagation**: a listener returning `false` halts a broadcast
//! - **Lifecycle**: suspend/resume, vetoable destroy, relaying to other
//!   observers
//! - **Deterministic Tests**: swap the timer service for a virtual clock
//!
//! ## Quick Start
//!
//! ```rust
//! use observer::{args, handler, Arg, Observer};
//!
//! let observer = Observer::new();
//!
//! observer.on("user:*", handler(|_ctx, args: &[Arg]| {
//!     println!("user event: {:?}", &args[1..]);
//! }), None, ());
//!
//! observer.once("user:login", handler(|_ctx, _args| {
//!     println!("first login");
//! }), None, ());
//!
//! observer
//!     .broadcast("user:login", args!["alice"])
//!     .broadcast("user:login", args!["bob"]);
//!
//! // Vetoing a destroy keeps the observer alive.
//! observer.on("before:destroy", handler(|_, _| false), None, ());
//! assert!(!observer.destroy());
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_inception)]

pub mod callback;
pub mod config;
pub mod error;
pub mod handler;
pub mod observer;
pub mod pattern;
pub mod registration;
pub mod testing;
pub mod timer;

pub use callback::{Callback, CallbackState};
pub use config::{merge, CallbackConfig, ListenerConfig, ListenerOptions};
pub use error::*;
pub use handler::{handler, Arg, Context, EventTarget, Flow, Handler, HandlerRef, ListenerId};
pub use crate::observer::{
    DestroyHook, DispatchOutcome, Observer, ObserverBuilder, ObserverConfig, WeakObserver,
    BEFORE_DESTROY_EVENT, DESTROY_EVENT, RESUMED_EVENT, SUSPENDED_EVENT,
};
pub use pattern::Pattern;
pub use registration::{ListenerKey, ListenerMap, ListenerSpec, MapEntry};
pub use timer::{SharedTimer, SystemTimer, TimerHandle, TimerService, TimerTask};

/// Builds a `Vec<Arg>` from values convertible into [`Arg`].
///
/// ```rust
/// use observer::{args, Arg};
///
/// let args = args![1, "two", true];
/// assert_eq!(args[1], Arg::from("two"));
/// ```
#[macro_export]
macro_rules! args {
    () => {
        ::std::vec::Vec::<$crate::Arg>::new()
    };
    ($($arg:expr),+ $(,)?) => {
        ::std::vec![$($crate::Arg::from($arg)),+]
    };
}

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::args;
    pub use crate::error::{ObserverError, ObserverResult};
    pub use crate::{handler, Arg, Context, EventTarget, Flow, HandlerRef};
    pub use crate::{DispatchOutcome, Observer, ObserverBuilder, ObserverConfig};
    pub use crate::{ListenerConfig, ListenerKey, ListenerMap, ListenerOptions, ListenerSpec};
    pub use crate::{SharedTimer, SystemTimer, TimerService};
}

/// Version information for the Observer library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_functionality() {
        let observer = Observer::new();
        let recorder = testing::Recorder::new();

        observer.on("greeting", recorder.handler(), None, ());
        observer.trigger("greeting", args!["hello"]);

        assert_eq!(recorder.last_args(), Some(args![observer.clone(), "hello"]));
    }

    #[test]
    fn test_empty_args_macro() {
        let args: Vec<Arg> = args![];
        assert!(args.is_empty());
    }
}
