//! Testing utilities for observer-based code.
//!
//! [`ManualClock`] is a virtual [`TimerService`]: nothing it schedules runs
//! until the test calls [`ManualClock::advance`], which makes delay and
//! buffer behavior deterministic. [`Recorder`] is a listener that records
//! every invocation for later assertions.
//!
//! # Examples
//!
//! ```rust
//! use observer::testing::{ManualClock, Recorder};
//! use observer::{args, Observer};
//! use std::time::Duration;
//!
//! let clock = ManualClock::new();
//! let observer = Observer::builder().with_timer(clock.shared()).build();
//! let recorder = Recorder::new();
//!
//! observer.delay(100, "saved", recorder.handler(), None, ());
//! observer.broadcast("saved", args![1]);
//! assert_eq!(recorder.count(), 0);
//!
//! clock.advance(Duration::from_millis(100));
//! recorder.assert_called_times(1);
//! ```

use crate::handler::{Arg, Context, Flow, HandlerRef};
use crate::timer::{SharedTimer, TimerHandle, TimerService, TimerTask};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct ClockState {
    now: Duration,
    next: u64,
    queue: BTreeMap<(Duration, u64), TimerTask>,
    deadlines: HashMap<u64, Duration>,
}

/// A deterministic virtual clock.
///
/// Clones share the same timeline. Tasks become due once the clock has been
/// advanced to or past their deadline and run in deadline order, ties in the
/// order they were scheduled.
#[derive(Clone, Default)]
pub struct ManualClock {
    state: Arc<Mutex<ClockState>>,
}

impl ManualClock {
    /// Creates a clock at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns this clock as a shared timer service.
    pub fn shared(&self) -> SharedTimer {
        Arc::new(self.clone())
    }

    /// Returns the virtual time elapsed since creation.
    pub fn now(&self) -> Duration {
        self.state.lock().now
    }

    /// Returns the number of scheduled tasks that have not run yet.
    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Moves the clock forward, running every task that falls due.
    ///
    /// Tasks scheduled by running tasks also run if they fall inside the
    /// window.
    pub fn advance(&self, by: Duration) {
        let target = self.state.lock().now + by;

        loop {
            let task = {
                let mut state = self.state.lock();
                let due = match state.queue.first_key_value() {
                    Some((&(deadline, id), _)) if deadline <= target => (deadline, id),
                    _ => break,
                };

                state.now = due.0;
                state.deadlines.remove(&due.1);
                state.queue.remove(&due)
            };

            if let Some(task) = task {
                task();
            }
        }

        self.state.lock().now = target;
    }
}

impl TimerService for ManualClock {
    fn after(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let mut state = self.state.lock();
        state.next += 1;

        let id = state.next;
        let deadline = state.now + delay;
        state.queue.insert((deadline, id), task);
        state.deadlines.insert(id, deadline);

        TimerHandle::new(id)
    }

    fn cancel(&self, handle: TimerHandle) {
        let mut state = self.state.lock();
        if let Some(deadline) = state.deadlines.remove(&handle.value()) {
            state.queue.remove(&(deadline, handle.value()));
        }
    }
}

impl std::fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ManualClock")
            .field("now", &state.now)
            .field("pending", &state.queue.len())
            .finish()
    }
}

/// One recorded listener invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// The context the listener ran against.
    pub context: Context,
    /// The arguments it received.
    pub args: Vec<Arg>,
}

/// A listener that records its invocations.
///
/// [`handler`](Recorder::handler) always returns the same handle, so a
/// recorder can be registered and later removed with `ignore`.
#[derive(Clone)]
pub struct Recorder {
    calls: Arc<Mutex<Vec<Invocation>>>,
    handler: HandlerRef,
}

impl Recorder {
    /// Creates a recorder whose listener lets propagation continue.
    pub fn new() -> Self {
        Self::returning(Flow::Continue)
    }

    /// Creates a recorder whose listener always returns `flow`.
    pub fn returning(flow: Flow) -> Self {
        let calls: Arc<Mutex<Vec<Invocation>>> = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&calls);

        let handler: HandlerRef = Arc::new(move |context: &Context, args: &[Arg]| {
            recorded.lock().push(Invocation {
                context: context.clone(),
                args: args.to_vec(),
            });
            flow
        });

        Self { calls, handler }
    }

    /// Returns the recording listener.
    pub fn handler(&self) -> HandlerRef {
        Arc::clone(&self.handler)
    }

    /// Returns every invocation so far.
    pub fn invocations(&self) -> Vec<Invocation> {
        self.calls.lock().clone()
    }

    /// Returns the arguments of every invocation so far.
    pub fn calls(&self) -> Vec<Vec<Arg>> {
        self.calls.lock().iter().map(|call| call.args.clone()).collect()
    }

    /// Returns the number of invocations so far.
    pub fn count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Returns the arguments of the most recent invocation.
    pub fn last_args(&self) -> Option<Vec<Arg>> {
        self.calls.lock().last().map(|call| call.args.clone())
    }

    /// Forgets every recorded invocation.
    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    /// Asserts that the listener ran exactly `expected` times.
    pub fn assert_called_times(&self, expected: usize) {
        let count = self.count();
        assert_eq!(
            count, expected,
            "Expected {} invocations, but found {}",
            expected, count
        );
    }

    /// Asserts that the listener never ran.
    pub fn assert_not_called(&self) {
        self.assert_called_times(0);
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("calls", &self.count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_clock_runs_due_tasks_in_order() {
        let clock = ManualClock::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for (delay, label) in [(30, "c"), (10, "a"), (20, "b"), (10, "a2")] {
            let order = Arc::clone(&order);
            clock.after(
                Duration::from_millis(delay),
                Box::new(move || order.lock().push(label)),
            );
        }

        clock.advance(Duration::from_millis(20));
        assert_eq!(*order.lock(), vec!["a", "a2", "b"]);
        assert_eq!(clock.now(), Duration::from_millis(20));

        clock.advance(Duration::from_millis(10));
        assert_eq!(*order.lock(), vec!["a", "a2", "b", "c"]);
    }

    #[test]
    fn test_clock_cancel() {
        let clock = ManualClock::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_clone = Arc::clone(&runs);

        let handle = clock.after(
            Duration::from_millis(5),
            Box::new(move || {
                runs_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        clock.cancel(handle);
        clock.advance(Duration::from_millis(10));

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(clock.pending(), 0);
    }

    #[test]
    fn test_tasks_scheduled_while_advancing() {
        let clock = ManualClock::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let inner_clock = clock.clone();
        let inner_runs = Arc::clone(&runs);
        clock.after(
            Duration::from_millis(5),
            Box::new(move || {
                inner_runs.fetch_add(1, Ordering::SeqCst);
                let again = Arc::clone(&inner_runs);
                inner_clock.after(
                    Duration::from_millis(5),
                    Box::new(move || {
                        again.fetch_add(1, Ordering::SeqCst);
                    }),
                );
            }),
        );

        clock.advance(Duration::from_millis(10));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_recorder_keeps_one_handler() {
        let recorder = Recorder::returning(Flow::Stop);
        let handler = recorder.handler();

        assert!(Arc::ptr_eq(&handler, &recorder.handler()));
        assert_eq!(
            handler.call(&Context::value(()), &[Arg::from(1)]),
            Flow::Stop
        );
        assert_eq!(recorder.last_args(), Some(vec![Arg::from(1)]));

        recorder.clear();
        recorder.assert_not_called();
    }
}
