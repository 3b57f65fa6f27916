//! Timer service used for delayed and throttled listeners.
//!
//! Listeners never sleep themselves: they hand a task to a [`TimerService`]
//! and keep the returned [`TimerHandle`] so the task can be cancelled. The
//! default [`SystemTimer`] runs tasks on the ambient tokio runtime when one is
//! available and on a single scheduler thread otherwise. Tests usually swap in
//! [`ManualClock`](crate::testing::ManualClock) instead.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// Deadline used when `now + delay` does not fit in an [`Instant`].
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// Handle to a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

impl TimerHandle {
    /// Creates a handle from a raw value.
    ///
    /// Timer implementations use this to mint their handles.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value of this handle.
    pub const fn value(self) -> u64 {
        self.0
    }
}

/// A task run once when its timer elapses.
pub type TimerTask = Box<dyn FnOnce() + Send + 'static>;

/// Trait for services that run a task after a delay.
pub trait TimerService: Send + Sync + 'static {
    /// Schedules `task` to run once `delay` has elapsed.
    fn after(&self, delay: Duration, task: TimerTask) -> TimerHandle;

    /// Cancels a scheduled task.
    ///
    /// Cancelling a task that already ran, or was already cancelled, does
    /// nothing.
    fn cancel(&self, handle: TimerHandle);
}

/// Shared handle to a timer service.
pub type SharedTimer = Arc<dyn TimerService>;

#[derive(Debug, Default)]
struct Entry {
    /// Set for tasks queued on the scheduler thread.
    deadline: Option<Instant>,
    #[cfg(feature = "tokio")]
    abort: Option<tokio::task::AbortHandle>,
}

impl Entry {
    fn queued(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            #[cfg(feature = "tokio")]
            abort: None,
        }
    }

    fn abort(&self) {
        #[cfg(feature = "tokio")]
        if let Some(abort) = &self.abort {
            abort.abort();
        }
    }
}

#[derive(Default)]
struct Schedule {
    pending: HashMap<u64, Entry>,
    queue: BTreeMap<(Instant, u64), TimerTask>,
    worker: bool,
    shutdown: bool,
}

#[derive(Default)]
struct Shared {
    schedule: Mutex<Schedule>,
    wakeup: Condvar,
}

impl Shared {
    /// Scheduler thread body. Runs due tasks in deadline order until the
    /// owning timer is dropped.
    fn run(&self) {
        let mut schedule = self.schedule.lock();

        while !schedule.shutdown {
            let next = schedule.queue.first_key_value().map(|(key, _)| *key);

            match next {
                Some((deadline, id)) if deadline <= Instant::now() => {
                    let task = schedule.queue.remove(&(deadline, id));
                    schedule.pending.remove(&id);

                    if let Some(task) = task {
                        trace!(timer = id, "timer elapsed");
                        MutexGuard::unlocked(&mut schedule, || run_task(id, task));
                    }
                }
                Some((deadline, _)) => {
                    self.wakeup.wait_until(&mut schedule, deadline);
                }
                None => self.wakeup.wait(&mut schedule),
            }
        }

        trace!("timer thread stopped");
    }
}

fn run_task(id: u64, task: TimerTask) {
    if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
        warn!(timer = id, "timer task panicked");
    }
}

/// Wall-clock timer service.
///
/// A task only runs if its entry is still pending when the delay elapses, so
/// cancellation wins every race with an elapsing timer. Without a tokio
/// runtime every task is queued on one scheduler thread, started on first
/// use and stopped when the timer is dropped. Cancelling releases the task
/// right away.
#[derive(Default)]
pub struct SystemTimer {
    next: AtomicU64,
    shared: Arc<Shared>,
}

impl SystemTimer {
    /// Creates a new system timer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of tasks scheduled but not yet run or cancelled.
    pub fn pending(&self) -> usize {
        self.shared.schedule.lock().pending.len()
    }

    #[cfg(feature = "tokio")]
    fn spawn_on_runtime(&self, id: u64, delay: Duration, task: TimerTask) -> Result<(), TimerTask> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return Err(task);
        };

        self.shared
            .schedule
            .lock()
            .pending
            .insert(id, Entry::default());

        let shared = Arc::clone(&self.shared);
        let spawned = runtime.spawn(async move {
            tokio::time::sleep(delay).await;

            let due = shared.schedule.lock().pending.remove(&id).is_some();
            if due {
                trace!(timer = id, "timer elapsed");
                task();
            }
        });

        if let Some(entry) = self.shared.schedule.lock().pending.get_mut(&id) {
            entry.abort = Some(spawned.abort_handle());
        }

        Ok(())
    }

    fn enqueue(&self, id: u64, delay: Duration, task: TimerTask) {
        let now = Instant::now();
        let deadline = now.checked_add(delay).unwrap_or(now + FAR_FUTURE);

        let start_worker = {
            let mut schedule = self.shared.schedule.lock();
            schedule.pending.insert(id, Entry::queued(deadline));
            schedule.queue.insert((deadline, id), task);
            !std::mem::replace(&mut schedule.worker, true)
        };

        if start_worker {
            self.spawn_worker();
        } else {
            self.shared.wakeup.notify_one();
        }
    }

    fn spawn_worker(&self) {
        let shared = Arc::clone(&self.shared);
        let spawned = std::thread::Builder::new()
            .name("observer-timer".to_string())
            .spawn(move || shared.run());

        if let Err(error) = spawned {
            warn!(%error, "failed to spawn timer thread, queued tasks dropped");

            let dropped = {
                let mut schedule = self.shared.schedule.lock();
                schedule.worker = false;
                let queue = std::mem::take(&mut schedule.queue);
                for (_, id) in queue.keys() {
                    schedule.pending.remove(id);
                }
                queue
            };
            drop(dropped);
        }
    }
}

impl TimerService for SystemTimer {
    fn after(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let id = self.next.fetch_add(1, Ordering::Relaxed) + 1;

        #[cfg(feature = "tokio")]
        let task = match self.spawn_on_runtime(id, delay, task) {
            Ok(()) => return TimerHandle(id),
            Err(task) => task,
        };

        self.enqueue(id, delay, task);
        TimerHandle(id)
    }

    fn cancel(&self, handle: TimerHandle) {
        // The task is dropped after the lock is released; its captures may
        // own the last reference to this timer.
        let (entry, task) = {
            let mut schedule = self.shared.schedule.lock();
            let Some(entry) = schedule.pending.remove(&handle.0) else {
                return;
            };
            let task = entry
                .deadline
                .and_then(|deadline| schedule.queue.remove(&(deadline, handle.0)));
            (entry, task)
        };

        entry.abort();
        drop(task);
        trace!(timer = handle.0, "timer cancelled");
    }
}

impl Drop for SystemTimer {
    fn drop(&mut self) {
        let (pending, queue) = {
            let mut schedule = self.shared.schedule.lock();
            schedule.shutdown = true;
            (
                std::mem::take(&mut schedule.pending),
                std::mem::take(&mut schedule.queue),
            )
        };
        self.shared.wakeup.notify_all();

        for entry in pending.values() {
            entry.abort();
        }
        drop(queue);
    }
}

impl fmt::Debug for SystemTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemTimer")
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    #[test]
    fn test_handles_are_unique() {
        let timer = SystemTimer::new();
        let first = timer.after(Duration::from_secs(60), Box::new(|| {}));
        let second = timer.after(Duration::from_secs(60), Box::new(|| {}));

        assert_ne!(first, second);
        assert_eq!(timer.pending(), 2);

        timer.cancel(first);
        timer.cancel(second);
        assert_eq!(timer.pending(), 0);
    }

    #[test]
    fn test_thread_timer_runs_task() {
        let timer = SystemTimer::new();
        let (tx, rx) = mpsc::channel();

        timer.after(
            Duration::from_millis(5),
            Box::new(move || {
                let _ = tx.send(());
            }),
        );

        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
        assert_eq!(timer.pending(), 0);
    }

    #[test]
    fn test_cancelled_task_never_runs() {
        let timer = SystemTimer::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_clone = Arc::clone(&runs);

        let handle = timer.after(
            Duration::from_millis(20),
            Box::new(move || {
                runs_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        timer.cancel(handle);
        timer.cancel(handle);

        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cancel_releases_task_immediately() {
        let timer = SystemTimer::new();
        let witness = Arc::new(());
        let captured = Arc::clone(&witness);

        let handle = timer.after(
            Duration::from_secs(3600),
            Box::new(move || drop(captured)),
        );
        assert_eq!(Arc::strong_count(&witness), 2);

        timer.cancel(handle);
        assert_eq!(Arc::strong_count(&witness), 1);
    }

    #[test]
    fn test_tasks_share_one_thread_in_deadline_order() {
        let timer = SystemTimer::new();
        let (tx, rx) = mpsc::channel();

        for delay in [30_u64, 10, 20] {
            let tx = tx.clone();
            timer.after(
                Duration::from_millis(delay),
                Box::new(move || {
                    let _ = tx.send((delay, std::thread::current().id()));
                }),
            );
        }

        let fired: Vec<_> = (0..3)
            .filter_map(|_| rx.recv_timeout(Duration::from_secs(2)).ok())
            .collect();

        let order: Vec<u64> = fired.iter().map(|(delay, _)| *delay).collect();
        assert_eq!(order, vec![10, 20, 30]);
        assert!(fired.iter().all(|(_, thread)| *thread == fired[0].1));
    }

    #[test]
    fn test_panicking_task_keeps_thread_alive() {
        let timer = SystemTimer::new();
        let (tx, rx) = mpsc::channel();

        timer.after(Duration::from_millis(1), Box::new(|| panic!("boom")));
        timer.after(
            Duration::from_millis(10),
            Box::new(move || {
                let _ = tx.send(());
            }),
        );

        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
    }

    #[test]
    fn test_drop_releases_queued_tasks() {
        let timer = SystemTimer::new();
        let witness = Arc::new(());
        let captured = Arc::clone(&witness);

        timer.after(
            Duration::from_secs(3600),
            Box::new(move || drop(captured)),
        );
        drop(timer);

        assert_eq!(Arc::strong_count(&witness), 1);
    }

    #[cfg(feature = "tokio")]
    #[tokio::test]
    async fn test_runtime_timer_runs_task() {
        let timer = SystemTimer::new();
        let (tx, rx) = tokio::sync::oneshot::channel();

        timer.after(
            Duration::from_millis(5),
            Box::new(move || {
                let _ = tx.send(());
            }),
        );

        let fired = tokio::time::timeout(Duration::from_secs(2), rx).await;
        assert!(matches!(fired, Ok(Ok(()))));
    }
}
