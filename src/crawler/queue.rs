//! Bounded task queue for crawl work
//!
//! This module handles:
//! - Running submitted futures on the tokio runtime, at most `parallelism` at a time
//! - Tracking every outstanding submission until it completes
//! - Signalling listeners each time the outstanding set drains to empty
//! - Backpressure: letting producers wait until the queue has room
//!
//! Backpressure is requested from inside running tasks as well (a catalog task
//! discovering thousands of children). Such a task gives its permit back while
//! it waits and does not count as active, otherwise a full pool of waiting
//! producers would never make room for the consumers they are waiting on.

use crate::{Result, SpiderError};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

tokio::task_local! {
    static CURRENT_TASK: Arc<TaskSlot>;
}

/// Permit bookkeeping for one running task
struct TaskSlot {
    /// Address of the owning queue's shared state
    queue: usize,
    permit: Mutex<Option<OwnedSemaphorePermit>>,
}

#[derive(Debug, Default)]
struct QueueState {
    /// Ids of submitted tasks that have not completed
    todo: HashSet<u64>,
    next_id: u64,

    /// Outstanding tasks currently waiting for capacity without a permit
    parked: usize,

    /// Empty signals whose listeners are still running
    signalling: usize,
}

impl QueueState {
    fn active(&self) -> usize {
        self.todo.len().saturating_sub(self.parked)
    }

    fn has_room(&self, ceiling: usize) -> bool {
        self.active() < ceiling
    }

    fn is_drained(&self) -> bool {
        self.todo.is_empty() && self.signalling == 0
    }
}

type EmptyListener = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

struct Shared {
    semaphore: Arc<Semaphore>,
    state: watch::Sender<QueueState>,
    listeners: Mutex<Vec<EmptyListener>>,
}

impl Shared {
    fn id(self: &Arc<Self>) -> usize {
        Arc::as_ptr(self) as usize
    }

    async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        // The semaphore is never closed
        Arc::clone(&self.semaphore).acquire_owned().await.ok()
    }

    /// Removes a completed task and fires the empty signal if it was the last one
    async fn finish(&self, id: u64) {
        let mut drained = false;
        self.state.send_modify(|state| {
            state.todo.remove(&id);
            if state.todo.is_empty() {
                state.signalling += 1;
                drained = true;
            }
        });
        if !drained {
            return;
        }

        // Work submitted since the removal, from any thread, cancels the rest
        // of this signal; the next drain signals again
        let listeners: Vec<EmptyListener> = self.listeners.lock().unwrap().clone();
        for listener in listeners {
            let still_empty = self.state.borrow().todo.is_empty();
            if !still_empty {
                tracing::trace!("Queue refilled before its empty signal completed");
                break;
            }
            if let Err(panic) = AssertUnwindSafe(listener()).catch_unwind().await {
                tracing::error!("Empty listener panicked: {}", panic_message(&*panic));
            }
        }

        self.state.send_modify(|state| state.signalling -= 1);
    }
}

/// Marks the current task as parked for as long as it lives
struct Parked<'a> {
    state: &'a watch::Sender<QueueState>,
}

impl<'a> Parked<'a> {
    fn new(state: &'a watch::Sender<QueueState>) -> Self {
        state.send_modify(|state| state.parked += 1);
        Self { state }
    }
}

impl Drop for Parked<'_> {
    fn drop(&mut self) {
        self.state.send_modify(|state| state.parked -= 1);
    }
}

/// Handle to the eventual result of a submitted task
///
/// Dropping the handle does not cancel the task.
pub struct TaskHandle<T> {
    inner: JoinHandle<Result<T>>,
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx).map(|joined| match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(SpiderError::TaskPanicked(e.to_string())),
            Err(_) => Err(SpiderError::Aborted),
        })
    }
}

/// A queue of futures executed with bounded parallelism
///
/// Cloning the queue yields another handle to the same tasks.
#[derive(Clone)]
pub struct TaskQueue {
    shared: Arc<Shared>,
}

impl TaskQueue {
    /// Creates a queue running at most `parallelism` tasks at once
    ///
    /// A parallelism of zero is raised to one.
    pub fn new(parallelism: usize) -> Self {
        let (state, _) = watch::channel(QueueState::default());
        Self {
            shared: Arc::new(Shared {
                semaphore: Arc::new(Semaphore::new(parallelism.max(1))),
                state,
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Submits a task
    ///
    /// The task is counted as outstanding from this call on, before it gets a
    /// permit. It is spawned immediately and starts once a permit is free.
    ///
    /// # Arguments
    ///
    /// * `op` - The future to run
    ///
    /// # Returns
    ///
    /// A handle resolving to the task's result. A panic inside `op` is caught
    /// and resolves the handle to `SpiderError::TaskPanicked`; other tasks
    /// are unaffected.
    pub fn push<F, T>(&self, op: F) -> TaskHandle<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let mut id = 0;
        self.shared.state.send_modify(|state| {
            id = state.next_id;
            state.next_id += 1;
            state.todo.insert(id);
        });

        let shared = Arc::clone(&self.shared);
        let inner = tokio::spawn(async move {
            let slot = Arc::new(TaskSlot {
                queue: shared.id(),
                permit: Mutex::new(shared.acquire().await),
            });

            let outcome = CURRENT_TASK
                .scope(Arc::clone(&slot), AssertUnwindSafe(op).catch_unwind())
                .await;

            slot.permit.lock().unwrap().take();
            shared.finish(id).await;

            outcome.unwrap_or_else(|panic| {
                Err(SpiderError::TaskPanicked(panic_message(&*panic)))
            })
        });

        TaskHandle { inner }
    }

    /// Registers a listener called every time the queue drains to empty
    ///
    /// Listeners run one after another in registration order. They may submit
    /// new work, which makes the queue non-empty again and leads to another
    /// signal once that work drains.
    pub fn on_empty<F, Fut>(&self, listener: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.shared
            .listeners
            .lock()
            .unwrap()
            .push(Arc::new(move || listener().boxed()));
    }

    /// Waits until no task is outstanding and every empty listener has returned
    ///
    /// Must not be awaited from inside one of this queue's own tasks.
    pub async fn join(&self) {
        let mut state = self.shared.state.subscribe();
        // The sender lives as long as `self`
        let _ = state.wait_for(QueueState::is_drained).await;
    }

    /// Waits until fewer than `ceiling` tasks are active
    ///
    /// When called from one of this queue's tasks, the calling task releases
    /// its permit and stops counting as active until there is room, then
    /// waits for a permit again before returning.
    pub async fn wait_for_capacity(&self, ceiling: usize) {
        let ceiling = ceiling.max(1);
        let mut state = self.shared.state.subscribe();
        let has_room = state.borrow().has_room(ceiling);
        if has_room {
            return;
        }

        match self.current_slot() {
            None => {
                let _ = state.wait_for(|s| s.has_room(ceiling)).await;
            }
            Some(slot) => {
                drop(slot.permit.lock().unwrap().take());
                {
                    let _parked = Parked::new(&self.shared.state);
                    let _ = state.wait_for(|s| s.has_room(ceiling)).await;
                }
                let permit = self.shared.acquire().await;
                *slot.permit.lock().unwrap() = permit;
            }
        }
    }

    /// Awaits `fut` without holding a permit
    ///
    /// When called from one of this queue's tasks, the task releases its
    /// permit and counts as parked until `fut` completes, then waits for a
    /// permit again. Use it to wait on work that runs in another task of the
    /// same queue. Outside the queue's tasks this is a plain await.
    pub async fn park_on<F: Future>(&self, fut: F) -> F::Output {
        let Some(slot) = self.current_slot() else {
            return fut.await;
        };

        drop(slot.permit.lock().unwrap().take());
        let output = {
            let _parked = Parked::new(&self.shared.state);
            fut.await
        };
        let permit = self.shared.acquire().await;
        *slot.permit.lock().unwrap() = permit;
        output
    }

    /// The calling task's slot, if it is one of this queue's tasks holding a permit
    fn current_slot(&self) -> Option<Arc<TaskSlot>> {
        CURRENT_TASK
            .try_with(Arc::clone)
            .ok()
            .filter(|slot| slot.queue == self.shared.id())
            .filter(|slot| slot.permit.lock().unwrap().is_some())
    }

    /// Number of outstanding tasks, running or waiting
    pub fn len(&self) -> usize {
        self.shared.state.borrow().todo.len()
    }

    /// Number of outstanding tasks not parked on backpressure
    pub fn active(&self) -> usize {
        self.shared.state.borrow().active()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.state.borrow().todo.is_empty()
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.borrow();
        f.debug_struct("TaskQueue")
            .field("outstanding", &state.todo.len())
            .field("parked", &state.parked)
            .field("available_permits", &self.shared.semaphore.available_permits())
            .finish()
    }
}

/// Extracts the message of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_push_returns_result() {
        let queue = TaskQueue::new(2);
        let handle = queue.push(async { Ok(21 * 2) });
        assert_eq!(handle.await.unwrap(), 42);
        queue.join().await;
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_failure_reaches_only_its_handle() {
        let queue = TaskQueue::new(2);
        let failing = queue.push(async { Err::<(), _>(SpiderError::Aborted) });
        let ok = queue.push(async { Ok("fine") });

        assert!(matches!(failing.await, Err(SpiderError::Aborted)));
        assert_eq!(ok.await.unwrap(), "fine");
        queue.join().await;
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let queue = TaskQueue::new(1);
        let panicking = queue.push(async {
            if true {
                panic!("boom");
            }
            Ok(())
        });
        let after = queue.push(async { Ok(1) });

        match panicking.await {
            Err(SpiderError::TaskPanicked(message)) => assert_eq!(message, "boom"),
            other => panic!("expected a panic error, got {:?}", other.map(|_| ())),
        }
        assert_eq!(after.await.unwrap(), 1);
        queue.join().await;
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_parallelism_is_bounded() {
        let queue = TaskQueue::new(3);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..20 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            queue.push(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            });
        }

        queue.join().await;
        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_submission_counts_before_start() {
        let queue = TaskQueue::new(1);
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        queue.push(async move {
            let _ = rx.await;
            Ok(())
        });
        queue.push(async { Ok(()) });

        assert_eq!(queue.len(), 2);
        tx.send(()).unwrap();
        queue.join().await;
        assert_eq!(queue.len(), 0);
    }

    #[tokio::test]
    async fn test_empty_fires_once_per_drain() {
        let queue = TaskQueue::new(4);
        let fired = Arc::new(AtomicUsize::new(0));
        let early = Arc::new(AtomicBool::new(false));

        let observer = queue.clone();
        let counter = Arc::clone(&fired);
        let early_flag = Arc::clone(&early);
        queue.on_empty(move || {
            if !observer.is_empty() {
                early_flag.store(true, Ordering::SeqCst);
            }
            counter.fetch_add(1, Ordering::SeqCst);
            async {}
        });

        for i in 0..10u64 {
            queue.push(async move {
                tokio::time::sleep(Duration::from_millis(i % 3)).await;
                Ok(())
            });
        }
        queue.join().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        queue.push(async { Ok(()) });
        queue.join().await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);
        assert!(!early.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_join_waits_for_nested_work() {
        let queue = TaskQueue::new(2);
        let done = Arc::new(AtomicUsize::new(0));

        let inner_queue = queue.clone();
        let inner_done = Arc::clone(&done);
        queue.push(async move {
            for _ in 0..5 {
                let done = Arc::clone(&inner_done);
                inner_queue.push(async move {
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    done.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                });
            }
            Ok(())
        });

        queue.join().await;
        assert_eq!(done.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_join_waits_for_empty_listener() {
        let queue = TaskQueue::new(1);
        let flushed = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&flushed);
        queue.on_empty(move || {
            let flag = Arc::clone(&flag);
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                flag.store(true, Ordering::SeqCst);
            }
        });

        queue.push(async { Ok(()) });
        queue.join().await;
        assert!(flushed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_producer_task_does_not_deadlock_pool() {
        // A single permit, held by a task that floods the queue
        let queue = TaskQueue::new(1);
        let peak = Arc::new(AtomicUsize::new(0));
        let completed = Arc::new(AtomicUsize::new(0));

        let producer_queue = queue.clone();
        let producer_peak = Arc::clone(&peak);
        let producer_completed = Arc::clone(&completed);
        queue.push(async move {
            for _ in 0..200 {
                producer_queue.wait_for_capacity(3).await;
                let completed = Arc::clone(&producer_completed);
                producer_queue.push(async move {
                    tokio::task::yield_now().await;
                    completed.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                });
                producer_peak.fetch_max(producer_queue.len(), Ordering::SeqCst);
            }
            Ok(())
        });

        queue.join().await;
        assert_eq!(completed.load(Ordering::SeqCst), 200);
        // Three children plus the producer itself
        assert!(peak.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test]
    async fn test_refill_cancels_remaining_listeners() {
        let queue = TaskQueue::new(2);
        let refilled = Arc::new(AtomicBool::new(false));
        let second_calls = Arc::new(Mutex::new(Vec::new()));

        let refill_queue = queue.clone();
        let flag = Arc::clone(&refilled);
        queue.on_empty(move || {
            if !flag.swap(true, Ordering::SeqCst) {
                refill_queue.push(async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(())
                });
            }
            async {}
        });

        let observer = queue.clone();
        let calls = Arc::clone(&second_calls);
        queue.on_empty(move || {
            calls.lock().unwrap().push(observer.len());
            async {}
        });

        queue.push(async { Ok(()) });
        queue.join().await;

        // Skipped on the first drain, called once the refill drained
        assert_eq!(*second_calls.lock().unwrap(), vec![0]);
    }

    #[tokio::test]
    async fn test_park_on_lends_permit_to_awaited_task() {
        let queue = TaskQueue::new(1);

        let inner_queue = queue.clone();
        let outer = queue.push(async move {
            let child = inner_queue.push(async { Ok(7) });
            let parked_active = inner_queue.active();
            let value = inner_queue.park_on(child).await?;
            Ok((value, parked_active))
        });

        let (value, parked_active) = tokio::time::timeout(Duration::from_secs(5), outer)
            .await
            .expect("parked task never resumed")
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(parked_active, 2);
        queue.join().await;
        assert_eq!(queue.active(), 0);
    }

    #[tokio::test]
    async fn test_park_on_outside_tasks_is_plain_await() {
        let queue = TaskQueue::new(1);
        let value = queue.park_on(async { 3 }).await;
        assert_eq!(value, 3);
        assert_eq!(queue.active(), 0);
    }

    #[tokio::test]
    async fn test_wait_for_capacity_outside_tasks() {
        let queue = TaskQueue::new(2);
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        queue.push(async move {
            let _ = rx.await;
            Ok(())
        });
        assert_eq!(queue.active(), 1);

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.wait_for_capacity(1).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        tx.send(()).unwrap();
        waiter.await.unwrap();
        queue.join().await;
    }
}
