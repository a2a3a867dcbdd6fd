//! Async handle lifecycle (spec.md §4.9): the observable reference
//! returned by `Hub::sendAsync`. A `Handle` owns its own state mutex plus a
//! broadcast `Notify` so any number of concurrent `wait()` callers observe
//! the same terminal result exactly once (spec.md §8 "Handle wait
//! liveness"). `HandleRegistry` is the `handleId -> Handle` map with
//! bounded capacity and TTL-based garbage collection of terminal handles
//! (spec.md §4.9).

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use nh_common::{HandleStatus, NotifyError, SendingResults};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::timeout;
use tracing::error;

type CompleteCallback = Box<dyn Fn(&SendingResults) + Send + Sync>;
type ErrorCallback = Box<dyn Fn(&NotifyError) + Send + Sync>;
type ProgressCallback = Box<dyn Fn(&SendingResults) + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    on_complete: Vec<CompleteCallback>,
    on_error: Vec<ErrorCallback>,
    on_progress: Vec<ProgressCallback>,
}

struct HandleState {
    status: HandleStatus,
    result: Option<SendingResults>,
    error: Option<NotifyError>,
}

/// Observable reference to an in-flight or completed dispatch
/// (spec.md §3 Handle).
pub struct Handle {
    pub id: String,
    pub message_id: String,
    pub created_at: DateTime<Utc>,
    pub deadline: Option<DateTime<Utc>>,
    state: Mutex<HandleState>,
    callbacks: Mutex<Callbacks>,
    notify: Notify,
    /// Cooperative cancellation flag: workers check this between targets
    /// and between messages of a batch (spec.md §5 "Cancellation").
    cancel_requested: AtomicBool,
}

impl Handle {
    fn new(id: String, message_id: String, deadline: Option<DateTime<Utc>>) -> Arc<Self> {
        Arc::new(Self {
            id,
            message_id,
            created_at: Utc::now(),
            deadline,
            state: Mutex::new(HandleState {
                status: HandleStatus::Pending,
                result: None,
                error: None,
            }),
            callbacks: Mutex::new(Callbacks::default()),
            notify: Notify::new(),
            cancel_requested: AtomicBool::new(false),
        })
    }

    pub fn status(&self) -> HandleStatus {
        self.state.lock().status
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }

    pub fn mark_running(&self) {
        let mut state = self.state.lock();
        if state.status == HandleStatus::Pending {
            state.status = HandleStatus::Running;
        }
    }

    /// Fires registered `onProgress` callbacks without changing status
    /// (spec.md §3 Handle callbacks slot).
    pub fn progress(&self, partial: &SendingResults) {
        for cb in &self.callbacks.lock().on_progress {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| cb(partial))) {
                log_callback_panic("onProgress", panic);
            }
        }
    }

    pub fn complete(&self, results: SendingResults) {
        {
            let mut state = self.state.lock();
            if state.status.is_terminal() {
                return;
            }
            state.status = HandleStatus::Success;
            state.result = Some(results.clone());
        }
        self.notify.notify_waiters();
        for cb in &self.callbacks.lock().on_complete {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| cb(&results))) {
                log_callback_panic("onComplete", panic);
            }
        }
    }

    pub fn fail(&self, err: NotifyError) {
        {
            let mut state = self.state.lock();
            if state.status.is_terminal() {
                return;
            }
            state.status = HandleStatus::Failed;
            state.error = Some(err.clone());
        }
        self.notify.notify_waiters();
        for cb in &self.callbacks.lock().on_error {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| cb(&err))) {
                log_callback_panic("onError", panic);
            }
        }
    }

    /// `cancel` is a no-op in terminal states (spec.md §4.9). From
    /// `running` it only requests cooperative cancellation; the worker
    /// observes it at its next checkpoint and records `cancelled` itself.
    pub fn cancel(&self) -> bool {
        let mut state = self.state.lock();
        if state.status.is_terminal() {
            return false;
        }
        self.cancel_requested.store(true, Ordering::Release);
        if state.status == HandleStatus::Pending {
            state.status = HandleStatus::Cancelled;
            drop(state);
            self.notify.notify_waiters();
        }
        true
    }

    /// Called by the worker once it observes cancellation and has nothing
    /// further in flight for this message.
    pub fn mark_cancelled(&self, partial: SendingResults) {
        let mut state = self.state.lock();
        if state.status.is_terminal() {
            return;
        }
        state.status = HandleStatus::Cancelled;
        state.result = Some(partial);
        drop(state);
        self.notify.notify_waiters();
    }

    pub fn on_complete(&self, cb: impl Fn(&SendingResults) + Send + Sync + 'static) {
        self.callbacks.lock().on_complete.push(Box::new(cb));
    }

    pub fn on_error(&self, cb: impl Fn(&NotifyError) + Send + Sync + 'static) {
        self.callbacks.lock().on_error.push(Box::new(cb));
    }

    pub fn on_progress(&self, cb: impl Fn(&SendingResults) + Send + Sync + 'static) {
        self.callbacks.lock().on_progress.push(Box::new(cb));
    }

    /// Blocks until the handle reaches a terminal state or `deadline`
    /// elapses. Any number of concurrent callers each observe the final
    /// result exactly once (spec.md §8 "Handle wait liveness").
    pub async fn wait(&self) -> Result<SendingResults, NotifyError> {
        loop {
            // Register as a waiter *before* checking state: `notified()` must
            // be created and `enable()`-d first, per tokio's documented
            // `Notify` pattern, so a `notify_waiters()` that lands between
            // the check below and the await is not lost (spec.md §8 "Handle
            // wait liveness").
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let state = self.state.lock();
                match state.status {
                    HandleStatus::Success => return Ok(state.result.clone().unwrap_or_default()),
                    HandleStatus::Cancelled => {
                        return state
                            .result
                            .clone()
                            .map(Ok)
                            .unwrap_or_else(|| Err(NotifyError::cancelled()))
                    }
                    HandleStatus::Failed => {
                        return Err(state.error.clone().unwrap_or_else(|| NotifyError::internal("dispatch failed")))
                    }
                    HandleStatus::Pending | HandleStatus::Running => {}
                }
            }
            if let Some(deadline) = self.deadline {
                let remaining = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                if timeout(remaining, notified).await.is_err() {
                    return Err(NotifyError::new(nh_common::ErrorCode::Timeout, "handle wait deadline exceeded"));
                }
            } else {
                notified.await;
            }
        }
    }
}

fn log_callback_panic(slot: &str, panic: Box<dyn std::any::Any + Send>) {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    error!(slot, message, "handle callback panicked");
}

#[derive(Debug, Clone)]
pub struct HandleRegistryConfig {
    pub capacity: usize,
    pub terminal_ttl: Duration,
}

impl Default for HandleRegistryConfig {
    fn default() -> Self {
        Self {
            capacity: 100_000,
            terminal_ttl: Duration::from_secs(3600),
        }
    }
}

/// `handleId -> Handle` map (spec.md §4.9). Never evicts a non-terminal
/// handle; once a handle goes terminal it's pushed onto an eviction queue
/// so the oldest terminal handle is dropped first once over capacity.
pub struct HandleRegistry {
    handles: DashMap<String, Arc<Handle>>,
    terminal_order: Mutex<VecDeque<(String, DateTime<Utc>)>>,
    config: HandleRegistryConfig,
}

impl HandleRegistry {
    pub fn new(config: HandleRegistryConfig) -> Self {
        Self {
            handles: DashMap::new(),
            terminal_order: Mutex::new(VecDeque::new()),
            config,
        }
    }

    pub fn create(&self, message_id: impl Into<String>, deadline: Option<DateTime<Utc>>) -> Arc<Handle> {
        let id = message_id.into();
        let handle = Handle::new(id.clone(), id.clone(), deadline);
        self.handles.insert(id, Arc::clone(&handle));
        self.evict_if_over_capacity();
        handle
    }

    pub fn create_with_id(&self, handle_id: impl Into<String>, message_id: impl Into<String>, deadline: Option<DateTime<Utc>>) -> Arc<Handle> {
        let id = handle_id.into();
        let handle = Handle::new(id.clone(), message_id.into(), deadline);
        self.handles.insert(id, Arc::clone(&handle));
        self.evict_if_over_capacity();
        handle
    }

    pub fn get(&self, id: &str) -> Option<Arc<Handle>> {
        self.handles.get(id).map(|e| Arc::clone(e.value()))
    }

    /// Called whenever a handle reaches a terminal state, so the eviction
    /// queue knows about it.
    pub fn note_terminal(&self, id: &str) {
        self.terminal_order.lock().push_back((id.to_string(), Utc::now()));
    }

    fn evict_if_over_capacity(&self) {
        while self.handles.len() > self.config.capacity {
            let next = self.terminal_order.lock().pop_front();
            match next {
                Some((id, _)) => {
                    self.handles.remove(&id);
                }
                None => break, // nothing terminal to evict; over capacity but all in flight
            }
        }
    }

    /// Removes terminal handles older than `terminal_ttl`. Intended to run
    /// from a periodic background task.
    pub fn gc(&self) -> usize {
        let cutoff = Utc::now() - chrono::Duration::from_std(self.config.terminal_ttl).unwrap_or_default();
        let mut removed = 0;
        let mut order = self.terminal_order.lock();
        while let Some((id, recorded_at)) = order.front() {
            if *recorded_at > cutoff {
                break;
            }
            let (id, _) = order.pop_front().unwrap();
            if self.handles.remove(&id).is_some() {
                removed += 1;
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Forces every still-pending/running handle terminal with
    /// `code=shutdown` (spec.md §5 "mark all pending Handles as cancelled
    /// with code=shutdown"), called once the worker pool has stopped.
    pub fn cancel_all_pending(&self) {
        let ids: Vec<String> = self
            .handles
            .iter()
            .filter(|e| !e.value().status().is_terminal())
            .map(|e| e.key().clone())
            .collect();
        for id in ids {
            if let Some(handle) = self.get(&id) {
                handle.fail(NotifyError::shutdown());
                self.note_terminal(&id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nh_common::DeliveryResult;

    fn sample_result() -> SendingResults {
        SendingResults {
            results: vec![DeliveryResult::success(
                "m1",
                nh_common::Target::new(nh_common::TargetType::Email, "a@x.com"),
                "email",
            )],
        }
    }

    #[tokio::test]
    async fn complete_wakes_all_waiters_exactly_once() {
        let registry = HandleRegistry::new(HandleRegistryConfig::default());
        let handle = registry.create("m1", None);

        let mut waiters = Vec::new();
        for _ in 0..10 {
            let h = Arc::clone(&handle);
            waiters.push(tokio::spawn(async move { h.wait().await }));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.complete(sample_result());

        for w in waiters {
            let result = w.await.unwrap().unwrap();
            assert_eq!(result.total(), 1);
        }
    }

    #[tokio::test]
    async fn cancel_is_noop_once_terminal() {
        let registry = HandleRegistry::new(HandleRegistryConfig::default());
        let handle = registry.create("m1", None);
        handle.complete(sample_result());
        assert!(!handle.cancel());
        assert_eq!(handle.status(), HandleStatus::Success);
    }

    #[tokio::test]
    async fn callbacks_fire_in_registration_order() {
        let registry = HandleRegistry::new(HandleRegistryConfig::default());
        let handle = registry.create("m1", None);
        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = Arc::clone(&order);
        handle.on_complete(move |_| o1.lock().push(1));
        let o2 = Arc::clone(&order);
        handle.on_complete(move |_| o2.lock().push(2));
        handle.complete(sample_result());
        assert_eq!(*order.lock(), vec![1, 2]);
    }

    #[tokio::test]
    async fn panicking_callback_does_not_prevent_others() {
        let registry = HandleRegistry::new(HandleRegistryConfig::default());
        let handle = registry.create("m1", None);
        let ran = Arc::new(AtomicBool::new(false));
        handle.on_complete(|_| panic!("boom"));
        let ran2 = Arc::clone(&ran);
        handle.on_complete(move |_| ran2.store(true, Ordering::SeqCst));
        handle.complete(sample_result());
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancel_all_pending_leaves_completed_handles_alone() {
        let registry = HandleRegistry::new(HandleRegistryConfig::default());
        let done = registry.create("m1", None);
        done.complete(sample_result());
        let pending = registry.create("m2", None);

        registry.cancel_all_pending();

        assert_eq!(done.status(), HandleStatus::Success);
        assert_eq!(pending.status(), HandleStatus::Failed);
    }

    #[test]
    fn evicts_oldest_terminal_handle_over_capacity() {
        let registry = HandleRegistry::new(HandleRegistryConfig { capacity: 1, terminal_ttl: Duration::from_secs(3600) });
        let h1 = registry.create("m1", None);
        h1.complete(sample_result());
        registry.note_terminal("m1");
        let _h2 = registry.create("m2", None);
        assert!(registry.get("m1").is_none());
    }
}
