//! Callback execution context (C8's executor) plus the global lazy
//! executor/teardown pattern from the design notes: a module-level handle
//! guarded by compare-and-exchange, with `get_or_create` and
//! `get_and_null_then_shutdown` lifecycle operations that stay correct under
//! concurrent creators and concurrent shutdowns.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::Arc;
use std::thread;

use tracing::warn;

/// Where subscription callbacks (and any other non-I/O dispatch) run.
/// Implementations must never run work on the transport's I/O reactor.
pub trait Executor: Send + Sync {
    fn spawn(&self, task: Pin<Box<dyn Future<Output = ()> + Send>>);
}

/// Default executor: every spawned task gets its own OS thread driving a
/// single-task `current_thread` Tokio runtime. Simple, never contends with
/// the I/O reactor, and costs nothing when no subscriptions are active.
pub struct DefaultExecutor {
    stopped: AtomicBool,
}

impl DefaultExecutor {
    fn new() -> Self {
        Self { stopped: AtomicBool::new(false) }
    }

    fn shutdown(&self) {
        self.stopped.store(true, Ordering::Release);
    }
}

impl Executor for DefaultExecutor {
    fn spawn(&self, task: Pin<Box<dyn Future<Output = ()> + Send>>) {
        if self.stopped.load(Ordering::Acquire) {
            warn!("dropped task spawned after executor shutdown");
            return;
        }
        thread::Builder::new()
            .name("rpc-callback".into())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                    Ok(rt) => rt,
                    Err(e) => {
                        warn!(error = %e, "failed to build callback runtime");
                        return;
                    }
                };
                rt.block_on(task);
            })
            .ok();
    }
}

static GLOBAL: AtomicPtr<DefaultExecutor> = AtomicPtr::new(std::ptr::null_mut());

/// Get the process-wide default executor, creating it on first use. Safe
/// under concurrent first calls: exactly one candidate wins the
/// compare-exchange and every caller observes the same instance.
pub fn get_or_create() -> Arc<DefaultExecutor> {
    loop {
        let current = GLOBAL.load(Ordering::Acquire);
        if !current.is_null() {
            unsafe { Arc::increment_strong_count(current) };
            return unsafe { Arc::from_raw(current) };
        }

        let candidate = Arc::new(DefaultExecutor::new());
        let raw = Arc::into_raw(candidate) as *mut DefaultExecutor;

        match GLOBAL.compare_exchange(std::ptr::null_mut(), raw, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => {
                unsafe { Arc::increment_strong_count(raw) };
                return unsafe { Arc::from_raw(raw) };
            }
            Err(_) => {
                // Lost the race; drop our unused candidate and retry against
                // whatever the winner installed.
                unsafe { drop(Arc::from_raw(raw)) };
            }
        }
    }
}

/// Atomically take the global handle out (nulling it first so concurrent
/// `get_or_create` callers see "needs new" rather than racing the shutdown
/// of the outgoing instance) and shut it down.
pub fn get_and_null_then_shutdown() {
    let current = GLOBAL.swap(std::ptr::null_mut(), Ordering::AcqRel);
    if !current.is_null() {
        let arc = unsafe { Arc::from_raw(current) };
        arc.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    // The global slot is process-wide; serialize tests that touch it so they
    // don't observe each other's creates/shutdowns.
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn get_or_create_is_idempotent() {
        let _g = TEST_LOCK.lock().unwrap();
        let a = get_or_create();
        let b = get_or_create();
        assert!(Arc::ptr_eq(&a, &b));
        get_and_null_then_shutdown();
    }

    #[test]
    fn shutdown_then_get_or_create_yields_fresh_instance() {
        let _g = TEST_LOCK.lock().unwrap();
        let a = get_or_create();
        get_and_null_then_shutdown();
        let b = get_or_create();
        assert!(!Arc::ptr_eq(&a, &b));
        get_and_null_then_shutdown();
    }

    #[test]
    fn spawn_runs_task() {
        let _g = TEST_LOCK.lock().unwrap();
        let exec = get_or_create();
        static RAN: AtomicUsize = AtomicUsize::new(0);
        exec.spawn(Box::pin(async {
            RAN.fetch_add(1, Ordering::SeqCst);
        }));
        // Give the detached thread a moment; this is a coarse smoke test,
        // not a timing guarantee.
        thread::sleep(std::time::Duration::from_millis(200));
        assert_eq!(RAN.load(Ordering::SeqCst), 1);
        get_and_null_then_shutdown();
    }
}
