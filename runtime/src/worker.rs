//! Worker-thread offload. `spec.md` §4.10: a bounded task queue backed by
//! `N` OS worker threads; `hand_out` moves a green thread's saved context
//! onto a worker so a blocking syscall doesn't stall the whole scheduler,
//! `get_back` is the symmetric return.
//!
//! Grounded on the teacher's `exercises/01_concurrency_sync/{01_thread_spawn,
//! 03_channel}` for the OS-thread-pool-plus-channel shape, and on
//! `context.rs`'s `switch_context` for the actual mechanism: a worker
//! doesn't run a copy of the green thread, it resumes the identical saved
//! `Context` the scheduler would have, on the worker's own OS stack. The
//! open question spec.md §9 raises — whether `hand_out` should be a
//! dedicated primitive or standardized on the existing yield-to-scheduler
//! path — is resolved in favor of the latter: `hand_out` marks the thread
//! `WaitingForWorker` and parks it exactly like any other blocking call, so
//! the scheduler's dispatch loop never needs special-case code for it.

use crate::context::{switch_context, Context};
use crate::event::{EventHandle, EventKind};
use crate::tcb::ThreadId;
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;

thread_local! {
    /// Set by `worker_loop` right before it resumes a handed-out green
    /// thread; consumed by `get_back` when that thread's own code calls
    /// back in. Lives on the worker OS thread, mirroring `context.rs`'s
    /// `PENDING_ENTRY` thread-local handoff for first dispatch.
    static RETURN_CTX: Cell<Option<*mut Context>> = const { Cell::new(None) };
}

/// Called from the green thread's own running code (on the worker's OS
/// stack) to switch back to the worker loop, which then reports `fini` to
/// whoever is polling `get_back`'s completion.
///
/// # Safety
/// Must only be called while actually running as a handed-out thread, with
/// `my_ctx` pointing at that thread's own `Context`.
pub(crate) unsafe fn get_back(my_ctx: *mut Context) {
    if let Some(worker_ctx) = RETURN_CTX.with(|c| c.take()) {
        switch_context(my_ctx, worker_ctx);
    } else {
        log::error!("get_back() called outside a worker hand-off");
    }
}

/// One unit of work handed to a worker: the green thread's raw context
/// pointers (valid for the worker's exclusive use until it signals `fini`)
/// plus the shared flag `get_back` polls.
pub(crate) struct HandOff {
    pub tid: ThreadId,
    pub thread_ctx: *mut Context,
    pub worker_ctx: *mut Context,
    pub fini: Arc<AtomicBool>,
    /// The `EventKind::Task` event `hand_out` blocked the thread on; resolved
    /// (rather than plain-woken) once this worker finishes, so a thread
    /// composing the hand-off into a larger `wait(ring)` sees it resolve
    /// like any other event.
    pub event: EventHandle,
}

// `HandOff` crosses an OS-thread boundary by construction (that's the whole
// point of a worker pool); the raw pointers stay valid because the
// scheduler does not touch a `WaitingForWorker` thread's stack/context
// until `fini` flips, which is the hand-out/get-back protocol's one
// invariant.
unsafe impl Send for HandOff {}

/// Why `try_hand_out` couldn't enqueue, carrying the `HandOff` back so the
/// caller can retry it.
pub(crate) enum HandOffFailure {
    Full(HandOff),
    Disconnected(HandOff),
}

pub struct WorkerPool {
    sender: SyncSender<HandOff>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(n: usize, queue_capacity: usize) -> Self {
        let (sender, receiver) = sync_channel::<HandOff>(queue_capacity);
        let receiver = Arc::new(std::sync::Mutex::new(receiver));
        let handles = (0..n)
            .map(|id| {
                let receiver = Arc::clone(&receiver);
                std::thread::Builder::new()
                    .name(format!("green_runtime-worker-{id}"))
                    .spawn(move || worker_loop(id, receiver))
                    .expect("failed to spawn worker thread")
            })
            .collect();
        Self { sender, handles }
    }

    /// Try to enqueue a hand-off without blocking. The *caller* runs on the
    /// scheduler's one shared dispatch thread, so a blocking `send` here
    /// would stall the whole cooperative runtime, not just this green
    /// thread — spec.md §4.10's bounded-queue backpressure (`Full`) is
    /// instead surfaced to `runtime::hand_out`, which retries after a
    /// cooperative `yield_now`, keeping other ready threads dispatchable
    /// while this one waits for queue space.
    pub(crate) fn try_hand_out(&self, off: HandOff) -> Result<(), HandOffFailure> {
        match self.sender.try_send(off) {
            Ok(()) => Ok(()),
            Err(std::sync::mpsc::TrySendError::Full(off)) => Err(HandOffFailure::Full(off)),
            Err(std::sync::mpsc::TrySendError::Disconnected(off)) => Err(HandOffFailure::Disconnected(off)),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Dropping `sender` unblocks every worker's `recv()` with `Err`,
        // ending `worker_loop` cleanly; then join everyone.
        for h in self.handles.drain(..) {
            let _ = h.join();
        }
    }
}

fn worker_loop(id: usize, receiver: Arc<std::sync::Mutex<Receiver<HandOff>>>) {
    loop {
        let off = {
            let rx = receiver.lock().expect("worker queue poisoned");
            match rx.recv() {
                Ok(off) => off,
                Err(_) => {
                    log::debug!("worker {id} shutting down: queue closed");
                    return;
                }
            }
        };
        log::trace!("worker {id} resuming thread {:?}", off.tid);
        RETURN_CTX.with(|c| c.set(Some(off.worker_ctx)));
        // SAFETY: `off.thread_ctx` was saved by `hand_out`'s own
        // `switch_context` call and is exclusively ours until we switch
        // back via `off.worker_ctx`, per the hand-out/get-back invariant.
        unsafe { switch_context(off.worker_ctx, off.thread_ctx) };
        off.fini.store(true, Ordering::Release);
        crate::runtime::resolve_event(off.tid, |k| matches!(k, EventKind::Task { .. }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slab::Slab;

    #[test]
    fn pool_reports_configured_worker_count() {
        let pool = WorkerPool::new(2, 6);
        assert_eq!(pool.worker_count(), 2);
    }

    /// `try_hand_out` is a thin `try_send` wrapper over a
    /// `sync_channel(task_queue_capacity)` (spec.md §4.10's bounded task
    /// queue, capacity `3*N`); this pins down that underlying contract
    /// directly; building a `WorkerPool` with a guaranteed-idle worker to
    /// exercise `try_hand_out` itself would mean fabricating a real machine
    /// `Context` to switch into, which isn't safe to do outside the actual
    /// scheduler.
    #[test]
    fn bounded_channel_admits_capacity_then_reports_full_until_a_dequeue() {
        let (sender, receiver) = std::sync::mpsc::sync_channel::<u32>(2);
        assert!(sender.try_send(1).is_ok());
        assert!(sender.try_send(2).is_ok());
        assert!(matches!(
            sender.try_send(3),
            Err(std::sync::mpsc::TrySendError::Full(3))
        ));
        assert_eq!(receiver.recv().unwrap(), 1);
        assert!(sender.try_send(3).is_ok());
    }

    #[test]
    fn a_disconnected_pool_reports_disconnected_not_full() {
        let (tid, event) = {
            let mut ids: Slab<()> = Slab::new();
            let tid = ids.insert(());
            let event = ids.insert(());
            (tid, event)
        };
        let fini = Arc::new(AtomicBool::new(false));
        // Zero workers means the pool's receiving end is dropped as soon as
        // `new` returns, so `try_hand_out` observes a closed channel.
        let pool = WorkerPool::new(0, 2);
        let off = HandOff {
            tid,
            thread_ctx: std::ptr::null_mut(),
            worker_ctx: std::ptr::null_mut(),
            fini,
            event,
        };
        assert!(matches!(pool.try_hand_out(off), Err(HandOffFailure::Disconnected(_))));
    }
}
