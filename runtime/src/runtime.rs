//! Public facade. `spec.md` §6: `init`/`kill` lifecycle, `ctrl` queries,
//! `version`, and every thread/event/port operation a caller actually
//! invokes — `Scheduler` and `PortRegistry` themselves expose no public
//! API of their own.
//!
//! The single shared `Runtime` lives behind a process-wide slot rather
//! than a thread-local: a green thread handed out to a worker OS thread
//! (`worker.rs`) still needs to reach the one true scheduler, not a copy.
//! `current_tid`, by contrast, *is* thread-local — it names whichever
//! green thread is currently executing on this particular OS thread, and
//! that differs between the scheduler's own driver thread and a worker mid
//! hand-off.

use crate::config::RuntimeConfig;
use crate::context::{switch_context, Context, ThreadThunk};
use crate::error::{RtError, RtResult};
use crate::event::{EventHandle, EventKind, EventRing, EventStatus, FdGoal, WalkDirection};
use crate::msgport::{Message, PortId, PortRegistry};
use crate::scheduler::{Dispatch, Scheduler};
use crate::tcb::{Attr, ThreadId};
use crate::worker::{HandOff, HandOffFailure, WorkerPool};
use std::any::Any;
use std::cell::Cell;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

pub const VERSION: (u32, u32, u32) = (0, 1, 0);
pub const VERSION_STR: &str = concat!(env!("CARGO_PKG_VERSION"));

struct Runtime {
    scheduler: StdMutex<Scheduler>,
    ports: StdMutex<PortRegistry>,
    workers: WorkerPool,
}

static RUNTIME: StdMutex<Option<Arc<Runtime>>> = StdMutex::new(None);

thread_local! {
    /// Which green thread is running on *this* OS thread right now. `None`
    /// on an OS thread that has never dispatched or received a hand-off.
    static CURRENT_TID: Cell<Option<ThreadId>> = const { Cell::new(None) };
}

fn runtime() -> RtResult<Arc<Runtime>> {
    RUNTIME
        .lock()
        .expect("runtime slot poisoned")
        .clone()
        .ok_or(RtError::NotPermitted)
}

/// Start the scheduler and turn the calling OS thread into thread 1
/// (`spec.md` §6 `init`). Returns once the *entire cooperative program*
/// has finished — i.e. once every thread, including this one, has called
/// `exit` or returned — exactly like `main()` returning in a normal
/// program, because until then this OS thread *is* the cooperative "main"
/// thread and never gets its stack back.
pub fn init(config: RuntimeConfig) -> RtResult<()> {
    {
        let mut slot = RUNTIME.lock().expect("runtime slot poisoned");
        if slot.is_some() {
            return Err(RtError::NotPermitted);
        }
        let worker_threads = config.worker_threads;
        let queue_cap = config.task_queue_capacity;
        let scheduler_thunk: ThreadThunk = Box::new(scheduler_loop);
        let scheduler = Scheduler::new(&config, scheduler_thunk);
        *slot = Some(Arc::new(Runtime {
            scheduler: StdMutex::new(scheduler),
            ports: StdMutex::new(PortRegistry::new()),
            workers: WorkerPool::new(worker_threads, queue_cap),
        }));
    }

    let rt = runtime()?;
    let (main_ctx, sched_ctx, main_tid) = {
        let mut sched = rt.scheduler.lock().expect("scheduler poisoned");
        let main_tid = sched.main_tid();
        let sched_tid = sched.scheduler_tid();
        (
            sched.context_mut_ptr(main_tid).expect("main tcb exists"),
            sched.context_ptr(sched_tid).expect("scheduler tcb exists"),
            main_tid,
        )
    };
    CURRENT_TID.with(|c| c.set(Some(main_tid)));
    // SAFETY: `main_ctx` captures exactly this call site; the scheduler
    // coroutine will switch back into it once main is next dispatched,
    // which resumes this function's caller right here.
    unsafe { switch_context(main_ctx, sched_ctx) };
    Ok(())
}

/// The scheduler coroutine's body — runs on its own small stack, driven by
/// `rt_trampoline` (`context.rs`), for as long as the process lives.
fn scheduler_loop() {
    let rt = runtime().expect("scheduler_loop runs only after init");
    loop {
        let dispatch = {
            let mut sched = rt.scheduler.lock().expect("scheduler poisoned");
            sched.resume_after_dispatch();
            sched.select_next_dispatch()
        };
        match dispatch {
            Dispatch::Run { target, old, new } => {
                CURRENT_TID.with(|c| c.set(Some(target)));
                unsafe { switch_context(old, new) };
            }
            Dispatch::Idle { timeout } => {
                let mut sched = rt.scheduler.lock().expect("scheduler poisoned");
                crate::event_manager::poll_once(&mut sched, timeout);
            }
            Dispatch::Done => {
                log::info!("green_runtime: every thread has exited, ending process");
                std::process::exit(0);
            }
        }
    }
}

pub fn current_tid() -> RtResult<ThreadId> {
    CURRENT_TID.with(|c| c.get()).ok_or(RtError::NotPermitted)
}

pub fn version() -> (u32, u32, u32) {
    VERSION
}

// ---- spawn / yield / exit / join -----------------------------------

/// Spawn a new green thread running `f`; `f`'s return value becomes
/// whatever `join` on the returned id later yields (`spec.md` §4.7's
/// "`spawn → join` returns exactly the value passed to `exit`" — here `f`
/// returning normally is sugar for calling `exit` with its result).
pub fn spawn<F, R>(attr: Attr, f: F) -> RtResult<ThreadId>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let rt = runtime()?;
    let me = current_tid()?;
    let thunk: ThreadThunk = Box::new(move || {
        let value = f();
        let _ = exit(Box::new(value));
    });
    let mut sched = rt.scheduler.lock().expect("scheduler poisoned");
    sched.spawn(me, attr, thunk)
}

pub fn yield_now() -> RtResult<()> {
    let rt = runtime()?;
    let (old, new) = {
        let mut sched = rt.scheduler.lock().expect("scheduler poisoned");
        sched.prepare_yield()
    };
    unsafe { switch_context(old, new) };
    check_cancellation()?;
    Ok(())
}

/// `spec.md` §4.7's targeted `yield(target)`: promote `target` to the head
/// of the ready queue (via `favorite`) before switching to the scheduler,
/// so it runs next regardless of its current effective priority. `target`
/// must already be admitted into `ready_q`, i.e. not brand new this cycle.
pub fn yield_to(target: ThreadId) -> RtResult<()> {
    let rt = runtime()?;
    let (old, new) = {
        let mut sched = rt.scheduler.lock().expect("scheduler poisoned");
        if !sched.favor_next(target) {
            return Err(RtError::InvalidArgument);
        }
        sched.prepare_yield()
    };
    unsafe { switch_context(old, new) };
    check_cancellation()?;
    Ok(())
}

/// Never returns to its caller; switches away into the scheduler for the
/// last time on this thread's stack.
pub fn exit(value: Box<dyn Any + Send>) -> RtResult<()> {
    let rt = runtime()?;
    let (old, new) = {
        let mut sched = rt.scheduler.lock().expect("scheduler poisoned");
        sched.prepare_exit(value)
    };
    unsafe { switch_context(old, new) };
    unreachable!("a thread that exited cannot be rescheduled")
}

pub fn join(target: ThreadId) -> RtResult<Box<dyn Any + Send>> {
    let rt = runtime()?;
    if target == current_tid()? {
        return Err(RtError::Deadlock);
    }
    loop {
        {
            let mut sched = rt.scheduler.lock().expect("scheduler poisoned");
            if sched.is_dead(target) {
                // A dead thread with no join value left is an invariant
                // violation (every exit path sets one, including the
                // stack-guard sentinel), not a caller mistake.
                return sched.take_join_value(target).ok_or(RtError::Fatal);
            }
        }
        let me = current_tid()?;
        let (old, new) = {
            let mut sched = rt.scheduler.lock().expect("scheduler poisoned");
            if !sched.register_join_waiter(target, me) {
                // Died between the check above and here; loop will pick
                // up the join value on the next iteration.
                continue;
            }
            sched.prepare_block(vec![])
        };
        unsafe { switch_context(old, new) };
        check_cancellation()?;
    }
}

pub fn cancel(target: ThreadId) -> RtResult<()> {
    let rt = runtime()?;
    let mut sched = rt.scheduler.lock().expect("scheduler poisoned");
    if sched.request_cancel(target) {
        sched.wake(target);
        Ok(())
    } else {
        Err(RtError::NoSuch)
    }
}

fn check_cancellation() -> RtResult<()> {
    let rt = runtime()?;
    let me = current_tid()?;
    let sched = rt.scheduler.lock().expect("scheduler poisoned");
    if sched.cancel_requested(me) {
        drop(sched);
        run_cleanup_and_exit();
    }
    Ok(())
}

fn run_cleanup_and_exit() -> ! {
    let _ = exit(Box::new(()));
    unreachable!()
}

/// Forcibly terminate `target` without letting it run again. `spec.md`
/// §4.7 `abort` — unlike `cancel`, no cooperation from the target thread.
pub fn abort(target: ThreadId) -> RtResult<()> {
    let rt = runtime()?;
    let mut sched = rt.scheduler.lock().expect("scheduler poisoned");
    if sched.abort(target) {
        Ok(())
    } else {
        Err(RtError::NotPermitted)
    }
}

pub fn suspend(target: ThreadId) -> RtResult<()> {
    let rt = runtime()?;
    let me = current_tid()?;
    if target == me {
        let (old, new) = {
            let mut sched = rt.scheduler.lock().expect("scheduler poisoned");
            sched.prepare_suspend(target)
        };
        unsafe { switch_context(old, new) };
        Ok(())
    } else {
        Err(RtError::InvalidArgument) // suspending another thread needs `resume` driven scheduling not modeled here
    }
}

pub fn resume(target: ThreadId) -> RtResult<()> {
    let rt = runtime()?;
    let mut sched = rt.scheduler.lock().expect("scheduler poisoned");
    if sched.resume_from_suspend(target) {
        Ok(())
    } else {
        Err(RtError::NoSuch)
    }
}

// ---- sleeping / events ----------------------------------------------

pub fn nap(duration: Duration) -> RtResult<()> {
    if duration.is_zero() {
        return Err(RtError::InvalidArgument);
    }
    let rt = runtime()?;
    let e = alloc_event(EventKind::Time {
        deadline: Instant::now() + duration,
    });
    let result = block_current_on(vec![e]);
    free_event(e);
    drop(rt);
    result
}

pub fn wait_fd(fd: RawFd, goal: FdGoal) -> RtResult<()> {
    let e = alloc_event(EventKind::Fd { fd, goal });
    let result = block_current_on(vec![e]);
    let failed = event_status(e) == Some(EventStatus::Failed);
    free_event(e);
    result?;
    if failed {
        return Err(RtError::BadFd);
    }
    Ok(())
}

pub(crate) fn alloc_event(kind: EventKind) -> EventHandle {
    let rt = runtime().expect("alloc_event called before init");
    let mut sched = rt.scheduler.lock().expect("scheduler poisoned");
    sched.alloc_event(kind)
}

pub(crate) fn free_event(e: EventHandle) {
    if let Ok(rt) = runtime() {
        let mut sched = rt.scheduler.lock().expect("scheduler poisoned");
        sched.free_event(e);
    }
}

pub(crate) fn block_current_on(events: Vec<EventHandle>) -> RtResult<()> {
    let rt = runtime()?;
    let (old, new) = {
        let mut sched = rt.scheduler.lock().expect("scheduler poisoned");
        sched.prepare_block(events)
    };
    unsafe { switch_context(old, new) };
    check_cancellation()?;
    Ok(())
}

/// Mark `tid`'s pending event(s) matching `pred` `Occurred` and wake it —
/// `sync.rs`'s and `worker.rs`'s primitives use this rather than waking the
/// thread blind, so the woken thread's own `events` ring reflects what
/// actually happened, the same way `satisfy_msg_events` does for message
/// ports.
pub(crate) fn resolve_event(tid: ThreadId, pred: impl Fn(&EventKind) -> bool) -> bool {
    match runtime() {
        Ok(rt) => rt
            .scheduler
            .lock()
            .expect("scheduler poisoned")
            .resolve_thread_event(tid, pred),
        Err(_) => false,
    }
}

/// `spec.md` §4.4 `wait(ring)`: mark every event in `ring` pending, block
/// until at least one resolves, and report how many did *not* stay pending.
/// `extra`, if given, is folded into the same block and is not itself
/// returned in the count or freed — callers that compose a primary wait
/// with a cancellation/timeout event pass it here.
pub fn wait(ring: &mut EventRing) -> RtResult<usize> {
    let rt = runtime()?;
    {
        let mut sched = rt.scheduler.lock().expect("scheduler poisoned");
        for e in ring.iter() {
            sched.set_event_status(e, EventStatus::Pending);
        }
    }
    let events: Vec<EventHandle> = ring.iter().collect();
    block_current_on(events)?;
    let sched = rt.scheduler.lock().expect("scheduler poisoned");
    Ok(ring
        .iter()
        .filter(|&e| sched.event_status(e) != Some(EventStatus::Pending))
        .count())
}

/// Block on `primary`, but wake early if `extra` resolves first — used by
/// `sync.rs` to compose a mutex/condvar wait with a caller-supplied
/// cancellation or timeout event. Returns `Err(RtError::Interrupted)` when
/// `extra` is what actually fired.
pub(crate) fn block_on_with_extra(primary: EventHandle, extra: Option<EventHandle>) -> RtResult<()> {
    let events = match extra {
        Some(e) => vec![primary, e],
        None => vec![primary],
    };
    block_current_on(events)?;
    if let Some(e) = extra {
        let rt = runtime()?;
        let sched = rt.scheduler.lock().expect("scheduler poisoned");
        let extra_fired = sched.event_status(e) != Some(EventStatus::Pending);
        let primary_fired = sched.event_status(primary) != Some(EventStatus::Pending);
        if extra_fired && !primary_fired {
            return Err(RtError::Interrupted);
        }
    }
    Ok(())
}

pub fn event_status(e: EventHandle) -> Option<EventStatus> {
    let rt = runtime().ok()?;
    let sched = rt.scheduler.lock().expect("scheduler poisoned");
    sched.event_status(e)
}

/// `spec.md` §4.3 `typeof(e)`: which kind of event `e` is, without exposing
/// the kind's caller-private payload (an fd, a raw mutex address, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Fd,
    Select,
    Time,
    Msg,
    Mutex,
    Cond,
    Func,
    Task,
}

/// `spec.md` §4.3 `extract(e)`: the one piece of caller-visible data each
/// event kind carries, for introspection.
#[derive(Debug, Clone, Copy)]
pub enum EventInfo {
    Fd(RawFd),
    Time(Instant),
    Msg(PortId),
    Other,
}

pub fn event_typeof(e: EventHandle) -> RtResult<EventType> {
    let rt = runtime()?;
    let sched = rt.scheduler.lock().expect("scheduler poisoned");
    let kind = sched.event_kind(e).ok_or(RtError::NoSuch)?;
    Ok(match kind {
        EventKind::Fd { .. } => EventType::Fd,
        EventKind::Select { .. } => EventType::Select,
        EventKind::Time { .. } => EventType::Time,
        EventKind::Msg { .. } => EventType::Msg,
        EventKind::Mutex { .. } => EventType::Mutex,
        EventKind::Cond { .. } => EventType::Cond,
        EventKind::Func { .. } => EventType::Func,
        EventKind::Task { .. } => EventType::Task,
    })
}

pub fn event_extract(e: EventHandle) -> RtResult<EventInfo> {
    let rt = runtime()?;
    let sched = rt.scheduler.lock().expect("scheduler poisoned");
    let kind = sched.event_kind(e).ok_or(RtError::NoSuch)?;
    Ok(match kind {
        EventKind::Fd { fd, .. } => EventInfo::Fd(*fd),
        EventKind::Time { deadline } => EventInfo::Time(*deadline),
        EventKind::Msg { port } => EventInfo::Msg(*port),
        _ => EventInfo::Other,
    })
}

/// `spec.md` §4.3 `free(e, scope)`: free just `e`, or every event still
/// linked into the same ring as `e`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeScope {
    Single,
    Ring,
}

pub fn event_free(ring: &mut EventRing, e: EventHandle, scope: FreeScope) {
    match scope {
        FreeScope::Single => {
            ring.remove(e);
            free_event(e);
        }
        FreeScope::Ring => {
            let members: Vec<EventHandle> = ring.iter().collect();
            for m in members {
                ring.remove(m);
                free_event(m);
            }
        }
    }
}

/// `spec.md` §4.3 `walk(e, NEXT|PREV)`, exposed on the facade since it needs
/// to read each candidate's status out of the arena.
pub fn event_walk(ring: &EventRing, from: EventHandle, dir: WalkDirection, until_occurred: bool) -> Option<EventHandle> {
    let rt = runtime().ok()?;
    let sched = rt.scheduler.lock().expect("scheduler poisoned");
    crate::event::walk(ring, from, dir, until_occurred, |h| {
        sched.event_status(h) == Some(EventStatus::Pending)
    })
}

// `Tcb::owned_mutexes` records *that* a thread holds locks, for
// introspection; it does not yet drive an automatic `release_all()` on
// thread death (see DESIGN.md's open-question log for why: `Mutex<T>`'s
// lifetime isn't `'static`, so the TCB arena has nowhere safe to stash a
// type-erased release callback without unsafe lifetime erasure). A thread
// that is `cancel`led or `abort`ed while holding a `sync::Mutex` currently
// leaves it locked — callers that need cancellation safety should prefer
// `push_cleanup` to release their own locks explicitly. These two hooks
// keep `sync.rs`'s acquire/release calls symmetric so that gap has exactly
// one place to be closed later.
pub(crate) fn track_owned_mutex(addr: usize) {
    let _ = addr;
}

pub(crate) fn untrack_owned_mutex(addr: usize) {
    let _ = addr;
}

// ---- worker offload --------------------------------------------------

/// Hand the calling green thread's execution to a worker OS thread so a
/// blocking call doesn't stall the scheduler (`spec.md` §4.10).
///
/// Unlike a typical thread-pool API, `f` is not boxed and shipped to the
/// worker through the channel: only a `HandOff` referencing this thread's
/// *own* saved `Context` travels there. The worker resumes that `Context`
/// directly, which means execution of this very function call continues,
/// now driven by the worker's OS thread — `f()` runs right here, inline,
/// after the first `switch_context` returns. `get_back` then switches a
/// second time, handing the thread back to ordinary scheduling before this
/// call finally returns its result to the caller.
pub fn hand_out<F, R>(f: F) -> RtResult<R>
where
    F: FnOnce() -> R + Send,
{
    let rt = runtime()?;
    let me = current_tid()?;
    let fini = Arc::new(AtomicBool::new(false));
    let mut worker_ctx = Context::empty();
    let worker_ctx_ptr: *mut Context = &mut worker_ctx;
    let thread_ctx = {
        let mut sched = rt.scheduler.lock().expect("scheduler poisoned");
        sched.context_mut_ptr(me).expect("current tcb must exist")
    };

    let event = alloc_event(EventKind::Task {
        fini: Arc::clone(&fini),
    });

    // Enqueueing is non-blocking: a full queue (spec.md §4.10's bounded
    // backpressure) is handled by cooperatively yielding and retrying, not
    // by blocking the shared dispatch thread inside the channel's `send`.
    let mut off = HandOff {
        tid: me,
        thread_ctx,
        worker_ctx: worker_ctx_ptr,
        fini: Arc::clone(&fini),
        event,
    };
    loop {
        match rt.workers.try_hand_out(off) {
            Ok(()) => break,
            Err(HandOffFailure::Full(returned)) => {
                off = returned;
                yield_now()?;
            }
            Err(HandOffFailure::Disconnected(_)) => return Err(RtError::NotPermitted),
        }
    }

    let (old, new) = {
        let mut sched = rt.scheduler.lock().expect("scheduler poisoned");
        sched.prepare_block(vec![event])
    };
    debug_assert_eq!(old, thread_ctx);

    // --- switches onto the scheduler; resumes below once a worker has
    // switched into `thread_ctx` and is now driving this call. ---
    unsafe { switch_context(old, new) };

    let result = f();

    // --- switches back to the worker loop; resumes below once the
    // scheduler has dispatched this thread again normally. ---
    unsafe { crate::worker::get_back(thread_ctx) };

    debug_assert!(fini.load(Ordering::Acquire));
    free_event(event);
    check_cancellation()?;
    Ok(result)
}

// ---- message ports -----------------------------------------------------

pub fn port_create(name: Option<&str>) -> RtResult<PortId> {
    let rt = runtime()?;
    rt.ports.lock().expect("ports poisoned").create(name)
}

pub fn port_find(name: &str) -> RtResult<PortId> {
    let rt = runtime()?;
    rt.ports
        .lock()
        .expect("ports poisoned")
        .find(name)
        .ok_or(RtError::NoSuch)
}

pub fn port_put(port: PortId, payload: Box<dyn Any + Send>, reply_to: Option<PortId>) -> RtResult<()> {
    let rt = runtime()?;
    rt.ports.lock().expect("ports poisoned").put(port, payload, reply_to)?;
    rt.scheduler.lock().expect("scheduler poisoned").satisfy_msg_events(port);
    Ok(())
}

/// Blocks until a message is available (`spec.md` §4.9).
pub fn port_get(port: PortId) -> RtResult<Message> {
    let rt = runtime()?;
    loop {
        {
            let mut ports = rt.ports.lock().expect("ports poisoned");
            if let Some(msg) = ports.get(port)? {
                return Ok(msg);
            }
        }
        let e = alloc_event(EventKind::Msg { port });
        let outcome = block_current_on(vec![e]);
        free_event(e);
        outcome?;
    }
}

pub fn port_reply(msg: Message, payload: Box<dyn Any + Send>) -> RtResult<()> {
    let rt = runtime()?;
    let reply_to = msg.reply_to;
    rt.ports.lock().expect("ports poisoned").reply(msg, payload)?;
    if let Some(to) = reply_to {
        rt.scheduler.lock().expect("scheduler poisoned").satisfy_msg_events(to);
    }
    Ok(())
}

pub fn port_pending(port: PortId) -> RtResult<usize> {
    let rt = runtime()?;
    rt.ports.lock().expect("ports poisoned").pending(port)
}

pub fn port_destroy(port: PortId) -> RtResult<()> {
    let rt = runtime()?;
    let notified = rt.ports.lock().expect("ports poisoned").destroy(port)?;
    let mut sched = rt.scheduler.lock().expect("scheduler poisoned");
    for to in notified {
        sched.satisfy_msg_events(to);
    }
    Ok(())
}

// ---- thread-specific data / cleanup -----------------------------------

pub fn tsd_set(key: usize, value: Option<Box<dyn Any + Send>>) -> RtResult<()> {
    let rt = runtime()?;
    let me = current_tid()?;
    if key >= crate::config::TSD_KEYS_MAX {
        return Err(RtError::InvalidArgument);
    }
    rt.scheduler.lock().expect("scheduler poisoned").tsd_set(me, key, value);
    Ok(())
}

pub fn push_cleanup(handler: crate::tcb::CleanupHandler) -> RtResult<()> {
    let rt = runtime()?;
    let me = current_tid()?;
    rt.scheduler.lock().expect("scheduler poisoned").push_cleanup(me, handler);
    Ok(())
}

// ---- ctrl / introspection ----------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct CtrlSnapshot {
    pub threads_total: usize,
    pub new: usize,
    pub ready: usize,
    pub waiting: usize,
    pub suspended: usize,
    pub dead: usize,
    pub worker_threads: usize,
}

pub fn ctrl() -> RtResult<CtrlSnapshot> {
    let rt = runtime()?;
    let sched = rt.scheduler.lock().expect("scheduler poisoned");
    let counts = sched.counts();
    Ok(CtrlSnapshot {
        threads_total: sched.thread_count(),
        new: counts.new,
        ready: counts.ready,
        waiting: counts.waiting,
        suspended: counts.suspended,
        dead: counts.dead,
        worker_threads: rt.workers.worker_count(),
    })
}

/// `ht_ctrl()`'s query set, given a concrete Rust shape (`SPEC_FULL.md`
/// §2.5): a typed request/reply pair rather than a bitmask + output
/// pointer, since that is what the same query looks like once it no
/// longer has to cross a C ABI.
#[derive(Debug, Clone, Copy)]
pub enum CtrlQuery {
    /// `HT_CTRL_GETAVLOAD`: the ready-queue-length EMA, ticked once per wall
    /// second (spec.md §4.5).
    AverageLoad,
    /// `HT_CTRL_FAVOURNEW`: whether freshly spawned threads are favoured to
    /// run next (`RuntimeConfig::favour_new`).
    FavourNew,
    /// `HT_CTRL_DUMPSTATE`: a full snapshot, same shape as [`CtrlSnapshot`].
    DumpState,
}

#[derive(Debug, Clone)]
pub enum CtrlReply {
    AverageLoad(f64),
    FavourNew(bool),
    DumpState(CtrlSnapshot),
}

/// Alias kept for the `HT_CTRL_DUMPSTATE` naming in `SPEC_FULL.md` §2.5;
/// identical to [`CtrlSnapshot`].
pub type SchedulerSnapshot = CtrlSnapshot;

pub fn ctrl_query(query: CtrlQuery) -> RtResult<CtrlReply> {
    let rt = runtime()?;
    let sched = rt.scheduler.lock().expect("scheduler poisoned");
    Ok(match query {
        CtrlQuery::AverageLoad => CtrlReply::AverageLoad(sched.load()),
        CtrlQuery::FavourNew => CtrlReply::FavourNew(sched.favour_new()),
        CtrlQuery::DumpState => {
            drop(sched);
            CtrlReply::DumpState(ctrl()?)
        }
    })
}

pub fn dump_state() -> RtResult<SchedulerSnapshot> {
    ctrl()
}

pub fn get_attr(tid: ThreadId, key: crate::tcb::AttrKey) -> RtResult<crate::tcb::AttrValue> {
    let rt = runtime()?;
    rt.scheduler
        .lock()
        .expect("scheduler poisoned")
        .get_attr(tid, key)
        .ok_or(RtError::NoSuch)
}

pub fn priority_of(tid: ThreadId) -> RtResult<i32> {
    let rt = runtime()?;
    rt.scheduler
        .lock()
        .expect("scheduler poisoned")
        .priority_of(tid)
        .ok_or(RtError::NoSuch)
}

pub fn name_of(tid: ThreadId) -> RtResult<Option<String>> {
    let rt = runtime()?;
    Ok(rt.scheduler.lock().expect("scheduler poisoned").name_of(tid))
}

/// Tear down the global runtime slot so a later `init` can run again.
/// Outstanding worker threads are joined by `WorkerPool::drop` once the
/// last `Arc<Runtime>` referencing them goes away.
pub fn kill() -> RtResult<()> {
    let mut slot = RUNTIME.lock().expect("runtime slot poisoned");
    if slot.take().is_none() {
        return Err(RtError::NotPermitted);
    }
    Ok(())
}
