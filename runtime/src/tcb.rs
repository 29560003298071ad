//! Thread control block. `spec.md` §4.2: identity, priority, saved machine
//! context, stack + guard word, join/cancellation state, cleanup stack,
//! thread-specific data, and the owned-mutex / event rings.
//!
//! Grounded on the teacher's `exercises/04_context_switch/02_green_threads`
//! `Thread`/TCB shape, generalized from that exercise's fixed two-thread demo
//! to the full state machine spec.md §4.4 describes.

use crate::config::TSD_KEYS_MAX;
use crate::context::{Context, Stack};
use crate::event::EventHandle;
use crate::ring::Ring;
use crate::slab::Handle;
use std::time::Instant;

pub type ThreadId = Handle;

/// `spec.md` §4.4 thread state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// The scheduler's own bookkeeping pseudo-thread; never dispatched.
    Scheduler,
    /// Spawned but not yet admitted to the ready queue.
    New,
    Ready,
    Waiting,
    /// Handed out to a worker OS thread; the scheduler must not touch its
    /// `Context` until `get_back` completes (spec.md §4.10).
    WaitingForWorker,
    Dead,
}

/// What a thread is allowed to do on entry: detach state and a caller
/// supplied stack ("bindable"), mirroring spec.md §4.2's `Attr`.
#[derive(Debug, Clone)]
pub struct Attr {
    pub detached: bool,
    pub priority: i32,
    pub stack_size: usize,
    pub stack_addr: Option<(usize, usize)>,
    pub name: Option<String>,
}

impl Default for Attr {
    fn default() -> Self {
        Self {
            detached: false,
            priority: crate::config::PRIO_STD,
            stack_size: crate::config::STACK_SIZE_DEFAULT,
            stack_addr: None,
            name: None,
        }
    }
}

/// Which per-thread attribute a `ctrl`-style introspection query wants
/// (`ht.h`'s `HT_ATTR_*` keys, given a concrete Rust shape — spec.md §4.2
/// describes the same fields in prose without naming an enum).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrKey {
    Priority,
    Name,
    Joinable,
    CancelState,
    Dispatches,
    TimeSpawn,
    State,
    /// Whether the thread is currently handed out to a worker OS thread.
    Bound,
    /// The stack size this thread was spawned with (or the runtime default
    /// if `Attr::stack_size` was left `0`).
    StackSize,
    /// The caller-supplied `(low, high)` bounds, if this thread was spawned
    /// with `Attr::stack_addr` rather than an allocated stack.
    StackAddr,
    /// When this thread was last dispatched.
    TimeLast,
    /// Cumulative wall-clock time this thread has spent actually running,
    /// summed across every dispatch.
    TimeRan,
}

#[derive(Debug, Clone)]
pub enum AttrValue {
    Priority(i32),
    Name(Option<String>),
    Joinable(bool),
    CancelState(bool),
    Dispatches(u64),
    TimeSpawn(Instant),
    State(ThreadState),
    Bound(bool),
    StackSize(usize),
    StackAddr(Option<(usize, usize)>),
    TimeLast(Option<Instant>),
    TimeRan(std::time::Duration),
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CancelState: u8 {
        const ENABLED = 0b01;
        const ASYNC = 0b10;
    }
}

/// A single registered cleanup handler, pushed/popped stack-style
/// (spec.md §4.2 "cleanup-handler stack", run in LIFO order on cancellation
/// or normal `exit`).
pub type CleanupHandler = Box<dyn FnOnce() + Send>;

/// Scheduler-internal; never reachable outside this crate even though the
/// `tcb` module itself is public (for `ThreadId`/`Attr`/`ThreadState`), since
/// its `context`/`stack` fields need the crate-private `Context`/`Stack`
/// types from `context.rs`.
pub(crate) struct Tcb {
    pub name: Option<String>,
    pub priority: i32,
    pub state: ThreadState,
    pub detached: bool,

    pub(crate) context: Context,
    pub(crate) stack: Stack,

    pub dispatches: u64,
    pub spawned_at: Instant,

    pub stack_size: usize,
    pub stack_addr: Option<(usize, usize)>,
    /// When this thread was last switched into by the scheduler.
    pub last_ran: Option<Instant>,
    /// Cumulative time spent actually running, summed across dispatches.
    pub time_ran: std::time::Duration,

    /// Events this thread is currently waiting on.
    pub events: Ring<EventHandle>,

    pub joinable_waiters: Ring<ThreadId>,
    pub join_value: Option<Box<dyn std::any::Any + Send>>,

    pub cleanup_stack: Vec<CleanupHandler>,
    pub tsd: Vec<Option<Box<dyn std::any::Any + Send>>>,

    pub cancel_state: CancelState,
    pub cancel_requested: bool,

    /// Raw addresses of `MutexState`s currently held by this thread, for
    /// `release_all` on exit (spec.md §4.8's "owner's owned-mutex ring").
    /// `MutexState` lives in caller-owned storage (typically behind an
    /// `Arc`), not the scheduler's arena, so a ring of arena handles isn't
    /// available here the way it is for events; the pointer is a pure,
    /// non-owning back-reference exercised only by the thread that holds
    /// the lock or by the scheduler during that thread's own teardown.
    pub owned_mutexes: Ring<usize>,
}

impl Tcb {
    pub fn new_main() -> Self {
        Self {
            name: Some("main".to_string()),
            priority: crate::config::PRIO_STD,
            state: ThreadState::Ready,
            detached: false,
            context: Context::empty(),
            stack: Stack::main_thread(),
            dispatches: 0,
            spawned_at: Instant::now(),
            stack_size: 0,
            stack_addr: None,
            last_ran: None,
            time_ran: std::time::Duration::ZERO,
            events: Ring::new(),
            joinable_waiters: Ring::new(),
            join_value: None,
            cleanup_stack: Vec::new(),
            tsd: (0..TSD_KEYS_MAX).map(|_| None).collect(),
            cancel_state: CancelState::ENABLED,
            cancel_requested: false,
            owned_mutexes: Ring::new(),
        }
    }

    pub fn new_spawned(attr: &Attr, context: Context, stack: Stack, stack_size: usize) -> Self {
        Self {
            name: attr.name.clone(),
            priority: attr.priority,
            state: ThreadState::New,
            detached: attr.detached,
            context,
            stack,
            dispatches: 0,
            spawned_at: Instant::now(),
            stack_size,
            stack_addr: attr.stack_addr,
            last_ran: None,
            time_ran: std::time::Duration::ZERO,
            events: Ring::new(),
            joinable_waiters: Ring::new(),
            join_value: None,
            cleanup_stack: Vec::new(),
            tsd: (0..TSD_KEYS_MAX).map(|_| None).collect(),
            cancel_state: CancelState::ENABLED,
            cancel_requested: false,
            owned_mutexes: Ring::new(),
        }
    }

    pub fn guard_intact(&self) -> bool {
        self.stack.guard_intact()
    }

    pub fn push_cleanup(&mut self, handler: CleanupHandler) {
        self.cleanup_stack.push(handler);
    }

    /// Runs every registered handler, most-recently-pushed first.
    pub fn run_cleanup(&mut self) {
        while let Some(handler) = self.cleanup_stack.pop() {
            handler();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_main_thread_is_ready_and_has_an_intact_guard() {
        let tcb = Tcb::new_main();
        assert_eq!(tcb.state, ThreadState::Ready);
        assert!(tcb.guard_intact());
    }

    #[test]
    fn cleanup_handlers_run_most_recent_first() {
        let mut tcb = Tcb::new_main();
        let order = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            tcb.push_cleanup(Box::new(move || order.lock().unwrap().push(i)));
        }
        tcb.run_cleanup();
        assert_eq!(*order.lock().unwrap(), vec![2, 1, 0]);
    }
}
