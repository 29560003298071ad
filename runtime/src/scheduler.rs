//! The cooperative scheduler. `spec.md` §4.4 (thread state machine), §4.5
//! (main loop), §4.7 (spawn/yield/join/exit/cancel/abort/suspend/resume).
//!
//! Generalizes the teacher's round-robin `Scheduler` (`exercises/
//! 04_context_switch/02_green_threads`) from a fixed two-queue
//! (`Ready`/`Finished`) round robin into the five-queue, priority-ordered
//! machine spec.md describes, replacing its `static mut SCHEDULER` pointer
//! with explicit `&mut Scheduler` ownership — the thread-local wiring that
//! plays the teacher's global's role lives in `runtime.rs`, the only place
//! that needs to reach a `Scheduler` from arbitrary call sites.
//!
//! A dispatch is a single `switch_context` call and is only ever issued
//! with no outstanding borrow of `Scheduler` — see `runtime.rs`'s
//! `with_scheduler` for why.

use crate::context::{make_context, switch_context, Context, Stack, ThreadThunk};
use crate::error::{RtError, RtResult};
use crate::event::{Event, EventHandle, EventKind, EventStatus};
use crate::msgport::PortId;
use crate::pqueue::PriorityQueue;
use crate::ring::Ring;
use crate::slab::Slab;
use crate::tcb::{Attr, Tcb, ThreadId, ThreadState};
use std::any::Any;
use std::time::{Duration, Instant};

/// What the currently running thread asked to happen the next time the
/// scheduler regains control, recorded just before it switches back.
pub(crate) enum PendingTransition {
    Yielded,
    Exited(Box<dyn Any + Send>),
    Blocked(Vec<EventHandle>),
    Suspended,
}

pub(crate) enum Dispatch {
    /// Switch from the scheduler's own context into `target`'s.
    Run {
        target: ThreadId,
        old: *mut Context,
        new: *const Context,
    },
    /// Nothing is ready; wait up to `timeout` on the event backend.
    Idle { timeout: Option<Duration> },
    /// No threads left anywhere but the scheduler itself.
    Done,
}

pub struct Scheduler {
    threads: Slab<Tcb>,
    new_q: PriorityQueue<ThreadId>,
    ready_q: PriorityQueue<ThreadId>,
    waiting_q: PriorityQueue<ThreadId>,
    suspended_q: PriorityQueue<ThreadId>,
    dead_q: PriorityQueue<ThreadId>,

    events: Slab<Event>,
    static_events: std::collections::HashMap<u64, EventHandle>,

    scheduler_tid: ThreadId,
    main_tid: ThreadId,
    current: ThreadId,
    pending: Option<(ThreadId, PendingTransition)>,

    favour_new: bool,
    default_stack_size: usize,

    /// `spec.md` §4.5's exponentially-weighted moving average of `ready_q`'s
    /// length, ticked once per wall-clock second.
    load: f64,
    last_load_tick: Instant,
}

impl Scheduler {
    /// Build the scheduler, its own bookkeeping pseudo-thread, and a TCB
    /// for "main" — the OS thread that called `Runtime::init` and is about
    /// to become thread 1 once `bootstrap_contexts` is used.
    ///
    /// `scheduler_thunk` is boxed by the caller (`runtime.rs`) because it
    /// needs to close over the thread-local that reaches back into this
    /// very `Scheduler`; this module only knows how to run *some* thunk on
    /// a fresh stack, not what that thunk does.
    pub fn new(config: &crate::config::RuntimeConfig, scheduler_thunk: ThreadThunk) -> Self {
        let mut threads = Slab::new();

        let sched_stack =
            Stack::alloc(config.stack_size, None).expect("out of memory bootstrapping scheduler stack");
        crate::context::set_pending_entry(scheduler_thunk);
        let sched_ctx = make_context(&sched_stack);
        let mut sched_tcb = Tcb::new_spawned(
            &Attr {
                name: Some("scheduler".into()),
                ..Attr::default()
            },
            sched_ctx,
            sched_stack,
            config.stack_size,
        );
        sched_tcb.state = ThreadState::Scheduler;
        let scheduler_tid = threads.insert(sched_tcb);

        let main_tcb = Tcb::new_main();
        let main_tid = threads.insert(main_tcb);

        let mut ready_q = PriorityQueue::new();
        ready_q.insert(crate::config::PRIO_STD as i64, main_tid);

        Self {
            threads,
            new_q: PriorityQueue::new(),
            ready_q,
            waiting_q: PriorityQueue::new(),
            suspended_q: PriorityQueue::new(),
            dead_q: PriorityQueue::new(),
            events: Slab::new(),
            static_events: std::collections::HashMap::new(),
            scheduler_tid,
            main_tid,
            current: main_tid,
            pending: None,
            favour_new: config.favour_new,
            default_stack_size: config.stack_size,
            load: 0.0,
            last_load_tick: Instant::now(),
        }
    }

    /// Current load average (spec.md §4.5): `0.25*|ready_q| + 0.75*load`,
    /// applied once per elapsed wall second since the last tick. Missed
    /// ticks (the dispatch loop didn't run for several seconds) are
    /// simulated by reapplying the formula once per whole second elapsed,
    /// rather than treating a long gap as a single tick.
    pub(crate) fn load(&self) -> f64 {
        self.load
    }

    fn tick_load(&mut self) {
        let elapsed = self.last_load_tick.elapsed();
        let ticks = elapsed.as_secs();
        if ticks == 0 {
            return;
        }
        let rq = self.ready_q.len() as f64;
        for _ in 0..ticks {
            self.load = 0.25 * rq + 0.75 * self.load;
        }
        self.last_load_tick += Duration::from_secs(ticks);
    }

    pub fn main_tid(&self) -> ThreadId {
        self.main_tid
    }

    pub fn scheduler_tid(&self) -> ThreadId {
        self.scheduler_tid
    }

    pub fn current(&self) -> ThreadId {
        self.current
    }

    pub fn context_ptr(&self, tid: ThreadId) -> Option<*const Context> {
        self.threads.get(tid).map(|t| &t.context as *const Context)
    }

    pub fn context_mut_ptr(&mut self, tid: ThreadId) -> Option<*mut Context> {
        self.threads.get_mut(tid).map(|t| &mut t.context as *mut Context)
    }

    // ---- spawn -----------------------------------------------------

    /// `spawner` is the caller's own thread id, used only for the
    /// `favourNew` relative-priority calculation. It is supplied by the
    /// caller (`runtime.rs`) rather than read off `self.current` because a
    /// green thread handed out to a worker OS thread (`worker.rs`) is not
    /// tracked by `self.current` — that field only follows whichever
    /// thread the scheduler's own dispatch loop most recently switched
    /// into, not threads a worker is running directly.
    pub fn spawn(&mut self, spawner: ThreadId, attr: Attr, thunk: ThreadThunk) -> RtResult<ThreadId> {
        let stack_size = if attr.stack_size == 0 {
            self.default_stack_size
        } else {
            attr.stack_size
        };
        let stack = Stack::alloc(stack_size, attr.stack_addr).ok_or(RtError::OutOfMemory)?;
        crate::context::set_pending_entry(thunk);
        let ctx = make_context(&stack);
        let tid = self.threads.insert(Tcb::new_spawned(&attr, ctx, stack, stack_size));

        let prio = if self.favour_new {
            self.ready_q
                .effective_priority_of(spawner)
                .unwrap_or(attr.priority as i64)
                + 1
        } else {
            attr.priority as i64
        };
        self.new_q.insert(prio, tid);
        Ok(tid)
    }

    /// Admit everyone in `new_q` into `ready_q`, per spec.md §4.5 step 1.
    ///
    /// `new_q` itself is already ordered by the boosted priority `spawn()`
    /// computed (`effective_priority_of(spawner)+1` under favourNew); once a
    /// thread is in `ready_q` that boost must still hold, or a newly spawned
    /// thread would run behind incumbents whenever `favour_new` is set. So
    /// when `favour_new` is on, admission uses `favorite` (head-of-queue)
    /// rather than re-deriving the thread's plain base priority.
    fn admit_new(&mut self) {
        while let Some(tid) = self.new_q.delmax() {
            if let Some(tcb) = self.threads.get_mut(tid) {
                tcb.state = ThreadState::Ready;
            }
            let prio = self
                .threads
                .get(tid)
                .map(|t| t.priority as i64)
                .unwrap_or(0);
            self.ready_q.insert(prio, tid);
            if self.favour_new {
                self.ready_q.favorite(tid);
            }
        }
    }

    // ---- dispatch loop ----------------------------------------------

    /// Age the ready and waiting queues once per cycle so low-priority
    /// threads eventually run (spec.md §4.5's anti-starvation note).
    fn age_queues(&mut self) {
        self.ready_q.increase();
        self.waiting_q.increase();
    }

    pub(crate) fn select_next_dispatch(&mut self) -> Dispatch {
        self.admit_new();
        self.age_queues();
        self.tick_load();

        if self.ready_q.is_empty() {
            if self.waiting_q.is_empty() {
                return Dispatch::Done;
            }
            return Dispatch::Idle {
                timeout: self.next_deadline(),
            };
        }

        let target = self.ready_q.delmax().expect("checked non-empty above");
        self.current = target;
        if let Some(tcb) = self.threads.get_mut(target) {
            tcb.dispatches += 1;
            tcb.last_ran = Some(Instant::now());
        }

        let old = self
            .context_mut_ptr(self.scheduler_tid)
            .expect("scheduler tcb always present");
        let new = self
            .context_ptr(target)
            .expect("target tcb just pulled from ready_q");
        Dispatch::Run { target, old, new }
    }

    /// Upper bound on how long a poll cycle may block with nothing to wait
    /// on but fds/timers: long enough to not spin, short enough that a
    /// worker resolving its thread's event (which needs the same lock
    /// `poll_once` holds for its syscall) is never starved behind an
    /// unbounded wait.
    const IDLE_POLL_CAP: Duration = Duration::from_millis(50);

    fn next_deadline(&self) -> Option<Duration> {
        let mut soonest: Option<Instant> = None;
        for tid in self.waiting_q.iter() {
            if let Some(tcb) = self.threads.get(tid) {
                for eh in tcb.events.iter() {
                    if let Some(Event {
                        kind: EventKind::Time { deadline },
                        ..
                    }) = self.events.get(eh)
                    {
                        soonest = Some(soonest.map_or(*deadline, |s| s.min(*deadline)));
                    }
                }
            }
        }
        let wait = soonest.map(|d| d.saturating_duration_since(Instant::now()));
        Some(wait.unwrap_or(Self::IDLE_POLL_CAP).min(Self::IDLE_POLL_CAP))
    }

    /// Called by the scheduler's own coroutine immediately after a
    /// dispatch's `switch_context` call returns control to it — i.e. the
    /// dispatched thread yielded, blocked, exited or was found dead.
    pub(crate) fn resume_after_dispatch(&mut self) {
        let Some((tid, transition)) = self.pending.take() else {
            return;
        };
        if let Some(t) = self.threads.get_mut(tid) {
            if let Some(start) = t.last_ran {
                t.time_ran += start.elapsed();
            }
        }
        let guard_ok = self.threads.get(tid).map(|t| t.guard_intact()).unwrap_or(true);
        if !guard_ok {
            log::error!("thread {:?} stack guard corrupted; killing it", tid);
            if let Some(t) = self.threads.get_mut(tid) {
                t.join_value = Some(Box::new(crate::config::STACKGUARD_MAGIC));
            }
            self.finish(tid, Err(()));
            // spec.md §4.5 step 7: a corrupted guard word is a fatal
            // process-level condition, not just this thread's problem.
            unsafe { libc::raise(libc::SIGSEGV) };
            return;
        }
        match transition {
            PendingTransition::Yielded => {
                let prio = self.threads.get(tid).map(|t| t.priority as i64).unwrap_or(0);
                if let Some(t) = self.threads.get_mut(tid) {
                    t.state = ThreadState::Ready;
                }
                self.ready_q.insert(prio, tid);
            }
            PendingTransition::Exited(value) => {
                if let Some(t) = self.threads.get_mut(tid) {
                    t.join_value = Some(value);
                }
                self.finish(tid, Ok(()));
            }
            PendingTransition::Blocked(events) => {
                if let Some(t) = self.threads.get_mut(tid) {
                    t.state = ThreadState::Waiting;
                    for e in events {
                        t.events.push_back(e);
                    }
                }
                let prio = self.threads.get(tid).map(|t| t.priority as i64).unwrap_or(0);
                self.waiting_q.insert(prio, tid);
            }
            PendingTransition::Suspended => {
                if let Some(t) = self.threads.get_mut(tid) {
                    t.state = ThreadState::Waiting;
                }
                let prio = self.threads.get(tid).map(|t| t.priority as i64).unwrap_or(0);
                self.suspended_q.insert(prio, tid);
            }
        }
    }

    fn finish(&mut self, tid: ThreadId, _outcome: Result<(), ()>) {
        if let Some(t) = self.threads.get_mut(tid) {
            t.state = ThreadState::Dead;
            t.run_cleanup();
            while let Some(waiter) = t.joinable_waiters.pop_front() {
                self.wake(waiter);
            }
        }
        self.dead_q.insert(0, tid);
    }

    // ---- blocking / waking --------------------------------------------

    /// Prepare `current` to switch back to the scheduler with a pending
    /// transition recorded, returning the raw context pointers the caller
    /// (which holds no borrow by the time it uses them) passes to
    /// `switch_context`.
    fn prepare_switch_to_scheduler(
        &mut self,
        transition: PendingTransition,
    ) -> (*mut Context, *const Context) {
        let tid = self.current;
        self.pending = Some((tid, transition));
        let old = self.context_mut_ptr(tid).expect("current tcb must exist");
        let new = self
            .context_ptr(self.scheduler_tid)
            .expect("scheduler tcb always present");
        (old, new)
    }

    pub(crate) fn prepare_yield(&mut self) -> (*mut Context, *const Context) {
        self.prepare_switch_to_scheduler(PendingTransition::Yielded)
    }

    /// Promote `target` to the head of `ready_q` so it is dispatched next —
    /// spec.md §4.7's `yield(target?)`. `target` must already be in NEW or
    /// READY; `false` means the caller should report `InvalidArgument`.
    pub(crate) fn favor_next(&mut self, target: ThreadId) -> bool {
        self.ready_q.favorite(target)
    }

    pub(crate) fn prepare_exit(&mut self, value: Box<dyn Any + Send>) -> (*mut Context, *const Context) {
        self.prepare_switch_to_scheduler(PendingTransition::Exited(value))
    }

    pub(crate) fn prepare_block(
        &mut self,
        events: Vec<EventHandle>,
    ) -> (*mut Context, *const Context) {
        self.prepare_switch_to_scheduler(PendingTransition::Blocked(events))
    }

    pub(crate) fn prepare_suspend(&mut self, tid: ThreadId) -> (*mut Context, *const Context) {
        self.pending = Some((tid, PendingTransition::Suspended));
        let old = self.context_mut_ptr(tid).expect("target tcb must exist");
        let new = self
            .context_ptr(self.scheduler_tid)
            .expect("scheduler tcb always present");
        (old, new)
    }

    /// Move `tid` from `waiting_q`/`suspended_q` back to `ready_q`.
    pub(crate) fn wake(&mut self, tid: ThreadId) {
        self.waiting_q.delete(tid);
        self.suspended_q.delete(tid);
        if let Some(t) = self.threads.get_mut(tid) {
            t.state = ThreadState::Ready;
        }
        let prio = self.threads.get(tid).map(|t| t.priority as i64).unwrap_or(0);
        self.ready_q.insert(prio, tid);
    }

    pub(crate) fn resume_from_suspend(&mut self, tid: ThreadId) -> bool {
        if !self.suspended_q.delete(tid) {
            return false;
        }
        self.wake(tid);
        true
    }

    // ---- join / cancel / abort ----------------------------------------

    pub(crate) fn is_dead(&self, tid: ThreadId) -> bool {
        self.dead_q.contains(tid)
            || self
                .threads
                .get(tid)
                .map(|t| t.state == ThreadState::Dead)
                .unwrap_or(true)
    }

    pub(crate) fn take_join_value(&mut self, tid: ThreadId) -> Option<Box<dyn Any + Send>> {
        self.threads.get_mut(tid).and_then(|t| t.join_value.take())
    }

    pub(crate) fn register_join_waiter(&mut self, target: ThreadId, waiter: ThreadId) -> bool {
        match self.threads.get_mut(target) {
            Some(t) if t.state != ThreadState::Dead => {
                t.joinable_waiters.push_back(waiter);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn request_cancel(&mut self, tid: ThreadId) -> bool {
        if let Some(t) = self.threads.get_mut(tid) {
            t.cancel_requested = true;
            true
        } else {
            false
        }
    }

    pub(crate) fn cancel_requested(&self, tid: ThreadId) -> bool {
        self.threads.get(tid).map(|t| t.cancel_requested).unwrap_or(false)
    }

    /// Forcibly move `tid` straight to `Dead`, running its cleanup stack,
    /// without it ever running again — `spec.md` §4.7 `abort`.
    pub(crate) fn abort(&mut self, tid: ThreadId) -> bool {
        if tid == self.current || tid == self.scheduler_tid {
            return false;
        }
        self.new_q.delete(tid);
        self.ready_q.delete(tid);
        self.waiting_q.delete(tid);
        self.suspended_q.delete(tid);
        self.finish(tid, Err(()));
        true
    }

    pub(crate) fn priority_of(&self, tid: ThreadId) -> Option<i32> {
        self.threads.get(tid).map(|t| t.priority)
    }

    pub(crate) fn name_of(&self, tid: ThreadId) -> Option<String> {
        self.threads.get(tid).and_then(|t| t.name.clone())
    }

    // ---- TSD ------------------------------------------------------

    pub(crate) fn tsd_get(&self, tid: ThreadId, key: usize) -> Option<&Box<dyn Any + Send>> {
        self.threads.get(tid)?.tsd.get(key)?.as_ref()
    }

    pub(crate) fn tsd_set(&mut self, tid: ThreadId, key: usize, value: Option<Box<dyn Any + Send>>) {
        if let Some(t) = self.threads.get_mut(tid) {
            if key < t.tsd.len() {
                t.tsd[key] = value;
            }
        }
    }

    pub(crate) fn push_cleanup(&mut self, tid: ThreadId, handler: crate::tcb::CleanupHandler) {
        if let Some(t) = self.threads.get_mut(tid) {
            t.push_cleanup(handler);
        }
    }

    // ---- events ---------------------------------------------------

    pub(crate) fn alloc_event(&mut self, kind: EventKind) -> EventHandle {
        self.events.insert(Event::new(kind, crate::event::EventLifetime::Dynamic))
    }

    pub(crate) fn static_event(&mut self, token: u64, build: impl FnOnce() -> EventKind) -> EventHandle {
        if let Some(&h) = self.static_events.get(&token) {
            if self.events.contains(h) {
                return h;
            }
        }
        let h = self
            .events
            .insert(Event::new(build(), crate::event::EventLifetime::Static(token)));
        self.static_events.insert(token, h);
        h
    }

    pub(crate) fn event_status(&self, e: EventHandle) -> Option<EventStatus> {
        self.events.get(e).map(|ev| ev.status)
    }

    pub(crate) fn set_event_status(&mut self, e: EventHandle, status: EventStatus) {
        if let Some(ev) = self.events.get_mut(e) {
            ev.status = status;
        }
    }

    pub(crate) fn free_event(&mut self, e: EventHandle) {
        self.events.remove(e);
    }

    pub(crate) fn event_kind(&self, e: EventHandle) -> Option<&EventKind> {
        self.events.get(e).map(|ev| &ev.kind)
    }

    pub(crate) fn event_kind_mut(&mut self, e: EventHandle) -> Option<&mut EventKind> {
        self.events.get_mut(e).map(|ev| &mut ev.kind)
    }

    /// Walk every `Waiting` thread's event ring once, waking it if any of
    /// its events has gone `Occurred`/`Failed` (spec.md §4.6 phase C).
    pub(crate) fn wake_satisfied_waiters(&mut self) {
        let candidates: Vec<ThreadId> = self.waiting_q.iter().collect();
        for tid in candidates {
            let satisfied = self.threads.get(tid).map(|t| {
                t.events
                    .iter()
                    .any(|e| !matches!(self.events.get(e).map(|ev| ev.status), Some(EventStatus::Pending)))
            });
            if satisfied == Some(true) {
                self.wake(tid);
            }
        }
    }

    pub(crate) fn all_waiting_events(&self) -> Vec<(ThreadId, EventHandle)> {
        let mut out = Vec::new();
        for tid in self.waiting_q.iter() {
            if let Some(t) = self.threads.get(tid) {
                for e in t.events.iter() {
                    out.push((tid, e));
                }
            }
        }
        out
    }

    /// Marks every still-pending `Msg { port }` event as `Occurred` and
    /// wakes its waiter. `port_put`/`port_reply` call this after enqueueing
    /// so a thread blocked in `port_get` doesn't wait for `poll_once` to
    /// notice — mailboxes aren't fds or timers, nothing else ever touches
    /// their events.
    /// Mark `tid`'s own pending events matching `pred` `Occurred` and wake it
    /// if any matched. Used by `sync.rs`'s `Mutex`/`Cond` primitives, which
    /// (unlike fds/timers) know exactly which thread to resolve and have no
    /// use for `poll_once`'s per-cycle classification.
    pub(crate) fn resolve_thread_event(&mut self, tid: ThreadId, pred: impl Fn(&EventKind) -> bool) -> bool {
        let matches: Vec<EventHandle> = match self.threads.get(tid) {
            Some(t) => t
                .events
                .iter()
                .filter(|&e| matches!(self.event_kind(e), Some(k) if pred(k)))
                .collect(),
            None => return false,
        };
        if matches.is_empty() {
            return false;
        }
        for e in matches {
            self.set_event_status(e, EventStatus::Occurred);
        }
        self.wake(tid);
        true
    }

    pub(crate) fn satisfy_msg_events(&mut self, port: PortId) {
        let matches: Vec<EventHandle> = self
            .all_waiting_events()
            .into_iter()
            .filter_map(|(_, e)| {
                matches!(self.event_kind(e), Some(EventKind::Msg { port: p }) if *p == port).then_some(e)
            })
            .collect();
        for e in matches {
            self.set_event_status(e, EventStatus::Occurred);
        }
        self.wake_satisfied_waiters();
    }

    #[cfg(test)]
    pub(crate) fn test_force_wait(&mut self, tid: ThreadId, events: Vec<EventHandle>) {
        if let Some(t) = self.threads.get_mut(tid) {
            t.state = ThreadState::Waiting;
            for e in events {
                t.events.push_back(e);
            }
        }
        self.waiting_q.insert(0, tid);
    }

    pub(crate) fn thread_count(&self) -> usize {
        self.threads.len()
    }

    pub(crate) fn counts(&self) -> SchedulerCounts {
        SchedulerCounts {
            new: self.new_q.len(),
            ready: self.ready_q.len(),
            waiting: self.waiting_q.len(),
            suspended: self.suspended_q.len(),
            dead: self.dead_q.len(),
        }
    }

    pub(crate) fn favour_new(&self) -> bool {
        self.favour_new
    }

    /// `ht_ctrl()`'s per-thread `HT_ATTR_*` reads, generalized to an enum
    /// instead of a bitmask (spec.md §4.2's `Attr`/`AttrKey`).
    pub(crate) fn get_attr(&self, tid: ThreadId, key: crate::tcb::AttrKey) -> Option<crate::tcb::AttrValue> {
        use crate::tcb::{AttrKey, AttrValue};
        let t = self.threads.get(tid)?;
        Some(match key {
            AttrKey::Priority => AttrValue::Priority(t.priority),
            AttrKey::Name => AttrValue::Name(t.name.clone()),
            AttrKey::Joinable => AttrValue::Joinable(!t.detached),
            AttrKey::CancelState => {
                AttrValue::CancelState(t.cancel_state.contains(crate::tcb::CancelState::ENABLED))
            }
            AttrKey::Dispatches => AttrValue::Dispatches(t.dispatches),
            AttrKey::TimeSpawn => AttrValue::TimeSpawn(t.spawned_at),
            AttrKey::State => AttrValue::State(t.state),
            AttrKey::Bound => AttrValue::Bound(t.state == ThreadState::WaitingForWorker),
            AttrKey::StackSize => AttrValue::StackSize(t.stack_size),
            AttrKey::StackAddr => AttrValue::StackAddr(t.stack_addr),
            AttrKey::TimeLast => AttrValue::TimeLast(t.last_ran),
            AttrKey::TimeRan => AttrValue::TimeRan(t.time_ran),
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerCounts {
    pub new: usize,
    pub ready: usize,
    pub waiting: usize,
    pub suspended: usize,
    pub dead: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_admits_into_ready_via_admit_new() {
        let cfg = crate::config::RuntimeConfig::default();
        let mut sched = Scheduler::new(&cfg, Box::new(|| {}));
        let main = sched.main_tid();
        let tid = sched.spawn(main, Attr::default(), Box::new(|| {})).unwrap();
        assert!(matches!(sched.select_next_dispatch(), Dispatch::Run { .. } | Dispatch::Idle { .. }));
        // admit_new has run at least once inside select_next_dispatch.
        let _ = tid;
    }

    #[test]
    fn counts_reflect_queue_membership() {
        let cfg = crate::config::RuntimeConfig::default();
        let mut sched = Scheduler::new(&cfg, Box::new(|| {}));
        let before = sched.counts();
        assert_eq!(before.ready, 1); // main
        let main = sched.main_tid();
        sched.spawn(main, Attr::default(), Box::new(|| {})).unwrap();
        assert_eq!(sched.counts().new, 1);
    }
}
