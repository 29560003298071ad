//! Events and event rings — `spec.md` §3 "Event" and §4.3.
//!
//! An event ring is a `Ring<Handle>` (see `ring.rs`) of handles into the
//! scheduler's event arena; `concat`/`isolate`/`walk` operate on handles and
//! rings and are arena-agnostic, per the arena-handle design `spec.md` §9
//! endorses. `status`/`typeof`/`extract`/`free`/`wait` all need to read or
//! mutate the arena a given handle lives in, so those live on `runtime.rs`'s
//! public facade next to `alloc_event`/`free_event` rather than here.

use crate::msgport::PortId;
use crate::ring::Ring;
use crate::slab::Handle;
use bitflags::bitflags;
use std::os::unix::io::RawFd;
use std::time::Instant;

pub type EventHandle = Handle;
pub type EventRing = Ring<EventHandle>;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FdGoal: u8 {
        const READABLE = 0b001;
        const WRITEABLE = 0b010;
        const EXCEPTION = 0b100;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    Pending,
    Occurred,
    Failed,
}

/// `spec.md` §4.3 `walk(e, NEXT|PREV)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkDirection {
    Next,
    Prev,
}

/// Allocation/reuse strategy for the event's storage. Rust's arena already
/// makes `Dynamic` cheap, but `Static` is kept as a genuine optimization:
/// hot paths (a `nap`, a single-fd wait called in a loop) reuse the same
/// arena slot across calls instead of growing the arena every iteration.
/// See `Runtime::static_event` / the per-thread static-event table on
/// `Tcb`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLifetime {
    Dynamic,
    Reuse,
    Static(u64),
    Chain,
}

pub enum EventKind {
    Fd {
        fd: RawFd,
        goal: FdGoal,
    },
    Select {
        members: Vec<(RawFd, FdGoal)>,
    },
    Time {
        deadline: Instant,
    },
    Msg {
        port: PortId,
    },
    Mutex {
        mutex: usize, // raw address of the MutexState; see sync::mutex
    },
    Cond {
        cond: usize, // raw address of the CondState; see sync::cond
    },
    Func {
        predicate: Box<dyn FnMut() -> bool + Send>,
        interval: std::time::Duration,
        next_due: Instant,
    },
    Task {
        fini: std::sync::Arc<std::sync::atomic::AtomicBool>,
    },
}

pub struct Event {
    pub kind: EventKind,
    pub status: EventStatus,
    pub lifetime: EventLifetime,
}

impl Event {
    pub fn new(kind: EventKind, lifetime: EventLifetime) -> Self {
        Self {
            kind,
            status: EventStatus::Pending,
            lifetime,
        }
    }
}

/// Splice `b`'s events onto `a`, draining `b` (`spec.md` §4.3 `concat`).
pub fn concat(a: &mut EventRing, b: &mut EventRing) {
    a.concat(b);
}

/// Remove `e` from `ring`, leaving `ring` as "the remainder" and `e` a
/// logical singleton (`spec.md` §4.3 `isolate`). Returns whether `e` was a
/// member of `ring`.
pub fn isolate(ring: &mut EventRing, e: EventHandle) -> bool {
    ring.remove(e)
}

/// `spec.md` §4.3 `walk(e, NEXT|PREV)`: the next (or previous) handle in `e`'s
/// ring, skipping handles `is_pending` still reports pending when
/// `until_occurred` is set. Returns `None` once a full lap back to `from`
/// turns up nothing, or if `from` isn't in `ring` at all.
pub fn walk(
    ring: &EventRing,
    from: EventHandle,
    dir: WalkDirection,
    until_occurred: bool,
    is_pending: impl Fn(EventHandle) -> bool,
) -> Option<EventHandle> {
    let items: Vec<EventHandle> = ring.iter().collect();
    let pos = items.iter().position(|&h| h == from)?;
    let len = items.len();
    let mut i = pos;
    loop {
        i = match dir {
            WalkDirection::Next => (i + 1) % len,
            WalkDirection::Prev => (i + len - 1) % len,
        };
        if i == pos {
            return None;
        }
        let candidate = items[i];
        if !until_occurred || !is_pending(candidate) {
            return Some(candidate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concat_then_isolate_leaves_the_remainder() {
        // Handles carry a private generation counter; build real ones
        // through a throwaway slab rather than constructing the fields.
        let mut slab: crate::slab::Slab<()> = crate::slab::Slab::new();
        let h1 = slab.insert(());
        let h2 = slab.insert(());
        let h3 = slab.insert(());

        let mut a: EventRing = Ring::new();
        let mut b: EventRing = Ring::new();
        a.push_back(h1);
        b.push_back(h2);
        b.push_back(h3);
        concat(&mut a, &mut b);
        assert!(b.is_empty());
        assert!(isolate(&mut a, h1));
        assert_eq!(a.iter().collect::<Vec<_>>(), vec![h2, h3]);
    }
}
