//! Readiness backend. `spec.md` §4.6: phase A classifies every `Waiting`
//! thread's pending events, phase B multiplexes the I/O-shaped ones through
//! one real syscall, phase C posts results back onto the events and wakes
//! satisfied waiters.
//!
//! `spec.md` §9 leaves the underlying multiplexer abstract ("poll(2) or
//! equivalent"); this is the one concrete implementation, built on
//! `libc::poll` rather than `select`'s fd_set pairs — the same choice the
//! pack's `coio-rs` processor and `gvthread` scheduler make, and the
//! modern POSIX replacement for the original's `select`-shaped interface.
//! `Time`/`Func` events need no fd at all and are handled by computing the
//! poll timeout and re-checking deadlines in phase C.

use crate::event::{EventKind, EventStatus};
use crate::scheduler::Scheduler;
use std::time::{Duration, Instant};

/// Run one classify/poll/post cycle. `timeout` is the scheduler's
/// `next_deadline()` (`None` means block until an fd is ready, since there
/// is nothing else for the scheduler to do).
pub(crate) fn poll_once(scheduler: &mut Scheduler, timeout: Option<Duration>) {
    let waiting = scheduler.all_waiting_events();

    let mut pollfds: Vec<libc::pollfd> = Vec::new();
    // Parallel to `pollfds`: which event handle each entry belongs to.
    let mut owners = Vec::new();

    for (_, e) in &waiting {
        match scheduler.event_kind(*e) {
            Some(EventKind::Fd { fd, goal }) => {
                pollfds.push(libc::pollfd {
                    fd: *fd,
                    events: fd_goal_to_poll_events(*goal),
                    revents: 0,
                });
                owners.push(*e);
            }
            Some(EventKind::Select { members }) => {
                for (fd, goal) in members {
                    pollfds.push(libc::pollfd {
                        fd: *fd,
                        events: fd_goal_to_poll_events(*goal),
                        revents: 0,
                    });
                    owners.push(*e);
                }
            }
            _ => {}
        }
    }

    let timeout_ms = timeout.map(duration_to_poll_timeout).unwrap_or(-1);
    if !pollfds.is_empty() || timeout_ms >= 0 {
        let rc = unsafe {
            libc::poll(
                pollfds.as_mut_ptr(),
                pollfds.len() as libc::nfds_t,
                timeout_ms,
            )
        };
        if rc < 0 {
            log::warn!(
                "poll() failed: {}",
                std::io::Error::last_os_error()
            );
        }
    }

    let mut occurred = std::collections::HashSet::new();
    let mut failed = std::collections::HashSet::new();
    for (pfd, owner) in pollfds.iter().zip(owners.iter()) {
        if pfd.revents & (libc::POLLERR | libc::POLLNVAL | libc::POLLHUP) != 0 {
            failed.insert(*owner);
        } else if pfd.revents != 0 {
            occurred.insert(*owner);
        }
    }

    let now = Instant::now();
    for (_, e) in &waiting {
        if occurred.contains(e) {
            scheduler.set_event_status(*e, EventStatus::Occurred);
            continue;
        }
        if failed.contains(e) {
            scheduler.set_event_status(*e, EventStatus::Failed);
            continue;
        }
        let due = match scheduler.event_kind_mut(*e) {
            Some(EventKind::Time { deadline }) => Some(*deadline <= now),
            Some(EventKind::Func {
                predicate,
                next_due,
                ..
            }) => {
                if *next_due <= now {
                    Some(predicate())
                } else {
                    None
                }
            }
            _ => None,
        };
        if due == Some(true) {
            scheduler.set_event_status(*e, EventStatus::Occurred);
        }
    }

    scheduler.wake_satisfied_waiters();
}

fn fd_goal_to_poll_events(goal: crate::event::FdGoal) -> libc::c_short {
    let mut mask = 0;
    if goal.contains(crate::event::FdGoal::READABLE) {
        mask |= libc::POLLIN;
    }
    if goal.contains(crate::event::FdGoal::WRITEABLE) {
        mask |= libc::POLLOUT;
    }
    if goal.contains(crate::event::FdGoal::EXCEPTION) {
        mask |= libc::POLLPRI;
    }
    mask as libc::c_short
}

fn duration_to_poll_timeout(d: Duration) -> i32 {
    d.as_millis().min(i32::MAX as u128) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::tcb::Attr;

    #[test]
    fn poll_once_marks_an_already_past_timer_as_occurred() {
        let cfg = RuntimeConfig::default();
        let mut sched = Scheduler::new(&cfg, Box::new(|| {}));
        let main = sched.main_tid();
        let tid = sched.spawn(main, Attr::default(), Box::new(|| {})).unwrap();
        let e = sched.alloc_event(EventKind::Time {
            deadline: Instant::now() - Duration::from_millis(1),
        });
        sched.test_force_wait(tid, vec![e]);
        poll_once(&mut sched, Some(Duration::from_millis(0)));
        assert_eq!(sched.event_status(e), Some(EventStatus::Occurred));
    }
}
