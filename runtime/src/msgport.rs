//! Message ports — named mailboxes. `spec.md` §4.9: `create`/`find`/`put`/
//! `get`/`reply`/`pending`/`destroy`.
//!
//! Grounded on the teacher's `exercises/01_concurrency_sync/03_channel`
//! (a bounded mailbox) generalized to the named, many-writer/many-reader
//! registry spec.md describes; storage is the same arena-handle pattern
//! used throughout (`slab.rs`), with an additional name index for `find`.

use crate::error::{RtError, RtResult};
use crate::slab::{Handle, Slab};
use std::any::Any;
use std::collections::{HashMap, VecDeque};

pub type PortId = Handle;

pub struct Message {
    pub payload: Box<dyn Any + Send>,
    /// Set by `put` when the sender expects a `reply`.
    pub reply_to: Option<PortId>,
}

/// Payload `destroy` sends to every pending message's `reply_to` port in
/// place of the reply it will now never get (spec.md §4.9's `destroy`
/// must not leave senders blocked in `port_get` forever).
pub struct PortClosed;

struct Port {
    name: Option<String>,
    queue: VecDeque<Message>,
}

/// Owns every live port. One instance lives on `Runtime` (spec.md §6); not
/// `Sync` on its own, callers serialize access the same way the scheduler
/// serializes access to its thread arena (single scheduler kernel thread,
/// or behind a mutex when workers reach in from `hand_out`).
#[derive(Default)]
pub struct PortRegistry {
    ports: Slab<Port>,
    by_name: HashMap<String, PortId>,
}

impl PortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, name: Option<&str>) -> RtResult<PortId> {
        if let Some(name) = name {
            if self.by_name.contains_key(name) {
                return Err(RtError::InvalidArgument);
            }
        }
        let id = self.ports.insert(Port {
            name: name.map(str::to_owned),
            queue: VecDeque::new(),
        });
        if let Some(name) = name {
            self.by_name.insert(name.to_owned(), id);
        }
        Ok(id)
    }

    pub fn find(&self, name: &str) -> Option<PortId> {
        self.by_name.get(name).copied()
    }

    pub fn put(&mut self, port: PortId, payload: Box<dyn Any + Send>, reply_to: Option<PortId>) -> RtResult<()> {
        let p = self.ports.get_mut(port).ok_or(RtError::NoSuch)?;
        p.queue.push_back(Message { payload, reply_to });
        Ok(())
    }

    /// Non-blocking pop; the blocking `port_get` wrapper in `runtime.rs`
    /// parks on a `Msg` event when this returns `None`.
    pub fn get(&mut self, port: PortId) -> RtResult<Option<Message>> {
        let p = self.ports.get_mut(port).ok_or(RtError::NoSuch)?;
        Ok(p.queue.pop_front())
    }

    pub fn reply(&mut self, msg: Message, payload: Box<dyn Any + Send>) -> RtResult<()> {
        let to = msg.reply_to.ok_or(RtError::InvalidArgument)?;
        self.put(to, payload, None)
    }

    pub fn pending(&self, port: PortId) -> RtResult<usize> {
        self.ports
            .get(port)
            .map(|p| p.queue.len())
            .ok_or(RtError::NoSuch)
    }

    /// Replies to every message still queued on `port` with [`PortClosed`]
    /// before freeing it (spec.md §4.9), so no sender is left blocked in
    /// `port_get` forever. Returns the reply ports notified, so the caller
    /// (`runtime::port_destroy`) can wake any threads waiting on them.
    pub fn destroy(&mut self, port: PortId) -> RtResult<Vec<PortId>> {
        let pending = {
            let p = self.ports.get_mut(port).ok_or(RtError::NoSuch)?;
            std::mem::take(&mut p.queue)
        };
        let mut notified = Vec::new();
        for msg in pending {
            if let Some(to) = msg.reply_to {
                if self.put(to, Box::new(PortClosed), None).is_ok() {
                    notified.push(to);
                }
            }
        }
        let p = self.ports.remove(port).ok_or(RtError::NoSuch)?;
        if let Some(name) = p.name {
            self.by_name.remove(&name);
        }
        Ok(notified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_roundtrips_payload() {
        let mut reg = PortRegistry::new();
        let port = reg.create(Some("echo")).unwrap();
        assert_eq!(reg.find("echo"), Some(port));
        reg.put(port, Box::new(7i32), None).unwrap();
        let msg = reg.get(port).unwrap().unwrap();
        assert_eq!(*msg.payload.downcast::<i32>().unwrap(), 7);
        assert!(reg.get(port).unwrap().is_none());
    }

    #[test]
    fn reply_targets_the_senders_reply_port() {
        let mut reg = PortRegistry::new();
        let requester = reg.create(None).unwrap();
        let server = reg.create(None).unwrap();
        reg.put(server, Box::new("ping"), Some(requester)).unwrap();
        let msg = reg.get(server).unwrap().unwrap();
        reg.reply(msg, Box::new("pong")).unwrap();
        let reply = reg.get(requester).unwrap().unwrap();
        assert_eq!(*reply.payload.downcast::<&str>().unwrap(), "pong");
    }

    #[test]
    fn destroy_removes_name_index() {
        let mut reg = PortRegistry::new();
        let port = reg.create(Some("p")).unwrap();
        reg.destroy(port).unwrap();
        assert!(reg.find("p").is_none());
        assert_eq!(reg.pending(port), Err(RtError::NoSuch));
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut reg = PortRegistry::new();
        reg.create(Some("dup")).unwrap();
        assert_eq!(reg.create(Some("dup")), Err(RtError::InvalidArgument));
    }
}
