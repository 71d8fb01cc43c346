//! Per-worker URL binding (spec §2 "Worker binding", §4.7).
//!
//! A [`WorkerPool`] holds the master URL and lazily hands out an
//! independent [`WorkerSlot`] — URL copy plus its own socket — to each
//! worker identity on first use. When no worker model is in use at all,
//! callers can skip the pool entirely and drive [`UrlState`] and
//! [`crate::transport::socket::Socket`] directly, as `main`'s startup
//! `HEAD` does.

use std::collections::HashMap;

use crate::error::Result;
use crate::transport::socket::Socket;
use crate::url::UrlState;

pub type WorkerId = u64;

pub struct WorkerSlot {
    pub url: UrlState,
    pub socket: Socket,
}

pub struct WorkerPool {
    master: UrlState,
    slots: HashMap<WorkerId, WorkerSlot>,
    next_id: WorkerId,
}

impl WorkerPool {
    pub fn new(master: UrlState) -> Self {
        WorkerPool {
            master,
            slots: HashMap::new(),
            next_id: 0,
        }
    }

    /// Allocate a fresh worker identity; the slot itself is created lazily
    /// on the first call to [`WorkerPool::slot_mut`].
    pub fn new_worker(&mut self) -> WorkerId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// The worker's slot, deep-copying the master URL into it on first
    /// access (spec §4.7: "deep-copying the master URL ... tagging it
    /// with a short hex worker identifier").
    pub fn slot_mut(&mut self, id: WorkerId) -> Result<&mut WorkerSlot> {
        if !self.slots.contains_key(&id) {
            let tname = format!("w{:04x}", id);
            let url = self.master.dup(tname)?;
            self.slots.insert(
                id,
                WorkerSlot {
                    url,
                    socket: Socket::new(),
                },
            );
        }
        Ok(self.slots.get_mut(&id).expect("just inserted"))
    }

    /// Tear down a worker's slot, closing its socket and dropping its URL
    /// copy (spec §4.7: "On worker termination the slot's destructor
    /// tears down the URL copy").
    pub fn retire(&mut self, id: WorkerId) {
        self.slots.remove(&id);
    }

    pub fn master(&self) -> &UrlState {
        &self.master
    }

    pub fn active_workers(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_worker_gets_an_independent_copy() {
        let master = UrlState::new("http://example.com/f", "master", 30, 3).unwrap();
        let mut pool = WorkerPool::new(master);

        let a = pool.new_worker();
        let b = pool.new_worker();

        pool.slot_mut(a).unwrap().url.redirected = true;
        assert!(!pool.slot_mut(b).unwrap().url.redirected);

        assert_eq!(pool.active_workers(), 2);
        pool.retire(a);
        assert_eq!(pool.active_workers(), 1);
    }

    #[test]
    fn worker_tags_are_distinct() {
        let master = UrlState::new("http://example.com/f", "master", 30, 3).unwrap();
        let mut pool = WorkerPool::new(master);
        let a = pool.new_worker();
        let b = pool.new_worker();
        assert_ne!(pool.slot_mut(a).unwrap().url.tname, pool.slot_mut(b).unwrap().url.tname);
    }
}
