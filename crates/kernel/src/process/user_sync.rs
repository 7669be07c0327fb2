//! 用户可见的同步对象表。
//!
//! 锁和信号量各一张表，id 是从 1 起的进程内计数器分出来的小整数，
//! PCB 存活期间不复用；对象随 PCB 清退一起销毁。

use alloc::{sync::Arc as StdArc, vec::Vec};
use triomphe::Arc;

use crate::sync::{Lock, Semaphore};

pub struct UserSync {
    locks: Vec<(u8, StdArc<Lock>)>,
    semas: Vec<(u8, Arc<Semaphore>)>,
    next_lock_id: u8,
    next_sema_id: u8,
}

impl UserSync {
    pub fn new() -> Self {
        Self {
            locks: Vec::new(),
            semas: Vec::new(),
            next_lock_id: 1,
            next_sema_id: 1,
        }
    }

    /// 建一把新锁，id 用完则失败
    pub fn create_lock(&mut self) -> Option<u8> {
        let id = self.next_lock_id;
        self.next_lock_id = self.next_lock_id.checked_add(1)?;
        self.locks.push((id, StdArc::new(Lock::new())));
        Some(id)
    }

    pub fn find_lock(&self, id: u8) -> Option<StdArc<Lock>> {
        self.locks
            .iter()
            .find(|(lock_id, _)| *lock_id == id)
            .map(|(_, lock)| StdArc::clone(lock))
    }

    pub fn create_sema(&mut self, value: usize) -> Option<u8> {
        let id = self.next_sema_id;
        self.next_sema_id = self.next_sema_id.checked_add(1)?;
        self.semas.push((id, Arc::new(Semaphore::new(value))));
        Some(id)
    }

    pub fn find_sema(&self, id: u8) -> Option<Arc<Semaphore>> {
        self.semas
            .iter()
            .find(|(sema_id, _)| *sema_id == id)
            .map(|(_, sema)| Arc::clone(sema))
    }

    pub fn clear(&mut self) {
        self.locks.clear();
        self.semas.clear();
    }
}

impl Default for UserSync {
    fn default() -> Self {
        Self::new()
    }
}
