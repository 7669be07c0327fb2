//! 睡眠锁。
//!
//! 严格优先级策略下支持优先级捐赠：线程在锁上阻塞时把自己的生效
//! 优先级沿持有者链一路上传，直到链头已经不低于捐赠者或者没有更上
//! 游的持有者；释放时持有者按"基础值与仍持有的锁上最高捐赠取最大"
//! 重算生效优先级。

use alloc::sync::Arc;

use common::config::PRI_MIN;
use klocks::SpinMutex;

use super::Semaphore;
use crate::{
    boot::Kernel,
    sched::{self, SchedPolicy},
    thread::{self, Thread},
};

pub struct Lock {
    sema: Semaphore,
    inner: SpinMutex<LockInner>,
}

struct LockInner {
    holder: Option<triomphe::Arc<Thread>>,
    /// 等待者中的最高优先级，捐赠的来源
    max_priority: i32,
}

impl Lock {
    pub fn new() -> Self {
        Self {
            sema: Semaphore::new(1),
            inner: SpinMutex::new(LockInner {
                holder: None,
                max_priority: PRI_MIN,
            }),
        }
    }

    pub fn held_by_current(&self, kernel: &Kernel) -> bool {
        let cur = thread::current(kernel);
        self.inner
            .lock()
            .holder
            .as_ref()
            .is_some_and(|h| h.tid() == cur.tid())
    }

    /// 获取锁，被占用时阻塞。同一线程重复获取是内核 bug
    pub fn acquire(self: &Arc<Self>, kernel: &Kernel) {
        debug_assert!(!self.held_by_current(kernel), "lock already held");
        let cur = thread::current(kernel);

        {
            let _guard = kernel.intr_disable();
            let occupied = self.inner.lock().holder.is_some();
            if occupied && kernel.config.policy == SchedPolicy::Prio {
                cur.lock_inner_with(|inner| inner.waiting_on = Some(Arc::clone(self)));
                donate_along_chain(kernel, Arc::clone(self), cur.priority());
            }
        }

        self.sema.down(kernel);

        let _guard = kernel.intr_disable();
        {
            let mut inner = self.inner.lock();
            inner.holder = Some(triomphe::Arc::clone(&cur));
            // 重新统计仍在排队的等待者
            inner.max_priority = self.sema.max_waiter_priority().unwrap_or(PRI_MIN);
        }
        cur.lock_inner_with(|inner| {
            inner.waiting_on = None;
            inner.holding.push(Arc::clone(self));
        });
        if kernel.config.policy == SchedPolicy::Prio {
            // 先前等待者的捐赠可能比自己的生效优先级还高
            let donated = self.inner.lock().max_priority;
            if donated > cur.priority() {
                cur.set_priority_raw(donated);
            }
        }
    }

    /// 释放锁并撤销因它而来的捐赠。只能由持有者调用
    pub fn release(self: &Arc<Self>, kernel: &Kernel) {
        debug_assert!(self.held_by_current(kernel), "releasing lock not held");
        let cur = thread::current(kernel);

        {
            let _guard = kernel.intr_disable();
            cur.lock_inner_with(|inner| {
                inner.holding.retain(|l| !Arc::ptr_eq(l, self));
            });
            self.inner.lock().holder = None;
            if kernel.config.policy == SchedPolicy::Prio {
                refresh_priority(kernel, &cur);
            }
        }

        // up 自带对更高优先级等待者的让位
        self.sema.up(kernel);
    }
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

/// 把 `donated` 沿持有者链上传。
/// 链上每把锁都记下见过的最高等待优先级，Ready 的持有者同步归位
fn donate_along_chain(kernel: &Kernel, mut lock: Arc<Lock>, donated: i32) {
    loop {
        let holder = {
            let mut inner = lock.inner.lock();
            if donated > inner.max_priority {
                inner.max_priority = donated;
            }
            inner.holder.clone()
        };
        let Some(holder) = holder else {
            return;
        };
        if holder.priority() >= donated {
            return;
        }
        holder.set_priority_raw(donated);
        sched::requeue_if_ready(kernel, &holder);

        match holder.lock_inner_with(|inner| inner.waiting_on.clone()) {
            Some(next) => lock = next,
            None => return,
        }
    }
}

/// 生效优先级 = max(基础值, 仍持有的锁上的最高捐赠)
pub fn refresh_priority(kernel: &Kernel, thread: &triomphe::Arc<Thread>) {
    let priority = thread.lock_inner_with(|inner| {
        let mut p = inner.base_priority;
        for lock in &inner.holding {
            p = p.max(lock.inner.lock().max_priority);
        }
        p
    });
    thread.set_priority_raw(priority);
    sched::requeue_if_ready(kernel, thread);
}
