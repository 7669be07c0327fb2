//! 计数信号量。
//!
//! down 在关中断下检查计数、排队并阻塞；up 唤醒等待者中优先级最高的
//! 一个。生产者恰好 up 一次、消费者恰好 down 一次的用法保证不会丢
//! 唤醒，创建者与子线程之间的加载屏障、join 屏障都靠它。

use alloc::collections::VecDeque;
use klocks::SpinMutex;
use triomphe::Arc;

use crate::{
    boot::Kernel,
    thread::{self, Thread, ThreadStatus},
};

pub struct Semaphore {
    inner: SpinMutex<SemaInner>,
}

struct SemaInner {
    value: usize,
    waiters: VecDeque<Arc<Thread>>,
}

impl Semaphore {
    pub fn new(value: usize) -> Self {
        Self {
            inner: SpinMutex::new(SemaInner {
                value,
                waiters: VecDeque::new(),
            }),
        }
    }

    pub fn value(&self) -> usize {
        self.inner.lock().value
    }

    /// 等到计数为正然后减一。可能阻塞，不能在中断上下文调用
    pub fn down(&self, kernel: &Kernel) {
        debug_assert!(!kernel.intr.in_handler());
        let _guard = kernel.intr_disable();
        loop {
            {
                let mut inner = self.inner.lock();
                if inner.value > 0 {
                    inner.value -= 1;
                    return;
                }
                inner.waiters.push_back(thread::current(kernel));
            }
            thread::block(kernel);
        }
    }

    /// 计数加一并唤醒优先级最高的等待者。可在中断上下文调用
    pub fn up(&self, kernel: &Kernel) {
        let woken = {
            let _guard = kernel.intr_disable();
            let mut inner = self.inner.lock();
            inner.value += 1;
            // 进程清退可能已经直接杀掉了排队中的线程，顺手清走
            inner
                .waiters
                .retain(|t| t.status() == ThreadStatus::Blocked);
            let woken = pick_max_priority(&mut inner.waiters);
            drop(inner);
            if let Some(t) = &woken {
                thread::unblock(kernel, t);
            }
            woken
        };
        // 唤醒了更高优先级的线程就让位
        if woken.is_some() {
            crate::sched::maybe_preempt(kernel);
        }
    }

    /// 等待者中的最高优先级，空则为 None
    pub(crate) fn max_waiter_priority(&self) -> Option<i32> {
        self.inner.lock().waiters.iter().map(|t| t.priority()).max()
    }
}

/// 取出优先级最高的等待者，同优先级先到先出
fn pick_max_priority(waiters: &mut VecDeque<Arc<Thread>>) -> Option<Arc<Thread>> {
    let mut best: Option<(usize, i32)> = None;
    for (i, t) in waiters.iter().enumerate() {
        let p = t.priority();
        if best.map_or(true, |(_, bp)| p > bp) {
            best = Some((i, p));
        }
    }
    best.and_then(|(i, _)| waiters.remove(i))
}
