//! 调度器。
//!
//! 策略在启动时从内核命令行选定，`-sched=fifo|prio|fair|mlfqs` 四选一。
//! 选取下一个线程的"跳转表"就是对策略枚举的 match。所有对就绪队列的
//! 操作都要求关中断。

pub(crate) mod fair;
mod fixed;

use alloc::collections::VecDeque;
use alloc::vec::Vec;
use triomphe::Arc;

use common::config::{TICKS_PER_SEC, TIME_SLICE};

use crate::{
    boot::Kernel,
    thread::{self, Thread, ThreadStatus},
};

pub use fixed::Fixed;

/// 可选的调度策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedPolicy {
    /// 先来先服务
    #[default]
    Fifo,
    /// 严格优先级，带优先级捐赠
    Prio,
    /// 按 recent_cpu 与负载均值定期重算优先级的公平策略
    Fair,
    /// 多级反馈队列，占位。真的调度到它是致命错误
    Mlfqs,
}

impl SchedPolicy {
    /// 解析内核命令行中的调度器选项，没有相关选项时用默认策略
    pub fn from_cmdline(cmdline: &str) -> Option<Self> {
        for token in cmdline.split_whitespace() {
            let policy = match token {
                "-sched=fifo" => Self::Fifo,
                "-sched=prio" => Self::Prio,
                "-sched=fair" => Self::Fair,
                "-sched=mlfqs" => Self::Mlfqs,
                _ => continue,
            };
            return Some(policy);
        }
        None
    }
}

/// 全部调度器状态：就绪队列、全线程表、当前线程、idle 线程与统计量
pub(crate) struct SchedState {
    /// 单条全局就绪队列，按生效优先级降序，同优先级先来先服务
    pub ready: VecDeque<Arc<Thread>>,
    /// 全线程表
    pub all: Vec<Arc<Thread>>,
    pub current: Option<Arc<Thread>>,
    /// 上一个让出 CPU 的线程，switch 完成后由接任者处理
    pub prev: Option<Arc<Thread>>,
    pub idle: Option<Arc<Thread>>,
    /// 抢占式调度是否已经开启
    pub started: bool,
    /// 当前线程已用掉的时间片
    pub slice: u32,
    /// 时钟中断要求返回时让出
    pub yield_on_return: bool,
    pub load_avg: Fixed,
}

impl SchedState {
    pub fn new() -> Self {
        Self {
            ready: VecDeque::new(),
            all: Vec::new(),
            current: None,
            prev: None,
            idle: None,
            started: false,
            slice: 0,
            yield_on_return: false,
            load_avg: Fixed::ZERO,
        }
    }

    pub fn is_idle(&self, thread: &Thread) -> bool {
        self.idle.as_ref().is_some_and(|t| t.tid() == thread.tid())
    }
}

/// 按策略把线程放进就绪队列
pub(crate) fn enqueue(policy: SchedPolicy, state: &mut SchedState, thread: Arc<Thread>) {
    match policy {
        SchedPolicy::Fifo => state.ready.push_back(thread),
        SchedPolicy::Prio | SchedPolicy::Fair => ordered_insert(&mut state.ready, thread),
        SchedPolicy::Mlfqs => panic!("unimplemented scheduling policy: mlfqs"),
    }
}

/// 降序插入，同优先级排在已有线程之后
fn ordered_insert(ready: &mut VecDeque<Arc<Thread>>, thread: Arc<Thread>) {
    let priority = thread.priority();
    let pos = ready
        .iter()
        .position(|t| t.priority() < priority)
        .unwrap_or(ready.len());
    ready.insert(pos, thread);
}

/// 生效优先级变化后调整就绪队列中的位置
pub(crate) fn requeue_if_ready(kernel: &Kernel, thread: &Arc<Thread>) {
    if kernel.config.policy == SchedPolicy::Fifo {
        return;
    }
    let mut state = kernel.sched.lock();
    if thread.status() == ThreadStatus::Ready {
        state.ready.retain(|t| t.tid() != thread.tid());
        ordered_insert(&mut state.ready, Arc::clone(thread));
    }
}

/// 选出下一个线程。就绪队列为空时轮到 idle 线程
fn pick_next(policy: SchedPolicy, state: &mut SchedState) -> Arc<Thread> {
    match policy {
        SchedPolicy::Fifo | SchedPolicy::Prio | SchedPolicy::Fair => state
            .ready
            .pop_front()
            .unwrap_or_else(|| state.idle.clone().expect("idle thread missing")),
        SchedPolicy::Mlfqs => panic!("unimplemented scheduling policy: mlfqs"),
    }
}

/// 切换到下一个线程。进入时必须关中断，且当前线程已不处于 Running
pub(crate) fn schedule(kernel: &Kernel) {
    debug_assert!(!kernel.intr.is_enabled());

    let (cur, next, dying) = {
        let mut state = kernel.sched.lock();
        let cur = state.current.clone().expect("no running thread");
        debug_assert_ne!(cur.status(), ThreadStatus::Running);
        let next = pick_next(kernel.config.policy, &mut state);
        if next.tid() == cur.tid() {
            state.prev = None;
            drop(state);
            finish_switch(kernel);
            return;
        }
        state.prev = Some(Arc::clone(&cur));
        state.current = Some(Arc::clone(&next));
        let dying = cur.status() == ThreadStatus::Dying;
        (cur, next, dying)
    };
    kernel.cpu.switch(cur.tid(), next.tid(), dying);
    // 从别的线程那里拿回 CPU，收尾
    finish_switch(kernel);
}

/// 切换完成后的收尾：标记自己 Running、开新时间片、回收死者的内核栈
pub(crate) fn finish_switch(kernel: &Kernel) {
    debug_assert!(!kernel.intr.is_enabled());

    let prev = {
        let mut state = kernel.sched.lock();
        let cur = state.current.clone().expect("no running thread");
        cur.set_status(ThreadStatus::Running);
        state.slice = 0;
        state.prev.take()
    };
    if let Some(prev) = prev {
        if prev.status() == ThreadStatus::Dying {
            prev.kstack.lock().take();
            kernel.cpu.retire_thread(prev.tid());
        }
    }
}

/// 就绪队列头比当前线程优先级高时让出。中断上下文里改为挂起到返回时；
/// 关中断的临界区里不让出，等下一个自然的调度点
pub(crate) fn maybe_preempt(kernel: &Kernel) {
    if !kernel.intr.is_enabled() && !kernel.intr.in_handler() {
        return;
    }
    let should = {
        let state = kernel.sched.lock();
        let Some(cur) = state.current.clone() else {
            return;
        };
        state
            .ready
            .front()
            .is_some_and(|head| head.priority() > cur.priority())
    };
    if !should {
        return;
    }
    if kernel.intr.in_handler() {
        kernel.sched.lock().yield_on_return = true;
    } else {
        thread::yield_now(kernel);
    }
}

/// 时钟中断。更新统计量，推动睡眠倒计时与公平调度估算器，
/// 时间片耗尽时在中断返回路径上强制让出
pub(crate) fn on_tick(kernel: &Kernel) {
    kernel.intr.enter_handler();
    {
        let _guard = kernel.intr_disable();
        let now = kernel.bump_ticks();
        let mut state = kernel.sched.lock();
        let cur = state.current.clone().expect("no running thread");

        // 统计
        if state.is_idle(&cur) {
            kernel.stats.idle_tick();
        } else if cur.process().is_some() {
            kernel.stats.user_tick();
        } else {
            kernel.stats.kernel_tick();
        }

        if kernel.config.policy == SchedPolicy::Fair {
            fair::increase_recent_cpu(&state, &cur);
            if now % TICKS_PER_SEC == 0 {
                fair::update_load_avg_and_recent_cpu(kernel, &mut state);
            }
        }

        // 睡眠倒计时
        let mut woken = Vec::new();
        for t in &state.all {
            if t.status() == ThreadStatus::Blocked {
                let expired = t.lock_inner_with(|inner| {
                    if inner.blocked_ticks > 0 {
                        inner.blocked_ticks -= 1;
                        inner.blocked_ticks == 0
                    } else {
                        false
                    }
                });
                if expired {
                    woken.push(Arc::clone(t));
                }
            }
        }
        for t in woken {
            thread::unblock_locked(kernel, &mut state, &t);
        }

        // 时间片
        state.slice += 1;
        if state.slice >= TIME_SLICE {
            state.yield_on_return = true;
        }
    }
    kernel.intr.exit_handler();

    // 相当于从中断返回：若被要求抢占则在这里让出
    let pending = {
        let mut state = kernel.sched.lock();
        core::mem::take(&mut state.yield_on_return)
    };
    if pending && kernel.sched.lock().started {
        thread::yield_now(kernel);
    }
}
