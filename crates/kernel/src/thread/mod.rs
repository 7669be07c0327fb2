//! 线程描述符与线程生命周期。
//!
//! 所有状态迁移都在关中断下进行。就绪队列与全线程表都在
//! [`Kernel`] 的调度器状态里，这里只提供迁移操作本身。

mod kstack;
pub mod user;

use alloc::sync::Arc as StdArc;
use core::sync::atomic::{AtomicI32, AtomicUsize, Ordering as MemOrdering};

use atomic::{Atomic, Ordering};
use bytemuck::NoUninit;
use compact_str::CompactString;
use defines::error::{errno, KResult};
use klocks::SpinMutex;
use smallvec::SmallVec;
use triomphe::Arc;

use common::config::{PRI_MAX, PRI_MIN};

use crate::{
    arch::ThreadEntry,
    boot::Kernel,
    process::Process,
    sched::{self, Fixed, SchedPolicy},
    sync::Lock,
};

pub use kstack::KernelStack;

pub type Tid = usize;

/// 线程生命周期中的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, NoUninit)]
#[repr(u8)]
pub enum ThreadStatus {
    /// 正在 CPU 上执行。单 CPU 下全局只有一个
    Running,
    /// 已就绪，在就绪队列里等待调度
    Ready,
    /// 等待某个事件，不可调度
    Blocked,
    /// 已退出，等下一个被调度的线程回收
    Dying,
}

/// 一个内核线程，或者用户进程中的一条线程。
///
/// 描述符固定在自己内核栈页的底部
pub struct Thread {
    tid: Tid,
    name: CompactString,
    pub(crate) status: Atomic<ThreadStatus>,
    /// 生效优先级。捐赠与公平调度都改这里，基础值在 inner 中
    priority: AtomicI32,
    pub(crate) inner: SpinMutex<ThreadInner>,
    process: SpinMutex<Option<Arc<Process>>>,
    /// 用户线程栈页的用户虚地址，0 表示没有
    pub(crate) user_stack: AtomicUsize,
    pub(crate) kstack: SpinMutex<Option<KernelStack>>,
}

pub(crate) struct ThreadInner {
    pub base_priority: i32,
    pub nice: i32,
    pub recent_cpu: Fixed,
    /// 睡眠倒计时，非零时被时钟递减，减到零唤醒
    pub blocked_ticks: u64,
    /// 仍持有的锁，释放时据此重算生效优先级
    pub holding: SmallVec<[StdArc<Lock>; 4]>,
    /// 正在等待的锁，捐赠沿它向上传
    pub waiting_on: Option<StdArc<Lock>>,
}

impl Thread {
    pub(crate) fn new(
        tid: Tid,
        name: CompactString,
        priority: i32,
        nice: i32,
        status: ThreadStatus,
        kstack: KernelStack,
    ) -> Self {
        debug_assert!((PRI_MIN..=PRI_MAX).contains(&priority));
        Self {
            tid,
            name,
            status: Atomic::new(status),
            priority: AtomicI32::new(priority),
            inner: SpinMutex::new(ThreadInner {
                base_priority: priority,
                nice,
                recent_cpu: Fixed::ZERO,
                blocked_ticks: 0,
                holding: SmallVec::new(),
                waiting_on: None,
            }),
            process: SpinMutex::new(None),
            user_stack: AtomicUsize::new(0),
            kstack: SpinMutex::new(Some(kstack)),
        }
    }

    pub fn tid(&self) -> Tid {
        self.tid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> ThreadStatus {
        self.status.load(Ordering::SeqCst)
    }

    pub(crate) fn set_status(&self, status: ThreadStatus) {
        self.status.store(status, Ordering::SeqCst);
    }

    /// 生效优先级
    pub fn priority(&self) -> i32 {
        self.priority.load(MemOrdering::SeqCst)
    }

    pub(crate) fn set_priority_raw(&self, priority: i32) {
        self.priority.store(priority, MemOrdering::SeqCst);
    }

    /// 锁 inner 然后进行操作，这是访问 inner 的唯一方式
    pub(crate) fn lock_inner_with<T>(&self, f: impl FnOnce(&mut ThreadInner) -> T) -> T {
        f(&mut self.inner.lock())
    }

    pub fn process(&self) -> Option<Arc<Process>> {
        self.process.lock().clone()
    }

    pub(crate) fn set_process(&self, process: Option<Arc<Process>>) {
        *self.process.lock() = process;
    }
}

/// 创建内核线程并放进就绪队列。
///
/// 新线程首次被调度时执行 `entry`，返回即终止。新来者生效优先级
/// 严格更高时当场让位
pub fn spawn(
    kernel: &Arc<Kernel>,
    name: &str,
    priority: i32,
    entry: ThreadEntry,
) -> KResult<Tid> {
    assert!((PRI_MIN..=PRI_MAX).contains(&priority));
    let frame = kernel.frames.alloc().ok_or(errno::ENOMEM)?;
    let mut kstack = KernelStack::new(frame);
    kstack.lay_initial_frames();

    let tid = kernel.alloc_tid();
    let nice = sched::fair::initial_nice(&kernel.config, priority);
    let thread = Arc::new(Thread::new(
        tid,
        CompactString::from(name),
        priority,
        nice,
        ThreadStatus::Blocked,
        kstack,
    ));
    kernel.cpu.prepare_thread(kernel, tid, entry);

    {
        let _guard = kernel.intr_disable();
        let mut state = kernel.sched.lock();
        state.all.push(Arc::clone(&thread));
        unblock_locked(kernel, &mut state, &thread);
    }

    if priority > current(kernel).priority() {
        yield_now(kernel);
    }
    Ok(tid)
}

/// 当前正在运行的线程
pub fn current(kernel: &Kernel) -> Arc<Thread> {
    kernel
        .sched
        .lock()
        .current
        .clone()
        .expect("scheduler not initialized")
}

/// Running → Blocked 并让出 CPU。必须已关中断，
/// 唤醒靠配对的 [`unblock`]
pub(crate) fn block(kernel: &Kernel) {
    debug_assert!(!kernel.intr.in_handler());
    debug_assert!(!kernel.intr.is_enabled());
    current(kernel).set_status(ThreadStatus::Blocked);
    sched::schedule(kernel);
}

/// Blocked → Ready，按生效优先级插入就绪队列。不抢占：
/// 调用者可能还要在关中断下改别的东西
pub(crate) fn unblock(kernel: &Kernel, thread: &Arc<Thread>) {
    let _guard = kernel.intr_disable();
    let mut state = kernel.sched.lock();
    unblock_locked(kernel, &mut state, thread);
}

pub(crate) fn unblock_locked(
    kernel: &Kernel,
    state: &mut sched::SchedState,
    thread: &Arc<Thread>,
) {
    assert_eq!(thread.status(), ThreadStatus::Blocked);
    sched::enqueue(kernel.config.policy, state, Arc::clone(thread));
    thread.set_status(ThreadStatus::Ready);
}

/// Running → Ready 并重新调度。调度尚未开始时是空操作
pub fn yield_now(kernel: &Kernel) {
    if !kernel.sched.lock().started {
        return;
    }
    debug_assert!(!kernel.intr.in_handler());

    let _guard = kernel.intr_disable();
    {
        let mut state = kernel.sched.lock();
        let cur = state.current.clone().expect("no running thread");
        if !state.is_idle(&cur) {
            sched::enqueue(kernel.config.policy, &mut state, Arc::clone(&cur));
        }
        cur.set_status(ThreadStatus::Ready);
    }
    sched::schedule(kernel);
}

/// 终结当前线程。内核栈由下一个被调度的线程回收。不再返回
pub fn exit(kernel: &Kernel) -> ! {
    debug_assert!(!kernel.intr.in_handler());

    let _guard = kernel.intr_disable();
    {
        let mut state = kernel.sched.lock();
        let cur = state.current.clone().expect("no running thread");
        state.all.retain(|t| t.tid() != cur.tid());
        cur.set_status(ThreadStatus::Dying);
    }
    sched::schedule(kernel);
    unreachable!("dying thread rescheduled");
}

/// 让当前线程睡 `ticks` 个时钟节拍
pub fn sleep(kernel: &Kernel, ticks: u64) {
    if ticks == 0 {
        return;
    }
    let cur = current(kernel);
    let _guard = kernel.intr_disable();
    cur.lock_inner_with(|inner| inner.blocked_ticks = ticks);
    block(kernel);
}

/// 杀掉一个别的线程：摘出所有队列，标记 Dying，回收内核栈。
/// 只能由进程清退逻辑调用
pub(crate) fn kill(kernel: &Kernel, thread: &Arc<Thread>) {
    debug_assert!(!kernel.intr.in_handler());
    debug_assert_ne!(thread.tid(), current(kernel).tid());

    let _guard = kernel.intr_disable();
    {
        let mut state = kernel.sched.lock();
        state.all.retain(|t| t.tid() != thread.tid());
        state.ready.retain(|t| t.tid() != thread.tid());
        thread.set_status(ThreadStatus::Dying);
        thread.kstack.lock().take();
    }
    kernel.cpu.retire_thread(thread.tid());
}

/// 对全线程表中的每个线程调用 `f`。关中断下进行
pub fn foreach(kernel: &Kernel, mut f: impl FnMut(&Arc<Thread>)) {
    let _guard = kernel.intr_disable();
    let state = kernel.sched.lock();
    for t in &state.all {
        f(t);
    }
}

/// 新线程首次被调度后的入口。
/// 对应内核栈上垫好的三层栈帧一路返回的效果
pub(crate) fn kernel_thread_entry(kernel: &Kernel, entry: ThreadEntry) {
    sched::finish_switch(kernel);
    // 调度器在关中断下运行，线程体开中断
    kernel.intr.set_enabled(true);
    entry();
    exit(kernel);
}

/* 优先级与 nice 接口 */

pub fn get_priority(kernel: &Kernel) -> i32 {
    current(kernel).priority()
}

/// 调整当前线程的基础优先级。公平调度下优先级由估算器决定，忽略本调用
pub fn set_priority(kernel: &Kernel, new_priority: i32) {
    if kernel.config.policy == SchedPolicy::Fair {
        return;
    }
    assert!((PRI_MIN..=PRI_MAX).contains(&new_priority));
    let cur = current(kernel);
    {
        let _guard = kernel.intr_disable();
        cur.lock_inner_with(|inner| inner.base_priority = new_priority);
        crate::sync::refresh_priority(kernel, &cur);
    }
    // 降下去之后可能不再是最高者
    sched::maybe_preempt(kernel);
}

pub fn get_nice(kernel: &Kernel) -> i32 {
    current(kernel).lock_inner_with(|inner| inner.nice)
}

pub fn set_nice(kernel: &Kernel, nice: i32) {
    let cur = current(kernel);
    {
        let _guard = kernel.intr_disable();
        cur.lock_inner_with(|inner| inner.nice = nice);
        if kernel.config.policy == SchedPolicy::Fair {
            sched::fair::update_priority(&kernel.config, &cur);
        }
    }
    sched::maybe_preempt(kernel);
}

/// 100 倍的系统负载均值，四舍五入
pub fn get_load_avg(kernel: &Kernel) -> i32 {
    let _guard = kernel.intr_disable();
    kernel.sched.lock().load_avg.scale(100).round()
}

/// 100 倍的当前线程 recent_cpu，四舍五入
pub fn get_recent_cpu(kernel: &Kernel) -> i32 {
    current(kernel).lock_inner_with(|inner| inner.recent_cpu.scale(100).round())
}
