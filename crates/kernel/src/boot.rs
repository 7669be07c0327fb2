//! 内核上下文与启动流程。
//!
//! 就绪队列、全线程表、join 记录表、文件系统锁、idle 线程、负载
//! 均值这些全局单例都装在 [`Kernel`] 里，整个子系统凭一个句柄运转。
//! 启动分两步：`new` 把当前执行流变成初始线程，`start` 创建 idle
//! 线程并打开抢占。

use alloc::{boxed::Box, sync::Arc as StdArc};
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use compact_str::CompactString;
use klocks::SpinMutex;
use triomphe::Arc;

use common::config::PRI_DEFAULT;

use crate::{
    arch::CpuOps,
    fs::Vfs,
    logging,
    memory::FrameAllocator,
    process::JoinTable,
    sched::{self, SchedPolicy, SchedState},
    sync::{Lock, Semaphore},
    thread::{self, KernelStack, Thread, ThreadStatus, Tid},
};

/// 启动期定下的配置
pub struct KernelConfig {
    pub policy: SchedPolicy,
    /// 公平调度器里 nice 是否参与优先级公式。
    /// 关闭时 nice 由静态表按创建优先级定死
    pub nice_aware: bool,
    /// 物理页帧预算
    pub frame_limit: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            policy: SchedPolicy::default(),
            nice_aware: false,
            frame_limit: 1024,
        }
    }
}

impl KernelConfig {
    /// 从内核命令行解析配置
    pub fn from_cmdline(cmdline: &str) -> Self {
        Self {
            policy: SchedPolicy::from_cmdline(cmdline).unwrap_or_default(),
            ..Self::default()
        }
    }
}

/// 中断控制。
/// 单 CPU，开关状态就是一个标志位；短临界区以关中断为粗粒度互斥
pub struct IntrCtrl {
    enabled: AtomicBool,
    in_handler: AtomicBool,
}

impl IntrCtrl {
    fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            in_handler: AtomicBool::new(false),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn in_handler(&self) -> bool {
        self.in_handler.load(Ordering::SeqCst)
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub(crate) fn enter_handler(&self) {
        let nested = self.in_handler.swap(true, Ordering::SeqCst);
        assert!(!nested, "nested interrupt handler");
    }

    pub(crate) fn exit_handler(&self) {
        self.in_handler.store(false, Ordering::SeqCst);
    }
}

/// 关中断的作用域守卫，离开作用域时恢复进入前的状态
pub struct IntrGuard<'a> {
    intr: &'a IntrCtrl,
    prev: bool,
}

impl Drop for IntrGuard<'_> {
    fn drop(&mut self) {
        self.intr.set_enabled(self.prev);
    }
}

/// 每 tick 的去向统计
pub struct TickStats {
    idle: AtomicU64,
    kernel: AtomicU64,
    user: AtomicU64,
}

impl TickStats {
    fn new() -> Self {
        Self {
            idle: AtomicU64::new(0),
            kernel: AtomicU64::new(0),
            user: AtomicU64::new(0),
        }
    }

    pub(crate) fn idle_tick(&self) {
        self.idle.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn kernel_tick(&self) {
        self.kernel.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn user_tick(&self) {
        self.user.fetch_add(1, Ordering::Relaxed);
    }

    pub fn report(&self) -> (u64, u64, u64) {
        (
            self.idle.load(Ordering::Relaxed),
            self.kernel.load(Ordering::Relaxed),
            self.user.load(Ordering::Relaxed),
        )
    }
}

pub struct Kernel {
    pub(crate) cpu: Box<dyn CpuOps>,
    pub(crate) vfs: Box<dyn Vfs>,
    pub(crate) config: KernelConfig,
    pub(crate) intr: IntrCtrl,
    pub(crate) sched: SpinMutex<SchedState>,
    pub(crate) frames: FrameAllocator,
    /// 全局文件系统锁，下层文件系统不可重入
    pub(crate) fs_lock: StdArc<Lock>,
    pub(crate) joins: JoinTable,
    next_tid: AtomicUsize,
    ticks: AtomicU64,
    pub stats: TickStats,
}

impl Kernel {
    /// 初始化内核上下文，把当前执行流登记为初始线程。
    /// 等价于启动流程里 `thread_init` 加 `userprog_init` 做的事
    pub fn new(config: KernelConfig, cpu: Box<dyn CpuOps>, vfs: Box<dyn Vfs>) -> Arc<Kernel> {
        logging::init();
        let kernel = Arc::new(Kernel {
            cpu,
            vfs,
            frames: FrameAllocator::new(config.frame_limit),
            config,
            intr: IntrCtrl::new(),
            sched: SpinMutex::new(SchedState::new()),
            fs_lock: StdArc::new(Lock::new()),
            joins: JoinTable::new(),
            next_tid: AtomicUsize::new(1),
            ticks: AtomicU64::new(0),
            stats: TickStats::new(),
        });

        // 把当前执行流变成初始线程
        let frame = kernel
            .frames
            .alloc()
            .expect("frame budget too small to boot");
        let mut kstack = KernelStack::new(frame);
        kstack.lay_initial_frames();
        let tid = kernel.alloc_tid();
        let main = Arc::new(Thread::new(
            tid,
            CompactString::const_new("main"),
            PRI_DEFAULT,
            sched::fair::initial_nice(&kernel.config, PRI_DEFAULT),
            ThreadStatus::Running,
            kstack,
        ));
        kernel.cpu.adopt_current(tid);
        {
            let mut state = kernel.sched.lock();
            state.all.push(Arc::clone(&main));
            state.current = Some(main);
        }

        {
            let sink_kernel = Arc::clone(&kernel);
            logging::set_sink(Box::new(move |s| sink_kernel.cpu.console_write(s)));
        }
        kernel
    }

    /// 开启抢占式调度：创建 idle 线程，打开中断，等 idle 完成
    /// 自我登记
    pub fn start(kernel: &Arc<Kernel>) {
        let idle_started = Arc::new(Semaphore::new(0));
        {
            kernel.sched.lock().started = true;
        }
        {
            let kernel = Arc::clone(kernel);
            let idle_started = Arc::clone(&idle_started);
            thread::spawn(
                &Arc::clone(&kernel),
                "idle",
                common::config::PRI_MIN,
                Box::new(move || idle_loop(&kernel, &idle_started)),
            )
            .expect("create idle thread");
        }
        kernel.intr.set_enabled(true);
        idle_started.down(kernel);
        log::info!("scheduler started ({:?})", kernel.config.policy);
    }

    /// 当前正在运行的线程
    pub fn current(&self) -> Arc<Thread> {
        thread::current(self)
    }

    /// 关中断，返回恢复用的守卫
    pub(crate) fn intr_disable(&self) -> IntrGuard<'_> {
        let prev = self.intr.is_enabled();
        self.intr.set_enabled(false);
        IntrGuard {
            intr: &self.intr,
            prev,
        }
    }

    pub(crate) fn alloc_tid(&self) -> Tid {
        self.next_tid.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn bump_ticks(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    /// 时钟中断入口，由平台的时钟源驱动
    pub fn timer_interrupt(&self) {
        sched::on_tick(self);
    }

    pub fn console_write(&self, s: &str) {
        self.cpu.console_write(s);
    }

    /// 打印 tick 去向统计
    pub fn report_stats(&self) {
        let (idle, kernel, user) = self.stats.report();
        log::info!("{idle} idle ticks, {kernel} kernel ticks, {user} user ticks");
    }
}

/// idle 线程体。登记自己后便阻塞；就绪队列为空时调度器直接点名，
/// 每次上台就再把自己阻塞回去
fn idle_loop(kernel: &Arc<Kernel>, started: &Arc<Semaphore>) {
    let cur = thread::current(kernel);
    kernel.sched.lock().idle = Some(cur);
    started.up(kernel);

    loop {
        {
            let _guard = kernel.intr_disable();
            thread::block(kernel);
        }
        kernel.cpu.idle_hint();
    }
}
