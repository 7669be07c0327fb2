//! 整机测试：在宿主模拟层上把子系统端到端跑起来。

use std::sync::{Arc as StdArc, Mutex as StdMutex};

use triomphe::Arc;

use common::config::{PAGE_SIZE, USER_TOP};
use defines::syscall::*;

use crate::{
    boot::{Kernel, KernelConfig},
    process,
    sched::SchedPolicy,
    sim::{ElfBuilder, HostCpu, MemFs, PF_R, PF_W, PF_X, STUB_ADDR},
    sync::{Lock, Semaphore},
    thread,
};

const ENTRY: u32 = 0x0804_8000;
const DATA_VA: u32 = 0x0805_0000;

fn boot_with(config: KernelConfig) -> (Arc<Kernel>, StdArc<HostCpu>, StdArc<MemFs>) {
    let cpu = StdArc::new(HostCpu::new());
    let fs = StdArc::new(MemFs::new());
    let kernel = Kernel::new(
        config,
        Box::new(StdArc::clone(&cpu)),
        Box::new(StdArc::clone(&fs)),
    );
    Kernel::start(&kernel);
    (kernel, cpu, fs)
}

fn boot(policy: SchedPolicy) -> (Arc<Kernel>, StdArc<HostCpu>, StdArc<MemFs>) {
    boot_with(KernelConfig {
        policy,
        ..KernelConfig::default()
    })
}

type Events = StdArc<StdMutex<Vec<&'static str>>>;

fn events() -> Events {
    StdArc::new(StdMutex::new(Vec::new()))
}

fn push(events: &Events, tag: &'static str) {
    events.lock().unwrap().push(tag);
}

fn taken(events: &Events) -> Vec<&'static str> {
    events.lock().unwrap().clone()
}

fn priority_of(kernel: &Kernel, name: &str) -> Option<i32> {
    let mut found = None;
    thread::foreach(kernel, |t| {
        if t.name() == name {
            found = Some(t.priority());
        }
    });
    found
}

/// 等后台线程把帧还回来。调度是协作推进的，多让几次位就稳定了
fn settle(kernel: &Arc<Kernel>, expect_frames: usize) {
    for _ in 0..64 {
        if kernel.frames.used() == expect_frames {
            return;
        }
        thread::yield_now(kernel);
    }
    assert_eq!(kernel.frames.used(), expect_frames);
}

mod threads {
    use super::*;

    #[test]
    fn boot_registers_main_and_idle() {
        let (kernel, _cpu, _fs) = boot(SchedPolicy::Fifo);
        let mut names = Vec::new();
        thread::foreach(&kernel, |t| names.push(t.name().to_owned()));
        names.sort();
        assert_eq!(names, ["idle", "main"]);
        assert_eq!(kernel.current().name(), "main");
    }

    #[test]
    fn fifo_runs_in_creation_order() {
        let (kernel, _cpu, _fs) = boot(SchedPolicy::Fifo);
        let log = events();
        for tag in ["a", "b", "c"] {
            let log = StdArc::clone(&log);
            thread::spawn(&kernel, tag, 31, Box::new(move || push(&log, tag))).unwrap();
        }
        assert!(taken(&log).is_empty());
        thread::yield_now(&kernel);
        assert_eq!(taken(&log), ["a", "b", "c"]);
    }

    #[test]
    fn prio_preempts_on_spawn() {
        let (kernel, _cpu, _fs) = boot(SchedPolicy::Prio);
        let log = events();
        let done = Arc::new(Semaphore::new(0));
        {
            let log = StdArc::clone(&log);
            let done = Arc::clone(&done);
            let kernel_ = Arc::clone(&kernel);
            thread::spawn(
                &kernel,
                "low",
                10,
                Box::new(move || {
                    push(&log, "low");
                    done.up(&kernel_);
                }),
            )
            .unwrap();
        }
        // 低优先级不抢占
        assert!(taken(&log).is_empty());
        {
            let log = StdArc::clone(&log);
            thread::spawn(&kernel, "high", 50, Box::new(move || push(&log, "high"))).unwrap();
        }
        // 高优先级当场跑完
        assert_eq!(taken(&log), ["high"]);
        // 阻塞让低优先级的也跑完
        done.down(&kernel);
        assert_eq!(taken(&log), ["high", "low"]);
    }

    #[test]
    fn equal_priority_keeps_fifo_order() {
        let (kernel, _cpu, _fs) = boot(SchedPolicy::Prio);
        let log = events();
        let done = Arc::new(Semaphore::new(0));
        for tag in ["x", "y"] {
            let log = StdArc::clone(&log);
            let done = Arc::clone(&done);
            let kernel_ = Arc::clone(&kernel);
            thread::spawn(
                &kernel,
                tag,
                20,
                Box::new(move || {
                    push(&log, tag);
                    done.up(&kernel_);
                }),
            )
            .unwrap();
        }
        done.down(&kernel);
        done.down(&kernel);
        // 同优先级先来先跑
        assert_eq!(taken(&log), ["x", "y"]);
    }

    #[test]
    fn spawn_fails_without_frames() {
        let (kernel, _cpu, _fs) = boot_with(KernelConfig {
            policy: SchedPolicy::Fifo,
            frame_limit: 2,
            ..KernelConfig::default()
        });
        let err = thread::spawn(&kernel, "nope", 31, Box::new(|| {}));
        assert_eq!(err, Err(defines::error::errno::ENOMEM));
    }

    #[test]
    fn sleep_wakes_on_third_tick() {
        let (kernel, _cpu, _fs) = boot(SchedPolicy::Prio);
        let log = events();
        {
            let log = StdArc::clone(&log);
            let kernel_ = Arc::clone(&kernel);
            thread::spawn(
                &kernel,
                "sleeper",
                40,
                Box::new(move || {
                    push(&log, "start");
                    thread::sleep(&kernel_, 3);
                    push(&log, "end");
                }),
            )
            .unwrap();
        }
        // 睡眠者优先级更高，创建时立刻跑到 sleep 里
        assert_eq!(taken(&log), ["start"]);
        kernel.timer_interrupt();
        kernel.timer_interrupt();
        assert_eq!(taken(&log), ["start"]);
        kernel.timer_interrupt();
        // 第三个 tick 把它唤回就绪队列；唤醒不抢占，让一下位
        thread::yield_now(&kernel);
        assert_eq!(taken(&log), ["start", "end"]);
    }

    #[test]
    fn set_priority_yields_when_lowered() {
        let (kernel, _cpu, _fs) = boot(SchedPolicy::Prio);
        let log = events();
        {
            let log = StdArc::clone(&log);
            thread::spawn(&kernel, "mid", 20, Box::new(move || push(&log, "mid"))).unwrap();
        }
        assert!(taken(&log).is_empty());
        thread::set_priority(&kernel, 5);
        assert_eq!(taken(&log), ["mid"]);
        assert_eq!(thread::get_priority(&kernel), 5);
    }

    #[test]
    fn semaphore_wakes_highest_priority_waiter() {
        let (kernel, _cpu, _fs) = boot(SchedPolicy::Prio);
        let sema = Arc::new(Semaphore::new(0));
        let log = events();
        for (tag, priority) in [("low", 40), ("high", 50)] {
            let log = StdArc::clone(&log);
            let sema = Arc::clone(&sema);
            let kernel_ = Arc::clone(&kernel);
            thread::spawn(
                &kernel,
                tag,
                priority,
                Box::new(move || {
                    sema.down(&kernel_);
                    push(&log, tag);
                }),
            )
            .unwrap();
        }
        // 两个都堵在信号量上
        assert!(taken(&log).is_empty());
        sema.up(&kernel);
        sema.up(&kernel);
        // 先唤醒优先级高的
        assert_eq!(taken(&log), ["high", "low"]);
    }

    #[test]
    #[should_panic(expected = "mlfqs")]
    fn mlfqs_policy_is_fatal() {
        let (_kernel, _cpu, _fs) = boot(SchedPolicy::Mlfqs);
    }
}

mod donation {
    use super::*;

    #[test]
    fn donation_orders_completion() {
        let (kernel, _cpu, _fs) = boot(SchedPolicy::Prio);
        let log = events();
        thread::set_priority(&kernel, 10);

        let lock = StdArc::new(Lock::new());
        lock.acquire(&kernel);

        {
            let log = StdArc::clone(&log);
            let lock = StdArc::clone(&lock);
            let kernel_ = Arc::clone(&kernel);
            thread::spawn(
                &kernel,
                "heavy",
                50,
                Box::new(move || {
                    lock.acquire(&kernel_);
                    push(&log, "heavy");
                    lock.release(&kernel_);
                }),
            )
            .unwrap();
        }
        // heavy 堵在锁上，捐赠生效
        assert_eq!(thread::get_priority(&kernel), 50);

        {
            let log = StdArc::clone(&log);
            thread::spawn(&kernel, "middle", 40, Box::new(move || push(&log, "middle"))).unwrap();
        }
        // 有捐赠在身，middle 抢不过去
        assert!(taken(&log).is_empty());

        lock.release(&kernel);
        assert_eq!(taken(&log), ["heavy", "middle"]);
        assert_eq!(thread::get_priority(&kernel), 10);
    }

    #[test]
    fn donation_is_transitive() {
        let (kernel, _cpu, _fs) = boot(SchedPolicy::Prio);
        let log = events();
        thread::set_priority(&kernel, 10);

        let lock_a = StdArc::new(Lock::new());
        let lock_b = StdArc::new(Lock::new());
        lock_a.acquire(&kernel);

        {
            let log = StdArc::clone(&log);
            let a = StdArc::clone(&lock_a);
            let b = StdArc::clone(&lock_b);
            let kernel_ = Arc::clone(&kernel);
            thread::spawn(
                &kernel,
                "t1",
                20,
                Box::new(move || {
                    b.acquire(&kernel_);
                    a.acquire(&kernel_);
                    push(&log, "t1");
                    a.release(&kernel_);
                    b.release(&kernel_);
                }),
            )
            .unwrap();
        }
        assert_eq!(thread::get_priority(&kernel), 20);

        {
            let log = StdArc::clone(&log);
            let b = StdArc::clone(&lock_b);
            let kernel_ = Arc::clone(&kernel);
            thread::spawn(
                &kernel,
                "t2",
                50,
                Box::new(move || {
                    b.acquire(&kernel_);
                    push(&log, "t2");
                    b.release(&kernel_);
                }),
            )
            .unwrap();
        }
        // t2 → t1 → main，50 沿持有链传到底
        assert_eq!(priority_of(&kernel, "t1"), Some(50));
        assert_eq!(thread::get_priority(&kernel), 50);

        lock_a.release(&kernel);
        assert_eq!(taken(&log), ["t1", "t2"]);
        assert_eq!(thread::get_priority(&kernel), 10);
    }
}

mod fair {
    use super::*;
    use common::config::TICKS_PER_SEC;

    fn boot_fair(nice_aware: bool) -> (Arc<Kernel>, StdArc<HostCpu>, StdArc<MemFs>) {
        boot_with(KernelConfig {
            policy: SchedPolicy::Fair,
            nice_aware,
            ..KernelConfig::default()
        })
    }

    #[test]
    fn estimator_tracks_cpu_and_load() {
        let (kernel, _cpu, _fs) = boot_fair(true);
        for _ in 0..TICKS_PER_SEC {
            kernel.timer_interrupt();
        }
        // 一个可运行线程，负载约 1/60
        assert_eq!(thread::get_load_avg(&kernel), 2);
        // 100 个 tick 的 recent_cpu 经过一次衰减
        let recent = thread::get_recent_cpu(&kernel);
        assert!((300..350).contains(&recent), "recent_cpu = {recent}");
        // 63 - recent_cpu/4，截断
        assert_eq!(thread::get_priority(&kernel), 62);
    }

    #[test]
    fn higher_nice_means_lower_priority() {
        let (kernel, _cpu, _fs) = boot_fair(true);
        for _ in 0..TICKS_PER_SEC {
            kernel.timer_interrupt();
        }
        let before = thread::get_priority(&kernel);
        thread::set_nice(&kernel, 5);
        assert_eq!(thread::get_nice(&kernel), 5);
        assert_eq!(thread::get_priority(&kernel), before - 5);
    }

    #[test]
    fn static_nice_table_stays_out_of_the_formula() {
        let (kernel, _cpu, _fs) = boot_fair(false);
        for _ in 0..TICKS_PER_SEC {
            kernel.timer_interrupt();
        }
        let before = thread::get_priority(&kernel);
        // nice 不参与公式，改它不动优先级
        thread::set_nice(&kernel, 5);
        assert_eq!(thread::get_priority(&kernel), before);
    }

    #[test]
    fn set_priority_is_ignored_under_fair() {
        let (kernel, _cpu, _fs) = boot_fair(true);
        let before = thread::get_priority(&kernel);
        thread::set_priority(&kernel, 1);
        assert_eq!(thread::get_priority(&kernel), before);
    }
}

mod processes {
    use super::*;

    fn add_exit_program(cpu: &HostCpu, fs: &MemFs, name: &str, code: i32) {
        fs.add(name, ElfBuilder::simple(ENTRY));
        cpu.add_program(name, move |_ctx| code);
    }

    #[test]
    fn execute_wait_exit_code() {
        let (kernel, cpu, fs) = boot(SchedPolicy::Fifo);
        add_exit_program(&cpu, &fs, "child", 42);

        let pid = process::execute(&kernel, "child").unwrap();
        assert_eq!(process::wait(&kernel, pid), 42);
        // 只能收一次
        assert_eq!(process::wait(&kernel, pid), -1);
        assert_eq!(kernel.joins.len(), 0);
    }

    #[test]
    fn echo_writes_arguments_and_exit_banner() {
        let (kernel, cpu, fs) = boot(SchedPolicy::Fifo);
        fs.add("echo", ElfBuilder::simple(ENTRY));
        cpu.add_program("echo", |ctx| {
            let args = ctx.args();
            if args.first().map(String::as_str) != Some("echo") {
                return 1;
            }
            let out = format!("{}\n", args[1..].join(" "));
            let buf = ctx.scratch();
            if !ctx.write_bytes(buf, out.as_bytes()) {
                return 2;
            }
            if ctx.syscall(WRITE, [1, buf as usize, out.len()]) != out.len() as isize {
                return 3;
            }
            0
        });

        let pid = process::execute(&kernel, "echo hello world").unwrap();
        assert_eq!(process::wait(&kernel, pid), 0);
        let console = cpu.console();
        assert!(console.contains("hello world\n"), "console: {console:?}");
        assert!(console.contains("echo: exit(0)\n"), "console: {console:?}");
    }

    #[test]
    fn wait_in_reverse_spawn_order() {
        let (kernel, cpu, fs) = boot(SchedPolicy::Fifo);
        add_exit_program(&cpu, &fs, "seven", 7);
        add_exit_program(&cpu, &fs, "eight", 8);

        let first = process::execute(&kernel, "seven").unwrap();
        let second = process::execute(&kernel, "eight").unwrap();
        assert_eq!(process::wait(&kernel, second), 8);
        assert_eq!(process::wait(&kernel, first), 7);
    }

    #[test]
    fn wait_rejects_non_child() {
        let (kernel, cpu, fs) = boot(SchedPolicy::Fifo);
        add_exit_program(&cpu, &fs, "victim", 5);
        fs.add("prober", ElfBuilder::simple(ENTRY));
        cpu.add_program("prober", |ctx| {
            let target: usize = ctx.args()[1].parse().unwrap_or(0);
            // 别人的孩子等不到
            if ctx.syscall(WAIT, [target, 0, 0]) == -1 {
                0
            } else {
                1
            }
        });

        let victim = process::execute(&kernel, "victim").unwrap();
        let prober = process::execute(&kernel, &format!("prober {victim}")).unwrap();
        assert_eq!(process::wait(&kernel, prober), 0);
        assert_eq!(process::wait(&kernel, victim), 5);
    }

    #[test]
    fn exec_syscall_from_user_program() {
        let (kernel, cpu, fs) = boot(SchedPolicy::Fifo);
        add_exit_program(&cpu, &fs, "leaf", 23);
        fs.add("spawner", ElfBuilder::simple(ENTRY));
        cpu.add_program("spawner", |ctx| {
            let name = ctx.write_cstr(ctx.scratch(), "leaf");
            let pid = ctx.syscall(EXEC, [name as usize, 0, 0]);
            if pid < 0 {
                return 1;
            }
            ctx.syscall(WAIT, [pid as usize, 0, 0]) as i32
        });

        let pid = process::execute(&kernel, "spawner").unwrap();
        assert_eq!(process::wait(&kernel, pid), 23);
    }

    #[test]
    fn load_failures_return_error_and_release_frames() {
        let (kernel, _cpu, fs) = boot(SchedPolicy::Fifo);
        let baseline = kernel.frames.used();

        // 根本不存在
        assert!(process::execute(&kernel, "ghost").is_err());

        // 魔数坏掉
        let mut image = ElfBuilder::simple(ENTRY);
        image[0] = 0;
        fs.add("badmagic", image);
        assert!(process::execute(&kernel, "badmagic").is_err());

        // 不是可执行文件 (ET_DYN)
        let mut image = ElfBuilder::simple(ENTRY);
        image[16] = 3;
        fs.add("notexec", image);
        assert!(process::execute(&kernel, "notexec").is_err());

        // 别的指令集
        let mut image = ElfBuilder::simple(ENTRY);
        image[18] = 0x3E;
        fs.add("amd64", image);
        assert!(process::execute(&kernel, "amd64").is_err());

        // program header 数量超限
        let mut image = ElfBuilder::simple(ENTRY);
        image[44..46].copy_from_slice(&2000u16.to_le_bytes());
        fs.add("phbomb", image);
        assert!(process::execute(&kernel, "phbomb").is_err());

        // 动态段：只收静态可执行文件
        let mut image = ElfBuilder::simple(ENTRY);
        image[52] = 2;
        fs.add("needsld", image);
        assert!(process::execute(&kernel, "needsld").is_err());

        // 压在第 0 页上的段接不住空指针，不要
        let image = ElfBuilder::new(0x800)
            .segment(0x800, vec![0x90; 16], 16, PF_R | PF_X)
            .build();
        fs.add("nullpage", image);
        assert!(process::execute(&kernel, "nullpage").is_err());

        settle(&kernel, baseline);
        assert_eq!(kernel.joins.len(), 0);
    }

    #[test]
    fn load_oom_unwinds() {
        let (kernel, _cpu, fs) = boot_with(KernelConfig {
            policy: SchedPolicy::Fifo,
            frame_limit: 4,
            ..KernelConfig::default()
        });
        fs.add("fatty", ElfBuilder::simple(ENTRY));
        let baseline = kernel.frames.used();
        // 暂存页加内核栈就吃满预算，段页分不出来
        assert!(process::execute(&kernel, "fatty").is_err());
        settle(&kernel, baseline);
    }

    #[test]
    fn running_image_denies_writes() {
        let (kernel, cpu, fs) = boot(SchedPolicy::Fifo);
        fs.add("selfish", ElfBuilder::simple(ENTRY));
        cpu.add_program("selfish", |ctx| {
            let name = ctx.write_cstr(ctx.scratch(), "selfish");
            let fd = ctx.syscall(OPEN, [name as usize, 0, 0]);
            if fd != 2 {
                return 1;
            }
            let data = ctx.scratch() + 64;
            ctx.write_bytes(data, b"corrupt");
            // 正在执行的映像拒绝写入
            if ctx.syscall(WRITE, [fd as usize, data as usize, 7]) != 0 {
                return 2;
            }
            if ctx.syscall(CLOSE, [fd as usize, 0, 0]) != 0 {
                return 3;
            }
            0
        });

        let original = fs.get("selfish").unwrap().bytes();
        let pid = process::execute(&kernel, "selfish").unwrap();
        assert_eq!(process::wait(&kernel, pid), 0);
        // 退出后禁令解除、内容未动
        assert_eq!(fs.get("selfish").unwrap().deny_count(), 0);
        assert_eq!(fs.get("selfish").unwrap().bytes(), original);
    }

    #[test]
    fn open_read_close_via_fd_table() {
        let (kernel, cpu, fs) = boot(SchedPolicy::Fifo);
        fs.add("reader", ElfBuilder::simple(ENTRY));
        fs.add("data.txt", b"kernel bytes".to_vec());
        cpu.add_program("reader", |ctx| {
            let name = ctx.write_cstr(ctx.scratch(), "data.txt");
            let fd = ctx.syscall(OPEN, [name as usize, 0, 0]);
            if fd != 2 {
                return 1;
            }
            let buf = ctx.scratch() + 64;
            if ctx.syscall(READ, [fd as usize, buf as usize, 12]) != 12 {
                return 2;
            }
            if ctx.read_bytes(buf, 12) != b"kernel bytes" {
                return 3;
            }
            if ctx.syscall(CLOSE, [fd as usize, 0, 0]) != 0 {
                return 4;
            }
            // fd 已经失效
            if ctx.syscall(CLOSE, [fd as usize, 0, 0]) != -1 {
                return 5;
            }
            0
        });

        let pid = process::execute(&kernel, "reader").unwrap();
        assert_eq!(process::wait(&kernel, pid), 0);
    }
}

mod pthreads {
    use super::*;

    const INCR_FN: u32 = 0x0200_0000;
    const DOWN_EXIT_FN: u32 = 0x0200_0004;
    const NOP_FN: u32 = 0x0200_0008;
    const BANNER_FN: u32 = 0x0200_000C;
    const ESP_PROBE_FN: u32 = 0x0200_0010;

    const COUNTER: u32 = DATA_VA;
    const LOCK_BYTE: u32 = DATA_VA + 8;
    const SEMA_BYTE: u32 = DATA_VA + 9;
    const SLOTS: u32 = DATA_VA + 16;

    /// 代码段之外带一页可写数据段的映像
    fn image_with_data() -> Vec<u8> {
        ElfBuilder::new(ENTRY)
            .segment(ENTRY & !0xFFF, vec![0x90; 64], 64, PF_R | PF_X)
            .segment(DATA_VA, Vec::new(), PAGE_SIZE as u32, PF_R | PF_W)
            .build()
    }

    #[test]
    fn two_threads_count_under_one_lock() {
        let (kernel, cpu, fs) = boot(SchedPolicy::Fifo);
        fs.add("counter", image_with_data());
        const N: u32 = 100_000;

        cpu.add_thread_fn(INCR_FN, |ctx, rounds| {
            for _ in 0..rounds {
                assert_eq!(ctx.syscall(LOCK_ACQUIRE, [LOCK_BYTE as usize, 0, 0]), 1);
                let v = ctx.read_u32(COUNTER);
                ctx.write_u32(COUNTER, v + 1);
                assert_eq!(ctx.syscall(LOCK_RELEASE, [LOCK_BYTE as usize, 0, 0]), 1);
            }
        });
        cpu.add_program("counter", move |ctx| {
            if ctx.syscall(LOCK_INIT, [LOCK_BYTE as usize, 0, 0]) != 1 {
                return 1;
            }
            let t1 = ctx.syscall(PT_CREATE, [STUB_ADDR as usize, INCR_FN as usize, N as usize]);
            let t2 = ctx.syscall(PT_CREATE, [STUB_ADDR as usize, INCR_FN as usize, N as usize]);
            if t1 < 0 || t2 < 0 {
                return 2;
            }
            if ctx.syscall(PT_JOIN, [t1 as usize, 0, 0]) != t1 {
                return 3;
            }
            if ctx.syscall(PT_JOIN, [t2 as usize, 0, 0]) != t2 {
                return 4;
            }
            if ctx.read_u32(COUNTER) == 2 * N {
                0
            } else {
                5
            }
        });

        let pid = process::execute(&kernel, "counter").unwrap();
        assert_eq!(process::wait(&kernel, pid), 0);
    }

    #[test]
    fn sema_handoff_then_exit_code_reaches_parent() {
        let (kernel, cpu, fs) = boot(SchedPolicy::Fifo);
        fs.add("sema6", image_with_data());

        cpu.add_thread_fn(DOWN_EXIT_FN, |ctx, _arg| {
            assert_eq!(ctx.syscall(SEMA_DOWN, [SEMA_BYTE as usize, 0, 0]), 1);
            ctx.syscall(EXIT, [3, 0, 0]);
        });
        cpu.add_program("sema6", |ctx| {
            if ctx.syscall(SEMA_INIT, [SEMA_BYTE as usize, 0, 0]) != 1 {
                return 1;
            }
            let t = ctx.syscall(PT_CREATE, [STUB_ADDR as usize, DOWN_EXIT_FN as usize, 0]);
            if t < 0 {
                return 2;
            }
            ctx.syscall(SEMA_UP, [SEMA_BYTE as usize, 0, 0]);
            // 子线程醒来就 exit(3)，整个进程连同这里一起收场
            ctx.syscall(PT_JOIN, [t as usize, 0, 0]);
            99
        });

        let pid = process::execute(&kernel, "sema6").unwrap();
        assert_eq!(process::wait(&kernel, pid), 3);
        let console = cpu.console();
        assert!(console.contains("sema6: exit(3)\n"), "console: {console:?}");
    }

    #[test]
    fn join_succeeds_at_most_once() {
        let (kernel, cpu, fs) = boot(SchedPolicy::Fifo);
        fs.add("joiner", image_with_data());

        cpu.add_thread_fn(NOP_FN, |_ctx, _arg| {});
        cpu.add_program("joiner", |ctx| {
            let t = ctx.syscall(PT_CREATE, [STUB_ADDR as usize, NOP_FN as usize, 0]);
            if t < 0 {
                return 1;
            }
            if ctx.syscall(PT_JOIN, [t as usize, 0, 0]) != t {
                return 2;
            }
            // 第二次 join 同一条线程必须失败
            if ctx.syscall(PT_JOIN, [t as usize, 0, 0]) != -1 {
                return 3;
            }
            // 没影的 tid 也一样
            if ctx.syscall(PT_JOIN, [9999, 0, 0]) != -1 {
                return 4;
            }
            0
        });

        let pid = process::execute(&kernel, "joiner").unwrap();
        assert_eq!(process::wait(&kernel, pid), 0);
    }

    #[test]
    fn exit_main_waits_for_peers() {
        let (kernel, cpu, fs) = boot(SchedPolicy::Fifo);
        fs.add("mainexit", image_with_data());

        cpu.add_thread_fn(BANNER_FN, |ctx, _arg| {
            // 先堵一会儿，保证主线程退出时自己还活着
            assert_eq!(ctx.syscall(SEMA_DOWN, [SEMA_BYTE as usize, 0, 0]), 1);
            let buf = ctx.scratch();
            ctx.write_bytes(buf, b"peer done\n");
            ctx.syscall(WRITE, [1, buf as usize, 10]);
        });
        cpu.add_program("mainexit", |ctx| {
            if ctx.syscall(SEMA_INIT, [SEMA_BYTE as usize, 0, 0]) != 1 {
                return 1;
            }
            if ctx.syscall(PT_CREATE, [STUB_ADDR as usize, BANNER_FN as usize, 0]) < 0 {
                return 2;
            }
            ctx.syscall(SEMA_UP, [SEMA_BYTE as usize, 0, 0]);
            // 主线程先走，exit 通告必须排在同伴的输出之后
            ctx.syscall(PT_EXIT, [0, 0, 0]);
            unreachable!()
        });

        let pid = process::execute(&kernel, "mainexit").unwrap();
        assert_eq!(process::wait(&kernel, pid), 0);
        let console = cpu.console();
        let peer = console.find("peer done\n").expect("peer output missing");
        let banner = console.find("mainexit: exit(0)\n").expect("banner missing");
        assert!(peer < banner, "console: {console:?}");
    }

    #[test]
    fn thread_stacks_are_distinct_pages_below_main_stack() {
        let (kernel, cpu, fs) = boot(SchedPolicy::Fifo);
        fs.add("stacks", image_with_data());

        cpu.add_thread_fn(ESP_PROBE_FN, |ctx, slot| {
            ctx.write_u32(SLOTS + 4 * slot, ctx.esp);
            // 等两条线程都拿到栈再退
            assert_eq!(ctx.syscall(SEMA_DOWN, [SEMA_BYTE as usize, 0, 0]), 1);
        });
        cpu.add_program("stacks", |ctx| {
            if ctx.syscall(SEMA_INIT, [SEMA_BYTE as usize, 0, 0]) != 1 {
                return 1;
            }
            let mut tids = [0isize; 2];
            for (slot, tid) in tids.iter_mut().enumerate() {
                *tid = ctx.syscall(PT_CREATE, [STUB_ADDR as usize, ESP_PROBE_FN as usize, slot]);
                if *tid < 0 {
                    return 2;
                }
            }
            ctx.syscall(SEMA_UP, [SEMA_BYTE as usize, 0, 0]);
            ctx.syscall(SEMA_UP, [SEMA_BYTE as usize, 0, 0]);
            for tid in tids {
                if ctx.syscall(PT_JOIN, [tid as usize, 0, 0]) != tid {
                    return 3;
                }
            }
            let esp0 = ctx.read_u32(SLOTS);
            let esp1 = ctx.read_u32(SLOTS + 4);
            let main_stack_page = (USER_TOP - PAGE_SIZE) as u32;
            // 都在主栈页之下，且各占一页
            if esp0 >= main_stack_page || esp1 >= main_stack_page {
                return 4;
            }
            if esp0 / PAGE_SIZE as u32 == esp1 / PAGE_SIZE as u32 {
                return 5;
            }
            0
        });

        let pid = process::execute(&kernel, "stacks").unwrap();
        assert_eq!(process::wait(&kernel, pid), 0);
    }
}
