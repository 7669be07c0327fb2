//! 用宿主线程实现 [`CpuOps`]。

use std::{
    collections::HashMap,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc as StdArc, Condvar, Mutex},
    thread as host_thread,
    time::Duration,
};

use triomphe::Arc;

use defines::syscall::{EXIT, PT_EXIT};

use crate::{
    arch::{CpuOps, ThreadEntry, TrapFrame},
    boot::Kernel,
    sim::user::UserCtx,
    syscall,
    thread::{self, Tid},
};

/// 测试默认注册的用户态线程启动桩的"地址"
pub const STUB_ADDR: u32 = 0x0100_0000;

/// 用户程序：按进程名注册，返回值就是退出码
type Program = StdArc<dyn Fn(&UserCtx) -> i32 + Send + Sync>;
/// 用户线程函数：按伪造的函数地址注册
type ThreadFn = StdArc<dyn Fn(&UserCtx, u32) + Send + Sync>;

/// 单线程一个的接力棒
struct Parker {
    slot: Mutex<bool>,
    cv: Condvar,
}

impl Parker {
    fn new() -> Self {
        Self {
            slot: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    fn wake(&self) {
        *self.slot.lock().unwrap() = true;
        self.cv.notify_one();
    }

    fn wait(&self) {
        let mut scheduled = self.slot.lock().unwrap();
        while !*scheduled {
            scheduled = self.cv.wait(scheduled).unwrap();
        }
        *scheduled = false;
    }

    /// 死掉的线程停在这里，再也不会有人来交棒
    fn park_forever(&self) {
        let mut scheduled = self.slot.lock().unwrap();
        loop {
            scheduled = self.cv.wait(scheduled).unwrap();
        }
    }
}

pub struct HostCpu {
    parkers: Mutex<HashMap<Tid, StdArc<Parker>>>,
    console: Mutex<String>,
    programs: Mutex<HashMap<String, Program>>,
    thread_fns: Mutex<HashMap<u32, ThreadFn>>,
}

impl HostCpu {
    pub fn new() -> Self {
        Self {
            parkers: Mutex::new(HashMap::new()),
            console: Mutex::new(String::new()),
            programs: Mutex::new(HashMap::new()),
            thread_fns: Mutex::new(HashMap::new()),
        }
    }

    /// 注册一个用户程序，`execute` 到同名映像进入用户态时运行它
    pub fn add_program(
        &self,
        name: &str,
        program: impl Fn(&UserCtx) -> i32 + Send + Sync + 'static,
    ) {
        self.programs
            .lock()
            .unwrap()
            .insert(name.into(), StdArc::new(program));
    }

    /// 注册一个用户线程函数，`pthread_create` 用它的地址引用
    pub fn add_thread_fn(&self, addr: u32, f: impl Fn(&UserCtx, u32) + Send + Sync + 'static) {
        self.thread_fns.lock().unwrap().insert(addr, StdArc::new(f));
    }

    /// 到目前为止的控制台输出
    pub fn console(&self) -> String {
        self.console.lock().unwrap().clone()
    }

    fn parker(&self, tid: Tid) -> StdArc<Parker> {
        StdArc::clone(
            self.parkers
                .lock()
                .unwrap()
                .get(&tid)
                .expect("unknown thread"),
        )
    }
}

impl CpuOps for StdArc<HostCpu> {
    fn adopt_current(&self, tid: Tid) {
        self.parkers
            .lock()
            .unwrap()
            .insert(tid, StdArc::new(Parker::new()));
    }

    fn prepare_thread(&self, kernel: &Arc<Kernel>, tid: Tid, entry: ThreadEntry) {
        let parker = StdArc::new(Parker::new());
        self.parkers
            .lock()
            .unwrap()
            .insert(tid, StdArc::clone(&parker));

        let kernel = Arc::clone(kernel);
        host_thread::Builder::new()
            .name(format!("kthread-{tid}"))
            .spawn(move || {
                parker.wait();
                // 内核里的 panic 是致命错误，立刻把整个测试进程带下去，
                // 好过挂死在某个屏障上
                let result =
                    catch_unwind(AssertUnwindSafe(|| thread::kernel_thread_entry(&kernel, entry)));
                if let Err(payload) = result {
                    eprintln!("kernel thread {tid} panicked: {payload:?}");
                    std::process::abort();
                }
            })
            .expect("spawn host thread");
    }

    fn switch(&self, prev: Tid, next: Tid, prev_dying: bool) {
        let prev_parker = self.parker(prev);
        self.parker(next).wake();
        if prev_dying {
            prev_parker.park_forever();
        } else {
            prev_parker.wait();
        }
    }

    fn enter_user(&self, kernel: &Arc<Kernel>, frame: TrapFrame) -> ! {
        let ctx = UserCtx::new(Arc::clone(kernel), frame.esp, frame.eip);

        if ctx.eip == STUB_ADDR {
            // 启动桩：按调用约定从新栈上取出线程函数与参数，
            // 跑完线程函数就调 pthread_exit
            let entry = ctx.read_u32(frame.esp + 4);
            let arg = ctx.read_u32(frame.esp + 8);
            let f = self
                .thread_fns
                .lock()
                .unwrap()
                .get(&entry)
                .cloned()
                .unwrap_or_else(|| panic!("no thread fn registered at {entry:#x}"));
            let result = catch_unwind(AssertUnwindSafe(|| f(&ctx, arg)));
            if result.is_err() {
                eprintln!("user thread panicked");
                std::process::abort();
            }
            syscall::syscall(kernel, PT_EXIT, [0; 3]);
            unreachable!("PT_EXIT returned");
        }

        let name = kernel
            .current()
            .process()
            .expect("user entry without process")
            .name()
            .to_owned();
        let program = self
            .programs
            .lock()
            .unwrap()
            .get(&name)
            .cloned()
            .unwrap_or_else(|| panic!("no user program registered for {name:?}"));
        let code = match catch_unwind(AssertUnwindSafe(|| program(&ctx))) {
            Ok(code) => code,
            Err(_) => {
                eprintln!("user program {name:?} panicked");
                std::process::abort();
            }
        };
        syscall::syscall(kernel, EXIT, [code as usize, 0, 0]);
        unreachable!("EXIT returned");
    }

    fn console_write(&self, s: &str) {
        self.console.lock().unwrap().push_str(s);
    }

    fn idle_hint(&self) {
        host_thread::sleep(Duration::from_micros(50));
    }

    fn retire_thread(&self, tid: Tid) {
        self.parkers.lock().unwrap().remove(&tid);
    }
}
