//! 进程控制块与进程生命周期。
//!
//! `execute` 在全局表里登记一条 join 记录，创建内核线程去跑加载
//! 跳板，然后在加载屏障上等结果；跳板分配 PCB、加载 ELF、铺好
//! 参数栈、举起屏障，最后伪造中断返回进入用户态。`wait` 与 `exit`
//! 经同一条记录会合。

mod fd_table;
mod init_stack;
mod inner;
mod join;
mod loader;
mod user_sync;
pub mod user_ptr;

use alloc::{boxed::Box, format, sync::Arc as StdArc, vec::Vec};
use compact_str::CompactString;
use defines::error::{errno, KResult};
use klocks::SpinMutex;
use triomphe::Arc;

use common::config::{PAGE_SIZE, PRI_DEFAULT, PROCESS_NAME_LEN, USER_TOP};

use crate::{
    arch::TrapFrame,
    boot::Kernel,
    fs::File,
    memory::{Frame, VirtAddr},
    sync::{Lock, Semaphore},
    thread::{self, Thread, Tid},
};

pub use fd_table::FdTable;
pub use init_stack::UserStackInit;
pub use inner::ProcessInner;
pub use join::{JoinRecord, JoinTable};
pub use user_sync::UserSync;

/// 每个用户地址空间一个。
/// 主线程的 tid 就是进程号，PCB 存活期间不变
pub struct Process {
    pid: Tid,
    /// 显示名，命令行的第一个 token，最多 15 个字符
    name: CompactString,
    main_thread: Arc<Thread>,
    pub(crate) inner: SpinMutex<ProcessInner>,
    /// PCB 文件表锁。嵌套顺序永远在全局文件系统锁之内
    pub(crate) file_lock: StdArc<Lock>,
    pub(crate) files: SpinMutex<FdTable>,
    /// 用户可见的锁与信号量。短临界区，关中断下操作
    pub(crate) sync_objs: SpinMutex<UserSync>,
    /// 正在执行的映像，保持打开且拒绝写入
    pub(crate) exec_file: SpinMutex<Option<File>>,
    /// 主线程退出的会合点
    pub(crate) main_exit: Semaphore,
    pub(crate) main_join: SpinMutex<MainJoin>,
}

/// join 主线程的登记处。
/// 每个登记过的 joiner 在主线程退出时恰好收到一次信号
pub(crate) struct MainJoin {
    pub joined: bool,
    pub joiners: usize,
    pub exiting: bool,
}

impl Process {
    fn new(pid: Tid, name: CompactString, main_thread: Arc<Thread>) -> Self {
        Self {
            pid,
            name,
            main_thread,
            inner: SpinMutex::new(ProcessInner::new()),
            file_lock: StdArc::new(Lock::new()),
            files: SpinMutex::new(FdTable::new()),
            sync_objs: SpinMutex::new(UserSync::new()),
            exec_file: SpinMutex::new(None),
            main_exit: Semaphore::new(0),
            main_join: SpinMutex::new(MainJoin {
                joined: false,
                joiners: 0,
                exiting: false,
            }),
        }
    }

    pub fn pid(&self) -> Tid {
        self.pid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn main_thread(&self) -> Arc<Thread> {
        Arc::clone(&self.main_thread)
    }

    pub fn is_main(&self, thread: &Thread) -> bool {
        self.main_thread.tid() == thread.tid()
    }

    /// 锁 inner 然后进行操作，这是访问 inner 的唯一方式
    pub(crate) fn lock_inner_with<T>(&self, f: impl FnOnce(&mut ProcessInner) -> T) -> T {
        f(&mut self.inner.lock())
    }

    /* 文件表 */

    /// 收下一个打开的文件，返回新分配的 fd
    pub fn install_file(&self, kernel: &Kernel, file: File) -> usize {
        self.file_lock.acquire(kernel);
        let fd = self.files.lock().install(StdArc::new(file));
        self.file_lock.release(kernel);
        fd
    }

    pub fn lookup_file(&self, kernel: &Kernel, fd: usize) -> Option<StdArc<File>> {
        self.file_lock.acquire(kernel);
        let file = self.files.lock().get(fd);
        self.file_lock.release(kernel);
        file
    }

    /// 关闭一个 fd。锁序：文件系统锁在外，表锁在内
    pub fn close_file(&self, kernel: &Kernel, fd: usize) -> KResult<()> {
        kernel.fs_lock.acquire(kernel);
        self.file_lock.acquire(kernel);
        let removed = self.files.lock().remove(fd);
        self.file_lock.release(kernel);
        // 仍在文件系统锁内关闭
        let result = match removed {
            Some(file) => {
                drop(file);
                Ok(())
            }
            None => Err(errno::EBADF),
        };
        kernel.fs_lock.release(kernel);
        result
    }
}

/// 当前线程的进程号；还没有 PCB 的内核线程用自己的 tid 顶替
pub fn current_pid_or_tid(kernel: &Kernel) -> Tid {
    let cur = thread::current(kernel);
    match cur.process() {
        Some(process) => process.pid(),
        None => cur.tid(),
    }
}

/// 运行一条命令行。
///
/// 把命令行抄进一页暂存页，登记 join 记录，创建跑加载跳板的内核
/// 线程，然后在加载屏障上等它。加载成功返回子进程号
pub fn execute(kernel: &Arc<Kernel>, cmdline: &str) -> KResult<Tid> {
    let bytes = cmdline.as_bytes();
    if bytes.is_empty() || bytes.len() >= PAGE_SIZE {
        return Err(errno::EINVAL);
    }
    // 先抄一份，免得与调用者共享的缓冲在加载期间被改掉
    let mut scratch = kernel.frames.alloc().ok_or(errno::ENOMEM)?;
    scratch.as_bytes_mut()[..bytes.len()].copy_from_slice(bytes);

    let record = Arc::new(JoinRecord::new(current_pid_or_tid(kernel)));
    kernel.joins.insert(Arc::clone(&record));

    let entry = {
        let kernel = Arc::clone(kernel);
        let record = Arc::clone(&record);
        Box::new(move || start_process(&kernel, scratch, record))
    };
    let tid = match thread::spawn(kernel, cmdline, PRI_DEFAULT, entry) {
        Ok(tid) => tid,
        Err(err) => {
            kernel.joins.remove_record(&record);
            return Err(err);
        }
    };
    record.bind_tid(tid);

    record.loaded.down(kernel);
    if record.load_success() {
        Ok(tid)
    } else {
        // 加载失败的记录不会再有人 join，当场回收
        kernel.joins.remove_record(&record);
        Err(errno::ENOEXEC)
    }
}

/// 加载跳板，在子线程里运行
fn start_process(kernel: &Arc<Kernel>, scratch: Frame, record: Arc<JoinRecord>) {
    let cmdline = cstr_in_frame(&scratch);
    let name = cmdline
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .chars()
        .take(PROCESS_NAME_LEN)
        .collect::<CompactString>();

    let cur = thread::current(kernel);
    let process = Arc::new(Process::new(cur.tid(), name, Arc::clone(&cur)));
    cur.set_process(Some(Arc::clone(&process)));

    let mut frame = TrapFrame::user_init();
    let loaded: KResult<()> = (|| {
        let entry = loader::load(kernel, &process, process.name())?;
        let esp = process.lock_inner_with(|inner| {
            let space = inner.memory.as_mut().expect("image just loaded");
            UserStackInit::new(VirtAddr(USER_TOP), space.page_table_mut()).push_args(&cmdline)
        })?;
        frame.eip = entry;
        frame.esp = esp.0 as u32;
        Ok(())
    })();
    // 命令行用完了，还掉暂存页
    drop(scratch);

    if loaded.is_err() {
        // 退掉半成品 PCB 再举屏障
        cur.set_process(None);
        drop(process);
        record.set_load_success(false);
        record.loaded.up(kernel);
        thread::exit(kernel);
    }

    record.set_load_success(true);
    record.loaded.up(kernel);
    kernel.cpu.enter_user(kernel, frame)
}

fn cstr_in_frame(frame: &Frame) -> CompactString {
    let bytes = frame.as_bytes();
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    CompactString::from_utf8_lossy(&bytes[..end])
}

/// 等一个子进程退出，回收它的退出码。
///
/// 记录不存在、不是自己创建的、或者已经等过，都立刻返回 -1；
/// 子进程已退而未收时屏障是记账过的，立刻拿到退出码
pub fn wait(kernel: &Kernel, child: Tid) -> i32 {
    let Some(record) = kernel.joins.find(child) else {
        return -1;
    };
    if record.creator() != current_pid_or_tid(kernel) {
        return -1;
    }
    if !record.try_mark_waited() {
        return -1;
    }
    record.joined.down(kernel);
    let code = record.exit_code();
    kernel.joins.remove(child);
    code
}

/// 记下退出码，随后的清退会把它交给 wait 并写进控制台通告
pub fn set_exit_code(kernel: &Kernel, code: i32) {
    if let Some(record) = kernel.joins.find(current_pid_or_tid(kernel)) {
        record.set_exit_code(code);
    }
}

/// 清退当前进程并终结当前线程。
///
/// 顺序：用户同步对象、文件表、（关中断）唤醒并杀掉全体同伴线程、
/// 可执行文件的写禁令、页目录、PCB 本体，最后举起自己的 join 屏障。
pub fn exit(kernel: &Kernel) -> ! {
    let cur = thread::current(kernel);
    let own_record = kernel.joins.find(cur.tid());

    let Some(process) = cur.process() else {
        // 没有 PCB 的内核线程
        if let Some(record) = &own_record {
            record.joined.up(kernel);
        }
        kernel.joins.remove_created_by(cur.tid());
        thread::exit(kernel);
    };
    let pid = process.pid();

    // 1. 用户可见的锁与信号量
    {
        let _guard = kernel.intr_disable();
        process.sync_objs.lock().clear();
    }

    // 2. 文件表。全局文件系统锁在外、表锁在内
    kernel.fs_lock.acquire(kernel);
    process.file_lock.acquire(kernel);
    process.files.lock().clear();
    process.file_lock.release(kernel);

    // 3. 同伴线程：先举起每条 join 屏障，再挨个杀掉
    {
        let _guard = kernel.intr_disable();
        let peers: Vec<Arc<Thread>> = process.lock_inner_with(|inner| inner.threads.clone());
        for peer in &peers {
            if let Some(record) = kernel.joins.find(peer.tid()) {
                record.joined.up(kernel);
                kernel.joins.remove(peer.tid());
            }
        }
        if !process.is_main(&cur) {
            // 主线程可能正堵在 pthread_exit_main 的会合点上
            let main = process.main_thread();
            if let Some(record) = kernel.joins.find(main.tid()) {
                record.joined.up(kernel);
            }
            thread::kill(kernel, &main);
        }
        for peer in &peers {
            if peer.tid() != cur.tid() {
                thread::kill(kernel, peer);
            }
        }
        process.lock_inner_with(|inner| inner.threads.clear());
    }

    // 4. 关掉正在执行的映像，解除写禁令；仍在文件系统锁内
    *process.exec_file.lock() = None;
    kernel.fs_lock.release(kernel);

    // 退出通告
    let code = kernel.joins.find(pid).map_or(-1, |r| r.exit_code());
    kernel.cpu.console_write(&format!("{}: exit({})\n", process.name(), code));
    log::info!("[pid {pid}] exit({code})");

    // 页目录。先从 PCB 摘下，再切回内核页目录，最后销毁
    let space = process.lock_inner_with(|inner| inner.memory.take());
    drop(space);

    // 5. PCB 本体
    cur.set_process(None);
    drop(process);

    // 6. 举起自己的 join 屏障；自己的记录留给创建者回收，
    //    自己创建的记录就此清掉
    if let Some(record) = own_record {
        record.joined.up(kernel);
    }
    kernel.joins.remove_created_by(pid);

    thread::exit(kernel)
}
