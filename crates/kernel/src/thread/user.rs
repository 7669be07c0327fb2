//! 同一地址空间里的用户线程。
//!
//! `pthread_execute` 与进程创建走同一套 join 记录与加载屏障；次级
//! 跳板把新线程挂进 PCB、从地址空间顶端向下探出一页新栈，然后带着
//! `(stub, entry, arg)` 伪造中断返回进入用户态。

use alloc::format;
use core::sync::atomic::Ordering;

use alloc::boxed::Box;
use defines::error::{errno, KResult};
use triomphe::Arc;

use common::config::{PRI_DEFAULT, USER_PTR_SIZE};

use crate::{
    arch::TrapFrame,
    boot::Kernel,
    memory::VirtAddr,
    process::{self, JoinRecord, Process},
    thread::{self, Tid},
};

/// 在当前进程里再开一条用户线程。
/// `stub` 是用户态的启动桩，真正的线程函数 `entry` 和参数 `arg`
/// 会摆在新栈上交给它
pub fn pthread_execute(kernel: &Arc<Kernel>, stub: u32, entry: u32, arg: u32) -> KResult<Tid> {
    let cur = thread::current(kernel);
    let process = cur.process().ok_or(errno::EPERM)?;

    let record = Arc::new(JoinRecord::new(process.pid()));
    kernel.joins.insert(Arc::clone(&record));

    let thread_entry = {
        let kernel = Arc::clone(kernel);
        let process = Arc::clone(&process);
        let record = Arc::clone(&record);
        Box::new(move || start_pthread(&kernel, process, record, stub, entry, arg))
    };
    let name = format!("{}:pthread", process.name());
    let tid = match thread::spawn(kernel, &name, PRI_DEFAULT, thread_entry) {
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
        // 失败的线程不会再有人 join，记录当场回收
        kernel.joins.remove_record(&record);
        Err(errno::ENOMEM)
    }
}

/// 次级跳板，在新内核线程里运行
fn start_pthread(
    kernel: &Arc<Kernel>,
    process: Arc<Process>,
    record: Arc<JoinRecord>,
    stub: u32,
    entry: u32,
    arg: u32,
) {
    let cur = thread::current(kernel);
    cur.set_process(Some(Arc::clone(&process)));

    let mut frame = TrapFrame::user_init();
    frame.eip = stub;

    let stacked: KResult<()> = (|| {
        // 关中断下探栈并安装，两条线程同时探不会撞到同一页
        let _guard = kernel.intr_disable();
        let stack_frame = kernel.frames.alloc().ok_or(errno::ENOMEM)?;
        let esp = process.lock_inner_with(|inner| {
            let space = inner.memory.as_mut().ok_or(errno::EPERM)?;
            let vpn = space.probe_thread_stack();
            space.setup_thread_stack(vpn, stack_frame)
        })?;
        cur.user_stack
            .store((esp - common::config::PAGE_SIZE).0, Ordering::SeqCst);

        // 依次压入：8 字节对齐垫、arg、entry、伪造返回地址
        let esp = process.lock_inner_with(|inner| {
            let pt = inner.memory.as_mut().unwrap().page_table_mut();
            let mut sp = esp;
            sp = sp - 8;
            pt.write_bytes(sp, &[0u8; 8])?;
            sp = sp - USER_PTR_SIZE;
            pt.write_bytes(sp, &arg.to_le_bytes())?;
            sp = sp - USER_PTR_SIZE;
            pt.write_bytes(sp, &entry.to_le_bytes())?;
            sp = sp - USER_PTR_SIZE;
            pt.write_bytes(sp, &0u32.to_le_bytes())?;
            Ok(sp)
        })?;
        frame.esp = esp.0 as u32;
        Ok(())
    })();

    if stacked.is_err() {
        cur.set_process(None);
        record.set_load_success(false);
        record.loaded.up(kernel);
        thread::exit(kernel);
    }

    process.lock_inner_with(|inner| inner.threads.push(Arc::clone(&cur)));
    record.set_load_success(true);
    record.loaded.up(kernel);
    kernel.cpu.enter_user(kernel, frame)
}

/// join 同进程的另一条线程，每条线程只能被成功 join 一次。
/// join 主线程挂到 PCB 的会合点上，主线程退出时恰好放行一次
pub fn pthread_join(kernel: &Kernel, tid: Tid) -> KResult<Tid> {
    let cur = thread::current(kernel);
    let process = cur.process().ok_or(errno::EPERM)?;

    if tid == process.pid() {
        {
            let mut main_join = process.main_join.lock();
            if main_join.joined {
                return Err(errno::EINVAL);
            }
            if main_join.exiting {
                return Ok(tid);
            }
            main_join.joined = true;
            main_join.joiners += 1;
        }
        process.main_exit.down(kernel);
        return Ok(tid);
    }

    let record = kernel.joins.find(tid).ok_or(errno::ESRCH)?;
    if record.creator() != process.pid() {
        return Err(errno::ESRCH);
    }
    if !record.try_mark_waited() {
        return Err(errno::EINVAL);
    }
    record.joined.down(kernel);
    Ok(tid)
}

/// 次级线程退出：举起 join 屏障，摘出 PCB 名册，还掉用户栈页
pub fn pthread_exit(kernel: &Kernel) -> ! {
    let cur = thread::current(kernel);
    let process = cur.process().expect("pthread_exit without process");
    if process.is_main(&cur) {
        pthread_exit_main(kernel);
    }

    if let Some(record) = kernel.joins.find(cur.tid()) {
        record.joined.up(kernel);
    }
    process.lock_inner_with(|inner| inner.threads.retain(|t| t.tid() != cur.tid()));

    let stack_base = cur.user_stack.swap(0, Ordering::SeqCst);
    if stack_base != 0 {
        let _guard = kernel.intr_disable();
        process.lock_inner_with(|inner| {
            if let Some(space) = inner.memory.as_mut() {
                let _ = space.remove_page(VirtAddr(stack_base).vpn_floor());
            }
        });
    }

    cur.set_process(None);
    thread::exit(kernel)
}

/// 主线程版本：放行 join 自己的人，把余下的同伴全部 join 到齐，
/// 然后走完整的进程退出
pub fn pthread_exit_main(kernel: &Kernel) -> ! {
    let cur = thread::current(kernel);
    let process = cur.process().expect("pthread_exit_main without process");
    debug_assert!(process.is_main(&cur));

    {
        let mut main_join = process.main_join.lock();
        main_join.exiting = true;
        for _ in 0..main_join.joiners {
            process.main_exit.up(kernel);
        }
        main_join.joiners = 0;
    }

    // 等所有同伴到达各自的 join 点
    loop {
        let next = process.lock_inner_with(|inner| {
            if inner.threads.is_empty() {
                None
            } else {
                Some(inner.threads.remove(0).tid())
            }
        });
        let Some(tid) = next else { break };
        // 已经被别人 join 过的同伴跳过即可，清退会兜住剩下的
        let _ = pthread_join(kernel, tid);
    }

    process::set_exit_code(kernel, 0);
    process::exit(kernel)
}
