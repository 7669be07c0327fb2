//! 进程相关的系统调用

use defines::error::{errno, KResult};
use triomphe::Arc;

use crate::{
    boot::Kernel,
    process::{self, user_ptr, Process},
    thread,
};

pub(super) fn current_process(kernel: &Kernel) -> KResult<Arc<Process>> {
    thread::current(kernel).process().ok_or(errno::EPERM)
}

/// 结束当前进程，退出码交给等待的父进程。不返回
pub fn sys_exit(kernel: &Arc<Kernel>, code: i32) -> ! {
    process::set_exit_code(kernel, code);
    process::exit(kernel)
}

/// 运行 `cmdline` 指向的命令行，返回子进程号
pub fn sys_exec(kernel: &Arc<Kernel>, cmdline_ptr: usize) -> KResult {
    if cmdline_ptr == 0 {
        return Err(errno::EFAULT);
    }
    let process = current_process(kernel)?;
    let cmdline = user_ptr::read_user_cstr(&process, cmdline_ptr)?;
    let pid = process::execute(kernel, &cmdline)?;
    Ok(pid as isize)
}

pub fn sys_wait(kernel: &Arc<Kernel>, pid: usize) -> KResult {
    Ok(process::wait(kernel, pid) as isize)
}
