//! 用户线程相关的系统调用

use defines::error::KResult;
use triomphe::Arc;

use crate::{
    boot::Kernel,
    thread::{self, user},
};

pub fn sys_pt_create(kernel: &Arc<Kernel>, stub: usize, entry: usize, arg: usize) -> KResult {
    let tid = user::pthread_execute(kernel, stub as u32, entry as u32, arg as u32)?;
    Ok(tid as isize)
}

pub fn sys_pt_join(kernel: &Arc<Kernel>, tid: usize) -> KResult {
    let tid = user::pthread_join(kernel, tid)?;
    Ok(tid as isize)
}

/// 次级线程从这里终结；主线程会转去等齐全体同伴再清退整个进程
pub fn sys_pt_exit(kernel: &Arc<Kernel>) -> ! {
    user::pthread_exit(kernel)
}

pub fn sys_get_tid(kernel: &Arc<Kernel>) -> KResult {
    Ok(thread::current(kernel).tid() as isize)
}
