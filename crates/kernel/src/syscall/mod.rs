//! 系统调用入口。
//!
//! 分发是对调用号的一个 match。失败统一折叠成 -1 交还用户，
//! 具体的 errno 只进日志。

mod fs;
mod process;
mod sync;
mod thread;

use defines::{
    error::{errno, KResult},
    syscall::*,
};
use triomphe::Arc;

use crate::boot::Kernel;

use self::{fs::*, process::*, sync::*, thread::*};

pub fn syscall(kernel: &Arc<Kernel>, id: usize, args: [usize; 3]) -> isize {
    match syscall_impl(kernel, id, args) {
        Ok(ret) => {
            log::debug!("syscall {}{args:x?} = {ret}", name(id));
            ret
        }
        Err(err) => {
            log::info!(
                "syscall {}{args:x?} failed: {}",
                name(id),
                errno::name(err.as_isize())
            );
            -1
        }
    }
}

fn syscall_impl(kernel: &Arc<Kernel>, id: usize, args: [usize; 3]) -> KResult {
    match id {
        EXIT => sys_exit(kernel, args[0] as i32),
        EXEC => sys_exec(kernel, args[0]),
        WAIT => sys_wait(kernel, args[0]),
        OPEN => sys_open(kernel, args[0]),
        CLOSE => sys_close(kernel, args[0]),
        READ => sys_read(kernel, args[0], args[1], args[2]),
        WRITE => sys_write(kernel, args[0], args[1], args[2]),
        PT_CREATE => sys_pt_create(kernel, args[0], args[1], args[2]),
        PT_EXIT => sys_pt_exit(kernel),
        PT_JOIN => sys_pt_join(kernel, args[0]),
        LOCK_INIT => sys_lock_init(kernel, args[0]),
        LOCK_ACQUIRE => sys_lock_acquire(kernel, args[0]),
        LOCK_RELEASE => sys_lock_release(kernel, args[0]),
        SEMA_INIT => sys_sema_init(kernel, args[0], args[1] as isize),
        SEMA_DOWN => sys_sema_down(kernel, args[0]),
        SEMA_UP => sys_sema_up(kernel, args[0]),
        GET_TID => sys_get_tid(kernel),
        _ => Err(errno::ENOSYS),
    }
}
