//! 用户可见的锁与信号量。
//!
//! 句柄是内核写进用户内存的单字节 id。这些调用按布尔约定返回：
//! 1 成功，0 失败，不细分失败原因。

use alloc::sync::Arc as StdArc;
use defines::error::KResult;
use triomphe::Arc;

use super::process::current_process;
use crate::{
    boot::Kernel,
    process::{user_ptr, Process},
    sync::{Lock, Semaphore},
};

const FALSE: KResult = Ok(0);
const TRUE: KResult = Ok(1);

fn user_lock(kernel: &Kernel, process: &Process, ptr: usize) -> Option<StdArc<Lock>> {
    let id = user_ptr::read_user_byte(process, ptr).ok()?;
    let _guard = kernel.intr_disable();
    process.sync_objs.lock().find_lock(id)
}

fn user_sema(kernel: &Kernel, process: &Process, ptr: usize) -> Option<Arc<Semaphore>> {
    let id = user_ptr::read_user_byte(process, ptr).ok()?;
    let _guard = kernel.intr_disable();
    process.sync_objs.lock().find_sema(id)
}

pub fn sys_lock_init(kernel: &Arc<Kernel>, ptr: usize) -> KResult {
    if ptr == 0 {
        return FALSE;
    }
    let process = current_process(kernel)?;
    let id = {
        let _guard = kernel.intr_disable();
        process.sync_objs.lock().create_lock()
    };
    let Some(id) = id else { return FALSE };
    if user_ptr::write_user_byte(&process, ptr, id).is_err() {
        return FALSE;
    }
    TRUE
}

pub fn sys_lock_acquire(kernel: &Arc<Kernel>, ptr: usize) -> KResult {
    if ptr == 0 {
        return FALSE;
    }
    let process = current_process(kernel)?;
    let Some(lock) = user_lock(kernel, &process, ptr) else {
        return FALSE;
    };
    // 重复获取自己已持有的锁按失败处理
    if lock.held_by_current(kernel) {
        return FALSE;
    }
    lock.acquire(kernel);
    TRUE
}

pub fn sys_lock_release(kernel: &Arc<Kernel>, ptr: usize) -> KResult {
    if ptr == 0 {
        return FALSE;
    }
    let process = current_process(kernel)?;
    let Some(lock) = user_lock(kernel, &process, ptr) else {
        return FALSE;
    };
    if !lock.held_by_current(kernel) {
        return FALSE;
    }
    lock.release(kernel);
    TRUE
}

pub fn sys_sema_init(kernel: &Arc<Kernel>, ptr: usize, value: isize) -> KResult {
    if ptr == 0 || value < 0 {
        return FALSE;
    }
    let process = current_process(kernel)?;
    let id = {
        let _guard = kernel.intr_disable();
        process.sync_objs.lock().create_sema(value as usize)
    };
    let Some(id) = id else { return FALSE };
    if user_ptr::write_user_byte(&process, ptr, id).is_err() {
        return FALSE;
    }
    TRUE
}

pub fn sys_sema_down(kernel: &Arc<Kernel>, ptr: usize) -> KResult {
    if ptr == 0 {
        return FALSE;
    }
    let process = current_process(kernel)?;
    let Some(sema) = user_sema(kernel, &process, ptr) else {
        return FALSE;
    };
    sema.down(kernel);
    TRUE
}

pub fn sys_sema_up(kernel: &Arc<Kernel>, ptr: usize) -> KResult {
    if ptr == 0 {
        return FALSE;
    }
    let process = current_process(kernel)?;
    let Some(sema) = user_sema(kernel, &process, ptr) else {
        return FALSE;
    };
    sema.up(kernel);
    TRUE
}
