//! 文件相关的系统调用。
//!
//! fd 0 和 1 不走文件表：0 是控制台输入（目前没有输入源，读到 0
//! 字节），1 是控制台输出。

use alloc::vec;
use defines::error::{errno, KResult};
use triomphe::Arc;

use super::process::current_process;
use crate::{
    boot::Kernel,
    fs::File,
    process::user_ptr,
};

pub fn sys_open(kernel: &Arc<Kernel>, name_ptr: usize) -> KResult {
    if name_ptr == 0 {
        return Err(errno::EFAULT);
    }
    let process = current_process(kernel)?;
    let name = user_ptr::read_user_cstr(&process, name_ptr)?;

    kernel.fs_lock.acquire(kernel);
    let opened = kernel.vfs.open(&name);
    kernel.fs_lock.release(kernel);

    let ops = opened.ok_or(errno::ENOENT)?;
    let fd = process.install_file(kernel, File::new(ops));
    Ok(fd as isize)
}

pub fn sys_close(kernel: &Arc<Kernel>, fd: usize) -> KResult {
    let process = current_process(kernel)?;
    process.close_file(kernel, fd)?;
    Ok(0)
}

pub fn sys_read(kernel: &Arc<Kernel>, fd: usize, buf: usize, len: usize) -> KResult {
    let process = current_process(kernel)?;
    if fd == 0 {
        // 键盘之类的输入源不在这一层
        return Ok(0);
    }
    let file = process.lookup_file(kernel, fd).ok_or(errno::EBADF)?;

    let mut data = vec![0u8; len];
    kernel.fs_lock.acquire(kernel);
    let n = file.read(&mut data);
    kernel.fs_lock.release(kernel);

    user_ptr::copy_to_user(&process, buf, &data[..n])?;
    Ok(n as isize)
}

pub fn sys_write(kernel: &Arc<Kernel>, fd: usize, buf: usize, len: usize) -> KResult {
    let process = current_process(kernel)?;
    let data = user_ptr::copy_from_user(&process, buf, len)?;
    if fd == 1 {
        let text = core::str::from_utf8(&data).map_err(|_| errno::EINVAL)?;
        kernel.cpu.console_write(text);
        return Ok(len as isize);
    }
    let file = process.lookup_file(kernel, fd).ok_or(errno::EBADF)?;

    kernel.fs_lock.acquire(kernel);
    let n = file.write(&data);
    kernel.fs_lock.release(kernel);
    Ok(n as isize)
}
