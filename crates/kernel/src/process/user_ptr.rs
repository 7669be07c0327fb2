//! 经当前进程页表访问用户内存。
//!
//! 系统调用传进来的指针一律是用户虚地址，这里统一做翻译与越界检查，
//! 坏地址以 EFAULT 报出去而不是砸内核。

use alloc::vec;
use alloc::vec::Vec;
use compact_str::CompactString;
use defines::error::{errno, KResult};

use crate::{memory::VirtAddr, process::Process};

/// 命令行等字符串参数的长度上限
const STR_MAX: usize = 4096;

pub fn copy_from_user(process: &Process, va: usize, len: usize) -> KResult<Vec<u8>> {
    let mut buf = vec![0u8; len];
    process.lock_inner_with(|inner| {
        let space = inner.memory.as_mut().ok_or(errno::EFAULT)?;
        space.page_table_mut().read_bytes(VirtAddr(va), &mut buf)
    })?;
    Ok(buf)
}

pub fn copy_to_user(process: &Process, va: usize, data: &[u8]) -> KResult<()> {
    process.lock_inner_with(|inner| {
        let space = inner.memory.as_mut().ok_or(errno::EFAULT)?;
        space.page_table_mut().write_bytes(VirtAddr(va), data)
    })
}

/// 读出 NUL 结尾的用户字符串。非 UTF-8 的内容按 EINVAL 处理
pub fn read_user_cstr(process: &Process, va: usize) -> KResult<CompactString> {
    let bytes = process.lock_inner_with(|inner| {
        let space = inner.memory.as_mut().ok_or(errno::EFAULT)?;
        space.page_table_mut().read_cstr(VirtAddr(va), STR_MAX)
    })?;
    CompactString::from_utf8(bytes).map_err(|_| errno::EINVAL)
}

pub fn read_user_byte(process: &Process, va: usize) -> KResult<u8> {
    Ok(copy_from_user(process, va, 1)?[0])
}

pub fn write_user_byte(process: &Process, va: usize, byte: u8) -> KResult<()> {
    copy_to_user(process, va, &[byte])
}
