//! ELF 加载器。
//!
//! 只接受静态链接的 32 位小端 i386 可执行文件。校验通过的 LOAD 段
//! 按页装进地址空间，页的写权限取自段的 `PF_W`；任何一步失败都把
//! 已经拿到的页和文件句柄原路退回。
//!
//! 成功之后可执行文件的句柄留在 PCB 里并拒绝写入，磁盘上的改动
//! 不可能再污染正在执行的映像。

use alloc::vec;
use goblin::elf::{
    header::{EM_386, ET_EXEC},
    program_header::{
        PF_W, PT_DYNAMIC, PT_GNU_STACK, PT_INTERP, PT_LOAD, PT_NOTE, PT_NULL, PT_PHDR, PT_SHLIB,
    },
    Elf, ProgramHeader,
};
use triomphe::Arc;

use common::config::{MAX_PHDRS, PAGE_MASK, PAGE_SIZE};
use defines::error::{errno, KResult};

use crate::{
    boot::Kernel,
    fs::File,
    memory::{MemorySpace, VirtAddr},
    process::Process,
};

/// 32 位 program header 在文件中的大小
const PHENTSIZE_32: u16 = 32;

/// 打开并加载 `name` 指定的可执行文件，返回入口地址。
/// 全程持有全局文件系统锁
pub(crate) fn load(kernel: &Arc<Kernel>, process: &Process, name: &str) -> KResult<u32> {
    kernel.fs_lock.acquire(kernel);
    scopeguard::defer! {
        kernel.fs_lock.release(kernel);
    }
    let result = load_inner(kernel, process, name);
    if let Err(err) = result {
        log::info!(
            "load: {name}: failed ({})",
            defines::error::errno::name(err.as_isize())
        );
    }
    result
}

fn load_inner(kernel: &Arc<Kernel>, process: &Process, name: &str) -> KResult<u32> {
    let ops = kernel.vfs.open(name).ok_or(errno::ENOENT)?;
    let file = File::new(ops);

    let file_len = file.len();
    let mut image = vec![0u8; file_len];
    if file.read_at(0, &mut image) != file_len {
        return Err(errno::EIO);
    }

    let elf = Elf::parse(&image).map_err(|_| errno::ENOEXEC)?;
    validate_header(&elf, &image)?;

    let mut space = MemorySpace::new_bare();
    for ph in &elf.program_headers {
        match ph.p_type {
            PT_NULL | PT_NOTE | PT_PHDR | PT_GNU_STACK => {}
            // 只支持静态可执行文件
            PT_DYNAMIC | PT_INTERP | PT_SHLIB => return Err(errno::ENOEXEC),
            PT_LOAD => {
                validate_segment(ph, file_len)?;
                map_segment(kernel, &mut space, ph, &image)?;
            }
            _ => {}
        }
    }

    // 用户栈：地址空间顶端一页清零的可写页
    let stack_frame = kernel.frames.alloc().ok_or(errno::ENOMEM)?;
    space.setup_main_stack(stack_frame)?;

    file.deny_write();
    *process.exec_file.lock() = Some(file);
    process.lock_inner_with(|inner| inner.memory = Some(space));
    Ok(elf.header.e_entry as u32)
}

fn validate_header(elf: &Elf<'_>, image: &[u8]) -> KResult<()> {
    if image.len() < 16 || &image[..7] != b"\x7fELF\x01\x01\x01" {
        return Err(errno::ENOEXEC);
    }
    let header = &elf.header;
    if header.e_type != ET_EXEC
        || header.e_machine != EM_386
        || header.e_version != 1
        || header.e_phentsize != PHENTSIZE_32
        || header.e_phnum > MAX_PHDRS
    {
        return Err(errno::ENOEXEC);
    }
    Ok(())
}

/// 一个 LOAD 段合法的条件
fn validate_segment(ph: &ProgramHeader, file_len: usize) -> KResult<()> {
    let vaddr = ph.p_vaddr;
    let memsz = ph.p_memsz;

    // 文件偏移与虚地址的页内偏移必须一致
    if (ph.p_offset as usize & PAGE_MASK) != (vaddr as usize & PAGE_MASK) {
        return Err(errno::ENOEXEC);
    }
    // 偏移必须落在文件内
    if ph.p_offset > file_len as u64 {
        return Err(errno::ENOEXEC);
    }
    // 内存尺寸不小于文件尺寸，且段非空
    if memsz < ph.p_filesz || memsz == 0 {
        return Err(errno::ENOEXEC);
    }
    // 整个区间落在用户地址空间内且不回绕
    let end = vaddr.checked_add(memsz).ok_or(errno::ENOEXEC)?;
    if !VirtAddr(vaddr as usize).is_user() || !VirtAddr(end as usize).is_user() {
        return Err(errno::ENOEXEC);
    }
    // 第 0 页留空，接住用户程序的空指针
    if (vaddr as usize) < PAGE_SIZE {
        return Err(errno::ENOEXEC);
    }
    Ok(())
}

/// 把一个段按页装进地址空间。
/// 前 `read_bytes` 字节来自文件，尾巴补零到页边界
fn map_segment(
    kernel: &Arc<Kernel>,
    space: &mut MemorySpace,
    ph: &ProgramHeader,
    image: &[u8],
) -> KResult<()> {
    let writable = ph.p_flags & PF_W != 0;
    let file_page = ph.p_offset as usize & !PAGE_MASK;
    let mem_page = ph.p_vaddr as usize & !PAGE_MASK;
    let page_offset = ph.p_vaddr as usize & PAGE_MASK;

    let (mut read_bytes, mut zero_bytes) = if ph.p_filesz > 0 {
        let read = page_offset + ph.p_filesz as usize;
        let zero = (page_offset + ph.p_memsz as usize).next_multiple_of(PAGE_SIZE) - read;
        (read, zero)
    } else {
        (0, (page_offset + ph.p_memsz as usize).next_multiple_of(PAGE_SIZE))
    };
    debug_assert_eq!((read_bytes + zero_bytes) % PAGE_SIZE, 0);

    let mut offset = file_page;
    let mut vpn = VirtAddr(mem_page).vpn_floor();
    while read_bytes > 0 || zero_bytes > 0 {
        let page_read = usize::min(read_bytes, PAGE_SIZE);
        let page_zero = PAGE_SIZE - page_read;

        let mut frame = kernel.frames.alloc().ok_or(errno::ENOMEM)?;
        if page_read > 0 {
            let src = image.get(offset..offset + page_read).ok_or(errno::EIO)?;
            frame.as_bytes_mut()[..page_read].copy_from_slice(src);
        }
        // 帧分配出来就是零，page_zero 部分无需再清
        space.install_page(vpn, frame, writable)?;

        read_bytes -= page_read;
        zero_bytes -= page_zero;
        offset += PAGE_SIZE;
        vpn = vpn + 1;
    }
    Ok(())
}
