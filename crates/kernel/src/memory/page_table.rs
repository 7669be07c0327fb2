//! 软件页表。
//!
//! 所有跨页的读写都在这里集中处理，accessed 位也在这里维护：
//! 映射、读、写都会置位，和硬件遍历页表的效果一致。

use alloc::collections::BTreeMap;
use bitflags::bitflags;
use defines::error::{errno, KResult};

use super::{address::VirtPageNum, frame_allocator::Frame, VirtAddr};
use common::config::PAGE_SIZE;

bitflags! {
    /// 页表项的标志位
    #[derive(Clone, Copy, Debug)]
    pub struct PteFlags: u8 {
        /// 可写
        const W = 1 << 0;
        /// accessed，映射或访问过即置位
        const A = 1 << 1;
    }
}

struct Pte {
    frame: Frame,
    flags: PteFlags,
}

pub struct PageTable {
    entries: BTreeMap<VirtPageNum, Pte>,
}

impl PageTable {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// 建立映射。同一页号重复映射是加载器必须拒绝的错误
    pub fn map(&mut self, vpn: VirtPageNum, frame: Frame, writable: bool) -> KResult<()> {
        if self.entries.contains_key(&vpn) {
            return Err(errno::EEXIST);
        }
        let mut flags = PteFlags::A;
        if writable {
            flags |= PteFlags::W;
        }
        self.entries.insert(vpn, Pte { frame, flags });
        Ok(())
    }

    /// 解除映射，归还页帧
    pub fn unmap(&mut self, vpn: VirtPageNum) -> Option<Frame> {
        self.entries.remove(&vpn).map(|pte| pte.frame)
    }

    pub fn is_mapped(&self, vpn: VirtPageNum) -> bool {
        self.entries.contains_key(&vpn)
    }

    pub fn is_writable(&self, vpn: VirtPageNum) -> bool {
        self.entries
            .get(&vpn)
            .is_some_and(|pte| pte.flags.contains(PteFlags::W))
    }

    pub fn is_accessed(&self, vpn: VirtPageNum) -> bool {
        self.entries
            .get(&vpn)
            .is_some_and(|pte| pte.flags.contains(PteFlags::A))
    }

    pub fn mapped_pages(&self) -> usize {
        self.entries.len()
    }

    /// 从用户地址读出 `buf.len()` 字节。未映射或越过用户地址上界返回 EFAULT
    pub fn read_bytes(&mut self, va: VirtAddr, buf: &mut [u8]) -> KResult<()> {
        check_user_range(va, buf.len())?;
        let mut cur = va;
        let mut done = 0;
        while done < buf.len() {
            let page_off = cur.page_offset();
            let chunk = usize::min(PAGE_SIZE - page_off, buf.len() - done);
            let pte = self.entries.get_mut(&cur.vpn_floor()).ok_or(errno::EFAULT)?;
            pte.flags |= PteFlags::A;
            buf[done..done + chunk]
                .copy_from_slice(&pte.frame.as_bytes()[page_off..page_off + chunk]);
            done += chunk;
            cur = cur + chunk;
        }
        Ok(())
    }

    /// 向用户地址写入。目标页必须已映射且可写
    pub fn write_bytes(&mut self, va: VirtAddr, data: &[u8]) -> KResult<()> {
        check_user_range(va, data.len())?;
        let mut cur = va;
        let mut done = 0;
        while done < data.len() {
            let page_off = cur.page_offset();
            let chunk = usize::min(PAGE_SIZE - page_off, data.len() - done);
            let pte = self.entries.get_mut(&cur.vpn_floor()).ok_or(errno::EFAULT)?;
            if !pte.flags.contains(PteFlags::W) {
                return Err(errno::EFAULT);
            }
            pte.flags |= PteFlags::A;
            pte.frame.as_bytes_mut()[page_off..page_off + chunk]
                .copy_from_slice(&data[done..done + chunk]);
            done += chunk;
            cur = cur + chunk;
        }
        Ok(())
    }

    /// 读出以 NUL 结尾的字符串，最长 `max` 字节（不含 NUL）。
    /// 字符串过长按 EINVAL 处理
    pub fn read_cstr(&mut self, va: VirtAddr, max: usize) -> KResult<alloc::vec::Vec<u8>> {
        let mut out = alloc::vec::Vec::new();
        let mut cur = va;
        loop {
            let mut byte = [0u8];
            self.read_bytes(cur, &mut byte)?;
            if byte[0] == 0 {
                return Ok(out);
            }
            if out.len() >= max {
                return Err(errno::EINVAL);
            }
            out.push(byte[0]);
            cur = cur + 1;
        }
    }
}

/// 区间必须整段落在用户地址空间内且不回绕
fn check_user_range(va: VirtAddr, len: usize) -> KResult<()> {
    if len == 0 {
        return Ok(());
    }
    let end = VirtAddr(va.0.checked_add(len).ok_or(errno::EFAULT)?);
    if !va.is_user() || !(end - 1).is_user() {
        return Err(errno::EFAULT);
    }
    Ok(())
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}
