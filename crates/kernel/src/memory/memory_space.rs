//! 一个用户地址空间。

use defines::error::{errno, KResult};

use super::{Frame, PageTable, VirtAddr, VirtPageNum};
use common::config::{PAGE_SIZE, USER_TOP};

/// 进程页目录的持有者。析构即回收全部用户页
pub struct MemorySpace {
    page_table: PageTable,
}

impl MemorySpace {
    pub fn new_bare() -> Self {
        Self {
            page_table: PageTable::new(),
        }
    }

    pub fn page_table(&self) -> &PageTable {
        &self.page_table
    }

    pub fn page_table_mut(&mut self) -> &mut PageTable {
        &mut self.page_table
    }

    /// 把一帧装进地址空间。页号重复映射会失败
    pub fn install_page(&mut self, vpn: VirtPageNum, frame: Frame, writable: bool) -> KResult<()> {
        self.page_table.map(vpn, frame, writable)
    }

    /// 在用户地址空间顶端映射一页清零的可写栈页，返回初始 esp
    pub fn setup_main_stack(&mut self, frame: Frame) -> KResult<VirtAddr> {
        let top = VirtAddr(USER_TOP);
        self.page_table.map((top - PAGE_SIZE).vpn_floor(), frame, true)?;
        Ok(top)
    }

    /// 为新的用户线程探出一块栈。
    ///
    /// 从地址空间顶端逐页向下检查 accessed 位，落在第一块没被碰过的
    /// 页上。返回该栈页的页号（栈顶即下一页的起始）
    pub fn probe_thread_stack(&self) -> VirtPageNum {
        let mut base = VirtAddr(USER_TOP);
        loop {
            base = base - PAGE_SIZE;
            if !self.page_table.is_accessed((base - PAGE_SIZE).vpn_floor()) {
                break;
            }
        }
        (base - PAGE_SIZE).vpn_floor()
    }

    /// 安装一页用户线程栈，返回初始 esp
    pub fn setup_thread_stack(&mut self, vpn: VirtPageNum, frame: Frame) -> KResult<VirtAddr> {
        self.page_table.map(vpn, frame, true)?;
        Ok((vpn + 1).page_start())
    }

    /// 回收单页（用户线程退出时还它的栈）
    pub fn remove_page(&mut self, vpn: VirtPageNum) -> KResult<()> {
        self.page_table.unmap(vpn).map(|_| ()).ok_or(errno::EFAULT)
    }
}
