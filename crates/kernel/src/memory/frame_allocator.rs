//! 页帧分配器。
//!
//! 帧本体是内核堆上的一页大小缓冲区；分配器只做记账，并据配置的
//! 帧预算拒绝超额分配，让内存耗尽路径可以被走到。

use alloc::{boxed::Box, sync::Arc};
use core::sync::atomic::{AtomicUsize, Ordering};

use common::config::PAGE_SIZE;

/// 一个已分配的页帧，析构时自动归还配额
pub struct Frame {
    data: Box<[u8; PAGE_SIZE]>,
    used: Arc<AtomicUsize>,
}

impl Frame {
    pub fn as_bytes(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        &mut self.data
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.used.fetch_sub(1, Ordering::Relaxed);
    }
}

pub struct FrameAllocator {
    limit: usize,
    used: Arc<AtomicUsize>,
}

impl FrameAllocator {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            used: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 分配一个清零的页帧，超出预算返回 None
    pub fn alloc(&self) -> Option<Frame> {
        let prev = self.used.fetch_add(1, Ordering::Relaxed);
        if prev >= self.limit {
            self.used.fetch_sub(1, Ordering::Relaxed);
            return None;
        }
        Some(Frame {
            data: Box::new([0u8; PAGE_SIZE]),
            used: Arc::clone(&self.used),
        })
    }

    /// 当前在用的帧数
    pub fn used(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }
}
