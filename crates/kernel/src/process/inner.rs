use alloc::vec::Vec;
use triomphe::Arc;

use crate::{memory::MemorySpace, thread::Thread};

pub struct ProcessInner {
    /* 这里的资源都要在 process::exit 时释放 */
    /// 页目录的持有者。清退时先摘下再销毁
    pub memory: Option<MemorySpace>,
    /// 共享这个地址空间的从属线程，不含主线程
    pub threads: Vec<Arc<Thread>>,
}

impl ProcessInner {
    pub fn new() -> Self {
        Self {
            memory: None,
            threads: Vec::new(),
        }
    }
}
