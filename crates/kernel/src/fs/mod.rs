//! 文件系统接缝。
//!
//! 下层文件系统不可重入，所有进入 [`Vfs`] 的调用都串行在内核的全局
//! 文件系统锁里；锁的获取由调用方负责，嵌套顺序永远是
//! 文件系统锁在外、PCB 文件表锁在内。

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

use klocks::SpinMutex;

/// 打开文件、返回文件对象的入口
pub trait Vfs: Send + Sync {
    fn open(&self, name: &str) -> Option<Arc<dyn FileOps>>;
}

/// 一个打开的文件对象
pub trait FileOps: Send + Sync {
    fn len(&self) -> usize;
    /// 从 `offset` 读，返回实际读到的字节数
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize;
    /// 向 `offset` 写。写入被拒绝时返回 0
    fn write_at(&self, offset: usize, buf: &[u8]) -> usize;
    /// 拒绝写入。可叠加，每次 deny 配一次 allow
    fn deny_write(&self);
    fn allow_write(&self);
}

/// 内核侧的文件句柄：文件对象加上读写游标。
/// 析构时解除自己施加的写禁令
pub struct File {
    ops: Arc<dyn FileOps>,
    offset: SpinMutex<usize>,
    denied: AtomicBool,
}

impl File {
    pub fn new(ops: Arc<dyn FileOps>) -> Self {
        Self {
            ops,
            offset: SpinMutex::new(0),
            denied: AtomicBool::new(false),
        }
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        self.ops.read_at(offset, buf)
    }

    /// 从当前游标读并推进
    pub fn read(&self, buf: &mut [u8]) -> usize {
        let mut offset = self.offset.lock();
        let n = self.ops.read_at(*offset, buf);
        *offset += n;
        n
    }

    /// 向当前游标写并推进。映像被拒绝写入时写不进去
    pub fn write(&self, buf: &[u8]) -> usize {
        let mut offset = self.offset.lock();
        let n = self.ops.write_at(*offset, buf);
        *offset += n;
        n
    }

    /// 拒绝对底层文件的写入，直到本句柄关闭
    pub fn deny_write(&self) {
        if !self.denied.swap(true, Ordering::SeqCst) {
            self.ops.deny_write();
        }
    }
}

impl Drop for File {
    fn drop(&mut self) {
        if self.denied.load(Ordering::SeqCst) {
            self.ops.allow_write();
        }
    }
}
