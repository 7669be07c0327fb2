//! 文件描述符表。
//!
//! fd 从 2 起单调递增，0 和 1 留给控制台约定，PCB 存活期间 fd 不复用。

use alloc::{collections::BTreeMap, sync::Arc};

use crate::fs::File;

pub struct FdTable {
    files: BTreeMap<usize, Arc<File>>,
    next_fd: usize,
}

impl FdTable {
    pub fn new() -> Self {
        Self {
            files: BTreeMap::new(),
            next_fd: 2,
        }
    }

    /// 记下映射，返回新 fd
    pub fn install(&mut self, file: Arc<File>) -> usize {
        let fd = self.next_fd;
        self.next_fd += 1;
        self.files.insert(fd, file);
        fd
    }

    pub fn get(&self, fd: usize) -> Option<Arc<File>> {
        self.files.get(&fd).cloned()
    }

    pub fn remove(&mut self, fd: usize) -> Option<Arc<File>> {
        self.files.remove(&fd)
    }

    /// 关闭所有文件（句柄析构即关闭）
    pub fn clear(&mut self) {
        self.files.clear();
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}
