//! 测试用的内存文件系统，带 deny-write 记账。

use std::{
    collections::HashMap,
    sync::{Arc as StdArc, Mutex},
};

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::fs::{FileOps, Vfs};

pub struct MemFs {
    files: Mutex<HashMap<String, StdArc<MemFile>>>,
}

impl MemFs {
    pub fn new() -> Self {
        Self {
            files: Mutex::new(HashMap::new()),
        }
    }

    pub fn add(&self, name: &str, data: Vec<u8>) {
        self.files.lock().unwrap().insert(
            name.into(),
            StdArc::new(MemFile {
                data: Mutex::new(data),
                deny: AtomicUsize::new(0),
            }),
        );
    }

    pub fn get(&self, name: &str) -> Option<StdArc<MemFile>> {
        self.files.lock().unwrap().get(name).cloned()
    }
}

pub struct MemFile {
    data: Mutex<Vec<u8>>,
    deny: AtomicUsize,
}

impl MemFile {
    pub fn deny_count(&self) -> usize {
        self.deny.load(Ordering::SeqCst)
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.data.lock().unwrap().clone()
    }
}

impl FileOps for MemFile {
    fn len(&self) -> usize {
        self.data.lock().unwrap().len()
    }

    fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        let data = self.data.lock().unwrap();
        if offset >= data.len() {
            return 0;
        }
        let n = usize::min(buf.len(), data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        n
    }

    fn write_at(&self, offset: usize, buf: &[u8]) -> usize {
        if self.deny.load(Ordering::SeqCst) > 0 {
            return 0;
        }
        let mut data = self.data.lock().unwrap();
        if offset > data.len() {
            return 0;
        }
        let end = offset + buf.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[offset..end].copy_from_slice(buf);
        buf.len()
    }

    fn deny_write(&self) {
        self.deny.fetch_add(1, Ordering::SeqCst);
    }

    fn allow_write(&self) {
        self.deny.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Vfs for StdArc<MemFs> {
    fn open(&self, name: &str) -> Option<StdArc<dyn FileOps>> {
        let file = self.get(name)?;
        Some(file)
    }
}
