//! join 记录。
//!
//! 每个活着的进程、每条活着的用户线程在全局表里各占一条记录。记录
//! 既不属于创建者也不属于被创建者，双方都只凭 tid 经全局表找到它；
//! 谁后用完谁释放：要么是成功 join 的一方，要么是创建者清退时。

use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use klocks::SpinMutex;
use triomphe::Arc;

use crate::{sync::Semaphore, thread::Tid};

pub struct JoinRecord {
    /// 被 join 的线程。创建内核线程拿到 tid 后才绑定
    tid: AtomicUsize,
    /// 创建者。对父子 join 来说是父进程主线程的 tid
    creator: Tid,
    state: SpinMutex<JoinState>,
    /// join 屏障：退出方恰好 up 一次，join 方恰好 down 一次
    pub joined: Semaphore,
    /// 加载屏障：创建者在此等待子方完成加载或宣告失败
    pub loaded: Semaphore,
}

struct JoinState {
    exit_code: i32,
    was_waited: bool,
    load_success: bool,
}

impl JoinRecord {
    pub fn new(creator: Tid) -> Self {
        Self {
            tid: AtomicUsize::new(0),
            creator,
            state: SpinMutex::new(JoinState {
                exit_code: -1,
                was_waited: false,
                load_success: false,
            }),
            joined: Semaphore::new(0),
            loaded: Semaphore::new(0),
        }
    }

    pub fn tid(&self) -> Tid {
        self.tid.load(Ordering::SeqCst)
    }

    pub fn bind_tid(&self, tid: Tid) {
        self.tid.store(tid, Ordering::SeqCst);
    }

    pub fn creator(&self) -> Tid {
        self.creator
    }

    pub fn exit_code(&self) -> i32 {
        self.state.lock().exit_code
    }

    pub fn set_exit_code(&self, code: i32) {
        self.state.lock().exit_code = code;
    }

    /// was_waited 只允许 false → true 翻转一次；已翻转过则返回 false
    pub fn try_mark_waited(&self) -> bool {
        let mut state = self.state.lock();
        if state.was_waited {
            return false;
        }
        state.was_waited = true;
        true
    }

    pub fn load_success(&self) -> bool {
        self.state.lock().load_success
    }

    pub fn set_load_success(&self, success: bool) {
        self.state.lock().load_success = success;
    }
}

/// 全局 join 记录表，单把锁罩住
pub struct JoinTable {
    entries: SpinMutex<Vec<Arc<JoinRecord>>>,
}

impl JoinTable {
    pub fn new() -> Self {
        Self {
            entries: SpinMutex::new(Vec::new()),
        }
    }

    pub fn insert(&self, record: Arc<JoinRecord>) {
        self.entries.lock().push(record);
    }

    pub fn find(&self, tid: Tid) -> Option<Arc<JoinRecord>> {
        self.entries
            .lock()
            .iter()
            .find(|r| r.tid() == tid)
            .cloned()
    }

    pub fn remove(&self, tid: Tid) {
        self.entries.lock().retain(|r| r.tid() != tid);
    }

    /// 指定记录还没绑定 tid 时用它移除
    pub fn remove_record(&self, record: &Arc<JoinRecord>) {
        self.entries.lock().retain(|r| !Arc::ptr_eq(r, record));
    }

    /// 清退时移除自己创建的全部记录
    pub fn remove_created_by(&self, creator: Tid) {
        self.entries.lock().retain(|r| r.creator() != creator);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waited_flips_once() {
        let record = JoinRecord::new(1);
        assert!(record.try_mark_waited());
        assert!(!record.try_mark_waited());
    }

    #[test]
    fn table_find_and_remove() {
        let table = JoinTable::new();
        let a = Arc::new(JoinRecord::new(1));
        a.bind_tid(7);
        let b = Arc::new(JoinRecord::new(7));
        b.bind_tid(9);
        table.insert(Arc::clone(&a));
        table.insert(Arc::clone(&b));

        assert!(table.find(7).is_some());
        table.remove(7);
        assert!(table.find(7).is_none());

        // 清退创建者 7 创建的记录
        table.remove_created_by(7);
        assert!(table.find(9).is_none());
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn default_exit_code_is_minus_one() {
        let record = JoinRecord::new(1);
        assert_eq!(record.exit_code(), -1);
        assert!(!record.load_success());
    }
}
