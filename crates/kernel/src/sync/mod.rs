//! 内核同步原语：计数信号量与带优先级捐赠的睡眠锁。
//!
//! 用户可见的锁与信号量就是这两个类型，挂在各自 PCB 的表里；
//! 内核自己（文件系统锁、文件表锁、各种屏障）用的也是它们。

mod lock;
mod sema;

pub use lock::{refresh_priority, Lock};
pub use sema::Semaphore;
