//! 宿主模拟层，只参与测试构建。
//!
//! 拿宿主线程当内核线程的执行环境：单 CPU 用逐线程的 park/unpark
//! 接力棒模拟，上下文切换就是交棒；"用户态"是按名字注册的闭包，
//! 经真实的系统调用入口与页表访问用户内存，所以参数栈、句柄表、
//! 写禁令这些路径全部走真代码。

mod cpu;
mod elf;
mod memfs;
mod user;

pub use cpu::{HostCpu, STUB_ADDR};
pub use elf::{ElfBuilder, PF_R, PF_W, PF_X};
pub use memfs::MemFs;
pub use user::UserCtx;
