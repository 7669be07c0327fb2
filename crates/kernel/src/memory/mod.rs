//! 用户地址空间管理。
//!
//! 页表是软件页表：页帧从内核堆上分配，映射关系放在 BTreeMap 里。
//! 真正的分页硬件属于平台层，这里只承诺和它一致的语义（含 accessed 位）。

mod address;
mod frame_allocator;
mod memory_space;
mod page_table;

pub use address::{VirtAddr, VirtPageNum};
pub use frame_allocator::{Frame, FrameAllocator};
pub use memory_space::MemorySpace;
pub use page_table::{PageTable, PteFlags};
