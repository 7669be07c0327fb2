#[allow(non_upper_case_globals)]
pub const KiB: usize = 1024;
#[allow(non_upper_case_globals)]
pub const MiB: usize = 1024 * KiB;

/// 一个页大小的 bit 数
pub const PAGE_SIZE_BITS: usize = 12;
/// 页大小
pub const PAGE_SIZE: usize = 1 << PAGE_SIZE_BITS;
/// 页内偏移的掩码
pub const PAGE_MASK: usize = PAGE_SIZE - 1;

/// 用户指针宽度。目标是 32 位机器，用户地址空间中指针都是 4 字节
pub const USER_PTR_SIZE: usize = 4;

/// 用户地址空间的上界（不含）。高于它的都是内核地址
pub const USER_TOP: usize = 0xC000_0000;

/// 内核栈大小（每线程一页，线程描述符之外的部分都是栈）
pub const KERNEL_STACK_SIZE: usize = PAGE_SIZE;

/// 进程名的最大长度（不含结尾 NUL）
pub const PROCESS_NAME_LEN: usize = 15;

/// 命令行最多允许的参数个数
pub const MAX_ARGS: usize = 50;

/// 优先级范围与默认值
pub const PRI_MIN: i32 = 0;
pub const PRI_DEFAULT: i32 = 31;
pub const PRI_MAX: i32 = 63;

/// 每个线程的时间片（时钟 tick 数）
pub const TIME_SLICE: u32 = 4;
/// 时钟频率，每秒 tick 数
pub const TICKS_PER_SEC: u64 = 100;

/// ELF 中 program header 数量的上限
pub const MAX_PHDRS: u16 = 1024;
