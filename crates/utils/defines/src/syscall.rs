//! 系统调用号。编号与 32 位用户库中的 `syscall-nr.h` 保持一致

macro_rules! declare_syscall_id {
    ($($name:tt, $id:literal,)*) => {
        $(pub const $name: usize = $id;)*
        pub fn name(id: usize) -> &'static str {
            match id {
                $($id => stringify!($name),)*
                _ => "UNKNOWN",
            }
        }
    };
}

#[rustfmt::skip]
declare_syscall_id!(
    HALT,           0,
    EXIT,           1,
    EXEC,           2,
    WAIT,           3,
    CREATE,         4,
    REMOVE,         5,
    OPEN,           6,
    FILESIZE,       7,
    READ,           8,
    WRITE,          9,
    SEEK,           10,
    TELL,           11,
    CLOSE,          12,
    PRACTICE,       13,
    PT_CREATE,      14,
    PT_EXIT,        15,
    PT_JOIN,        16,
    LOCK_INIT,      17,
    LOCK_ACQUIRE,   18,
    LOCK_RELEASE,   19,
    SEMA_INIT,      20,
    SEMA_DOWN,      21,
    SEMA_UP,        22,
    GET_TID,        23,
);
