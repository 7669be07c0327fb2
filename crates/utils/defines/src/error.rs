//! 内核统一的错误类型。
//!
//! 系统调用层把 `Err` 折叠成负的 errno 返回给用户；内核内部则用 `?` 传播。

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Error(i32);

impl Error {
    #[inline]
    pub fn as_isize(self) -> isize {
        self.0 as isize
    }
}

pub type KResult<T = isize> = core::result::Result<T, Error>;

pub mod errno {
    macro_rules! errno_consts {
        ($($(#[$doc:meta])* $name:ident = $value:literal;)*) => {
            $($(#[$doc])* pub const $name: super::Error = super::Error($value);)*

            /// 错误码的符号名，用于日志
            pub fn name(errno: isize) -> &'static str {
                match errno {
                    $($value => stringify!($name),)*
                    _ => "E?",
                }
            }
        };
    }

    errno_consts! {
        /// Operation not permitted
        EPERM = -1;
        /// No such file or directory
        ENOENT = -2;
        /// No such process
        ESRCH = -3;
        /// I/O error
        EIO = -5;
        /// Exec format error
        ENOEXEC = -8;
        /// Bad file number
        EBADF = -9;
        /// No child process
        ECHILD = -10;
        /// Try again
        EAGAIN = -11;
        /// Out of memory
        ENOMEM = -12;
        /// Bad address
        EFAULT = -14;
        /// Device or resource busy
        EBUSY = -16;
        /// File exists
        EEXIST = -17;
        /// Invalid argument
        EINVAL = -22;
        /// Too many open files
        EMFILE = -24;
        /// Function not implemented
        ENOSYS = -38;
    }
}

#[cfg(test)]
mod tests {
    use super::errno;

    #[test]
    fn errno_round_trip() {
        assert_eq!(errno::ENOMEM.as_isize(), -12);
        assert_eq!(errno::name(errno::EINVAL.as_isize()), "EINVAL");
        assert_eq!(errno::name(-9999), "E?");
    }
}
