//! 模拟用户态的执行上下文。
//!
//! 对内存的访问都走当前进程的页表，对内核的请求都走系统调用入口，
//! 和真用户程序能做的事一一对应。

use triomphe::Arc;

use crate::{boot::Kernel, process::user_ptr, syscall};

pub struct UserCtx {
    kernel: Arc<Kernel>,
    /// 进入用户态时的初始栈指针
    pub esp: u32,
    pub eip: u32,
}

impl UserCtx {
    pub(crate) fn new(kernel: Arc<Kernel>, esp: u32, eip: u32) -> Self {
        Self { kernel, esp, eip }
    }

    pub fn syscall(&self, id: usize, args: [usize; 3]) -> isize {
        syscall::syscall(&self.kernel, id, args)
    }

    fn with_process<T>(&self, f: impl FnOnce(&crate::process::Process) -> T) -> T {
        let process = self
            .kernel
            .current()
            .process()
            .expect("user context without process");
        f(&process)
    }

    pub fn read_u32(&self, va: u32) -> u32 {
        self.with_process(|p| {
            let bytes = user_ptr::copy_from_user(p, va as usize, 4).expect("bad user address");
            u32::from_le_bytes(bytes.try_into().unwrap())
        })
    }

    pub fn write_u32(&self, va: u32, value: u32) -> bool {
        self.with_process(|p| user_ptr::copy_to_user(p, va as usize, &value.to_le_bytes()).is_ok())
    }

    pub fn read_bytes(&self, va: u32, len: usize) -> Vec<u8> {
        self.with_process(|p| {
            user_ptr::copy_from_user(p, va as usize, len).expect("bad user address")
        })
    }

    pub fn write_bytes(&self, va: u32, data: &[u8]) -> bool {
        self.with_process(|p| user_ptr::copy_to_user(p, va as usize, data).is_ok())
    }

    /// 写一个 C 字符串，返回起始地址
    pub fn write_cstr(&self, va: u32, s: &str) -> u32 {
        assert!(self.write_bytes(va, s.as_bytes()));
        assert!(self.write_bytes(va + s.len() as u32, &[0]));
        va
    }

    /// 栈页里 esp 之下的一块空闲区域，给测试程序放字符串等
    pub fn scratch(&self) -> u32 {
        self.esp - 512
    }

    /// 按初始栈布局读出 argc 与 argv
    pub fn args(&self) -> Vec<String> {
        let argc = self.read_u32(self.esp + 4) as usize;
        let argv = self.read_u32(self.esp + 8);
        let mut out = Vec::with_capacity(argc);
        for i in 0..argc {
            let ptr = self.read_u32(argv + 4 * i as u32);
            let mut bytes = Vec::new();
            let mut cur = ptr;
            loop {
                let b = self.read_bytes(cur, 1)[0];
                if b == 0 {
                    break;
                }
                bytes.push(b);
                cur += 1;
            }
            out.push(String::from_utf8(bytes).expect("argv not utf-8"));
        }
        out
    }
}
