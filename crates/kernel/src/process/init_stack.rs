//! 初始用户栈的参数布局。
//!
//! System V i386 约定：参数串从高地址起逐个压栈（含结尾 NUL），
//! 随后补齐到 16 字节边界。对齐量把哨兵空指针、各个 `argv[i]`、
//! `argv` 指针和 `argc` 都计算在内，这样压完 `argc` 时 esp 恰好
//! 对齐；最后再压一个 0 作为伪造的返回地址。

use alloc::vec::Vec;
use defines::error::{errno, KResult};

use common::config::{MAX_ARGS, USER_PTR_SIZE};

use crate::memory::{PageTable, VirtAddr};

pub struct UserStackInit<'a> {
    user_sp: usize,
    page_table: &'a mut PageTable,
}

impl<'a> UserStackInit<'a> {
    pub fn new(user_sp: VirtAddr, page_table: &'a mut PageTable) -> Self {
        Self {
            user_sp: user_sp.0,
            page_table,
        }
    }

    pub fn user_sp(&self) -> VirtAddr {
        VirtAddr(self.user_sp)
    }

    /// 压入整条命令行的参数，返回压完之后的 esp
    pub fn push_args(&mut self, cmdline: &str) -> KResult<VirtAddr> {
        let tokens: Vec<&str> = cmdline.split_whitespace().collect();
        if tokens.is_empty() || tokens.len() > MAX_ARGS {
            return Err(errno::EINVAL);
        }
        let argc = tokens.len();

        // 参数串本体，第一个 token 在最高处
        let mut argv = Vec::with_capacity(argc);
        let mut string_bytes = 0;
        for token in &tokens {
            argv.push(self.push_str(token)?);
            string_bytes += token.len() + 1;
        }

        // 对齐到 16 字节。把哨兵、argv[i] 指针、argv 和 argc 都算进去
        let args_num =
            string_bytes + USER_PTR_SIZE * (argc + 1) + USER_PTR_SIZE + USER_PTR_SIZE;
        let pad = (16 - args_num % 16) % 16;
        for _ in 0..pad {
            self.push_byte(0)?;
        }

        // argv[argc] 哨兵
        self.push_u32(0)?;
        // argv[argc-1] … argv[0]
        for &ptr in argv.iter().rev() {
            self.push_u32(ptr as u32)?;
        }
        // argv 本身指向 argv[0] 所在的槽
        let argv0_slot = self.user_sp;
        self.push_u32(argv0_slot as u32)?;
        self.push_u32(argc as u32)?;
        // 伪造的返回地址
        self.push_u32(0)?;

        Ok(VirtAddr(self.user_sp))
    }

    /// 压入一个 C 字符串，返回它的用户虚地址
    fn push_str(&mut self, s: &str) -> KResult<usize> {
        let len = s.len() + 1;
        self.user_sp -= len;
        self.page_table
            .write_bytes(VirtAddr(self.user_sp), s.as_bytes())?;
        self.page_table
            .write_bytes(VirtAddr(self.user_sp + s.len()), &[0])?;
        Ok(self.user_sp)
    }

    fn push_byte(&mut self, byte: u8) -> KResult<()> {
        self.user_sp -= 1;
        self.page_table.write_bytes(VirtAddr(self.user_sp), &[byte])
    }

    fn push_u32(&mut self, value: u32) -> KResult<()> {
        self.user_sp -= USER_PTR_SIZE;
        self.page_table
            .write_bytes(VirtAddr(self.user_sp), &value.to_le_bytes())
    }
}
