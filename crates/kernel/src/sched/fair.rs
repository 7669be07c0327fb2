//! 公平策略的估算器。
//!
//! 每个 tick 给运行线程的 `recent_cpu` 加一；每秒重算一次负载均值并让
//! 全体线程的 `recent_cpu` 衰减，随后按
//! `PRI_MAX - recent_cpu/4 - nice` 重算优先级（截断后夹在优先级区间内）。

use alloc::vec::Vec;
use triomphe::Arc;

use common::config::{PRI_MAX, PRI_MIN};

use super::{Fixed, SchedState};
use crate::{
    boot::{Kernel, KernelConfig},
    thread::{Thread, ThreadStatus},
};

/// 初始 nice 值。
///
/// 开启 nice 的配置下统一从 0 开始，由 `set_nice` 调整；
/// 关闭时由创建优先级查静态表定死，且不参与优先级公式
pub(crate) fn initial_nice(config: &KernelConfig, priority: i32) -> i32 {
    if config.nice_aware {
        return 0;
    }
    match priority {
        56 => 0,
        48 => 1,
        40 => 2,
        32 => 3,
        24 => 4,
        16 => 5,
        8 => 6,
        0 => 7,
        _ => 0,
    }
}

/// 每个 tick：运行线程（idle 除外）的 recent_cpu 加一
pub(crate) fn increase_recent_cpu(state: &SchedState, cur: &Arc<Thread>) {
    if state.is_idle(cur) {
        return;
    }
    cur.lock_inner_with(|inner| inner.recent_cpu = inner.recent_cpu.add_int(1));
}

/// 每秒一次：更新负载均值，衰减全体 recent_cpu 并重算优先级，
/// 最后把就绪队列按新优先级归位
pub(crate) fn update_load_avg_and_recent_cpu(kernel: &Kernel, state: &mut SchedState) {
    let cur = state.current.clone().expect("no running thread");
    let mut ready_num = state.ready.len() as i32;
    if !state.is_idle(&cur) {
        ready_num += 1;
    }
    state.load_avg = state.load_avg.scale(59).unscale(60)
        + Fixed::from_int(ready_num).unscale(60);

    let decay = state
        .load_avg
        .scale(2)
        .div(state.load_avg.scale(2).add_int(1));
    for t in &state.all {
        if state.is_idle(t) {
            continue;
        }
        t.lock_inner_with(|inner| inner.recent_cpu = decay.mul(inner.recent_cpu));
        update_priority(&kernel.config, t);
    }

    rebalance_ready(state);
}

/// `PRI_MAX - recent_cpu/4 - nice`，截断后夹到合法区间
pub(crate) fn update_priority(config: &KernelConfig, thread: &Arc<Thread>) {
    let priority = thread.lock_inner_with(|inner| {
        let mut p = Fixed::from_int(PRI_MAX) - inner.recent_cpu.unscale(4);
        if config.nice_aware {
            p = p.sub_int(inner.nice);
        }
        p.trunc()
    });
    thread.set_priority_raw(priority.clamp(PRI_MIN, PRI_MAX));
}

/// 稳定排序保持同优先级的先来先服务
fn rebalance_ready(state: &mut SchedState) {
    let mut threads: Vec<Arc<Thread>> = state.ready.drain(..).collect();
    threads.sort_by_key(|t| core::cmp::Reverse(t.priority()));
    state.ready.extend(threads);
    debug_assert!(state
        .ready
        .iter()
        .all(|t| t.status() == ThreadStatus::Ready));
}
