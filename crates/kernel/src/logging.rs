//! 控制台日志。
//!
//! 走 `log` 门面，等级在编译期由 `KERNEL_LOG` 环境变量决定，
//! 输出端是第一个完成启动的内核上下文的控制台。

use alloc::{boxed::Box, format};
use klocks::Once;
use log::{Level, LevelFilter, Log, Metadata, Record};

static SINK: Once<Box<dyn Fn(&str) + Send + Sync>> = Once::new();

struct ConsoleLogger;

impl Log for ConsoleLogger {
    fn enabled(&self, _metadata: &Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &Record<'_>) {
        let Some(sink) = SINK.get() else { return };
        let color = match record.level() {
            Level::Error => 31, // Red
            Level::Warn => 93,  // BrightYellow
            Level::Info => 34,  // Blue
            Level::Debug => 32, // Green
            Level::Trace => 90, // BrightBlack
        };
        sink(&format!(
            "\u{1B}[{}m[{:>5}] {}\u{1B}[0m\n",
            color,
            record.level(),
            record.args(),
        ));
    }

    fn flush(&self) {}
}

static LOGGER: ConsoleLogger = ConsoleLogger;

pub(crate) fn init() {
    let level = match option_env!("KERNEL_LOG") {
        Some("ERROR") => LevelFilter::Error,
        Some("WARN") => LevelFilter::Warn,
        Some("INFO") => LevelFilter::Info,
        Some("DEBUG") => LevelFilter::Debug,
        Some("TRACE") => LevelFilter::Trace,
        _ => LevelFilter::Off,
    };
    // 多个内核上下文共用一个全局 logger，重复设置不是错误
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

pub(crate) fn set_sink(sink: Box<dyn Fn(&str) + Send + Sync>) {
    SINK.call_once(|| sink);
}
