//! Leveled, bracket-tagged logging in the style of the original `av_log` calls.
//!
//! No logging crate: plain `println!`/`eprintln!` gated by a level read once
//! from `FF_EXMG_SECURE_SYNC_LOG_LEVEL` (default `info`).
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Level {
    Error = 0,
    Warning = 1,
    Info = 2,
    Verbose = 3,
    Debug = 4,
}

impl Level {
    fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Some(Level::Error),
            "warning" | "warn" => Some(Level::Warning),
            "info" => Some(Level::Info),
            "verbose" => Some(Level::Verbose),
            "debug" => Some(Level::Debug),
            _ => None,
        }
    }
}

static LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);
static INIT: OnceCell<()> = OnceCell::new();

fn init_once() {
    INIT.get_or_init(|| {
        if let Ok(raw) = std::env::var("FF_EXMG_SECURE_SYNC_LOG_LEVEL") {
            if let Some(lvl) = Level::from_str(&raw) {
                LEVEL.store(lvl as u8, Ordering::Relaxed);
            }
        }
    });
}

pub fn enabled(level: Level) -> bool {
    init_once();
    (level as u8) <= LEVEL.load(Ordering::Relaxed)
}

macro_rules! log_at {
    ($level:expr, $tag:expr, $($arg:tt)*) => {{
        if $crate::logging::enabled($level) {
            if $level <= $crate::logging::Level::Warning {
                eprintln!("[{}] {}", $tag, format!($($arg)*));
            } else {
                println!("[{}] {}", $tag, format!($($arg)*));
            }
        }
    }};
}

macro_rules! log_error {
    ($tag:expr, $($arg:tt)*) => { $crate::logging::log_at!($crate::logging::Level::Error, $tag, $($arg)*) };
}
macro_rules! log_warning {
    ($tag:expr, $($arg:tt)*) => { $crate::logging::log_at!($crate::logging::Level::Warning, $tag, $($arg)*) };
}
macro_rules! log_info {
    ($tag:expr, $($arg:tt)*) => { $crate::logging::log_at!($crate::logging::Level::Info, $tag, $($arg)*) };
}
macro_rules! log_verbose {
    ($tag:expr, $($arg:tt)*) => { $crate::logging::log_at!($crate::logging::Level::Verbose, $tag, $($arg)*) };
}
macro_rules! log_debug {
    ($tag:expr, $($arg:tt)*) => { $crate::logging::log_at!($crate::logging::Level::Debug, $tag, $($arg)*) };
}

pub(crate) use log_at;
pub(crate) use log_debug;
pub(crate) use log_error;
pub(crate) use log_info;
pub(crate) use log_verbose;
pub(crate) use log_warning;
