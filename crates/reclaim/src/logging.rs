//! Swap Logging and Tracing
//!
//! Structured events for swap activity, useful for:
//! - Tuning table capacity and the eviction policy
//! - Debugging stuck handshakes
//! - Production monitoring
//!
//! Every event is forwarded to the `log` facade at its level. A logger can
//! additionally echo events to the console (human or JSON form) and keeps
//! the most recent ones in memory for inspection.
//!
//! Log Levels:
//! - ERROR: swap-in failures, table unavailable
//! - WARN: handshake stalls
//! - INFO: table lifecycle, lock recovery
//! - DEBUG: swap-in/out, entry frees, no-swap marks

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Events kept in memory per logger
const EVENT_CAPACITY: usize = 4096;

/// Log level for swap events
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Trace => log::Level::Trace,
        }
    }
}

/// Swap event types
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SwapEvent {
    /// Reclamation table mapped
    TableCreated { entries: usize, bytes: usize },

    /// Reclamation table could not be backed
    TableUnavailable { entries: usize },

    /// Object replaced by a stub
    SwapOut {
        entry: u32,
        address: usize,
        pages: u16,
    },

    /// Payload brought back into memory
    SwapIn {
        entry: u32,
        pages: u16,
        duration_us: u64,
        kernel: bool,
    },

    /// Backend failed to produce a payload
    SwapInFailed { entry: u32, reason: String },

    /// Entry released by a free notification
    EntryFreed { entry: u32, address: usize },

    /// Object excluded from swapping
    NoSwapMarked { address: usize, reason: String },

    /// Lock state cleared on every entry during a pause
    UnlockAll { entries_cleared: usize },

    /// Handshake polled a held kernel lock for a long time
    HandshakeStall { entry: u32, polls: u64 },
}

impl SwapEvent {
    /// Level of this event
    pub fn level(&self) -> LogLevel {
        match self {
            SwapEvent::TableUnavailable { .. } | SwapEvent::SwapInFailed { .. } => LogLevel::Error,
            SwapEvent::HandshakeStall { .. } => LogLevel::Warn,
            SwapEvent::TableCreated { .. } | SwapEvent::UnlockAll { .. } => LogLevel::Info,
            SwapEvent::SwapOut { .. }
            | SwapEvent::SwapIn { .. }
            | SwapEvent::EntryFreed { .. }
            | SwapEvent::NoSwapMarked { .. } => LogLevel::Debug,
        }
    }

    fn human(&self) -> String {
        match self {
            SwapEvent::TableCreated { entries, bytes } => {
                format!("[SWAP] Table created: {} entries ({} bytes)", entries, bytes)
            }
            SwapEvent::TableUnavailable { entries } => {
                format!("[SWAP] Table unavailable: could not back {} entries", entries)
            }
            SwapEvent::SwapOut {
                entry,
                address,
                pages,
            } => format!(
                "[SWAP] Swap-out: object {:#x} -> entry #{} ({} pages)",
                address, entry, pages
            ),
            SwapEvent::SwapIn {
                entry,
                pages,
                duration_us,
                kernel,
            } => format!(
                "[SWAP] Swap-in: entry #{} ({} pages, {} us{})",
                entry,
                pages,
                duration_us,
                if *kernel { ", fault" } else { "" }
            ),
            SwapEvent::SwapInFailed { entry, reason } => {
                format!("[SWAP] Swap-in failed: entry #{}: {}", entry, reason)
            }
            SwapEvent::EntryFreed { entry, address } => {
                format!("[SWAP] Entry #{} freed with object {:#x}", entry, address)
            }
            SwapEvent::NoSwapMarked { address, reason } => {
                format!("[SWAP] Object {:#x} excluded from swapping ({})", address, reason)
            }
            SwapEvent::UnlockAll { entries_cleared } => {
                format!("[SWAP] Unlock-all cleared {} entries", entries_cleared)
            }
            SwapEvent::HandshakeStall { entry, polls } => format!(
                "[SWAP] Entry #{} kernel lock still held after {} polls",
                entry, polls
            ),
        }
    }
}

/// Swap logger configuration
#[derive(Debug, Clone)]
pub struct SwapLoggerConfig {
    /// Minimum log level
    pub level: LogLevel,

    /// Echo events to stdout
    pub console: bool,

    /// JSON instead of human-readable console lines
    pub json: bool,

    /// Prefix console lines with a local timestamp
    pub timestamps: bool,
}

impl Default for SwapLoggerConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            console: false,
            json: false,
            timestamps: true,
        }
    }
}

impl SwapLoggerConfig {
    /// Console output at debug level, as selected by `SwapConfig::verbose`
    pub fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            console: true,
            ..Default::default()
        }
    }
}

/// Swap logger
pub struct SwapLogger {
    config: SwapLoggerConfig,
    events: Mutex<VecDeque<(Instant, SwapEvent)>>,
    enabled: AtomicBool,
}

impl SwapLogger {
    pub fn new(config: SwapLoggerConfig) -> Self {
        Self {
            config,
            events: Mutex::new(VecDeque::new()),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Log a swap event
    pub fn log(&self, event: SwapEvent) {
        if !self.is_enabled() {
            return;
        }

        let level = event.level();
        if level > self.config.level {
            return;
        }

        log::log!(target: "reclaim", log::Level::from(level), "{}", event.human());

        if self.config.console {
            self.output_console(&event);
        }

        let mut events = self.events.lock();
        if events.len() == EVENT_CAPACITY {
            events.pop_front();
        }
        events.push_back((Instant::now(), event));
    }

    fn output_console(&self, event: &SwapEvent) {
        let line = if self.config.json {
            match serde_json::to_string(event) {
                Ok(json) => json,
                Err(_) => return,
            }
        } else {
            event.human()
        };

        if self.config.timestamps {
            let now = chrono::Local::now();
            println!("[{}] {}", now.format("%Y-%m-%d %H:%M:%S%.3f"), line);
        } else {
            println!("{}", line);
        }
    }

    /// Retained events, oldest first
    pub fn get_events(&self) -> Vec<SwapEvent> {
        self.events.lock().iter().map(|(_, e)| e.clone()).collect()
    }

    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().len()
    }
}

impl Default for SwapLogger {
    fn default() -> Self {
        Self::new(SwapLoggerConfig::default())
    }
}

lazy_static::lazy_static! {
    /// Logger for code without a runtime at hand
    static ref GLOBAL_LOGGER: Mutex<SwapLogger> = Mutex::new(SwapLogger::default());
}

/// Log a swap event to the global logger
pub fn log_event(event: SwapEvent) {
    GLOBAL_LOGGER.lock().log(event);
}

/// Configure global logger
pub fn configure_logger(config: SwapLoggerConfig) {
    *GLOBAL_LOGGER.lock() = SwapLogger::new(config);
}

/// Global logger event count
pub fn get_event_count() -> usize {
    GLOBAL_LOGGER.lock().event_count()
}
