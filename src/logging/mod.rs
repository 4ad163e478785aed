//! Structured logging module using tracing
//!
//! Console (stderr) plus an optional append-only file layer. The file layer is
//! also the diagnostic channel for swallowed failures such as alert-store writes.

use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Ellipse a string for display: first half + "..." + last half.
/// If `s` has ≤ `max_len` chars, returns `s` unchanged. Used to keep
/// data-URI payloads and response bodies out of log lines.
pub fn ellipse(s: &str, max_len: usize) -> String {
    const SEP: &str = "...";
    let sep_len = 3;
    let chars: Vec<char> = s.chars().collect();
    let n = chars.len();
    if n <= max_len || max_len <= sep_len {
        return s.to_string();
    }
    let first_count = (max_len - sep_len) / 2;
    let last_count = (max_len - sep_len) - first_count;
    let first: String = chars[..first_count].iter().collect();
    let last: String = chars[n - last_count..].iter().collect();
    format!("{}{}{}", first, SEP, last)
}

/// Map `-v` count to a filter level. -v: warn, -vv: debug, -vvv: trace.
fn filter_level(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "error",
        1 => "warn",
        2 => "debug",
        _ => "trace",
    }
}

/// Initialize tracing with file and console output.
///
/// Command-line verbosity always wins; `RUST_LOG` is ignored.
pub fn init_tracing(verbosity: u8, log_file_path: Option<PathBuf>) {
    let filter = EnvFilter::new(filter_level(verbosity));
    let registry = tracing_subscriber::registry().with(filter);

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let file = log_file_path.and_then(|log_path| {
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .ok()
    });

    match file {
        Some(file) => {
            let file_layer = fmt::layer()
                .with_writer(std::sync::Mutex::new(file))
                .with_target(false)
                .with_ansi(false);
            registry.with(console_layer).with(file_layer).init();
        }
        None => registry.with(console_layer).init(),
    }
}
