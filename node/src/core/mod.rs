use std::fmt::Display;

pub mod node;
pub mod shutdown;

/// Logs `reason` and aborts the process.
///
/// Used where durable state may be half written and continuing would
/// build on top of it.
pub fn fatal<D: Display>(reason: D) -> ! {
    log::error!("FATAL: {reason}");
    eprintln!("FATAL: {reason}");
    std::process::abort()
}
