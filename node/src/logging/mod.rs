use lazy_static::lazy_static;
use serde::Serialize;

lazy_static! {
    pub static ref RUST_LOG_JSON: bool = std::env::var("RUST_LOG_JSON").is_ok();
}

/// Initializes logging from `RUST_LOG`. Logging stays off when it is unset.
pub fn init() {
    match std::env::var("RUST_LOG") {
        Ok(directives) => init_with_directives(&directives),
        Err(_) => println!("Logging disabled, set RUST_LOG to enable it"),
    }
}

pub fn init_with_directives(directives: &str) {
    println!("Logging enabled with directives: {directives}");
    let result = pretty_env_logger::formatted_timed_builder()
        .parse_filters(directives)
        .format_timestamp_millis()
        .try_init();
    if let Err(err) = result {
        eprintln!("Logger already initialized: {err}");
    }
}

/// Debug formatting, or pretty JSON when `RUST_LOG_JSON` is set.
pub fn pretty_json<T: Serialize + std::fmt::Debug>(value: &T) -> String {
    if !*RUST_LOG_JSON {
        return format!("{value:?}");
    }
    serde_json::to_string_pretty(value).unwrap_or_else(|_| format!("{value:?}"))
}
