//! Test-only logger: send everything to the console for `cargo test`.
//!
//! Grounded on the teacher's `src/common/testlogger.rs`.

#[cfg(test)]
pub fn test_logger() {
    let _ = simplelog::CombinedLogger::init(vec![simplelog::TermLogger::new(
        simplelog::LevelFilter::Debug,
        simplelog::Config::default(),
        simplelog::TerminalMode::Stdout,
        simplelog::ColorChoice::Auto,
    )]);
}
