//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `taskmeta_core` linkage.
//! - Keep output deterministic for quick local sanity checks.

fn main() {
    println!("taskmeta_core ping={}", taskmeta_core::ping());
    println!("taskmeta_core version={}", taskmeta_core::core_version());
    println!(
        "taskmeta_core schema_version={}",
        taskmeta_core::db::migrations::latest_version()
    );
}
