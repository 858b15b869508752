//! ID generation utilities for Vigil
//!
//! Provides functions for generating unique identifiers for execution
//! memories, triggers, and tickets.

use rand::Rng;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

/// Generate a unique execution memory ID
///
/// Format: `mem-{timestamp_ms}-{random_hex}`
/// Example: `mem-1738300800123-a1b2`
pub fn generate_memory_id() -> String {
    let timestamp = now_ms();
    let random: u16 = rand::rng().random();
    format!("mem-{}-{:04x}", timestamp, random)
}

/// Generate an improvement trigger ID
///
/// Format: `trig-{timestamp_ms}-{random_hex}`
pub fn generate_trigger_id() -> String {
    let timestamp = now_ms();
    let random: u16 = rand::rng().random();
    format!("trig-{}-{:04x}", timestamp, random)
}

/// Generate a ticket ID for human review
///
/// Format: `tkt-{timestamp_ms}-{random_hex}`
pub fn generate_ticket_id() -> String {
    let timestamp = now_ms();
    let random: u16 = rand::rng().random();
    format!("tkt-{}-{:04x}", timestamp, random)
}
