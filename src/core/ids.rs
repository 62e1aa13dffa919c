//! Push-style record keys
//!
//! Keys are a 12-digit hex millisecond timestamp followed by random hex,
//! so lexicographic order follows creation order across requests.

use chrono::Utc;
use uuid::Uuid;

/// Width of the timestamp prefix.
const TIME_DIGITS: usize = 12;

fn now_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// Generate a single push key.
pub fn push_id() -> String {
    let entropy = Uuid::new_v4().simple().to_string();
    format!("{:0width$x}{}", now_millis(), &entropy[..16], width = TIME_DIGITS)
}

/// Generate `count` keys that sort in the order returned.
///
/// The batch shares a timestamp and random part; a trailing sequence
/// number keeps submission order inside the batch.
pub fn push_ids(count: usize) -> Vec<String> {
    let millis = now_millis();
    let entropy = Uuid::new_v4().simple().to_string();
    (0..count)
        .map(|seq| {
            format!(
                "{:0width$x}{}{:06x}",
                millis,
                &entropy[..10],
                seq,
                width = TIME_DIGITS
            )
        })
        .collect()
}
