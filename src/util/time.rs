//! Module containing helper functions to manipulate time

use chrono::{SecondsFormat, TimeZone, Utc};
use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current time in milliseconds since the Unix epoch
pub fn now_msec() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.expect("computer clock is set before the Unix epoch")
		.as_millis() as u64
}

/// Convert a timestamp represented as milliseconds since the Unix epoch
/// to an RFC 3339 string
pub fn msec_to_rfc3339(msecs: u64) -> String {
	let secs = msecs as i64 / 1000;
	let nanos = (msecs as i64 % 1000) as u32 * 1_000_000;
	let timestamp = Utc
		.timestamp_opt(secs, nanos)
		.single()
		.unwrap_or_else(|| Utc.timestamp_opt(0, 0).single().unwrap());
	timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_msec_to_rfc3339() {
		assert_eq!(msec_to_rfc3339(0), "1970-01-01T00:00:00.000Z");
		assert_eq!(msec_to_rfc3339(1_234_567_890_123), "2009-02-13T23:31:30.123Z");
	}

	#[test]
	fn test_now_msec_monotonic_enough() {
		let a = now_msec();
		let b = now_msec();
		assert!(b >= a);
	}
}
