
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// The current time in unix seconds.
pub(crate) fn unix_time() -> i64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.expect("system clock set before the unix epoch")
		.as_secs() as i64
}

/// Extension trait for time types.
pub(crate) trait TimeExt {
	/// Same as [SystemTime::elapsed], but saturating to 0 if the clock
	/// jumped backwards.
	fn saturating_elapsed(&self) -> Duration;
}

impl TimeExt for SystemTime {
	fn saturating_elapsed(&self) -> Duration {
		SystemTime::now().duration_since(*self).unwrap_or_default()
	}
}
