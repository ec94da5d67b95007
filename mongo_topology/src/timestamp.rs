use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// A point in time, in milliseconds since the Unix epoch.
///
/// Monitoring replies report write and refresh times in this form. The core never reads a
/// clock itself; [`Timestamp::now`] exists for the monitoring side.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    pub fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();
        Self(millis)
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }

    /// Signed distance from `earlier` to `self`, in milliseconds. `None` if it does not fit
    /// in an `i64`.
    pub fn millis_since(&self, earlier: Timestamp) -> Option<i64> {
        self.0.checked_sub(earlier.0)
    }
}

#[cfg(test)]
mod tests {
    use super::Timestamp;

    #[test]
    fn millis_since_is_signed() {
        let t = Timestamp::from_millis(1_000);
        assert_eq!(t.millis_since(Timestamp::from_millis(400)), Some(600));
        assert_eq!(Timestamp::from_millis(400).millis_since(t), Some(-600));
    }

    #[test]
    fn millis_since_is_none_when_the_distance_overflows() {
        let latest = Timestamp::from_millis(i64::MAX);
        let earliest = Timestamp::from_millis(i64::MIN);

        assert_eq!(latest.millis_since(earliest), None);
        assert_eq!(earliest.millis_since(latest), None);
        assert_eq!(latest.millis_since(Timestamp::from_millis(0)), Some(i64::MAX));
    }
}
