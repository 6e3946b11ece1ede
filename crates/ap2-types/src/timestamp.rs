use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::ops::Add;
use std::time::{SystemTime, SystemTimeError};

/// A Unix timestamp represented as a `u64`, used for JWT `iat`/`exp`/`nbf`
/// claims and signature freshness windows.
///
/// Serialized as a JSON number, matching the registered JWT claim format.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Ord, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnixTimestamp(pub u64);

impl UnixTimestamp {
    pub fn try_now() -> Result<Self, SystemTimeError> {
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)?
            .as_secs();
        Ok(Self(now))
    }

    pub fn seconds_since_epoch(&self) -> u64 {
        self.0
    }

    /// Whether `self` lies within `tolerance_secs` of `other`, in either
    /// direction. Used for A2A envelope and JWT freshness checks.
    pub fn within_tolerance(&self, other: UnixTimestamp, tolerance_secs: u64) -> bool {
        self.0.abs_diff(other.0) <= tolerance_secs
    }
}

impl From<chrono::DateTime<chrono::Utc>> for UnixTimestamp {
    fn from(value: chrono::DateTime<chrono::Utc>) -> Self {
        UnixTimestamp(value.timestamp().max(0) as u64)
    }
}

impl Display for UnixTimestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add<u64> for UnixTimestamp {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        UnixTimestamp(self.0 + rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_as_number() {
        let ts = UnixTimestamp(1_700_000_000);
        assert_eq!(serde_json::to_string(&ts).unwrap(), "1700000000");
    }

    #[test]
    fn test_within_tolerance_is_symmetric() {
        let a = UnixTimestamp(1000);
        let b = UnixTimestamp(1299);
        assert!(a.within_tolerance(b, 300));
        assert!(b.within_tolerance(a, 300));
        assert!(!a.within_tolerance(UnixTimestamp(1301), 300));
    }
}
