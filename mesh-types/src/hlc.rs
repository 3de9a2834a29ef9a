//! Hybrid logical clock timestamps.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A hybrid logical clock timestamp.
///
/// Totally ordered lexicographically over `(wall_time, logical, node_id)`.
/// `wall_time` is a monotonically non-decreasing physical-time proxy in
/// milliseconds, `logical` breaks ties within one millisecond, and the
/// node id is the final tie-breaker. The derived `Ord` relies on the
/// field order, so it must not be rearranged.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HlcTimestamp {
    /// Physical-time component in milliseconds.
    pub wall_time: u64,
    /// Logical counter for events within the same millisecond.
    pub logical: u32,
    /// Identifier of the node that produced this timestamp.
    pub node_id: String,
}

impl HlcTimestamp {
    /// Create a timestamp from its three components.
    pub fn new(wall_time: u64, logical: u32, node_id: impl Into<String>) -> Self {
        Self {
            wall_time,
            logical,
            node_id: node_id.into(),
        }
    }

    /// The smallest possible timestamp, used as the "sync from the
    /// beginning" marker and as the latest timestamp of an empty store.
    pub fn zero() -> Self {
        Self {
            wall_time: 0,
            logical: 0,
            node_id: String::new(),
        }
    }

    /// True for the zero timestamp.
    pub fn is_zero(&self) -> bool {
        self.wall_time == 0 && self.logical == 0 && self.node_id.is_empty()
    }
}

impl fmt::Display for HlcTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.wall_time, self.logical, self.node_id)
    }
}

impl FromStr for HlcTimestamp {
    type Err = TimestampParseError;

    /// Parse the `wall-logical-node` text form.
    ///
    /// The node id may itself contain `-`, so it is everything after the
    /// second hyphen.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '-');
        let wall = parts
            .next()
            .ok_or_else(|| TimestampParseError::new(s))?
            .parse::<u64>()
            .map_err(|_| TimestampParseError::new(s))?;
        let logical = parts
            .next()
            .ok_or_else(|| TimestampParseError::new(s))?
            .parse::<u32>()
            .map_err(|_| TimestampParseError::new(s))?;
        let node_id = parts.next().unwrap_or("");
        Ok(Self::new(wall, logical, node_id))
    }
}

/// Failure to parse the textual timestamp form.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid timestamp: {input:?}")]
pub struct TimestampParseError {
    /// The rejected input.
    pub input: String,
}

impl TimestampParseError {
    fn new(input: &str) -> Self {
        Self {
            input: input.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;

    #[test]
    fn ordering_is_lexicographic() {
        let a = HlcTimestamp::new(10, 0, "a");
        let b = HlcTimestamp::new(10, 1, "a");
        let c = HlcTimestamp::new(11, 0, "a");
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn node_id_breaks_final_ties() {
        let a = HlcTimestamp::new(10, 5, "node-a");
        let b = HlcTimestamp::new(10, 5, "node-b");
        assert!(a < b);
        assert_eq!(a.cmp(&a), Ordering::Equal);
    }

    #[test]
    fn comparison_is_antisymmetric() {
        let pairs = [
            (HlcTimestamp::new(1, 0, "x"), HlcTimestamp::new(2, 0, "x")),
            (HlcTimestamp::new(5, 1, "x"), HlcTimestamp::new(5, 2, "x")),
            (HlcTimestamp::new(5, 1, "a"), HlcTimestamp::new(5, 1, "b")),
        ];
        for (a, b) in pairs {
            assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
        }
    }

    #[test]
    fn display_roundtrip() {
        let ts = HlcTimestamp::new(1705000000123, 7, "node-1");
        let parsed: HlcTimestamp = ts.to_string().parse().unwrap();
        assert_eq!(parsed, ts);
    }

    #[test]
    fn node_id_with_hyphens_survives_parsing() {
        let ts = HlcTimestamp::new(42, 0, "desk-top-node");
        let parsed: HlcTimestamp = ts.to_string().parse().unwrap();
        assert_eq!(parsed.node_id, "desk-top-node");
    }

    #[test]
    fn parse_rejects_short_input() {
        assert!("100".parse::<HlcTimestamp>().is_err());
        assert!("".parse::<HlcTimestamp>().is_err());
        assert!("abc-0-x".parse::<HlcTimestamp>().is_err());
    }

    #[test]
    fn empty_node_id_parses() {
        // The zero stamp serializes as "0-0-" and must survive the trip.
        let parsed: HlcTimestamp = HlcTimestamp::zero().to_string().parse().unwrap();
        assert!(parsed.is_zero());
    }

    #[test]
    fn zero_sorts_before_everything() {
        let zero = HlcTimestamp::zero();
        assert!(zero < HlcTimestamp::new(0, 0, "a"));
        assert!(zero < HlcTimestamp::new(0, 1, ""));
        assert!(zero < HlcTimestamp::new(1, 0, ""));
    }
}
