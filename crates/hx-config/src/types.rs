use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::de;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ---------------------------------------------------------------------------
// HumanDuration
// ---------------------------------------------------------------------------

/// A duration parsed from a human-readable string like `"250ms"`, `"30s"`,
/// `"5m"`, `"1h"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HumanDuration(Duration);

impl HumanDuration {
    pub fn as_duration(&self) -> Duration {
        self.0
    }

    pub fn as_millis(&self) -> u64 {
        self.0.as_millis() as u64
    }
}

impl From<Duration> for HumanDuration {
    fn from(d: Duration) -> Self {
        Self(d)
    }
}

impl From<HumanDuration> for Duration {
    fn from(hd: HumanDuration) -> Self {
        hd.0
    }
}

impl FromStr for HumanDuration {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let s = s.trim();
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| anyhow::anyhow!("duration {s:?} is missing a unit (ms/s/m/h)"))?;
        let (num, unit) = s.split_at(split);
        let value: u64 = num
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid number in duration {s:?}"))?;
        let millis = match unit {
            "ms" => value,
            "s" => value * 1_000,
            "m" => value * 60_000,
            "h" => value * 3_600_000,
            _ => anyhow::bail!("unsupported duration unit {unit:?} in {s:?} (expected ms/s/m/h)"),
        };
        Ok(Self(Duration::from_millis(millis)))
    }
}

impl fmt::Display for HumanDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ms = self.0.as_millis() as u64;
        if ms == 0 {
            return write!(f, "0ms");
        }
        if ms % 3_600_000 == 0 {
            write!(f, "{}h", ms / 3_600_000)
        } else if ms % 60_000 == 0 {
            write!(f, "{}m", ms / 60_000)
        } else if ms % 1_000 == 0 {
            write!(f, "{}s", ms / 1_000)
        } else {
            write!(f, "{ms}ms")
        }
    }
}

impl Serialize for HumanDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for HumanDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// ByteSize
// ---------------------------------------------------------------------------

/// A byte size parsed from a human-readable string like `"512B"`, `"64KB"`,
/// `"2MB"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteSize(usize);

impl ByteSize {
    pub fn as_bytes(&self) -> usize {
        self.0
    }
}

impl From<usize> for ByteSize {
    fn from(n: usize) -> Self {
        Self(n)
    }
}

impl FromStr for ByteSize {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let s = s.trim();
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(s.len());
        let (num, unit) = s.split_at(split);
        let value: usize = num
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid number in byte size {s:?}"))?;
        let bytes = match unit.trim() {
            "" | "B" => value,
            "KB" => value * 1024,
            "MB" => value * 1024 * 1024,
            "GB" => value * 1024 * 1024 * 1024,
            other => anyhow::bail!("unsupported byte-size unit {other:?} in {s:?}"),
        };
        Ok(Self(bytes))
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        if b > 0 && b % (1024 * 1024 * 1024) == 0 {
            write!(f, "{}GB", b / (1024 * 1024 * 1024))
        } else if b > 0 && b % (1024 * 1024) == 0 {
            write!(f, "{}MB", b / (1024 * 1024))
        } else if b > 0 && b % 1024 == 0 {
            write!(f, "{}KB", b / 1024)
        } else {
            write!(f, "{b}B")
        }
    }
}

impl Serialize for ByteSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// CacheKind
// ---------------------------------------------------------------------------

/// Base-condition cache backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    /// No caching; every event recomputes its base-condition filter.
    Noop,
    /// In-process concurrent cache with TTL + LRU eviction.
    InMem,
    /// Out-of-process backend supplied by the embedding application.
    External,
}

// ---------------------------------------------------------------------------
// SelectionStrategy
// ---------------------------------------------------------------------------

/// How raw matches are narrowed before emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Emit every match.
    AllMatches,
    /// Emit only the first match in combination-id order.
    FirstMatch,
    /// Emit only the matches tied for the highest priority.
    HighestPriority,
}

impl SelectionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionStrategy::AllMatches => "all_matches",
            SelectionStrategy::FirstMatch => "first_match",
            SelectionStrategy::HighestPriority => "highest_priority",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_roundtrip() {
        for (text, ms) in [("250ms", 250u64), ("30s", 30_000), ("5m", 300_000), ("1h", 3_600_000)] {
            let d: HumanDuration = text.parse().unwrap();
            assert_eq!(d.as_millis(), ms);
            assert_eq!(d.to_string(), text);
        }
    }

    #[test]
    fn duration_rejects_garbage() {
        assert!("".parse::<HumanDuration>().is_err());
        assert!("5".parse::<HumanDuration>().is_err());
        assert!("5w".parse::<HumanDuration>().is_err());
        assert!("ms".parse::<HumanDuration>().is_err());
    }

    #[test]
    fn byte_size_roundtrip() {
        for (text, bytes) in [("512B", 512usize), ("64KB", 65_536), ("2MB", 2 * 1024 * 1024)] {
            let b: ByteSize = text.parse().unwrap();
            assert_eq!(b.as_bytes(), bytes);
            assert_eq!(b.to_string(), text);
        }
        assert_eq!("1000".parse::<ByteSize>().unwrap().as_bytes(), 1000);
    }
}
