//! Dotted numeric versions as reported by the control plane.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::error::ClientError;

/// A `major.minor.patch.build` version. Missing components compare as zero,
/// so `1.2` equals `1.2.0.0`.
#[derive(Debug, Clone, Copy, Default, Eq)]
pub struct Version {
    parts: [u64; 4],
    len: usize,
}

impl Version {
    pub const fn new(major: u64, minor: u64, patch: u64, build: u64) -> Self {
        Self {
            parts: [major, minor, patch, build],
            len: 4,
        }
    }

    /// Version of this binary.
    pub fn current() -> Self {
        env!("CARGO_PKG_VERSION")
            .parse()
            .unwrap_or_default()
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.parts == other.parts
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parts.cmp(&other.parts)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::hash::Hash for Version {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.parts.hash(state);
    }
}

impl FromStr for Version {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_matches('"');
        let trimmed = trimmed.strip_prefix(['v', 'V']).unwrap_or(trimmed);
        // Drop pre-release/build metadata such as "-beta" or "+sha".
        let core = trimmed
            .split(['-', '+', ' '])
            .next()
            .unwrap_or_default();

        if core.is_empty() {
            return Err(ClientError::decode("version", format!("empty version '{s}'")));
        }

        let mut parts = [0u64; 4];
        let mut len = 0;
        for (i, piece) in core.split('.').enumerate() {
            if i >= parts.len() {
                return Err(ClientError::decode(
                    "version",
                    format!("too many components in '{s}'"),
                ));
            }
            parts[i] = piece
                .parse()
                .map_err(|_| ClientError::decode("version", format!("invalid version '{s}'")))?;
            len = i + 1;
        }

        Ok(Self { parts, len })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self.len.max(1);
        for (i, part) in self.parts[..len].iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{part}")?;
        }
        Ok(())
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
