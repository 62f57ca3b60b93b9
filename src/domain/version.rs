use crate::error::{Result, VerstampError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A stamped version: four non-negative octets.
///
/// The `hotfix` octet is display-suppressed while it is 0, so `1.2.3` and
/// `1.2.3.0` denote the same version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VersionNumber {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub hotfix: u32,
}

/// Which octet a stamp advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseMode {
    Major,
    Minor,
    Patch,
    Hotfix,
}

impl ReleaseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseMode::Major => "major",
            ReleaseMode::Minor => "minor",
            ReleaseMode::Patch => "patch",
            ReleaseMode::Hotfix => "hotfix",
        }
    }
}

impl FromStr for ReleaseMode {
    type Err = VerstampError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "major" => Ok(ReleaseMode::Major),
            "minor" => Ok(ReleaseMode::Minor),
            "patch" => Ok(ReleaseMode::Patch),
            "hotfix" => Ok(ReleaseMode::Hotfix),
            other => Err(VerstampError::version(format!(
                "Invalid release mode: '{}' - expected major|minor|patch|hotfix",
                other
            ))),
        }
    }
}

impl fmt::Display for ReleaseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl VersionNumber {
    pub fn new(major: u32, minor: u32, patch: u32, hotfix: u32) -> Self {
        VersionNumber {
            major,
            minor,
            patch,
            hotfix,
        }
    }

    /// Parse a version from `X.Y.Z` or `X.Y.Z.H`.
    pub fn parse(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() != 3 && parts.len() != 4 {
            return Err(VerstampError::version(format!(
                "Invalid version format: '{}' - expected X.Y.Z or X.Y.Z.H",
                s
            )));
        }

        let mut octets = [0u32; 4];
        for (i, part) in parts.iter().enumerate() {
            octets[i] = part.parse::<u32>().map_err(|_| {
                VerstampError::version(format!("Invalid version octet: '{}' in '{}'", part, s))
            })?;
        }

        Ok(VersionNumber {
            major: octets[0],
            minor: octets[1],
            patch: octets[2],
            hotfix: octets[3],
        })
    }

    /// The value of the octet selected by `mode`.
    pub fn octet(&self, mode: ReleaseMode) -> u32 {
        match mode {
            ReleaseMode::Major => self.major,
            ReleaseMode::Minor => self.minor,
            ReleaseMode::Patch => self.patch,
            ReleaseMode::Hotfix => self.hotfix,
        }
    }

    /// Advance exactly one octet and zero all octets to its right.
    ///
    /// `ledger_max` is the highest value of the advanced octet among ledger
    /// tags that share the new version's coarser prefix, injected by the
    /// caller. The advanced octet must clear both the local value and every
    /// published allocation, so it becomes `max(local, ledger_max) + 1`. This
    /// keeps two independently-advancing clones from allocating the same
    /// number and makes a post-race retry strictly higher than the remote
    /// maximum.
    pub fn advance(&self, mode: ReleaseMode, ledger_max: Option<u32>) -> VersionNumber {
        let bumped = |local: u32| -> u32 {
            match ledger_max {
                Some(seen) => local.max(seen) + 1,
                None => local + 1,
            }
        };

        match mode {
            ReleaseMode::Major => VersionNumber::new(bumped(self.major), 0, 0, 0),
            ReleaseMode::Minor => VersionNumber::new(self.major, bumped(self.minor), 0, 0),
            ReleaseMode::Patch => VersionNumber::new(self.major, self.minor, bumped(self.patch), 0),
            ReleaseMode::Hotfix => {
                VersionNumber::new(self.major, self.minor, self.patch, bumped(self.hotfix))
            }
        }
    }

    /// Render the version; the hotfix octet is elided when 0 unless
    /// `show_hotfix` forces it.
    pub fn format(&self, show_hotfix: bool) -> String {
        if self.hotfix != 0 || show_hotfix {
            format!(
                "{}.{}.{}.{}",
                self.major, self.minor, self.patch, self.hotfix
            )
        } else {
            format!("{}.{}.{}", self.major, self.minor, self.patch)
        }
    }

    /// True when `other` shares every octet above `mode` with `self`.
    ///
    /// Used by the ledger max-scan to select the tags competing for the same
    /// octet allocation.
    pub fn shares_prefix_above(&self, other: &VersionNumber, mode: ReleaseMode) -> bool {
        match mode {
            ReleaseMode::Major => true,
            ReleaseMode::Minor => self.major == other.major,
            ReleaseMode::Patch => self.major == other.major && self.minor == other.minor,
            ReleaseMode::Hotfix => {
                self.major == other.major && self.minor == other.minor && self.patch == other.patch
            }
        }
    }
}

impl fmt::Display for VersionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_three_octets() {
        let v = VersionNumber::parse("1.2.3").unwrap();
        assert_eq!(v, VersionNumber::new(1, 2, 3, 0));
    }

    #[test]
    fn test_parse_four_octets() {
        let v = VersionNumber::parse("1.2.3.4").unwrap();
        assert_eq!(v, VersionNumber::new(1, 2, 3, 4));
    }

    #[test]
    fn test_parse_invalid() {
        assert!(VersionNumber::parse("1.2").is_err());
        assert!(VersionNumber::parse("1.2.3.4.5").is_err());
        assert!(VersionNumber::parse("1.x.3").is_err());
        assert!(VersionNumber::parse("").is_err());
    }

    #[test]
    fn test_advance_zeroes_lower_octets() {
        let v = VersionNumber::new(1, 2, 3, 4);
        assert_eq!(
            v.advance(ReleaseMode::Major, None),
            VersionNumber::new(2, 0, 0, 0)
        );
        assert_eq!(
            v.advance(ReleaseMode::Minor, None),
            VersionNumber::new(1, 3, 0, 0)
        );
        assert_eq!(
            v.advance(ReleaseMode::Patch, None),
            VersionNumber::new(1, 2, 4, 0)
        );
        assert_eq!(
            v.advance(ReleaseMode::Hotfix, None),
            VersionNumber::new(1, 2, 3, 5)
        );
    }

    #[test]
    fn test_advance_clears_ledger_max() {
        // A sibling clone already published 1.5.0; minor-advancing from a
        // stale local 1.2.3 must land above it, not on it.
        let v = VersionNumber::new(1, 2, 3, 0);
        assert_eq!(
            v.advance(ReleaseMode::Minor, Some(5)),
            VersionNumber::new(1, 6, 0, 0)
        );
        // When the local value is the ledger max (the common pulled-up
        // case), the result is a plain increment.
        assert_eq!(
            v.advance(ReleaseMode::Minor, Some(2)),
            VersionNumber::new(1, 3, 0, 0)
        );
    }

    #[test]
    fn test_advance_strictly_greater_in_affected_octet() {
        let v = VersionNumber::new(0, 0, 0, 0);
        for mode in [
            ReleaseMode::Major,
            ReleaseMode::Minor,
            ReleaseMode::Patch,
            ReleaseMode::Hotfix,
        ] {
            let next = v.advance(mode, None);
            assert!(next.octet(mode) > v.octet(mode));
        }
    }

    #[test]
    fn test_display_suppresses_zero_hotfix() {
        assert_eq!(VersionNumber::new(1, 2, 3, 0).to_string(), "1.2.3");
        assert_eq!(VersionNumber::new(1, 2, 3, 1).to_string(), "1.2.3.1");
        assert_eq!(VersionNumber::new(1, 2, 3, 0).format(true), "1.2.3.0");
    }

    #[test]
    fn test_shares_prefix_above() {
        let a = VersionNumber::new(1, 2, 3, 0);
        let b = VersionNumber::new(1, 2, 9, 0);
        assert!(a.shares_prefix_above(&b, ReleaseMode::Patch));
        assert!(!a.shares_prefix_above(&b, ReleaseMode::Hotfix));
        assert!(a.shares_prefix_above(&VersionNumber::new(9, 9, 9, 9), ReleaseMode::Major));
    }

    #[test]
    fn test_release_mode_parse() {
        assert_eq!("patch".parse::<ReleaseMode>().unwrap(), ReleaseMode::Patch);
        assert_eq!("MAJOR".parse::<ReleaseMode>().unwrap(), ReleaseMode::Major);
        assert!("mega".parse::<ReleaseMode>().is_err());
    }
}
