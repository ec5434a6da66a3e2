//! Typed names for the toolchain configurations under comparison.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A toolchain configuration whose build time is measured.
///
/// Every per-configuration path is derived from [`ConfigName::slug`], so no
/// caller assembles configuration file names by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigName {
    /// Plain optimized release build.
    Baseline,
    /// Profile-guided optimization with link-time optimization.
    PgoLto,
    /// Baseline binary rewritten by the post-link optimizer.
    Bolt,
    /// PGO+LTO binary rewritten by the post-link optimizer.
    PgoLtoBolt,
}

impl ConfigName {
    /// All configurations, in report order.
    pub const ALL: [Self; 4] = [Self::Baseline, Self::PgoLto, Self::Bolt, Self::PgoLtoBolt];

    /// Returns the stable file-name slug.
    #[must_use]
    pub fn slug(self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::PgoLto => "pgo-lto",
            Self::Bolt => "bolt",
            Self::PgoLtoBolt => "pgo-lto-bolt",
        }
    }

    /// Human readable label used in report lines.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::PgoLto => "PGO+LTO",
            Self::Bolt => "BOLT",
            Self::PgoLtoBolt => "PGO+LTO+BOLT",
        }
    }
}

impl fmt::Display for ConfigName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for ConfigName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.slug() == s)
            .ok_or_else(|| format!("unknown configuration '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug_round_trips_through_from_str() {
        for config in ConfigName::ALL {
            assert_eq!(config.slug().parse::<ConfigName>().unwrap(), config);
        }
        assert!("pgo".parse::<ConfigName>().is_err());
    }

    #[test]
    fn test_serde_uses_slug() {
        let json = serde_json::to_string(&ConfigName::PgoLtoBolt).unwrap();
        assert_eq!(json, r#""pgo-lto-bolt""#);
    }

    #[test]
    fn test_labels() {
        assert_eq!(ConfigName::Bolt.label(), "BOLT");
        assert_eq!(ConfigName::PgoLto.to_string(), "pgo-lto");
    }
}
