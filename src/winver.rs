//! Build-number to marketing-version resolution.
//!
//! Maps raw image build numbers (as reported by image metadata) to the
//! human-facing release tag used for catalog queries and repository keys.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported OS families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OsFamily {
    Windows10,
    Windows11,
}

impl OsFamily {
    /// Directory-friendly name used as a repository key.
    pub fn key(&self) -> &'static str {
        match self {
            OsFamily::Windows10 => "w10",
            OsFamily::Windows11 => "w11",
        }
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OsFamily::Windows10 => write!(f, "Windows 10"),
            OsFamily::Windows11 => write!(f, "Windows 11"),
        }
    }
}

impl std::str::FromStr for OsFamily {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(' ', "").as_str() {
            "w10" | "win10" | "windows10" => Ok(OsFamily::Windows10),
            "w11" | "win11" | "windows11" => Ok(OsFamily::Windows11),
            other => anyhow::bail!("Unknown OS family '{other}' (expected w10 or w11)"),
        }
    }
}

/// Outcome of resolving a build string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Known build: family plus marketing tag (e.g. "22H2").
    Supported { family: OsFamily, tag: &'static str },
    /// Build from a deprecated family (Windows 7/8/8.1 era).
    Unsupported,
    /// Well-formed but not in the table.
    Unknown,
}

/// Windows 10 builds, exact prefix matches.
///
/// 19041 through 19045 share servicing and their ISO builds are inconsistent
/// across sub-releases, so the whole range maps to the current 22H2 tag.
const WINDOWS10_BUILDS: &[(&str, &str)] = &[
    ("10240", "1507"),
    ("10586", "1511"),
    ("14393", "1607"),
    ("15063", "1703"),
    ("16299", "1709"),
    ("17134", "1803"),
    ("17763", "1809"),
    ("18362", "1903"),
    ("18363", "1909"),
    ("19041", "22H2"),
    ("19042", "22H2"),
    ("19043", "22H2"),
    ("19044", "22H2"),
    ("19045", "22H2"),
];

/// Windows 11 builds, exact prefix matches.
const WINDOWS11_BUILDS: &[(&str, &str)] = &[
    ("22000", "21H2"),
    ("22621", "22H2"),
    ("22631", "23H2"),
    ("26100", "24H2"),
];

/// Builds from families no longer serviceable offline by this tool.
const DEPRECATED_BUILDS: &[&str] = &["7600", "7601", "9200", "9600"];

/// Resolve a build string to a marketing version.
///
/// Accepts `"19045"`, `"19045.3803"`, or the full `"10.0.19045.3803"` form.
pub fn resolve(build: &str) -> Resolution {
    let number = build_number(build);

    if DEPRECATED_BUILDS.contains(&number) {
        return Resolution::Unsupported;
    }

    for (prefix, tag) in WINDOWS10_BUILDS {
        if number == *prefix {
            return Resolution::Supported {
                family: OsFamily::Windows10,
                tag,
            };
        }
    }

    for (prefix, tag) in WINDOWS11_BUILDS {
        if number == *prefix {
            return Resolution::Supported {
                family: OsFamily::Windows11,
                tag,
            };
        }
    }

    Resolution::Unknown
}

/// Extract the bare build number from a version string.
fn build_number(build: &str) -> &str {
    let trimmed = build.trim();
    // Strip a leading "10.0." (full version form)
    let rest = trimmed.strip_prefix("10.0.").unwrap_or(trimmed);
    // Drop the revision suffix
    rest.split('.').next().unwrap_or(rest)
}
