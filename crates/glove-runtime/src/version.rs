use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VersionError {
    #[error("invalid version format: {0}")]
    InvalidFormat(String),
}

/// Build version in the format `<MAJOR>.<MINOR>.<PATCH><SUFFIX>` where the
/// suffix is an arbitrary string, e.g. `0.20.2-186-g21514d8c`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub suffix: String,
}

impl fmt::Display for Version {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "{}.{}.{}{}",
            self.major, self.minor, self.patch, self.suffix
        )
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || VersionError::InvalidFormat(value.to_string());

        let (major, rest) = take_number(value).ok_or_else(invalid)?;
        let rest = rest.strip_prefix('.').ok_or_else(invalid)?;
        let (minor, rest) = take_number(rest).ok_or_else(invalid)?;
        let rest = rest.strip_prefix('.').ok_or_else(invalid)?;
        let (patch, rest) = take_number(rest).ok_or_else(invalid)?;

        // the suffix must follow the patch number immediately and stops at
        // the first whitespace
        let suffix: String = rest
            .chars()
            .take_while(|character| !character.is_whitespace())
            .collect();

        Ok(Version {
            major,
            minor,
            patch,
            suffix,
        })
    }
}

impl Version {
    /// Version of this build, parsed from the crate metadata.
    pub fn current() -> Version {
        env!("CARGO_PKG_VERSION").parse().unwrap_or_default()
    }
}

fn take_number(value: &str) -> Option<(u32, &str)> {
    let digits = value
        .find(|character: char| !character.is_ascii_digit())
        .unwrap_or(value.len());
    if digits == 0 {
        return None;
    }
    let number = value[..digits].parse().ok()?;
    Some((number, &value[digits..]))
}

/// Metadata describing the build that produced this binary. The VCS fields
/// are injected at compile time through `GLOVE_*` environment variables and
/// stay empty for local builds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInfo {
    pub version: Version,
    pub build_time: String,
    pub environment: String,
    pub branch: String,
    pub commit_hash: String,
    pub os: String,
    pub arch: String,
}

impl BuildInfo {
    pub fn current() -> BuildInfo {
        BuildInfo {
            version: Version::current(),
            build_time: option_env!("GLOVE_BUILD_TIME").unwrap_or_default().to_string(),
            environment: option_env!("GLOVE_ENVIRONMENT")
                .unwrap_or_default()
                .to_string(),
            branch: option_env!("GLOVE_BRANCH").unwrap_or_default().to_string(),
            commit_hash: option_env!("GLOVE_COMMIT_HASH")
                .unwrap_or_default()
                .to_string(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }
}
