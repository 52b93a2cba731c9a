//! spatch version detection.
//!
//! The spelling of the regexp-equality operator in semantic patches changed
//! across coccinelle releases, so the template compiler needs to know which
//! engine it is driving. The engine is asked once per run (`spatch -version`)
//! and the answer is threaded explicitly into the compiler; it is never
//! global state.

use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;
use std::process::Command;
use tracing::debug;

use crate::errors::{GrepError, GrepResult};

/// Pattern the `-version` banner is scanned for, e.g.
/// `spatch version 1.0.8 with Python support ...`
static VERSION_BANNER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"version (\S+) with").expect("version banner pattern is valid"));

static VERSION_FIELDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d+)\.(\d+)(?:\.(\d+))?(?:-rc(\d+))?").expect("version pattern is valid")
});

/// Coccinelle switched the regexp-equality operator from `~=` to `=~` here.
const OPERATOR_CHANGE: SpatchVersion = SpatchVersion {
    major: 1,
    minor: 0,
    patch: 0,
    rc: Some(12),
};

/// A parsed coccinelle version, ordered the way releases are
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpatchVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    /// Release-candidate number; `None` is the final release and sorts after
    /// every candidate of the same version
    pub rc: Option<u32>,
}

impl SpatchVersion {
    /// Parses a version string such as `1.0.0-rc12` or `1.0.8`
    pub fn parse(text: &str) -> GrepResult<Self> {
        let caps = VERSION_FIELDS.captures(text).ok_or_else(|| {
            GrepError::config(format!("unable to parse spatch version '{}'", text))
        })?;
        let field = |i: usize| {
            caps.get(i)
                .map(|m| m.as_str().parse::<u32>().unwrap_or(0))
                .unwrap_or(0)
        };
        Ok(Self {
            major: field(1),
            minor: field(2),
            patch: field(3),
            rc: caps.get(4).map(|m| m.as_str().parse().unwrap_or(0)),
        })
    }

    /// The regexp-equality operator spelling this engine expects
    pub fn regexp_operator(&self) -> &'static str {
        if *self < OPERATOR_CHANGE {
            "~="
        } else {
            "=~"
        }
    }
}

impl Ord for SpatchVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let release = (self.major, self.minor, self.patch).cmp(&(
            other.major,
            other.minor,
            other.patch,
        ));
        if release != Ordering::Equal {
            return release;
        }
        match (self.rc, other.rc) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => a.cmp(&b),
        }
    }
}

impl PartialOrd for SpatchVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SpatchVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(rc) = self.rc {
            write!(f, "-rc{}", rc)?;
        }
        Ok(())
    }
}

/// Queries the installed engine for its version.
///
/// Both a missing engine and an unrecognizable banner are configuration
/// errors: the engine is absent or misconfigured either way.
pub fn detect(spatch_cmd: &str) -> GrepResult<SpatchVersion> {
    let output = Command::new(spatch_cmd)
        .arg("-version")
        .output()
        .map_err(|e| {
            GrepError::config(format!(
                "unable to run spatch command '{}': {}",
                spatch_cmd, e
            ))
        })?;

    // Depending on the release the banner goes to stdout or stderr
    let mut banner = String::from_utf8_lossy(&output.stdout).into_owned();
    banner.push_str(&String::from_utf8_lossy(&output.stderr));

    let version = scan_banner(&banner).ok_or_else(|| {
        GrepError::config(format!(
            "'{} -version' did not report a recognizable version",
            spatch_cmd
        ))
    })?;
    debug!("Detected spatch version {}", version);
    Ok(version)
}

/// Extracts the version from a `-version` banner, if one is present
pub(crate) fn scan_banner(banner: &str) -> Option<SpatchVersion> {
    let caps = VERSION_BANNER.captures(banner)?;
    SpatchVersion::parse(&caps[1]).ok()
}
