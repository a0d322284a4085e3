use std::cmp::Ordering;
use std::fmt;

use regex::Regex;

lazy_static::lazy_static! {
    static ref VERSION_TAG: Regex =
        Regex::new(r"^v(\d+)\.(\d+)\.(\d+)\.(\d+)$").expect("valid regex");
}

/// Elite Insights release tag such as `v3.7.0.1`.
///
/// Ordering and equality only look at the four numbers. The tag is kept in its
/// normalized `v<major>.<minor>.<patch>.<build>` form.
#[derive(Debug, Clone)]
pub struct ToolVersion {
    tag_name: String,
    numbers: [u64; 4],
}

impl ToolVersion {
    /// Accepts `v1.2.3.4`; some releases were tagged `v.1.2.3.4`.
    pub fn parse(tag_name: &str) -> Option<Self> {
        let tag_name = tag_name.trim();
        let normalized = match tag_name.strip_prefix("v.") {
            Some(rest) => format!("v{rest}"),
            None => tag_name.to_string(),
        };

        let captures = VERSION_TAG.captures(&normalized)?;
        let mut numbers = [0; 4];
        for (index, number) in numbers.iter_mut().enumerate() {
            *number = captures.get(index + 1)?.as_str().parse().ok()?;
        }

        Some(Self {
            tag_name: normalized,
            numbers,
        })
    }

    pub fn tag_name(&self) -> &str {
        &self.tag_name
    }
}

impl fmt::Display for ToolVersion {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.tag_name)
    }
}

impl PartialEq for ToolVersion {
    fn eq(&self, other: &Self) -> bool {
        self.numbers == other.numbers
    }
}

impl Eq for ToolVersion {}

impl PartialOrd for ToolVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ToolVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.numbers.cmp(&other.numbers)
    }
}
