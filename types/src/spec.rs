//! Poll specifications: what content range a poll covers and under which
//! protocol parameters.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::AuId;

/// The only protocol version this implementation speaks.
pub const V3_PROTOCOL: u32 = 3;

/// Kind of poll. Polls of different kinds over the same content never conflict.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollType {
    /// Compare content digests of a URL range.
    Content,
    /// Compare the set of names (URLs) under a root.
    Name,
    /// Confirm a previous poll's outcome.
    Verify,
}

impl fmt::Display for PollType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PollType::Content => "content",
            PollType::Name => "name",
            PollType::Verify => "verify",
        };
        f.write_str(name)
    }
}

/// The content range plus protocol parameters a poll covers.
///
/// The range is the cached URL set rooted at `url`, optionally narrowed to
/// the sub-names between `lower` and `upper` (inclusive). A missing bound is
/// open on that side. Immutable once a poll has been created from it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PollSpec {
    pub au_id: AuId,
    pub plugin_version: String,
    pub url: String,
    #[serde(default)]
    pub lower: Option<String>,
    #[serde(default)]
    pub upper: Option<String>,
    pub poll_type: PollType,
    pub protocol_version: u32,
}

impl PollSpec {
    /// An unbounded V3 content poll over `url` in the given AU.
    pub fn content(au_id: AuId, url: impl Into<String>) -> Self {
        Self {
            au_id,
            plugin_version: "1".to_string(),
            url: url.into(),
            lower: None,
            upper: None,
            poll_type: PollType::Content,
            protocol_version: V3_PROTOCOL,
        }
    }

    pub fn with_type(mut self, poll_type: PollType) -> Self {
        self.poll_type = poll_type;
        self
    }

    pub fn with_range(mut self, lower: Option<String>, upper: Option<String>) -> Self {
        self.lower = lower;
        self.upper = upper;
        self
    }

    /// The root URL with any trailing `/` removed.
    pub fn normalized_root(&self) -> &str {
        let trimmed = self.url.trim_end_matches('/');
        if trimmed.is_empty() {
            &self.url
        } else {
            trimmed
        }
    }

    /// Whether both specs address the same root in the same AU.
    pub fn same_root(&self, other: &PollSpec) -> bool {
        self.au_id == other.au_id && self.normalized_root() == other.normalized_root()
    }

    /// Whether the `[lower, upper]` ranges of two specs intersect.
    pub fn range_overlaps(&self, other: &PollSpec) -> bool {
        // Each side must start no later than the other side ends.
        starts_before_end(self.lower.as_deref(), other.upper.as_deref())
            && starts_before_end(other.lower.as_deref(), self.upper.as_deref())
    }

    /// Whether a poll over `other` must not run concurrently with one over `self`.
    pub fn conflicts_with(&self, other: &PollSpec) -> bool {
        self.poll_type == other.poll_type && self.same_root(other) && self.range_overlaps(other)
    }

    /// Whether `url` lies inside this spec's range.
    pub fn contains_url(&self, url: &str) -> bool {
        let root = self.normalized_root();
        if !url.starts_with(root) {
            return false;
        }
        let lower_ok = self.lower.as_deref().map_or(true, |l| url >= l);
        let upper_ok = self.upper.as_deref().map_or(true, |u| url <= u);
        lower_ok && upper_ok
    }
}

fn starts_before_end(lower: Option<&str>, upper: Option<&str>) -> bool {
    match (lower, upper) {
        (Some(l), Some(u)) => l.cmp(u) != Ordering::Greater,
        _ => true,
    }
}

impl fmt::Display for PollSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} poll on {} [{}", self.poll_type, self.au_id, self.url)?;
        if self.lower.is_some() || self.upper.is_some() {
            write!(
                f,
                " {}..{}",
                self.lower.as_deref().unwrap_or(""),
                self.upper.as_deref().unwrap_or("")
            )?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn au(id: &str) -> AuId {
        AuId::new(id).unwrap()
    }

    fn ranged(url: &str, lower: Option<&str>, upper: Option<&str>) -> PollSpec {
        PollSpec::content(au("au"), url)
            .with_range(lower.map(String::from), upper.map(String::from))
    }

    #[test]
    fn root_comparison_ignores_trailing_slash() {
        let a = PollSpec::content(au("au"), "http://example.com/journal/");
        let b = PollSpec::content(au("au"), "http://example.com/journal");
        assert!(a.same_root(&b));
        assert!(a.conflicts_with(&b));
    }

    #[test]
    fn different_types_never_conflict() {
        let content = PollSpec::content(au("au"), "http://example.com/");
        let name = content.clone().with_type(PollType::Name);
        assert!(content.same_root(&name));
        assert!(!content.conflicts_with(&name));
    }

    #[test]
    fn different_roots_do_not_conflict() {
        let a = PollSpec::content(au("au"), "http://example.com/a");
        let b = PollSpec::content(au("au"), "http://example.com/b");
        assert!(!a.conflicts_with(&b));
    }

    #[test]
    fn different_aus_do_not_conflict() {
        let a = PollSpec::content(au("au1"), "http://example.com/");
        let b = PollSpec::content(au("au2"), "http://example.com/");
        assert!(!a.conflicts_with(&b));
    }

    #[test]
    fn disjoint_ranges_do_not_conflict() {
        let a = ranged("http://x/", Some("http://x/a"), Some("http://x/f"));
        let b = ranged("http://x/", Some("http://x/g"), Some("http://x/z"));
        assert!(!a.range_overlaps(&b));
        assert!(!a.conflicts_with(&b));
    }

    #[test]
    fn unbounded_range_overlaps_everything() {
        let whole = ranged("http://x/", None, None);
        let part = ranged("http://x/", Some("http://x/m"), Some("http://x/n"));
        assert!(whole.conflicts_with(&part));
        assert!(part.conflicts_with(&whole));
    }

    #[test]
    fn touching_ranges_overlap() {
        let a = ranged("http://x/", Some("http://x/a"), Some("http://x/m"));
        let b = ranged("http://x/", Some("http://x/m"), None);
        assert!(a.range_overlaps(&b));
    }

    #[test]
    fn contains_url_respects_root_and_bounds() {
        let spec = ranged("http://x/", Some("http://x/b"), Some("http://x/d"));
        assert!(spec.contains_url("http://x/c"));
        assert!(!spec.contains_url("http://x/a"));
        assert!(!spec.contains_url("http://y/c"));
    }
}
