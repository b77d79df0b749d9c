//! Path model.
//!
//! Filesystem paths are cleaned into a canonical, slash-separated form
//! without leading or trailing separators (`docs/reports/q3.pdf`); the root
//! is the sentinel `/`. Remote names may legitimately contain `/`, so inside
//! a path such a name is written escaped (`a%2Fb`) and unescaped again
//! before it is sent to the remote store.
//!
//! # Escaping
//!
//! `%` is written as `%25` and `/` as `%2F`. Unescaping only recognises those
//! two sequences (either case), so ordinary names like `100%.txt` pass through
//! untouched.

use relative_path::{Component, RelativePath};

/// Canonical root path.
pub const ROOT: &str = "/";

const SEPARATOR: char = '/';
const ESCAPED_PERCENT: &str = "%25";
const ESCAPED_SEPARATOR: &str = "%2F";

/// One step of a path walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSegment {
    /// Canonical path from the root up to and including this segment.
    pub cumulative: String,
    /// Raw (unescaped) name of this segment.
    pub name: String,
}

/// Cleans `path` into canonical form.
///
/// Backslashes become slashes, `.` and `..` are collapsed (`..` never climbs
/// above the root), and surrounding separators are trimmed. An empty result
/// is the root.
///
/// ```
/// use drivefs_core::path::clean;
///
/// assert_eq!(clean("\\google\\test\\23\\"), "google/test/23");
/// assert_eq!(clean("/a/./b/../c/"), "a/c");
/// assert_eq!(clean("../.."), "/");
/// ```
pub fn clean(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let normalized = RelativePath::new(unified.trim_start_matches(SEPARATOR)).normalize();
    let segments: Vec<&str> = normalized
        .components()
        .filter_map(|c| match c {
            Component::Normal(name) => Some(name),
            Component::CurDir | Component::ParentDir => None,
        })
        .collect();
    if segments.is_empty() {
        ROOT.to_string()
    } else {
        segments.join("/")
    }
}

/// Returns true if `path` cleans to the root.
pub fn is_root(path: &str) -> bool {
    clean(path) == ROOT
}

/// Returns true if `path` has more than one segment, i.e. resolving it needs
/// intermediate folders.
pub fn is_multi_segment(path: &str) -> bool {
    let cleaned = clean(path);
    cleaned != ROOT && cleaned.contains(SEPARATOR)
}

/// Splits `path` into its walk, one entry per segment.
///
/// The root yields a single entry whose cumulative path and name are both
/// [`ROOT`].
///
/// ```
/// use drivefs_core::path::split;
///
/// let walk = split("docs/a%2Fb");
/// assert_eq!(walk[0].cumulative, "docs");
/// assert_eq!(walk[1].cumulative, "docs/a%2Fb");
/// assert_eq!(walk[1].name, "a/b");
/// ```
pub fn split(path: &str) -> Vec<PathSegment> {
    let cleaned = clean(path);
    if cleaned == ROOT {
        return vec![PathSegment {
            cumulative: ROOT.to_string(),
            name: ROOT.to_string(),
        }];
    }

    let mut cumulative = String::with_capacity(cleaned.len());
    cleaned
        .split(SEPARATOR)
        .map(|escaped| {
            if !cumulative.is_empty() {
                cumulative.push(SEPARATOR);
            }
            cumulative.push_str(escaped);
            PathSegment {
                cumulative: cumulative.clone(),
                name: unescape_name(escaped),
            }
        })
        .collect()
}

/// Escapes a raw name so it can be embedded as a single path segment.
pub fn escape_name(name: &str) -> String {
    name.replace('%', ESCAPED_PERCENT)
        .replace(SEPARATOR, ESCAPED_SEPARATOR)
}

/// Reverses [`escape_name`].
pub fn unescape_name(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    let mut rest = segment;
    while let Some(at) = rest.find('%') {
        out.push_str(&rest[..at]);
        let tail = &rest[at..];
        let code = tail.get(..3).map(str::to_ascii_uppercase);
        match code.as_deref() {
            Some(ESCAPED_PERCENT) => out.push('%'),
            Some(ESCAPED_SEPARATOR) => out.push(SEPARATOR),
            _ => {
                out.push('%');
                rest = &tail[1..];
                continue;
            }
        }
        rest = &tail[3..];
    }
    out.push_str(rest);
    out
}

/// Joins a canonical parent path and a raw child name.
pub fn join(parent: &str, name: &str) -> String {
    let escaped = escape_name(name);
    let parent = clean(parent);
    if parent == ROOT {
        escaped
    } else {
        format!("{parent}/{escaped}")
    }
}

/// Splits a path into its canonical parent and the raw name of its last
/// segment. Returns `None` for the root.
pub fn parent_and_name(path: &str) -> Option<(String, String)> {
    let cleaned = clean(path);
    if cleaned == ROOT {
        return None;
    }
    match cleaned.rsplit_once(SEPARATOR) {
        Some((parent, last)) => Some((parent.to_string(), unescape_name(last))),
        None => Some((ROOT.to_string(), unescape_name(&cleaned))),
    }
}

/// Prefixes a canonical path with the canonical scope of a sub view.
pub fn scoped(scope: &str, path: &str) -> String {
    match (scope == ROOT, path == ROOT) {
        (true, _) => path.to_string(),
        (false, true) => scope.to_string(),
        (false, false) => format!("{scope}/{path}"),
    }
}
