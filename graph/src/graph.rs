//! Location arithmetic over module and unit URLs.
//!
//! Locations are compared by scheme, host and path with trailing slashes ignored, so
//! `file:///app/lib/` and `file:///app/lib` name the same directory.

use url::Url;

fn trimmed_path(url: &Url) -> &str {
    let path = url.path();
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() { "/" } else { trimmed }
}

pub fn same_location(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme() && a.host_str() == b.host_str() && trimmed_path(a) == trimmed_path(b)
}

/// The containing directory of `url`, or `None` at the filesystem root.
pub fn parent_location(url: &Url) -> Option<Url> {
    let path = trimmed_path(url);
    if path == "/" {
        return None;
    }
    let cut = path.rfind('/')?;
    let mut parent = url.clone();
    parent.set_query(None);
    parent.set_fragment(None);
    parent.set_path(if cut == 0 { "/" } else { &path[..cut] });
    Some(parent)
}

/// `url`, then each ancestor up to and including the root.
pub fn walk_up(url: &Url) -> impl Iterator<Item = Url> {
    std::iter::successors(Some(url.clone()), parent_location)
}

/// True if `ancestor` equals `url` or is one of its ancestors.
pub fn is_within(url: &Url, ancestor: &Url) -> bool {
    walk_up(url).any(|candidate| same_location(&candidate, ancestor))
}

/// Last non-empty path segment.
pub fn file_name(url: &Url) -> Option<&str> {
    url.path_segments()?.rev().find(|seg| !seg.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn walk_up_visits_every_ancestor() {
        let visited: Vec<String> = walk_up(&url("file:///app/lib/data-unit/"))
            .map(|u| trimmed_path(&u).to_string())
            .collect();
        assert_eq!(visited, vec!["/app/lib/data-unit", "/app/lib", "/app", "/"]);
    }

    #[test]
    fn containment_ignores_trailing_slash() {
        assert!(is_within(&url("file:///app/web/"), &url("file:///app")));
        assert!(is_within(&url("file:///app/web"), &url("file:///app/web/")));
        assert!(!is_within(&url("file:///app/lib"), &url("file:///app/web")));
        assert!(!is_within(&url("file:///app/webapp"), &url("file:///app/web")));
    }

    #[test]
    fn file_name_skips_trailing_slash() {
        assert_eq!(file_name(&url("file:///repo/orders.jar")), Some("orders.jar"));
        assert_eq!(file_name(&url("file:///repo/orders/")), Some("orders"));
        assert_eq!(file_name(&url("file:///")), None);
    }
}
