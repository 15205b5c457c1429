//! String helpers for paths and URLs shared by every backend.
//!
//! Paths travel through the engine as strings because a location may be a
//! local path (`/home/u/a`), a trash URL (`trash:///a`) or a share URL
//! (`smb://host/share/a`). These helpers treat all three uniformly.

/// Separator between a URL scheme and the rest of the URL.
pub const URL_INDICATOR: &str = "://";

/// Splits `scheme://rest` into `("scheme", "rest")`.
pub fn split_scheme(url: &str) -> Option<(&str, &str)> {
    let index = url.find(URL_INDICATOR)?;
    let scheme = &url[..index];
    if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some((scheme, &url[index + URL_INDICATOR.len()..]))
}

/// Collapses repeated slashes and drops a trailing slash.
///
/// The `scheme://` prefix is preserved, and so is a single leading slash
/// after it (`trash:///a` stays rooted at `trash:///`).
pub fn remove_extra_slashes(path: &str) -> String {
    let (prefix, rest) = match split_scheme(path) {
        Some((scheme, rest)) => (format!("{scheme}{URL_INDICATOR}"), rest),
        None => (String::new(), path),
    };

    let mut out = String::with_capacity(rest.len());
    let mut last_was_slash = false;
    for c in rest.chars() {
        if c == '/' {
            if !last_was_slash {
                out.push(c);
            }
            last_was_slash = true;
        } else {
            out.push(c);
            last_was_slash = false;
        }
    }
    if out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    format!("{prefix}{out}")
}

/// Returns `true` for `/`, `scheme://` and `scheme:///`.
pub fn is_root(path: &str) -> bool {
    match split_scheme(path) {
        Some((_, rest)) => rest.is_empty() || rest == "/",
        None => path == "/",
    }
}

/// Returns `true` when `path` is a URL or starts at `/`.
pub fn is_absolute(path: &str) -> bool {
    path.starts_with('/') || split_scheme(path).is_some()
}

/// Appends `name` to `dir` with exactly one separator.
pub fn join(dir: &str, name: &str) -> String {
    let name = name.trim_start_matches('/');
    if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Returns the parent of `path`, or `None` for a root.
pub fn parent(path: &str) -> Option<String> {
    let path = remove_extra_slashes(path);
    if is_root(&path) {
        return None;
    }
    match split_scheme(&path) {
        Some((scheme, rest)) => {
            let parent = match rest.rfind('/') {
                None => String::new(),
                Some(0) => "/".to_string(),
                Some(index) => rest[..index].to_string(),
            };
            Some(format!("{scheme}{URL_INDICATOR}{parent}"))
        }
        None => match path.rfind('/') {
            Some(0) => Some("/".to_string()),
            Some(index) => Some(path[..index].to_string()),
            None => None,
        },
    }
}

/// Returns the last component of `path` (empty for roots).
pub fn file_name(path: &str) -> &str {
    if is_root(path) {
        return "";
    }
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(index) => &trimmed[index + 1..],
        None => match split_scheme(trimmed) {
            Some((_, rest)) => rest,
            None => trimmed,
        },
    }
}

/// Returns `true` if `path` equals `ancestor` or lives below it.
pub fn is_inside(path: &str, ancestor: &str) -> bool {
    let path = remove_extra_slashes(path);
    let ancestor = remove_extra_slashes(ancestor);
    if path == ancestor {
        return true;
    }
    if ancestor.ends_with('/') {
        path.starts_with(&ancestor)
    } else {
        path.starts_with(&format!("{ancestor}/"))
    }
}

/// Rewrites `path`, which lives below `from`, so that it lives below `to`.
pub fn rebase(path: &str, from: &str, to: &str) -> String {
    let suffix = path.strip_prefix(from).unwrap_or(path);
    if suffix.is_empty() {
        to.to_string()
    } else {
        join(to, suffix)
    }
}
