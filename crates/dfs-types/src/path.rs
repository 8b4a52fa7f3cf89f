//! Canonical namespace paths.
//!
//! A canonical path is absolute, slash-separated, has no empty, `.` or `..`
//! segments, no trailing slash (except the root `/`), and no `,` (the
//! `FileInfo` encoding is comma-delimited).

use crate::error::TypeError;

/// The namespace root.
pub const ROOT: &str = "/";

fn invalid(path: &str, reason: &'static str) -> TypeError {
    TypeError::InvalidPath {
        path: path.to_string(),
        reason,
    }
}

/// Check that `path` is canonical.
pub fn validate(path: &str) -> Result<(), TypeError> {
    if path == ROOT {
        return Ok(());
    }
    if !path.starts_with('/') {
        return Err(invalid(path, "must be absolute"));
    }
    if path.ends_with('/') {
        return Err(invalid(path, "trailing slash"));
    }
    if path.contains(',') {
        return Err(invalid(path, "contains ','"));
    }
    for segment in path[1..].split('/') {
        match segment {
            "" => return Err(invalid(path, "empty segment")),
            "." | ".." => return Err(invalid(path, "relative segment")),
            s if s.chars().any(char::is_control) => {
                return Err(invalid(path, "control character"))
            }
            _ => {}
        }
    }
    Ok(())
}

/// Collapse repeated and trailing slashes, then validate.
///
/// `"//a///b/"` becomes `"/a/b"`. Relative paths are rejected; resolving
/// them against a working directory is the caller's business.
pub fn normalize(raw: &str) -> Result<String, TypeError> {
    let raw = raw.trim();
    if !raw.starts_with('/') {
        return Err(invalid(raw, "must be absolute"));
    }
    let segments: Vec<&str> = raw.split('/').filter(|s| !s.is_empty()).collect();
    let normalized = if segments.is_empty() {
        ROOT.to_string()
    } else {
        format!("/{}", segments.join("/"))
    };
    validate(&normalized)?;
    Ok(normalized)
}

/// Parent of a canonical path; `None` for the root.
pub fn parent(path: &str) -> Option<&str> {
    if path == ROOT {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ROOT),
        Some(i) => Some(&path[..i]),
        None => Some(ROOT),
    }
}

/// Last segment of a canonical path; the root's name is `/`.
pub fn file_name(path: &str) -> &str {
    if path == ROOT {
        return ROOT;
    }
    match path.rfind('/') {
        Some(i) => &path[i + 1..],
        None => path,
    }
}

/// Proper ancestors of `path`, outermost first, excluding the root.
///
/// `"/a/b/c"` yields `["/a", "/a/b"]`.
pub fn ancestors(path: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut cursor = path;
    while let Some(p) = parent(cursor) {
        if p == ROOT {
            break;
        }
        out.push(p);
        cursor = p;
    }
    out.reverse();
    out
}

/// Join a directory path and a child name.
pub fn join(dir: &str, name: &str) -> String {
    if dir == ROOT {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// `true` if `path` equals `dir` or lies underneath it.
pub fn is_within(path: &str, dir: &str) -> bool {
    if dir == ROOT {
        return true;
    }
    path == dir
        || (path.len() > dir.len() && path.starts_with(dir) && path.as_bytes()[dir.len()] == b'/')
}

/// Move `path` from under `from` to under `to`.
///
/// The caller guarantees `is_within(path, from)`.
pub fn rebase(path: &str, from: &str, to: &str) -> String {
    if path == from {
        return to.to_string();
    }
    let rest = if from == ROOT { &path[1..] } else { &path[from.len() + 1..] };
    join(to, rest)
}
