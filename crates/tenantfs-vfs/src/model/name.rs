//! Name rules: validation, path joining, conflict suffixes, normalization.

use unicode_normalization::UnicodeNormalization;

use crate::constants::MAX_NAME_LEN;
use crate::error::{VfsError, VfsResult};

/// Reject names that cannot appear as a path segment.
pub fn check_name(name: &str) -> VfsResult<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\0')
        || name.len() > MAX_NAME_LEN
    {
        return Err(VfsError::invalid_name(name));
    }
    Ok(())
}

/// Join a directory full path and a child name.
pub fn join_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Parent part of an absolute path (`/a/b` -> `/a`, `/a` -> `/`).
pub fn parent_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

/// Last segment of an absolute path.
pub fn base_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Clean an absolute path: collapse repeated separators, drop `.`, resolve
/// `..`, strip the trailing slash. Returns `None` for relative paths.
pub fn clean_path(path: &str) -> Option<String> {
    if !path.starts_with('/') {
        return None;
    }
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    Some(format!("/{}", parts.join("/")))
}

/// Split a file name into stem and extension (`photo.jpg` -> `photo`, `.jpg`).
///
/// Dotfiles without a second dot have no extension.
pub fn split_ext(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(0) | None => (name, ""),
        Some(idx) => (&name[..idx], &name[idx..]),
    }
}

/// Canonical decomposition used for encoding-insensitive matching.
pub fn normalize(name: &str) -> String {
    name.nfd().collect()
}

/// Where the conflict-name search starts for `name`.
///
/// A trailing ` (N)` is stripped and the search resumes at `N + 1`; any other
/// parenthesized suffix, like ` (copy)` or a number too large to increment,
/// is kept and `(2)` is appended.
pub(crate) struct ConflictSeed<'a> {
    pub base: &'a str,
    pub ext: &'a str,
    pub start: u64,
}

impl<'a> ConflictSeed<'a> {
    pub fn parse(name: &'a str, is_file: bool) -> Self {
        let (mut base, ext) = if is_file { split_ext(name) } else { (name, "") };
        let mut start = 2;
        if base.ends_with(')') {
            if let Some(idx) = base.rfind(" (") {
                if idx > 0 {
                    let next = base[idx + 2..base.len() - 1]
                        .parse::<u64>()
                        .ok()
                        .and_then(|n| n.checked_add(1));
                    if let Some(next) = next {
                        start = next;
                        base = &base[..idx];
                    }
                }
            }
        }
        Self { base, ext, start }
    }

    pub fn candidate(&self, index: u64) -> String {
        format!("{} ({}){}", self.base, index, self.ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_name() {
        assert!(check_name("report.pdf").is_ok());
        assert!(check_name("").is_err());
        assert!(check_name(".").is_err());
        assert!(check_name("..").is_err());
        assert!(check_name("a/b").is_err());
        assert!(check_name(&"x".repeat(256)).is_err());
    }

    #[test]
    fn test_join_and_split_paths() {
        assert_eq!(join_path("/", "a"), "/a");
        assert_eq!(join_path("/a", "b"), "/a/b");
        assert_eq!(parent_path("/a/b"), "/a");
        assert_eq!(parent_path("/a"), "/");
        assert_eq!(base_name("/a/b"), "b");
    }

    #[test]
    fn test_clean_path() {
        assert_eq!(clean_path("/a//b/./c/").as_deref(), Some("/a/b/c"));
        assert_eq!(clean_path("/a/../b").as_deref(), Some("/b"));
        assert_eq!(clean_path("/").as_deref(), Some("/"));
        assert_eq!(clean_path("a/b"), None);
    }

    #[test]
    fn test_split_ext() {
        assert_eq!(split_ext("photo.jpg"), ("photo", ".jpg"));
        assert_eq!(split_ext("archive.tar.gz"), ("archive.tar", ".gz"));
        assert_eq!(split_ext(".bashrc"), (".bashrc", ""));
        assert_eq!(split_ext("README"), ("README", ""));
    }

    #[test]
    fn test_conflict_seed() {
        let seed = ConflictSeed::parse("existing", true);
        assert_eq!(seed.candidate(seed.start), "existing (2)");

        let seed = ConflictSeed::parse("existing (3)", true);
        assert_eq!(seed.candidate(seed.start), "existing (4)");

        let seed = ConflictSeed::parse("existing (copy)", true);
        assert_eq!(seed.candidate(seed.start), "existing (copy) (2)");

        let seed = ConflictSeed::parse("photo (7).jpg", true);
        assert_eq!(seed.candidate(seed.start), "photo (8).jpg");

        let seed = ConflictSeed::parse("v1.0", false);
        assert_eq!(seed.candidate(seed.start), "v1.0 (2)");
    }

    #[test]
    fn test_conflict_seed_at_counter_limit() {
        let max = u64::MAX;
        let name = format!("x ({max})");
        let seed = ConflictSeed::parse(&name, true);
        assert_eq!(seed.start, 2);
        assert_eq!(seed.candidate(seed.start), format!("x ({max}) (2)"));

        let below = max - 1;
        let name = format!("x ({below}).txt");
        let seed = ConflictSeed::parse(&name, true);
        assert_eq!(seed.start, max);
        assert_eq!(seed.candidate(seed.start), format!("x ({max}).txt"));
    }

    #[test]
    fn test_normalize() {
        let nfc = "cha\u{00ee}ne";
        let nfd = "chai\u{0302}ne";
        assert_ne!(nfc, nfd);
        assert_eq!(normalize(nfc), normalize(nfd));
    }
}
