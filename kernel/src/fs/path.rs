//! Path handling.
//!
//! Paths are `/`-separated; a leading `/` resolves from the root
//! directory, anything else from the caller's working directory. Empty
//! components (doubled slashes, trailing slash) are skipped, and an
//! entirely empty remainder names the directory reached so far.

use crate::param::{MAX_FILENAME_LEN, MAX_PATH};

use super::FsError;

/// Validate one path component.
pub fn check_component(name: &str) -> Result<(), FsError> {
    if name.is_empty()
        || name.len() > MAX_FILENAME_LEN
        || name.contains('/')
        || name.bytes().any(|b| b == 0 || !b.is_ascii_graphic())
    {
        return Err(FsError::InvalidName);
    }
    Ok(())
}

/// Validate a whole path.
pub fn check_path(path: &str) -> Result<(), FsError> {
    if path.is_empty() || path.len() > MAX_PATH {
        return Err(FsError::InvalidName);
    }
    Ok(())
}

/// The components of `path`, in order.
pub fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|c| !c.is_empty())
}

/// Split `path` into the path of its parent directory and its final
/// component. `("", name)` means the parent is the starting directory.
pub fn split_parent(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        // Keep the slash so an absolute "/name" keeps its root prefix.
        Some(pos) => (&path[..pos + 1], &path[pos + 1..]),
        None => ("", path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_split() {
        assert_eq!(split_parent("a"), ("", "a"));
        assert_eq!(split_parent("a/b"), ("a/", "b"));
        assert_eq!(split_parent("/a"), ("/", "a"));
        assert_eq!(split_parent("/a/b/c"), ("/a/b/", "c"));
    }

    #[test]
    fn component_iteration() {
        let all: Vec<_> = components("/a//b/c/").collect();
        assert_eq!(all, ["a", "b", "c"]);
        assert_eq!(components("").count(), 0);
        assert_eq!(components("/").count(), 0);
    }

    #[test]
    fn component_validation() {
        assert!(check_component("ok.txt").is_ok());
        assert!(check_component("").is_err());
        assert!(check_component("name with space").is_err());
        assert!(check_component("waytoolongforadirent").is_err());
    }
}
