use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::TransferError;

/// Device names Windows reserves in every directory, matched case-insensitively
/// against the part of a file name before its first dot.
const RESERVED_DEVICE_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "CONIN$", "CONOUT$", "COM1", "COM2", "COM3", "COM4", "COM5",
    "COM6", "COM7", "COM8", "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7",
    "LPT8", "LPT9",
];

/// Resolves `relative_key` under `root` and checks it stays inside.
///
/// Both paths are resolved against the filesystem (every symlink followed,
/// dangling ones included, and `.` and `..` folded for the parts that do not
/// exist yet) and the result must be a strict descendant of the resolved root. Absolute keys replace
/// the root when joined and are therefore rejected as escapes.
///
/// Returns the resolved destination path.
pub fn validate_destination(root: &Path, relative_key: &str) -> Result<PathBuf, TransferError> {
    if relative_key.is_empty() {
        return Err(TransferError::InvalidPath(format!(
            "empty key under {}",
            root.display()
        )));
    }

    let candidate = root.join(relative_key);
    let resolved_root = resolve(root)?;
    let resolved = resolve(&candidate)?;

    if resolved == resolved_root || !resolved.starts_with(&resolved_root) {
        return Err(TransferError::PathEscape {
            path: candidate,
            root: root.to_path_buf(),
        });
    }

    check_reserved(&candidate)?;

    Ok(resolved)
}

/// Rejects paths naming a reserved device or special file on this host.
pub fn check_reserved(path: &Path) -> Result<(), TransferError> {
    if host_reserves(path) {
        return Err(TransferError::ReservedName(path.to_path_buf()));
    }
    Ok(())
}

/// Returns `true` if Windows refuses `name` as a regular file name.
///
/// Covers the DOS device names (with or without extension), names ending in
/// a dot or a space, and names containing a colon (alternate data streams).
pub fn is_reserved_name(name: &str) -> bool {
    if name.is_empty() || name == "." || name == ".." {
        return false;
    }
    if name.ends_with('.') || name.ends_with(' ') || name.contains(':') {
        return true;
    }

    let stem = name.split('.').next().unwrap_or(name).trim_end();
    RESERVED_DEVICE_NAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(stem))
}

#[cfg(windows)]
fn host_reserves(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(is_reserved_name)
}

#[cfg(not(windows))]
fn host_reserves(_path: &Path) -> bool {
    false
}

/// Symlinks followed while resolving one path before giving up.
const MAX_SYMLINK_HOPS: usize = 40;

/// Resolves `path` the way a later write will see it.
///
/// The longest existing ancestor is canonicalized. The remaining components
/// are then walked one at a time: symlinks are followed even when their
/// target does not exist, and `..` is applied to the path resolved so far.
fn resolve(path: &Path) -> Result<PathBuf, TransferError> {
    let (mut resolved, mut pending) = split_existing(path)?;
    let mut hops = 0;

    while let Some(part) = pending.pop() {
        if part == ".." {
            resolved.pop();
            continue;
        }
        if part == "." {
            continue;
        }
        resolved.push(&part);

        let metadata = match std::fs::symlink_metadata(&resolved) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        if !metadata.file_type().is_symlink() {
            continue;
        }

        hops += 1;
        if hops > MAX_SYMLINK_HOPS {
            return Err(TransferError::InvalidPath(format!(
                "too many levels of symbolic links in {}",
                path.display()
            )));
        }
        let target = std::fs::read_link(&resolved)?;
        resolved.pop();
        // An absolute target replaces the whole prefix.
        let (base, rest) = split_existing(&resolved.join(target))?;
        resolved = base;
        pending.extend(rest);
    }

    Ok(resolved)
}

/// Splits `path` into its canonicalized longest existing ancestor and the
/// components below it, last component first.
///
/// Only a missing component moves the search up a level; any other error
/// (permissions, a file used as a directory, a symlink loop) is returned.
fn split_existing(path: &Path) -> Result<(PathBuf, Vec<OsString>), TransferError> {
    let absolute = std::path::absolute(path)?;

    for ancestor in absolute.ancestors() {
        let base = match ancestor.canonicalize() {
            Ok(base) => base,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        let rest = absolute
            .strip_prefix(ancestor)
            .map_err(|e| TransferError::InvalidPath(e.to_string()))?;
        let pending = rest
            .components()
            .rev()
            .map(|c| c.as_os_str().to_os_string())
            .collect();
        return Ok((base, pending));
    }

    Err(TransferError::InvalidPath(format!(
        "cannot resolve {}",
        path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn canonical_root(dir: &TempDir) -> PathBuf {
        dir.path().canonicalize().unwrap()
    }

    #[test]
    fn accepts_simple_key() {
        let dir = TempDir::new().unwrap();
        let path = validate_destination(dir.path(), "file.txt").unwrap();
        assert_eq!(path, canonical_root(&dir).join("file.txt"));
    }

    #[test]
    fn accepts_nested_key_that_does_not_exist_yet() {
        let dir = TempDir::new().unwrap();
        let path = validate_destination(dir.path(), "a/b/c/file.bin").unwrap();
        assert!(path.starts_with(canonical_root(&dir)));
        assert!(path.ends_with("a/b/c/file.bin"));
    }

    #[test]
    fn accepts_missing_root() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("not").join("created");
        let path = validate_destination(&root, "x.txt").unwrap();
        assert_eq!(path, canonical_root(&dir).join("not/created/x.txt"));
    }

    #[test]
    fn folds_inner_parent_segments() {
        let dir = TempDir::new().unwrap();
        let path = validate_destination(dir.path(), "a/../b/./c.txt").unwrap();
        assert_eq!(path, canonical_root(&dir).join("b/c.txt"));
    }

    #[test]
    fn accepts_dotfile() {
        let dir = TempDir::new().unwrap();
        assert!(validate_destination(dir.path(), ".config/settings.json").is_ok());
    }

    #[test]
    fn rejects_parent_dir_traversal() {
        let dir = TempDir::new().unwrap();
        let err = validate_destination(dir.path(), "../../../etc/passwd").unwrap_err();
        assert!(matches!(err, TransferError::PathEscape { .. }));
        assert!(err.is_path_safety());
    }

    #[test]
    fn rejects_nested_parent_dir_traversal() {
        let dir = TempDir::new().unwrap();
        let err = validate_destination(dir.path(), "sub/../../escape").unwrap_err();
        assert!(matches!(err, TransferError::PathEscape { .. }));
    }

    #[test]
    fn rejects_sibling_with_shared_name_prefix() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("data");
        std::fs::create_dir_all(&root).unwrap();
        let err = validate_destination(&root, "../data-evil/x").unwrap_err();
        assert!(matches!(err, TransferError::PathEscape { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn rejects_absolute_key() {
        let dir = TempDir::new().unwrap();
        let err = validate_destination(dir.path(), "/tmp/malicious").unwrap_err();
        assert!(matches!(err, TransferError::PathEscape { .. }));
    }

    #[test]
    fn rejects_key_resolving_to_root() {
        let dir = TempDir::new().unwrap();
        assert!(validate_destination(dir.path(), "sub/..").is_err());
        assert!(validate_destination(dir.path(), ".").is_err());
    }

    #[test]
    fn rejects_empty_key() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            validate_destination(dir.path(), ""),
            Err(TransferError::InvalidPath(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlink_pointing_outside() {
        let outside = TempDir::new().unwrap();
        let dir = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();

        let err = validate_destination(dir.path(), "link/file.txt").unwrap_err();
        assert!(matches!(err, TransferError::PathEscape { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn rejects_dangling_symlink_pointing_outside() {
        let outside = TempDir::new().unwrap();
        let dir = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path().join("pwned.txt"), dir.path().join("evil"))
            .unwrap();

        let err = validate_destination(dir.path(), "evil").unwrap_err();
        assert!(matches!(err, TransferError::PathEscape { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn rejects_dangling_directory_symlink_pointing_outside() {
        let outside = TempDir::new().unwrap();
        let dir = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path().join("missing"), dir.path().join("link"))
            .unwrap();

        let err = validate_destination(dir.path(), "link/file.txt").unwrap_err();
        assert!(matches!(err, TransferError::PathEscape { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn follows_dangling_symlink_inside_root() {
        let dir = TempDir::new().unwrap();
        std::os::unix::fs::symlink("target.txt", dir.path().join("alias")).unwrap();

        let path = validate_destination(dir.path(), "alias").unwrap();
        assert_eq!(path, canonical_root(&dir).join("target.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_loop_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::os::unix::fs::symlink("b", dir.path().join("a")).unwrap();
        std::os::unix::fs::symlink("a", dir.path().join("b")).unwrap();

        assert!(validate_destination(dir.path(), "a/file.txt").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn file_used_as_directory_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("plain"), b"x").unwrap();

        let err = validate_destination(dir.path(), "plain/child.txt").unwrap_err();
        assert!(matches!(err, TransferError::Io(_)));
    }

    #[test]
    fn device_names_are_reserved() {
        for name in ["CON", "con", "nul.txt", "Aux.tar.gz", "COM1", "lpt9.log", "PRN "] {
            assert!(is_reserved_name(name), "{name} should be reserved");
        }
    }

    #[test]
    fn special_suffixes_are_reserved() {
        assert!(is_reserved_name("report."));
        assert!(is_reserved_name("trailing "));
        assert!(is_reserved_name("file.txt:stream"));
    }

    #[test]
    fn ordinary_names_are_not_reserved() {
        for name in ["console.log", "CONFIG", "com10", "nullable.rs", "a.txt", ".", ".."] {
            assert!(!is_reserved_name(name), "{name} should not be reserved");
        }
    }

    #[cfg(windows)]
    #[test]
    fn validate_rejects_reserved_name_on_windows() {
        let dir = TempDir::new().unwrap();
        let err = validate_destination(dir.path(), "sub/NUL").unwrap_err();
        assert!(matches!(err, TransferError::ReservedName(_)));
    }

    #[cfg(not(windows))]
    #[test]
    fn device_names_are_plain_files_elsewhere() {
        let dir = TempDir::new().unwrap();
        assert!(validate_destination(dir.path(), "sub/NUL").is_ok());
        assert!(check_reserved(Path::new("CON")).is_ok());
    }
}
