use std::path::{Component, Path, PathBuf};

use crate::services::storage::StorageError;

/// Makes `path` absolute (anchored at the current directory when relative)
/// and resolves `.` and `..` lexically. `..` never climbs above the root.
///
/// Symlinks are not followed.
pub fn normalize(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("/"))
            .join(path)
    };

    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

/// True when `path` is `base` or lies underneath it, compared component-wise
/// after normalization.
pub fn is_within(path: &Path, base: &Path) -> bool {
    normalize(path).starts_with(normalize(base))
}

/// Joins `segments` onto `base` and rejects any result that escapes `base`.
pub fn safe_join<I, S>(base: &Path, segments: I) -> Result<PathBuf, StorageError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<Path>,
{
    let base = normalize(base);
    let mut joined = base.clone();
    for segment in segments {
        joined.push(segment.as_ref());
    }
    let joined = normalize(&joined);

    if !joined.starts_with(&base) {
        return Err(StorageError::PathTraversal {
            base: base.display().to_string(),
            path: joined.display().to_string(),
        });
    }

    Ok(joined)
}

/// Resolves `name` to a directory exactly one level below `base`.
///
/// Segments that collapse onto `base` itself (`""`, `"."`, `"a/.."`) or that
/// reach deeper than one level are rejected like a traversal.
pub fn safe_child(base: &Path, name: &str) -> Result<PathBuf, StorageError> {
    let child = safe_join(base, [name])?;
    let base = normalize(base);

    if child.parent() != Some(base.as_path()) {
        return Err(StorageError::PathTraversal {
            base: base.display().to_string(),
            path: child.display().to_string(),
        });
    }

    Ok(child)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_join_valid() {
        let result = safe_join(Path::new("/base"), ["subdir", "file.txt"]).unwrap();
        assert_eq!(result, PathBuf::from("/base/subdir/file.txt"));
    }

    #[test]
    fn test_safe_join_resolves_inner_dots() {
        let result = safe_join(Path::new("/base"), ["a/./b/../c", "file.txt"]).unwrap();
        assert_eq!(result, PathBuf::from("/base/a/c/file.txt"));
    }

    #[test]
    fn test_safe_join_rejects_traversal() {
        let err = safe_join(Path::new("/base"), ["../etc/passwd"]).unwrap_err();
        assert!(matches!(err, StorageError::PathTraversal { .. }));

        assert!(safe_join(Path::new("/srv/uploads"), ["42", "../../etc/passwd"]).is_err());
        assert!(safe_join(Path::new("/srv/uploads"), ["../../../../../../etc/passwd"]).is_err());
    }

    #[test]
    fn test_safe_join_rejects_absolute_segment() {
        assert!(safe_join(Path::new("/base"), ["/etc/passwd"]).is_err());
    }

    #[test]
    fn test_safe_join_rejects_sibling_prefix() {
        // "/base2" shares a string prefix with "/base" but is not inside it
        assert!(safe_join(Path::new("/base"), ["../base2/file"]).is_err());
    }

    #[test]
    fn test_relative_base_is_anchored() {
        let result = safe_join(Path::new("static/uploads"), ["7", "a.pdf"]).unwrap();
        assert!(result.is_absolute());
        assert!(result.ends_with("static/uploads/7/a.pdf"));
    }

    #[test]
    fn test_normalize_never_climbs_above_root() {
        assert_eq!(normalize(Path::new("/../../x")), PathBuf::from("/x"));
    }

    #[test]
    fn test_is_within() {
        assert!(is_within(Path::new("/base/a/b"), Path::new("/base")));
        assert!(is_within(Path::new("/base"), Path::new("/base")));
        assert!(!is_within(Path::new("/base/../other"), Path::new("/base")));
    }

    #[test]
    fn test_safe_child() {
        assert_eq!(
            safe_child(Path::new("/tickets"), "17").unwrap(),
            PathBuf::from("/tickets/17")
        );
        assert_eq!(
            safe_child(Path::new("/tickets"), "17/../18").unwrap(),
            PathBuf::from("/tickets/18")
        );
    }

    #[test]
    fn test_safe_child_rejects_base_itself() {
        for name in ["", ".", "./", "17/..", "a/b", "../tickets"] {
            let err = safe_child(Path::new("/tickets"), name).unwrap_err();
            assert!(matches!(err, StorageError::PathTraversal { .. }), "{name:?}");
        }
        assert!(safe_child(Path::new("/tickets"), "../etc").is_err());
    }
}
