use std::path::{Component, Path, PathBuf};

/// Convert a path string that may have been written on Windows into a host path.
///
/// Backslash separated paths are split into components; a single leading separator is removed so
/// that the result is relative. Anything else is returned unchanged.
pub fn fix_path(path: &str) -> PathBuf {
    if !path.contains('\\') {
        return PathBuf::from(path);
    }
    let trimmed = path.strip_prefix('\\').unwrap_or(path);
    trimmed
        .split(['\\', '/'])
        .filter(|part| !part.is_empty())
        .collect()
}

/// Express path relative to base when path lives under base, otherwise return it unchanged
pub fn relative_to(path: &Path, base: &Path) -> PathBuf {
    if let Ok(rel) = path.strip_prefix(base) {
        return rel.to_path_buf();
    }
    // Walk up from base until we find a common ancestor
    let mut ups = PathBuf::new();
    for ancestor in base.ancestors().skip(1) {
        ups.push(Component::ParentDir);
        if ancestor.as_os_str().is_empty() {
            break;
        }
        if let Ok(rel) = path.strip_prefix(ancestor) {
            return ups.join(rel);
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fix_windows_path() {
        assert_eq!(
            fix_path("\\raw_data\\group\\cell_2.tif"),
            PathBuf::from("raw_data").join("group").join("cell_2.tif")
        );
        assert_eq!(fix_path("raw/cell.tif"), PathBuf::from("raw/cell.tif"));
    }

    #[test]
    fn test_relative_to() {
        assert_eq!(
            relative_to(Path::new("/data/raw/a/c.tif"), Path::new("/data/raw")),
            PathBuf::from("a/c.tif")
        );
        assert_eq!(
            relative_to(Path::new("/data/raw/a/c.tif"), Path::new("/data/out")),
            PathBuf::from("../raw/a/c.tif")
        );
        assert_eq!(
            relative_to(Path::new("rel/c.tif"), Path::new("/data/out")),
            PathBuf::from("rel/c.tif")
        );
    }
}
