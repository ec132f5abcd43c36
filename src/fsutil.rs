//! Small filesystem helpers shared by installs and mounts.

use std::io;
use std::path::{Component, Path, PathBuf};

/// Create a symbolic link at `link` pointing to `target`.
#[cfg(unix)]
pub fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

/// Create a symbolic link at `link` pointing to `target`.
#[cfg(windows)]
pub fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    if target.is_dir() {
        std::os::windows::fs::symlink_dir(target, link)
    } else {
        std::os::windows::fs::symlink_file(target, link)
    }
}

/// Join a relative path onto `root`, refusing anything that would escape it.
///
/// Returns `None` for absolute paths and paths containing `..`.
pub fn safe_join(root: &Path, relative: &Path) -> Option<PathBuf> {
    let escapes = relative.components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    (!escapes).then(|| root.join(relative))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_join_accepts_nested_relative_paths() {
        assert_eq!(
            safe_join(Path::new("/data/x"), Path::new("wav/dev")),
            Some(PathBuf::from("/data/x/wav/dev"))
        );
        assert_eq!(
            safe_join(Path::new("/data/x"), Path::new("./a.txt")),
            Some(PathBuf::from("/data/x/./a.txt"))
        );
    }

    #[test]
    fn safe_join_rejects_escapes() {
        assert_eq!(safe_join(Path::new("/data/x"), Path::new("../y")), None);
        assert_eq!(safe_join(Path::new("/data/x"), Path::new("/etc/passwd")), None);
    }
}
