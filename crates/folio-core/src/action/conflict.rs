//! Naming rules for pastes that collide with existing items.

use crate::fs::paths;
use crate::location::Storage;

const MAX_ATTEMPTS: u32 = 10_000;

/// `"name (copy n).ext"`, or `"name (copy n)"` for directories and
/// extensionless names. A leading dot does not start an extension.
pub fn copy_name(name: &str, n: u32, is_dir: bool) -> String {
    let split = if is_dir {
        None
    } else {
        name.rfind('.').filter(|&index| index > 0)
    };
    match split {
        Some(index) => format!("{} (copy {n}){}", &name[..index], &name[index..]),
        None => format!("{name} (copy {n})"),
    }
}

/// The first `copy_name` for `name` that does not exist in `dir`.
pub fn auto_rename(storage: &dyn Storage, dir: &str, name: &str, is_dir: bool) -> String {
    for n in 1..MAX_ATTEMPTS {
        let candidate = copy_name(name, n, is_dir);
        let taken = storage
            .new_item_info(&paths::join(dir, &candidate))
            .map(|info| info.exists())
            .unwrap_or(false);
        if !taken {
            return candidate;
        }
    }
    format!("{name} (copy {})", chrono::Local::now().format("%Y%m%d%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::DiskStorage;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn suffix_goes_before_extension() {
        assert_eq!(copy_name("report.txt", 1, false), "report (copy 1).txt");
        assert_eq!(copy_name("archive.tar.gz", 2, false), "archive.tar (copy 2).gz");
        assert_eq!(copy_name("README", 1, false), "README (copy 1)");
        assert_eq!(copy_name(".bashrc", 1, false), ".bashrc (copy 1)");
        assert_eq!(copy_name("photos.2024", 1, true), "photos.2024 (copy 1)");
    }

    #[test]
    fn auto_rename_skips_taken_names() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), "").unwrap();
        fs::write(tmp.path().join("a (copy 1).txt"), "").unwrap();
        let dir = tmp.path().to_string_lossy();

        let name = auto_rename(&DiskStorage::new(), &dir, "a.txt", false);
        assert_eq!(name, "a (copy 2).txt");
    }
}
