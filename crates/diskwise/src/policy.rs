//! Path policy: which paths a walk skips, and which folder names look like
//! build or cache output.

use std::path::Path;

/// Substrings that mark a path as off-limits for scanning. Matching is a
/// plain substring test over the lowercased path, not per-component, so an
/// entry inside a recycle bin or system volume directory on any volume is
/// skipped.
const BLACKLIST_SUBSTRINGS: &[&str] = &[
    "c:\\windows",
    "c:\\program files",
    "c:\\program files (x86)",
    "c:\\programdata",
    "$recycle.bin",
    "system volume information",
];

/// Folder basenames that are regenerable build or cache output.
const CACHE_FOLDER_NAMES: &[&str] = &[
    "node_modules",
    ".cache",
    "__pycache__",
    "dist",
    "build",
    "out",
    "tmp",
    "temp",
    ".tmp",
    ".temp",
    "cache",
    ".git",
    ".venv",
    "venv",
    "env",
    ".env",
    ".next",
    ".nuxt",
    "target",
    "bin",
    "obj",
];

/// Path segments that mark everything below them as temporary storage.
/// Both separator styles are accepted so the test works on every platform.
const TEMP_SEGMENTS: &[&str] = &["\\temp\\", "\\tmp\\", "/temp/", "/tmp/"];

/// Whether a path falls under the scan blacklist.
pub fn is_blacklisted(path: &Path) -> bool {
    let lowered = path.to_string_lossy().to_lowercase();
    BLACKLIST_SUBSTRINGS.iter().any(|s| lowered.contains(s))
}

/// Whether a folder looks like cache or build output: either its basename is
/// a well-known cache directory name, or it lives under a temp segment.
pub fn is_cache_folder(path: &Path) -> bool {
    if let Some(name) = path.file_name() {
        let name = name.to_string_lossy().to_lowercase();
        if CACHE_FOLDER_NAMES.iter().any(|c| *c == name) {
            return true;
        }
    }

    let lowered = path.to_string_lossy().to_lowercase();
    TEMP_SEGMENTS.iter().any(|s| lowered.contains(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blacklist_matches_windows_system_paths() {
        assert!(is_blacklisted(Path::new("C:\\Windows\\System32")));
        assert!(is_blacklisted(Path::new("C:\\Program Files\\App")));
        assert!(is_blacklisted(Path::new("C:\\Program Files (x86)\\App")));
        assert!(is_blacklisted(Path::new("C:\\ProgramData\\cache")));
    }

    #[test]
    fn test_blacklist_matches_anywhere_in_path() {
        // Substring matching on purpose: these can live on any volume.
        assert!(is_blacklisted(Path::new("D:\\$RECYCLE.BIN\\S-1-5\\junk")));
        assert!(is_blacklisted(Path::new(
            "/mnt/usb/System Volume Information/IndexerVolumeGuid"
        )));
    }

    #[test]
    fn test_blacklist_ignores_ordinary_paths() {
        assert!(!is_blacklisted(Path::new("/home/user/projects")));
        assert!(!is_blacklisted(Path::new("C:\\Users\\user\\Documents")));
    }

    #[test]
    fn test_cache_folder_by_basename() {
        assert!(is_cache_folder(Path::new("/home/user/app/node_modules")));
        assert!(is_cache_folder(Path::new("/home/user/app/__pycache__")));
        assert!(is_cache_folder(Path::new("/home/user/app/Target")));
        assert!(is_cache_folder(Path::new("C:\\repo\\.git")));
        assert!(!is_cache_folder(Path::new("/home/user/app/src")));
    }

    #[test]
    fn test_cache_folder_by_temp_segment() {
        assert!(is_cache_folder(Path::new("C:\\Users\\user\\Temp\\work")));
        assert!(is_cache_folder(Path::new("/var/tmp/build-artifacts")));
        // Only complete segments count.
        assert!(!is_cache_folder(Path::new("/home/user/template")));
        assert!(!is_cache_folder(Path::new("/home/user/attempts")));
    }

    #[test]
    fn test_cache_folder_basename_is_exact() {
        assert!(!is_cache_folder(Path::new("/home/user/node_modules_backup")));
        assert!(!is_cache_folder(Path::new("/home/user/distribution")));
    }
}
