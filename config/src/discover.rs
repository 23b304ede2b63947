use std::path::{Path, PathBuf};

/// Config filenames recognized during project discovery, in the priority
/// order checked within any single directory (§6).
const PROJECT_FILENAMES: &[&str] =
    &["qcode.config.json", ".qcoderc", ".qcoderc.json", ".qcode.json"];

/// Walk up from `start` to the filesystem root, returning at most one
/// config file per ancestor directory (the first recognized name found
/// there). Ordered root-first / nearest-last so callers can fold them in
/// with later entries winning ("project (nearest wins)", §6).
pub fn project_config_sources(start: &Path) -> Vec<PathBuf> {
    let mut nearest_first = Vec::new();
    let mut dir = start.to_path_buf();
    loop {
        if let Some(found) = PROJECT_FILENAMES.iter().map(|name| dir.join(name)).find(|p| p.is_file()) {
            nearest_first.push(found);
        }
        if !dir.pop() {
            break;
        }
    }
    nearest_first.reverse();
    nearest_first
}

/// Path to the user-global config file, under the platform config home
/// (§6 "global, under the user's config home").
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|home| home.join("qcode").join("config.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_nearest_file_per_directory_root_first() {
        let root = tempfile::tempdir().unwrap();
        let child = root.path().join("child");
        std::fs::create_dir(&child).unwrap();
        std::fs::write(root.path().join("qcode.config.json"), "{}").unwrap();
        std::fs::write(child.join(".qcode.json"), "{}").unwrap();

        let sources = project_config_sources(&child);
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0], root.path().join("qcode.config.json"));
        assert_eq!(sources[1], child.join(".qcode.json"));
    }

    #[test]
    fn prefers_first_recognized_name_within_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("qcode.config.json"), "{}").unwrap();
        std::fs::write(dir.path().join(".qcoderc"), "{}").unwrap();

        let sources = project_config_sources(dir.path());
        assert_eq!(sources, vec![dir.path().join("qcode.config.json")]);
    }

    #[test]
    fn empty_when_nothing_found() {
        let dir = tempfile::tempdir().unwrap();
        assert!(project_config_sources(dir.path()).is_empty());
    }
}
