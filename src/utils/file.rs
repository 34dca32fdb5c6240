use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// A file found in one of the asset directories.
#[derive(Clone, Debug)]
pub struct StoredFile {
    /// File name without its extension.
    pub stem: String,
    pub path: PathBuf,
    pub modified: SystemTime,
}

/// Files in `dir` carrying `extension`, newest first. A missing directory is empty.
pub fn list_files_with_extension(dir: impl AsRef<Path>, extension: &str) -> Vec<StoredFile> {
    let Ok(read_dir) = fs::read_dir(dir.as_ref()) else {
        return Vec::new();
    };

    let mut entries: Vec<StoredFile> = read_dir
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(extension) {
                return None;
            }
            let stem = path.file_stem()?.to_str()?.to_string();
            let modified = entry
                .metadata()
                .and_then(|meta| meta.modified())
                .unwrap_or(UNIX_EPOCH);
            Some(StoredFile {
                stem,
                path,
                modified,
            })
        })
        .collect();

    entries.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.stem.cmp(&b.stem)));
    entries
}

pub fn list_json_files(dir: impl AsRef<Path>) -> Vec<StoredFile> {
    list_files_with_extension(dir, "json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_only_matching_extension() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("growth.json"), "{}").expect("write");
        fs::write(dir.path().join("notes.txt"), "").expect("write");

        let files = list_json_files(dir.path());
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].stem, "growth");
        assert!(list_json_files(dir.path().join("missing")).is_empty());
    }
}
