//! Local Data Remover: deletes a torrent's on-disk files and the folders that contain only
//! torrent-owned content, leaving foreign files and their containing directories untouched.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::file_map::FileEntry;
use crate::file_locator::Locations;

#[derive(Debug)]
pub enum RemoveError {
    Io(std::io::Error),
}

impl From<std::io::Error> for RemoveError {
    fn from(e: std::io::Error) -> Self {
        RemoveError::Io(e)
    }
}

/// Both the finished-file name and its in-progress `.part` form count as torrent-owned.
fn owned_names(files: &[FileEntry]) -> HashSet<PathBuf> {
    let mut owned = HashSet::new();
    for file in files {
        let rel = Locations::relative_path(file);
        let mut part = rel.clone();
        let file_name = part.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        let mut part_name = file_name.clone();
        part_name.push(".part");
        part.set_file_name(part_name);
        owned.insert(rel);
        owned.insert(part);
    }
    owned
}

/// Walks `root`, returning every directory under it (including `root` itself) paired with
/// whether it's "dirty" (contains, directly, a file not owned by the torrent).
fn walk_and_mark(root: &Path, owned: &HashSet<PathBuf>) -> std::io::Result<Vec<(PathBuf, bool)>> {
    let mut dirs = Vec::new();
    mark_recursive(root, root, owned, &mut dirs)?;
    Ok(dirs)
}

fn mark_recursive(
    root: &Path,
    dir: &Path,
    owned: &HashSet<PathBuf>,
    out: &mut Vec<(PathBuf, bool)>,
) -> std::io::Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    let mut dirty = false;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            mark_recursive(root, &path, owned, out)?;
        } else {
            let rel = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
            let is_ds_store = path.file_name().map(|n| n == ".DS_Store").unwrap_or(false);
            if !owned.contains(&rel) && !is_ds_store {
                dirty = true;
            }
        }
    }
    out.push((dir.to_path_buf(), dirty));
    Ok(())
}

/// Removes every torrent-owned file under `root`, then every directory left clean, deepest
/// (longest path) first. A `.DS_Store` found inside an otherwise-clean directory is removed
/// before the directory's own removal is retried. Dirty directories and files not owned by the
/// torrent are never touched.
pub fn remove_local_data(root: &Path, files: &[FileEntry]) -> Result<(), RemoveError> {
    let owned = owned_names(files);

    for rel in &owned {
        let path = root.join(rel);
        if path.is_file() {
            fs::remove_file(&path)?;
        }
    }

    let mut dirs = walk_and_mark(root, &owned)?;
    dirs.sort_by_key(|(path, _)| std::cmp::Reverse(path.as_os_str().len()));

    for (dir, dirty) in dirs {
        if dirty {
            continue;
        }
        remove_dir_retrying_ds_store(&dir);
    }

    Ok(())
}

fn remove_dir_retrying_ds_store(dir: &Path) {
    if fs::remove_dir(dir).is_ok() {
        return;
    }
    let ds_store = dir.join(".DS_Store");
    if ds_store.exists() {
        let _ = fs::remove_file(&ds_store);
        let _ = fs::remove_dir(dir);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_map::Priority;
    use std::fs;

    fn entry(name: &[&str]) -> FileEntry {
        FileEntry {
            offset: 0,
            length: 0,
            first_piece: 0,
            last_piece: 0,
            priority: Priority::Normal,
            dnd: false,
            usept: false,
            exists: true,
            name: name.iter().map(|s| s.to_string()).collect(),
            rename: None,
        }
    }

    #[test]
    fn test_removes_torrent_files_keeps_foreign_file_and_dirty_dir() {
        let tmp = std::env::temp_dir().join(format!("dtorrent_local_data_test_{}", std::process::id()));
        let sub = tmp.join("movie");
        fs::create_dir_all(&sub).unwrap();
        fs::write(sub.join("movie.mkv"), b"data").unwrap();
        fs::write(sub.join("notes.txt"), b"keep me").unwrap();

        let files = vec![entry(&["movie", "movie.mkv"])];
        remove_local_data(&tmp, &files).unwrap();

        assert!(!sub.join("movie.mkv").exists());
        assert!(sub.join("notes.txt").exists());
        assert!(sub.exists());

        fs::remove_dir_all(&tmp).ok();
    }

    #[test]
    fn test_removes_clean_dir_and_part_file() {
        let tmp = std::env::temp_dir().join(format!("dtorrent_local_data_test2_{}", std::process::id()));
        let sub = tmp.join("show");
        fs::create_dir_all(&sub).unwrap();
        fs::write(sub.join("ep1.mkv.part"), b"data").unwrap();

        let files = vec![entry(&["show", "ep1.mkv"])];
        remove_local_data(&tmp, &files).unwrap();

        assert!(!sub.exists());

        fs::remove_dir_all(&tmp).ok();
    }

    #[test]
    fn test_ds_store_deleted_in_otherwise_clean_dir() {
        let tmp = std::env::temp_dir().join(format!("dtorrent_local_data_test3_{}", std::process::id()));
        let sub = tmp.join("album");
        fs::create_dir_all(&sub).unwrap();
        fs::write(sub.join("track.mp3"), b"data").unwrap();
        fs::write(sub.join(".DS_Store"), b"junk").unwrap();

        let files = vec![entry(&["album", "track.mp3"])];
        remove_local_data(&tmp, &files).unwrap();

        assert!(!sub.exists());

        fs::remove_dir_all(&tmp).ok();
    }
}
