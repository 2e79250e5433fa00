//! Maps a `FileEntry` to wherever it currently lives on disk, searching the staging and final
//! download directories and their `.part` variants, and locates temporary piece files.

use std::path::{Path, PathBuf};

use crate::file_map::FileEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Base {
    Download,
    Incomplete,
}

/// The directories a torrent's files and piece fragments may live under.
#[derive(Debug, Clone)]
pub struct Locations {
    pub download_dir: PathBuf,
    pub incomplete_dir: Option<PathBuf>,
    pub piece_temp_dir: PathBuf,
    pub current_dir: Base,
}

impl Locations {
    pub fn new(download_dir: PathBuf, incomplete_dir: Option<PathBuf>, piece_temp_dir: PathBuf) -> Self {
        let current_dir = if incomplete_dir.is_some() {
            Base::Incomplete
        } else {
            Base::Download
        };
        Self {
            download_dir,
            incomplete_dir,
            piece_temp_dir,
            current_dir,
        }
    }

    pub fn base_dir(&self, base: Base) -> Option<&Path> {
        match base {
            Base::Download => Some(&self.download_dir),
            Base::Incomplete => self.incomplete_dir.as_deref(),
        }
    }

    pub(crate) fn relative_path(file: &FileEntry) -> PathBuf {
        let mut segments = file.name.clone();
        if let Some(rename) = &file.rename {
            if let Some(last) = segments.last_mut() {
                *last = rename.clone();
            }
        }
        segments.iter().collect()
    }

    /// Searches, in order: `download_dir/name`, `incomplete_dir/name`, `incomplete_dir/name.part`,
    /// `download_dir/name.part`. Returns the first path that exists on disk, and which base
    /// directory it was found under.
    pub fn find_file(&self, file: &FileEntry) -> Option<(PathBuf, Base)> {
        let rel = Self::relative_path(file);

        let mut candidates = Vec::with_capacity(4);
        candidates.push((self.download_dir.join(&rel), Base::Download));
        if let Some(incomplete) = &self.incomplete_dir {
            candidates.push((incomplete.join(&rel), Base::Incomplete));
            candidates.push((with_part_suffix(&incomplete.join(&rel)), Base::Incomplete));
        }
        candidates.push((with_part_suffix(&self.download_dir.join(&rel)), Base::Download));

        candidates.into_iter().find(|(path, _)| path.exists())
    }

    /// Path of the temporary piece file for piece `p`, whether or not it currently exists.
    pub fn find_piece_temp(&self, p: u32) -> PathBuf {
        self.piece_temp_dir.join(format!("{:010}.dat", p))
    }

    /// Where `file` should be written under the current base directory, whether or not it
    /// already exists there.
    pub fn target_path(&self, file: &FileEntry) -> PathBuf {
        let base = self.base_dir(self.current_dir).unwrap_or(&self.download_dir);
        base.join(Self::relative_path(file))
    }

    /// `current_dir` is `download_dir` if there is no `incomplete_dir`; otherwise `incomplete_dir`
    /// until metainfo is known, after which it tracks wherever file 0 was actually found
    /// (falling back to `incomplete_dir`).
    pub fn refresh_current_dir(&mut self, has_metainfo: bool, files: &[FileEntry]) {
        if self.incomplete_dir.is_none() {
            self.current_dir = Base::Download;
            return;
        }
        if !has_metainfo {
            self.current_dir = Base::Incomplete;
            return;
        }
        self.current_dir = files
            .first()
            .and_then(|f0| self.find_file(f0))
            .map(|(_, base)| base)
            .unwrap_or(Base::Incomplete);
    }
}

fn with_part_suffix(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}
