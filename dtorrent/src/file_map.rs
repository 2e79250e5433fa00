//! Per-file and per-piece layout derived from a torrent's metainfo: offsets, piece spans, and
//! the priority/DND aggregation rules that tie files to the pieces they overlap.

use crate::geometry::Geometry;
use crate::torrent_parser::info::Info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone)]
pub struct FileEntry {
    pub offset: u64,
    pub length: u64,
    pub first_piece: u32,
    pub last_piece: u32,
    pub priority: Priority,
    pub dnd: bool,
    pub usept: bool,
    pub exists: bool,
    /// Path segments relative to the torrent's download root (`[name]` for single-file
    /// torrents, `[info.name, ...path]` for multi-file ones).
    pub name: Vec<String>,
    /// Set by `rename`; when present it overrides `name`'s last segment for display purposes.
    pub rename: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceEntry {
    pub priority: Priority,
    pub dnd: bool,
}

/// The complete file/piece layout of a torrent, built once from its metainfo and geometry.
#[derive(Debug, Clone)]
pub struct FileMap {
    pub files: Vec<FileEntry>,
    pub pieces: Vec<PieceEntry>,
    /// `first_files[p]`: index into `files` of the first file overlapping piece `p`; used as a
    /// traversal hint so piece-priority computation stays linear in the number of files.
    first_files: Vec<usize>,
}

impl FileMap {
    /// Walks `info`'s files, assigning cumulative offsets and deriving each file's piece span,
    /// then computes every piece's aggregate priority and DND flag.
    pub fn init_file_pieces(info: &Info, geometry: &Geometry) -> Self {
        let mut files = Vec::new();
        let mut offset = 0u64;

        if info.is_multi_file() {
            for f in &info.files {
                let length = f.length.max(0) as u64;
                let (first_piece, last_piece) = piece_span(offset, length, geometry);
                let mut name = vec![info.name.clone()];
                name.extend(f.path.iter().cloned());
                files.push(FileEntry {
                    offset,
                    length,
                    first_piece,
                    last_piece,
                    priority: Priority::Normal,
                    dnd: false,
                    usept: false,
                    exists: false,
                    name,
                    rename: None,
                });
                offset += length;
            }
        } else {
            let length = info.length.max(0) as u64;
            let (first_piece, last_piece) = piece_span(offset, length, geometry);
            files.push(FileEntry {
                offset,
                length,
                first_piece,
                last_piece,
                priority: Priority::Normal,
                dnd: false,
                usept: false,
                exists: false,
                name: vec![info.name.clone()],
                rename: None,
            });
        }

        let first_files = build_first_files_hint(&files, geometry.piece_count);
        let pieces = compute_piece_table(&files, &first_files, geometry.piece_count);

        Self {
            files,
            pieces,
            first_files,
        }
    }

    /// Every file overlapping piece `p`, in file-table order.
    pub fn files_overlapping(&self, p: u32) -> impl Iterator<Item = (usize, &FileEntry)> {
        let start = self.first_files[p as usize];
        self.files[start..]
            .iter()
            .enumerate()
            .map(move |(i, f)| (start + i, f))
            .take_while(move |(_, f)| f.first_piece <= p)
            .filter(move |(_, f)| f.last_piece >= p)
    }

    /// Recomputes `pieces[p].priority` and `pieces[p].dnd` for every piece, from the current
    /// per-file flags. Called after any file priority/DND change.
    pub fn recompute_pieces(&mut self, geometry: &Geometry) {
        self.pieces = compute_piece_table(&self.files, &self.first_files, geometry.piece_count);
    }
}

fn piece_span(offset: u64, length: u64, geometry: &Geometry) -> (u32, u32) {
    let first_piece = geometry.byte_to_piece(offset);
    let last_piece = if length == 0 {
        first_piece
    } else {
        geometry.byte_to_piece(offset + length - 1)
    };
    (first_piece, last_piece)
}

fn build_first_files_hint(files: &[FileEntry], piece_count: u32) -> Vec<usize> {
    let mut hint = vec![0usize; piece_count as usize];
    let mut idx = 0usize;
    for p in 0..piece_count {
        while idx < files.len() && files[idx].last_piece < p {
            idx += 1;
        }
        hint[p as usize] = idx;
    }
    hint
}

fn compute_piece_table(
    files: &[FileEntry],
    first_files: &[usize],
    piece_count: u32,
) -> Vec<PieceEntry> {
    let mut pieces = Vec::with_capacity(piece_count as usize);

    for p in 0..piece_count {
        let start = first_files[p as usize];
        let mut priority = Priority::Low;
        let mut dnd = true;
        let mut any_overlap = false;

        for f in files[start..]
            .iter()
            .take_while(|f| f.first_piece <= p)
            .filter(|f| f.last_piece >= p)
        {
            any_overlap = true;
            if f.priority > priority {
                priority = f.priority;
            }
            if !f.dnd {
                dnd = false;
            }
            if f.priority >= Priority::Normal && (f.first_piece == p || f.last_piece == p) {
                priority = Priority::High;
            }
        }

        if !any_overlap {
            dnd = false;
        }

        pieces.push(PieceEntry { priority, dnd });
    }

    pieces
}
