//! Do-Not-Download engine: flips a file's wanted/not-wanted flag and, for pieces straddling a
//! wanted and an unwanted file, moves data between the real file and a temporary piece file so
//! neither side loses bytes it still needs.

use std::io;
use std::path::PathBuf;

use crate::collaborators::{Cache, TorrentId};
use crate::completion::Completion;
use crate::file_locator::Locations;
use crate::file_map::{FileEntry, FileMap, Priority};
use crate::geometry::Geometry;
use crate::storage_manager::manager::{read_at_path, write_at_path};

#[derive(Debug)]
pub enum DndError {
    Io(io::Error),
    /// `delete_dnd_file` requires the file to already be DND and not using temp pieces.
    PreconditionFailed,
    FileNotFound,
}

impl From<io::Error> for DndError {
    fn from(e: io::Error) -> Self {
        DndError::Io(e)
    }
}

/// Piece-relative offset, file-relative offset, and byte length of the overlap between `file`
/// and piece `p` (empty if they don't overlap).
fn overlap(file: &FileEntry, geometry: &Geometry, p: u32) -> (u64, u64, u64) {
    let piece_start = geometry.piece_start(p);
    let piece_end = piece_start + geometry.piece_size(p);
    let file_end = file.offset + file.length;

    let overlap_start = file.offset.max(piece_start);
    let overlap_end = file_end.min(piece_end);
    let len = overlap_end.saturating_sub(overlap_start);

    (overlap_start - piece_start, overlap_start - file.offset, len)
}

fn piece_wholly_inside_file(file: &FileEntry, geometry: &Geometry, p: u32) -> bool {
    let piece_start = geometry.piece_start(p);
    let piece_end = piece_start + geometry.piece_size(p);
    piece_start >= file.offset && piece_end <= file.offset + file.length
}

/// Sets `pieces[p].dnd` and `.priority` from the files overlapping `p`, for a single boundary
/// piece. Used instead of a full-table recompute since only `fp`/`lp` of the changed file can
/// have other files attached to them.
fn recompute_one_boundary(file_map: &mut FileMap, p: u32) {
    let mut dnd = true;
    let mut priority = Priority::Low;
    for (_, f) in file_map.files_overlapping(p) {
        if !f.dnd {
            dnd = false;
        }
        if f.priority > priority {
            priority = f.priority;
        }
        if f.priority >= Priority::Normal && (f.first_piece == p || f.last_piece == p) {
            priority = Priority::High;
        }
    }
    file_map.pieces[p as usize].dnd = dnd;
    file_map.pieces[p as usize].priority = priority;
}

/// Recomputes `pieces[fp..=lp]` for file `fi`: interior pieces (which no other file can touch)
/// take the file's flags directly; the two boundary pieces are AND-reduced/maxed across every
/// file that overlaps them.
fn recompute_boundary_pieces(file_map: &mut FileMap, fi: usize) {
    let (fp, lp, file_dnd, file_priority) = {
        let f = &file_map.files[fi];
        (f.first_piece, f.last_piece, f.dnd, f.priority)
    };

    if lp > fp + 1 {
        for p in (fp + 1)..lp {
            file_map.pieces[p as usize].dnd = file_dnd;
            file_map.pieces[p as usize].priority = file_priority;
        }
    }

    recompute_one_boundary(file_map, fp);
    if lp != fp {
        recompute_one_boundary(file_map, lp);
    }
}

/// Every touching file has `usept == false`, i.e. the piece's temp fragment, if any, can be
/// deleted.
pub fn piece_temp_removable(file_map: &FileMap, p: u32) -> bool {
    file_map.files_overlapping(p).all(|(_, f)| !f.usept)
}

/// Deletes piece `p`'s temp fragment file, if one exists and no touching file still needs it.
fn maybe_remove_piece_temp(file_map: &FileMap, locations: &Locations, p: u32) -> Result<(), DndError> {
    if piece_temp_removable(file_map, p) {
        let path = locations.find_piece_temp(p);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// Flips `files[fi].dnd`. No-op if it already equals `dnd`.
pub fn set_file_dnd(
    file_map: &mut FileMap,
    geometry: &Geometry,
    locations: &Locations,
    cache: &mut impl Cache,
    torrent: TorrentId,
    fi: usize,
    dnd: bool,
) -> Result<(), DndError> {
    if file_map.files[fi].dnd == dnd {
        return Ok(());
    }

    if dnd {
        file_map.files[fi].dnd = true;
        let on_disk = file_map.files[fi].exists || locations.find_file(&file_map.files[fi]).is_some();
        let no_open_fd = !cache.is_fd_open(torrent, fi);
        file_map.files[fi].usept = no_open_fd && !on_disk;
    } else {
        let was_usept = file_map.files[fi].usept;
        if was_usept {
            restore_from_temp_fragments(file_map, geometry, locations, cache, torrent, fi)?;
        }
        file_map.files[fi].dnd = false;
        file_map.files[fi].usept = false;
    }

    recompute_boundary_pieces(file_map, fi);

    let fp = file_map.files[fi].first_piece;
    let lp = file_map.files[fi].last_piece;
    maybe_remove_piece_temp(file_map, locations, fp)?;
    if lp != fp {
        maybe_remove_piece_temp(file_map, locations, lp)?;
    }

    Ok(())
}

fn restore_from_temp_fragments(
    file_map: &FileMap,
    geometry: &Geometry,
    locations: &Locations,
    cache: &mut impl Cache,
    torrent: TorrentId,
    fi: usize,
) -> Result<(), DndError> {
    let file = file_map.files[fi].clone();
    let real_path = locations.target_path(&file);

    for p in boundary_pieces(&file) {
        cache.flush_piece(torrent, p)?;
        let (piece_rel, file_rel, len) = overlap(&file, geometry, p);
        if len == 0 {
            continue;
        }
        // a boundary piece only has a temp fragment if some other file shares it and was
        // downloaded while this one was DND; otherwise there is nothing to restore.
        let temp_path = locations.find_piece_temp(p);
        if !temp_path.exists() {
            continue;
        }
        let buf = read_at_path(&temp_path, piece_rel, len as usize)?;
        write_at_path(&real_path, &buf, file_rel)?;
    }

    Ok(())
}

fn boundary_pieces(file: &FileEntry) -> Vec<u32> {
    if file.first_piece == file.last_piece {
        vec![file.first_piece]
    } else {
        vec![file.first_piece, file.last_piece]
    }
}

/// Reclaims disk space for an already-DND file: preserves any boundary-piece bytes that other,
/// wanted files still need by spilling them into temp piece files, then unlinks the real file.
pub fn delete_dnd_file(
    file_map: &mut FileMap,
    completion: &mut Completion,
    geometry: &Geometry,
    locations: &Locations,
    cache: &mut impl Cache,
    torrent: TorrentId,
    fi: usize,
) -> Result<(), DndError> {
    if !file_map.files[fi].dnd || file_map.files[fi].usept {
        return Err(DndError::PreconditionFailed);
    }

    let file = file_map.files[fi].clone();
    let fp = file.first_piece;
    let lp = file.last_piece;

    let fp_complete_blocks = completion.complete_blocks_in_piece(geometry, fp);
    let lp_complete_blocks = completion.complete_blocks_in_piece(geometry, lp);

    let fpsave = !file_map.pieces[fp as usize].dnd && fp_complete_blocks > 0;
    let lpsave = !file_map.pieces[lp as usize].dnd && lp_complete_blocks > 0 && fp != lp;

    cache.flush_piece(torrent, fp)?;
    if lp != fp {
        cache.flush_piece(torrent, lp)?;
    }

    let real_path = locations
        .find_file(&file)
        .map(|(path, _)| path)
        .ok_or(DndError::FileNotFound)?;

    let fp_fragment = read_fragment_if(fpsave, &file, geometry, &real_path, fp)?;
    let lp_fragment = read_fragment_if(lpsave, &file, geometry, &real_path, lp)?;

    std::fs::remove_file(&real_path)?;
    file_map.files[fi].exists = false;
    file_map.files[fi].usept = true;

    if let Some((piece_rel, buf)) = fp_fragment {
        write_at_path(&locations.find_piece_temp(fp), &buf, piece_rel)?;
    }
    if let Some((piece_rel, buf)) = lp_fragment {
        write_at_path(&locations.find_piece_temp(lp), &buf, piece_rel)?;
    }

    for p in fp..=lp {
        if piece_wholly_inside_file(&file, geometry, p) && completion.piece_is_complete(p) {
            completion.clear_piece(geometry, p);
        }
        maybe_remove_piece_temp(file_map, locations, p)?;
    }

    recompute_boundary_pieces(file_map, fi);
    Ok(())
}

fn read_fragment_if(
    save: bool,
    file: &FileEntry,
    geometry: &Geometry,
    real_path: &PathBuf,
    p: u32,
) -> Result<Option<(u64, Vec<u8>)>, DndError> {
    if !save {
        return Ok(None);
    }
    let (piece_rel, file_rel, len) = overlap(file, geometry, p);
    if len == 0 {
        return Ok(None);
    }
    Ok(Some((piece_rel, read_at_path(real_path, file_rel, len as usize)?)))
}
