//! Start/stop/verify/rename/move/remove state machine for a single torrent.
//!
//! States are derived from a handful of flags rather than stored as one enum, mirroring the
//! way the completion view and the verifier queue are the actual sources of truth.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::collaborators::{Announcer, Cache, PeerManager, TorrentId, VerifierWorker};
use crate::completion::{Completion, Status};
use crate::file_locator::Locations;
use crate::file_map::FileMap;
use crate::geometry::Geometry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Stopped,
    CheckWait,
    CheckNow,
    Download,
    Seed,
}

#[derive(Debug, Clone, Default)]
pub struct LifecycleFlags {
    pub is_running: bool,
    pub is_stopping: bool,
    pub is_deleting: bool,
    pub start_after_verify: bool,
    pub is_dirty: bool,
    pub finished_seeding_by_idle: bool,
    pub verify_queued: bool,
    pub verifying: bool,
}

/// Derives the reported activity from lifecycle flags and the completion status.
pub fn activity(flags: &LifecycleFlags, status: Status) -> Activity {
    if flags.verifying {
        return Activity::CheckNow;
    }
    if flags.verify_queued {
        return Activity::CheckWait;
    }
    if !flags.is_running {
        return Activity::Stopped;
    }
    match status {
        Status::Leech => Activity::Download,
        Status::PartialSeed | Status::Seed => Activity::Seed,
    }
}

/// `stopped → check_now | check_wait`. Queues verification; actual hash-checking happens on
/// the verifier worker's own thread.
pub fn verify(
    flags: &mut LifecycleFlags,
    verifier: &mut impl VerifierWorker,
    torrent: TorrentId,
    start_after: bool,
) {
    flags.start_after_verify = start_after;
    flags.verify_queued = true;
    verifier.enqueue(torrent, start_after);
}

/// Called by the verifier worker when it picks the torrent up.
pub fn verify_begin(flags: &mut LifecycleFlags) {
    flags.verify_queued = false;
    flags.verifying = true;
}

/// `check_now → stopped | download | seed`, branching on `start_after_verify`.
pub fn verify_complete(
    flags: &mut LifecycleFlags,
    peers: &mut impl PeerManager,
    announcer: &mut impl Announcer,
    torrent: TorrentId,
) {
    flags.verifying = false;
    if flags.start_after_verify {
        start(flags, peers, announcer, torrent, false);
    }
}

/// `stopped → download | seed`. `seed_ratio_done` lets an explicit user start override a
/// previously-hit ratio limit.
pub fn start(
    flags: &mut LifecycleFlags,
    peers: &mut impl PeerManager,
    announcer: &mut impl Announcer,
    torrent: TorrentId,
    seed_ratio_done: bool,
) {
    if flags.is_running {
        return;
    }
    if seed_ratio_done {
        flags.finished_seeding_by_idle = false;
    }
    flags.is_running = true;
    flags.is_stopping = false;
    flags.is_dirty = true;
    peers.register(torrent);
    announcer.announce_started(torrent);
}

/// `* → stopped`. Idempotent: a second call while already stopped/stopping is a no-op.
pub fn stop(
    flags: &mut LifecycleFlags,
    peers: &mut impl PeerManager,
    announcer: &mut impl Announcer,
    verifier: &mut impl VerifierWorker,
    cache: &mut impl Cache,
    torrent: TorrentId,
) {
    if !flags.is_running && !flags.verify_queued && !flags.verifying {
        return;
    }
    flags.is_stopping = true;
    verifier.remove(torrent);
    peers.stop(torrent);
    announcer.announce_stopped(torrent);
    cache.close_fds(torrent);
    flags.is_running = false;
    flags.is_stopping = false;
    flags.is_dirty = true;
}

#[derive(Debug)]
pub enum RecheckEvent {
    StatusUnchanged,
    BecameSeed,
    BecameLeech,
}

/// If the computed status differs from `stored`, applies the totally-ordered transition:
/// status change → announcer notified → cache/fds closed → physical relocation out of
/// `incomplete_dir` when the torrent just became a seed. Returns the new status and what
/// changed.
#[allow(clippy::too_many_arguments)]
pub fn recheck_completeness(
    stored: &mut Status,
    was_running: bool,
    geometry: &Geometry,
    file_map: &FileMap,
    completion: &Completion,
    locations: &mut Locations,
    peers: &mut impl PeerManager,
    announcer: &mut impl Announcer,
    verifier: &mut impl VerifierWorker,
    torrent: TorrentId,
) -> Result<RecheckEvent, SetLocationError> {
    let computed = completion.status(geometry, file_map);
    if computed == *stored {
        return Ok(RecheckEvent::StatusUnchanged);
    }

    let became_seed = matches!(computed, Status::Seed | Status::PartialSeed)
        && matches!(stored, Status::Leech);
    let is_seed = matches!(computed, Status::Seed | Status::PartialSeed);
    *stored = computed;

    if became_seed && was_running {
        peers.clear_interested_flags(torrent);
        peers.evaluate_seed_limit(torrent);
    }
    announcer.announce_completed(torrent);

    if is_seed && locations.current_dir == crate::file_locator::Base::Incomplete {
        let download_dir = locations.download_dir.clone();
        set_location(
            file_map,
            locations,
            &download_dir,
            true,
            verifier,
            torrent,
            |_moved, _total| {},
        )?;
    }

    Ok(if became_seed {
        RecheckEvent::BecameSeed
    } else {
        RecheckEvent::BecameLeech
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatioMode {
    Global,
    Single,
    Unlimited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleMode {
    Global,
    Single,
    Unlimited,
}

pub fn seed_ratio_applies(is_seed: bool, mode: RatioMode, session_ratio_limited: bool) -> bool {
    is_seed
        && match mode {
            RatioMode::Single => true,
            RatioMode::Global => session_ratio_limited,
            RatioMode::Unlimited => false,
        }
}

/// Bytes still needed to reach the seed-ratio goal; 0 once the goal is met.
pub fn seed_ratio_bytes_left(
    desired_ratio: f64,
    downloaded_ever: u64,
    size_when_done: u64,
    uploaded_ever: u64,
) -> u64 {
    let baseline = if downloaded_ever > 0 {
        downloaded_ever
    } else {
        size_when_done
    };
    let goal = (desired_ratio * baseline as f64) as u64;
    goal.saturating_sub(uploaded_ever)
}

/// `now - max(start_date, activity_date) ≥ idle_limit_minutes * 60`.
pub fn idle_timeout_hit(
    now: SystemTime,
    start_date: SystemTime,
    activity_date: SystemTime,
    idle_limit_minutes: u64,
) -> bool {
    let baseline = start_date.max(activity_date);
    match now.duration_since(baseline) {
        Ok(elapsed) => elapsed.as_secs() >= idle_limit_minutes * 60,
        Err(_) => false,
    }
}

#[derive(Debug)]
pub enum SetLocationError {
    Io(std::io::Error),
}

impl From<std::io::Error> for SetLocationError {
    fn from(e: std::io::Error) -> Self {
        SetLocationError::Io(e)
    }
}

/// `mkdir` the new directory, then move every file that actually exists at its old location,
/// reporting `(bytes_moved, total_size)` progress via `progress`.
pub fn set_location(
    file_map: &FileMap,
    locations: &mut Locations,
    new_dir: &Path,
    move_from_old: bool,
    verifier: &mut impl VerifierWorker,
    torrent: TorrentId,
    mut progress: impl FnMut(u64, u64),
) -> Result<(), SetLocationError> {
    fs::create_dir_all(new_dir)?;

    let old_root = locations
        .base_dir(locations.current_dir)
        .unwrap_or(&locations.download_dir)
        .to_path_buf();

    if old_root == new_dir && locations.download_dir == new_dir {
        return Ok(());
    }

    verifier.remove(torrent);

    let total_size: u64 = file_map.files.iter().map(|f| f.length).sum();
    let mut moved = 0u64;

    for file in &file_map.files {
        let old_path = locations.find_file(file).map(|(p, _)| p);
        if let Some(old_path) = old_path {
            let rel = old_path.strip_prefix(&old_root).unwrap_or(&old_path);
            let new_path = new_dir.join(rel);
            if move_from_old && old_path != new_path {
                if let Some(parent) = new_path.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::rename(&old_path, &new_path)?;
            }
        }
        moved += file.length;
        progress(moved, total_size);
    }

    if move_from_old {
        fs::remove_dir_all(&old_root).ok();
        locations.download_dir = new_dir.to_path_buf();
        locations.incomplete_dir = None;
        locations.current_dir = crate::file_locator::Base::Download;
    }

    Ok(())
}

#[derive(Debug)]
pub enum RenameError {
    EmptyOrDotName,
    ContainsPathSeparator,
    SameAsCurrent,
    DestinationExists,
    Io(std::io::Error),
}

impl From<std::io::Error> for RenameError {
    fn from(e: std::io::Error) -> Self {
        RenameError::Io(e)
    }
}

/// Renames the torrent's top-level name: the shared root directory for multi-file torrents, or
/// the single file itself for single-file ones.
pub fn rename(
    file_map: &mut FileMap,
    locations: &Locations,
    info_name: &str,
    info_rename: &mut Option<String>,
    new_top: &str,
) -> Result<(), RenameError> {
    if new_top.is_empty() || new_top == "." || new_top == ".." {
        return Err(RenameError::EmptyOrDotName);
    }
    if new_top.contains(std::path::MAIN_SEPARATOR) || new_top.contains('/') {
        return Err(RenameError::ContainsPathSeparator);
    }
    let current_top = info_rename.as_deref().unwrap_or(info_name);
    if new_top == current_top {
        return Err(RenameError::SameAsCurrent);
    }

    let base = locations
        .base_dir(locations.current_dir)
        .unwrap_or(&locations.download_dir);
    let old_path = base.join(current_top);
    let new_path = base.join(new_top);

    if new_path.exists() {
        return Err(RenameError::DestinationExists);
    }

    if old_path.exists() {
        fs::rename(&old_path, &new_path)?;
    }

    for file in &mut file_map.files {
        if let Some(first) = file.name.first_mut() {
            *first = new_top.to_string();
        }
    }

    *info_rename = if new_top == info_name {
        None
    } else {
        Some(new_top.to_string())
    };

    Ok(())
}

#[derive(Debug)]
pub struct RecentlyRemoved {
    pub id: TorrentId,
    pub removed_at: SystemTime,
}

/// Marks the torrent for removal; actual deletion of local data (if requested) happens on the
/// event thread via the local-data remover.
pub fn remove(flags: &mut LifecycleFlags, torrent: TorrentId) -> RecentlyRemoved {
    flags.is_deleting = true;
    RecentlyRemoved {
        id: torrent,
        removed_at: SystemTime::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct NoopPeers;
    impl PeerManager for NoopPeers {
        fn register(&mut self, _t: TorrentId) {}
        fn unregister(&mut self, _t: TorrentId) {}
        fn stop(&mut self, _t: TorrentId) {}
        fn clear_interested_flags(&mut self, _t: TorrentId) {}
        fn evaluate_seed_limit(&mut self, _t: TorrentId) {}
    }

    struct NoopAnnouncer;
    impl Announcer for NoopAnnouncer {
        fn register(&mut self, _t: TorrentId, _tiers: &[Vec<String>]) {}
        fn unregister(&mut self, _t: TorrentId) {}
        fn announce_started(&mut self, _t: TorrentId) {}
        fn announce_stopped(&mut self, _t: TorrentId) {}
        fn announce_completed(&mut self, _t: TorrentId) {}
        fn clear_tracker_errors(&mut self, _t: TorrentId, _removed: &[String]) {}
    }

    struct NoopVerifier;
    impl VerifierWorker for NoopVerifier {
        fn enqueue(&mut self, _t: TorrentId, _start_after: bool) {}
        fn remove(&mut self, _t: TorrentId) {}
    }

    struct NoopCache;
    impl Cache for NoopCache {
        fn flush_piece(&mut self, _t: TorrentId, _piece: u32) -> std::io::Result<()> {
            Ok(())
        }
        fn is_fd_open(&self, _t: TorrentId, _file_index: usize) -> bool {
            false
        }
        fn close_fds(&mut self, _t: TorrentId) {}
    }

    #[test]
    fn test_activity_derivation() {
        let mut flags = LifecycleFlags::default();
        assert_eq!(activity(&flags, Status::Leech), Activity::Stopped);
        flags.is_running = true;
        assert_eq!(activity(&flags, Status::Leech), Activity::Download);
        assert_eq!(activity(&flags, Status::Seed), Activity::Seed);
        flags.verify_queued = true;
        assert_eq!(activity(&flags, Status::Leech), Activity::CheckWait);
        flags.verifying = true;
        assert_eq!(activity(&flags, Status::Leech), Activity::CheckNow);
    }

    #[test]
    fn test_start_stop_idempotent() {
        let mut flags = LifecycleFlags::default();
        let mut peers = NoopPeers;
        let mut announcer = NoopAnnouncer;
        let mut verifier = NoopVerifier;
        let mut cache = NoopCache;

        start(&mut flags, &mut peers, &mut announcer, 1, false);
        assert!(flags.is_running);
        start(&mut flags, &mut peers, &mut announcer, 1, false);
        assert!(flags.is_running);

        stop(&mut flags, &mut peers, &mut announcer, &mut verifier, &mut cache, 1);
        assert!(!flags.is_running);
        stop(&mut flags, &mut peers, &mut announcer, &mut verifier, &mut cache, 1);
        assert!(!flags.is_running);
    }

    #[test]
    fn test_seed_ratio_bytes_left() {
        assert_eq!(seed_ratio_bytes_left(2.0, 100, 50, 150), 50);
        assert_eq!(seed_ratio_bytes_left(2.0, 0, 50, 100), 0);
    }

    #[test]
    fn test_idle_timeout() {
        let start = SystemTime::now() - Duration::from_secs(3600);
        let activity = start;
        assert!(idle_timeout_hit(SystemTime::now(), start, activity, 30));
        assert!(!idle_timeout_hit(SystemTime::now(), start, activity, 120));
    }

    #[test]
    fn test_rename_rejects_bad_names() {
        let g = Geometry::new(10, 10).unwrap();
        let info = crate::torrent_parser::info::Info {
            length: 10,
            name: "movie.mkv".to_string(),
            piece_length: 10,
            pieces: Vec::new(),
            files: Vec::new(),
        };
        let mut fm = FileMap::init_file_pieces(&info, &g);
        let locations = Locations::new(PathBuf::from("/tmp/dnr"), None, PathBuf::from("/tmp/dnr/pt"));
        let mut rename_field = None;

        assert!(matches!(
            rename(&mut fm, &locations, "movie.mkv", &mut rename_field, ""),
            Err(RenameError::EmptyOrDotName)
        ));
        assert!(matches!(
            rename(&mut fm, &locations, "movie.mkv", &mut rename_field, "a/b"),
            Err(RenameError::ContainsPathSeparator)
        ));
        assert!(matches!(
            rename(&mut fm, &locations, "movie.mkv", &mut rename_field, "movie.mkv"),
            Err(RenameError::SameAsCurrent)
        ));
    }

    #[test]
    fn test_seed_ratio_applies_modes() {
        assert!(seed_ratio_applies(true, RatioMode::Single, false));
        assert!(!seed_ratio_applies(true, RatioMode::Unlimited, true));
        assert!(seed_ratio_applies(true, RatioMode::Global, true));
        assert!(!seed_ratio_applies(true, RatioMode::Global, false));
        assert!(!seed_ratio_applies(false, RatioMode::Single, true));
    }

    #[test]
    fn test_recheck_completeness_moves_files_out_of_incomplete_dir() {
        use std::fs;

        let dir = std::env::temp_dir().join("dnr_recheck_move");
        let download_dir = dir.join("download");
        let incomplete_dir = dir.join("incomplete");
        fs::create_dir_all(&download_dir).unwrap();
        fs::create_dir_all(&incomplete_dir).unwrap();
        fs::write(incomplete_dir.join("movie.mkv"), b"0123456789").unwrap();

        let g = Geometry::new(10, 10).unwrap();
        let info = crate::torrent_parser::info::Info {
            length: 10,
            name: "movie.mkv".to_string(),
            piece_length: 10,
            pieces: Vec::new(),
            files: Vec::new(),
        };
        let file_map = FileMap::init_file_pieces(&info, &g);
        let mut completion = Completion::new(&g);
        completion.mark_piece_complete(&g, 0);

        let mut locations = Locations::new(
            download_dir.clone(),
            Some(incomplete_dir.clone()),
            dir.join("pt"),
        );
        locations.current_dir = crate::file_locator::Base::Incomplete;

        let mut stored = Status::Leech;
        let mut peers = NoopPeers;
        let mut announcer = NoopAnnouncer;
        let mut verifier = NoopVerifier;

        let event = recheck_completeness(
            &mut stored,
            true,
            &g,
            &file_map,
            &completion,
            &mut locations,
            &mut peers,
            &mut announcer,
            &mut verifier,
            1,
        )
        .unwrap();

        assert!(matches!(event, RecheckEvent::BecameSeed));
        assert!(download_dir.join("movie.mkv").exists());
        assert!(!incomplete_dir.join("movie.mkv").exists());
        assert_eq!(locations.current_dir, crate::file_locator::Base::Download);
        assert!(locations.incomplete_dir.is_none());

        fs::remove_dir_all(&dir).ok();
    }
}
