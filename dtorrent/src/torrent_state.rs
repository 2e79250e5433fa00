//! The live, mutable state of a single torrent: geometry, file/piece layout, completion
//! tracking, lifecycle flags, locations, policy, and the error slot. Distinct from
//! `torrent_parser::torrent::Torrent`, which is only the parsed, immutable metainfo.

use std::path::PathBuf;
use std::time::SystemTime;

use crate::collaborators::TorrentId;
use crate::completion::{Completion, Status};
use crate::config::cfg::Cfg;
use crate::file_locator::Locations;
use crate::file_map::FileMap;
use crate::geometry::{Geometry, GeometryError};
use crate::lifecycle::{IdleMode, LifecycleFlags, RatioMode};
use crate::stats::StatsAggregator;
use crate::torrent_parser::torrent::Torrent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Ok,
    TrackerWarning,
    TrackerError,
    LocalError,
}

/// The error taxonomy in ERROR HANDLING DESIGN: one slot, one kind, cleared by well-defined
/// events rather than by every caller resetting it by hand.
#[derive(Debug, Clone)]
pub struct ErrorSlot {
    pub kind: ErrorKind,
    pub message: String,
    pub tracker_url: Option<String>,
}

impl Default for ErrorSlot {
    fn default() -> Self {
        Self {
            kind: ErrorKind::Ok,
            message: String::new(),
            tracker_url: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Policy {
    pub down_speed_limit_bps: Option<u64>,
    pub up_speed_limit_bps: Option<u64>,
    pub use_session_limits: bool,
    pub ratio_mode: RatioMode,
    pub ratio_limit: f64,
    pub idle_mode: IdleMode,
    pub idle_limit_minutes: u64,
    pub max_peers: u32,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            down_speed_limit_bps: None,
            up_speed_limit_bps: None,
            use_session_limits: true,
            ratio_mode: RatioMode::Global,
            ratio_limit: 0.0,
            idle_mode: IdleMode::Global,
            idle_limit_minutes: 0,
            max_peers: 0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Counters {
    pub downloaded_ever: u64,
    pub uploaded_ever: u64,
    pub corrupt_ever: u64,
    pub downloaded_prev_session: u64,
    pub uploaded_prev_session: u64,
    pub corrupt_prev_session: u64,
}

#[derive(Debug)]
pub enum NewTorrentStateError {
    Geometry(GeometryError),
}

impl From<GeometryError> for NewTorrentStateError {
    fn from(e: GeometryError) -> Self {
        NewTorrentStateError::Geometry(e)
    }
}

pub struct TorrentState {
    pub id: TorrentId,
    pub geometry: Geometry,
    pub file_map: FileMap,
    pub completion: Completion,
    pub flags: LifecycleFlags,
    pub status: Status,
    pub locations: Locations,
    pub error: ErrorSlot,
    pub policy: Policy,
    pub counters: Counters,
    pub stats: StatsAggregator,
    pub info_name: String,
    pub info_rename: Option<String>,
    pub start_date: SystemTime,
    pub activity_date: SystemTime,
}

impl TorrentState {
    pub fn new(id: TorrentId, torrent: &Torrent, cfg: &Cfg) -> Result<Self, NewTorrentStateError> {
        let geometry = Geometry::new(torrent.length(), torrent.piece_length() as u64)?;
        let file_map = FileMap::init_file_pieces(&torrent.info, &geometry);
        let completion = Completion::new(&geometry);

        let incomplete_dir = if cfg.incomplete_directory.is_empty() {
            None
        } else {
            Some(PathBuf::from(&cfg.incomplete_directory))
        };
        let locations = Locations::new(
            PathBuf::from(&cfg.download_directory),
            incomplete_dir,
            PathBuf::from(&cfg.piece_temp_directory),
        );

        let mut policy = Policy::default();
        policy.ratio_limit = cfg.seed_ratio_limit;
        policy.idle_limit_minutes = cfg.seed_idle_limit_minutes;
        policy.max_peers = cfg.max_peers_per_torrent;

        let now = SystemTime::now();

        Ok(Self {
            id,
            geometry,
            file_map,
            completion,
            flags: LifecycleFlags::default(),
            status: Status::Leech,
            locations,
            error: ErrorSlot::default(),
            policy,
            counters: Counters::default(),
            stats: StatsAggregator::new(),
            info_name: torrent.name(),
            info_rename: None,
            start_date: now,
            activity_date: now,
        })
    }

    /// The single funnel for local errors: stores the kind, formats the message, drops any
    /// stale tracker-error state, logs, and flags the torrent to stop if it was running.
    pub fn set_local_error(&mut self, message: impl Into<String>) {
        self.error.kind = ErrorKind::LocalError;
        self.error.message = message.into();
        self.error.tracker_url = None;
        tracing::error!(torrent = self.id, message = %self.error.message, "local error");
        if self.flags.is_running {
            self.flags.is_stopping = true;
        }
    }

    pub fn set_tracker_warning(&mut self, message: impl Into<String>, tracker_url: String) {
        self.error.kind = ErrorKind::TrackerWarning;
        self.error.message = message.into();
        self.error.tracker_url = Some(tracker_url);
        tracing::warn!(torrent = self.id, message = %self.error.message, "tracker warning");
    }

    pub fn set_tracker_error(&mut self, message: impl Into<String>, tracker_url: String) {
        self.error.kind = ErrorKind::TrackerError;
        self.error.message = message.into();
        self.error.tracker_url = Some(tracker_url);
        tracing::warn!(torrent = self.id, message = %self.error.message, "tracker error");
    }

    pub fn clear_error(&mut self) {
        self.error = ErrorSlot::default();
    }

    /// Clears a stored tracker error/warning if its URL is no longer in the torrent's tracker
    /// set, per the propagation policy's `clear_error_if_tracker_removed`.
    pub fn clear_error_if_tracker_removed(&mut self, removed: &[String]) {
        if let Some(url) = &self.error.tracker_url {
            if removed.iter().any(|r| r == url) {
                self.clear_error();
            }
        }
    }

    pub fn touch_activity(&mut self) {
        self.activity_date = SystemTime::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent_parser::info::Info;

    fn test_cfg() -> Cfg {
        Cfg {
            tcp_port: 6881,
            log_directory: "./log".to_string(),
            download_directory: "./download".to_string(),
            pipelining_size: 5,
            read_write_seconds_timeout: 120,
            max_peers_per_torrent: 50,
            max_log_file_kb_size: 1000,
            piece_temp_directory: "./piece_temp".to_string(),
            incomplete_directory: String::new(),
            seed_ratio_limit: 2.0,
            seed_idle_limit_minutes: 30,
        }
    }

    fn test_torrent() -> Torrent {
        Torrent {
            announce_url: "http://example.com/announce".to_string(),
            announce_list: Vec::new(),
            info: Info {
                length: 100,
                name: "movie.mkv".to_string(),
                piece_length: 40,
                pieces: Vec::new(),
                files: Vec::new(),
            },
            info_hash: "0".repeat(40),
        }
    }

    #[test]
    fn test_new_torrent_state_derives_geometry_and_policy() {
        let cfg = test_cfg();
        let torrent = test_torrent();
        let state = TorrentState::new(1, &torrent, &cfg).unwrap();
        assert_eq!(state.geometry.piece_count, 3);
        assert_eq!(state.policy.ratio_limit, 2.0);
        assert_eq!(state.policy.idle_limit_minutes, 30);
        assert!(state.locations.incomplete_dir.is_none());
    }

    #[test]
    fn test_set_local_error_stops_running_torrent() {
        let cfg = test_cfg();
        let torrent = test_torrent();
        let mut state = TorrentState::new(1, &torrent, &cfg).unwrap();
        state.flags.is_running = true;
        state.set_local_error("expected file not found");
        assert_eq!(state.error.kind, ErrorKind::LocalError);
        assert!(state.flags.is_stopping);
        assert!(state.error.tracker_url.is_none());
    }

    #[test]
    fn test_clear_error_if_tracker_removed() {
        let cfg = test_cfg();
        let torrent = test_torrent();
        let mut state = TorrentState::new(1, &torrent, &cfg).unwrap();
        state.set_tracker_error("connection refused", "http://bad.example/ann".to_string());
        state.clear_error_if_tracker_removed(&["http://other.example/ann".to_string()]);
        assert_eq!(state.error.kind, ErrorKind::TrackerError);

        state.clear_error_if_tracker_removed(&["http://bad.example/ann".to_string()]);
        assert_eq!(state.error.kind, ErrorKind::Ok);
    }
}
