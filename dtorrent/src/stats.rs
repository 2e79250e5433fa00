//! Produces the public `stat` snapshot: speeds, smoothed ETA, seed-ratio progress, and swarm
//! size estimates, gated by a one-second cache so repeated callers within the same tick get a
//! consistent view without re-querying every collaborator.

use std::time::{Duration, Instant};

use crate::collaborators::{BandwidthScheduler, Direction, TorrentId};
use crate::completion::Completion;
use crate::file_map::FileMap;
use crate::geometry::Geometry;
use crate::lifecycle::{self, Activity, LifecycleFlags, RatioMode};

const MIN_ETA_SPEED_KBPS: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Eta {
    NotAvailable,
    Unknown,
    Seconds(u64),
}

/// Exponentially-smoothed speed estimate, reset when the sampling gap grows too large.
#[derive(Debug, Clone, Default)]
pub struct SmoothedSpeed {
    pub kbps: f64,
    last_sample: Option<Instant>,
}

impl SmoothedSpeed {
    pub fn update(&mut self, current_kbps: f64, now: Instant) {
        let elapsed = self.last_sample.map(|last| now.duration_since(last).as_secs_f64());
        match elapsed {
            None => {
                self.kbps = current_kbps;
                self.last_sample = Some(now);
            }
            Some(e) if e >= 4.0 => {
                self.kbps = current_kbps;
                self.last_sample = Some(now);
            }
            Some(e) if e >= 0.8 => {
                self.kbps = (self.kbps * 4.0 + current_kbps) / 5.0;
                self.last_sample = Some(now);
            }
            _ => {}
        }
    }
}

fn eta_from(left: u64, desired_available: u64, smoothed_kbps: f64) -> Eta {
    if left > desired_available {
        return Eta::NotAvailable;
    }
    if smoothed_kbps < MIN_ETA_SPEED_KBPS {
        return Eta::Unknown;
    }
    let bytes_per_sec = smoothed_kbps * 1024.0;
    Eta::Seconds((left as f64 / bytes_per_sec).ceil() as u64)
}

/// Bytes still needed to complete, bounded by what's actually reachable right now: if there are
/// usable seeds, everything left is reachable; otherwise only the missing bytes of non-DND
/// pieces some connected peer is known to have.
pub fn desired_available(
    completion: &Completion,
    geometry: &Geometry,
    file_map: &FileMap,
    has_usable_seeds: bool,
    any_peers_connected: bool,
    peer_has_piece: impl Fn(u32) -> bool,
) -> u64 {
    let left = completion.left_until_done(geometry, file_map);
    if has_usable_seeds {
        return left;
    }
    if !any_peers_connected {
        return 0;
    }
    (0..geometry.piece_count)
        .filter(|&p| !file_map.pieces[p as usize].dnd && !completion.piece_is_complete(p))
        .filter(|&p| peer_has_piece(p))
        .map(|p| completion.missing_bytes_in_piece(geometry, p))
        .sum()
}

pub fn seed_ratio_percent_done(applies: bool, finished: bool, goal: u64, left: u64) -> f64 {
    if !applies || finished {
        return 1.0;
    }
    if goal == 0 {
        return 0.0;
    }
    (goal - left.min(goal)) as f64 / goal as f64
}

/// Per-tracker peer counts take `max` across trackers (the most optimistic tracker wins), then
/// `max` again with the currently-connected count.
pub fn swarm_estimate(tracker_counts: &[u32], connected: u32) -> u32 {
    tracker_counts.iter().copied().max().unwrap_or(0).max(connected)
}

#[derive(Debug, Clone)]
pub struct Stat {
    pub activity: Activity,
    pub download_speed_kbps: f64,
    pub upload_speed_kbps: f64,
    pub eta: Eta,
    pub seed_eta: Eta,
    pub percent_complete: f64,
    pub percent_done: f64,
    pub have_valid: u64,
    pub have_total: u64,
    pub size_when_done: u64,
    pub left_until_done: u64,
    pub seed_ratio_percent_done: f64,
    pub swarm_seeders: u32,
    pub swarm_leechers: u32,
}

/// Holds the smoothing state and the one-second result cache across calls to `stat()`.
#[derive(Debug, Default)]
pub struct StatsAggregator {
    eta_dl: SmoothedSpeed,
    eta_ul: SmoothedSpeed,
    cached: Option<(Instant, Stat)>,
}

#[allow(clippy::too_many_arguments)]
pub struct StatInputs<'a> {
    pub geometry: &'a Geometry,
    pub file_map: &'a FileMap,
    pub completion: &'a Completion,
    pub flags: &'a LifecycleFlags,
    pub status: crate::completion::Status,
    pub ratio_mode: RatioMode,
    pub session_ratio_limited: bool,
    pub desired_ratio: f64,
    pub downloaded_ever: u64,
    pub uploaded_ever: u64,
    pub has_usable_seeds: bool,
    pub any_peers_connected: bool,
    pub peer_has_piece: &'a dyn Fn(u32) -> bool,
    pub tracker_seeders: &'a [u32],
    pub tracker_leechers: &'a [u32],
    pub connected_seeders: u32,
    pub connected_leechers: u32,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Computes a fresh snapshot. Callers wanting the 1-second cache gate should use
    /// `stat_cached` instead.
    pub fn stat(
        &mut self,
        bandwidth: &impl BandwidthScheduler,
        torrent: TorrentId,
        now: Instant,
        inputs: StatInputs,
    ) -> Stat {
        let dl_kbps = bandwidth.piece_speed_kbps(torrent, Direction::Down)
            + bandwidth.webseed_download_speed_kbps(torrent);
        let ul_kbps = bandwidth.piece_speed_kbps(torrent, Direction::Up);

        self.eta_dl.update(dl_kbps, now);
        self.eta_ul.update(ul_kbps, now);

        let left_until_done = inputs.completion.left_until_done(inputs.geometry, inputs.file_map);
        let size_when_done = inputs.completion.size_when_done(inputs.geometry, inputs.file_map);
        let available = desired_available(
            inputs.completion,
            inputs.geometry,
            inputs.file_map,
            inputs.has_usable_seeds,
            inputs.any_peers_connected,
            inputs.peer_has_piece,
        );
        let eta = eta_from(left_until_done, available, self.eta_dl.kbps);

        let is_seed = matches!(
            inputs.status,
            crate::completion::Status::Seed | crate::completion::Status::PartialSeed
        );
        let applies = lifecycle::seed_ratio_applies(is_seed, inputs.ratio_mode, inputs.session_ratio_limited);
        let ratio_left = lifecycle::seed_ratio_bytes_left(
            inputs.desired_ratio,
            inputs.downloaded_ever,
            size_when_done,
            inputs.uploaded_ever,
        );
        let baseline = if inputs.downloaded_ever > 0 {
            inputs.downloaded_ever
        } else {
            size_when_done
        };
        let goal = (inputs.desired_ratio * baseline as f64) as u64;
        let finished = ratio_left == 0;
        let seed_eta = if applies {
            eta_from(ratio_left, ratio_left, self.eta_ul.kbps)
        } else {
            Eta::NotAvailable
        };

        let stat = Stat {
            activity: lifecycle::activity(inputs.flags, inputs.status),
            download_speed_kbps: dl_kbps,
            upload_speed_kbps: ul_kbps,
            eta,
            seed_eta,
            percent_complete: inputs.completion.percent_complete(inputs.geometry),
            percent_done: inputs.completion.percent_done(inputs.geometry, inputs.file_map),
            have_valid: inputs.completion.have_valid(inputs.geometry),
            have_total: inputs.completion.have_total(inputs.geometry),
            size_when_done,
            left_until_done,
            seed_ratio_percent_done: seed_ratio_percent_done(applies, finished, goal, ratio_left),
            swarm_seeders: swarm_estimate(inputs.tracker_seeders, inputs.connected_seeders),
            swarm_leechers: swarm_estimate(inputs.tracker_leechers, inputs.connected_leechers),
        };

        self.cached = Some((now, stat.clone()));
        stat
    }

    /// Returns the cached snapshot if the last `stat()` ran within the same second; otherwise
    /// computes a fresh one.
    pub fn stat_cached(
        &mut self,
        bandwidth: &impl BandwidthScheduler,
        torrent: TorrentId,
        now: Instant,
        inputs: StatInputs,
    ) -> Stat {
        if let Some((last, cached)) = &self.cached {
            if now.duration_since(*last) < Duration::from_secs(1) {
                return cached.clone();
            }
        }
        self.stat(bandwidth, torrent, now, inputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smoothed_speed_resets_after_long_gap() {
        let mut speed = SmoothedSpeed::default();
        let t0 = Instant::now();
        speed.update(100.0, t0);
        assert_eq!(speed.kbps, 100.0);

        let t1 = t0 + Duration::from_secs(5);
        speed.update(10.0, t1);
        assert_eq!(speed.kbps, 10.0);
    }

    #[test]
    fn test_smoothed_speed_exponential_mix_in_window() {
        let mut speed = SmoothedSpeed::default();
        let t0 = Instant::now();
        speed.update(100.0, t0);
        let t1 = t0 + Duration::from_millis(1500);
        speed.update(0.0, t1);
        assert!((speed.kbps - 80.0).abs() < 1e-6);
    }

    #[test]
    fn test_smoothed_speed_ignores_samples_too_close_together() {
        let mut speed = SmoothedSpeed::default();
        let t0 = Instant::now();
        speed.update(100.0, t0);
        let t1 = t0 + Duration::from_millis(200);
        speed.update(0.0, t1);
        assert_eq!(speed.kbps, 100.0);
    }

    #[test]
    fn test_eta_not_available_when_left_exceeds_available() {
        assert_eq!(eta_from(1000, 500, 50.0), Eta::NotAvailable);
    }

    #[test]
    fn test_eta_unknown_below_minimum_speed() {
        assert_eq!(eta_from(1000, 1000, 0.5), Eta::Unknown);
    }

    #[test]
    fn test_eta_seconds() {
        assert_eq!(eta_from(1024, 1024, 1.0), Eta::Seconds(1));
    }

    #[test]
    fn test_swarm_estimate_takes_max_not_sum() {
        assert_eq!(swarm_estimate(&[3, 7, 2], 5), 7);
        assert_eq!(swarm_estimate(&[3, 7, 2], 20), 20);
        assert_eq!(swarm_estimate(&[], 0), 0);
    }

    #[test]
    fn test_seed_ratio_percent_done() {
        assert_eq!(seed_ratio_percent_done(false, false, 100, 50), 1.0);
        assert_eq!(seed_ratio_percent_done(true, true, 100, 0), 1.0);
        assert_eq!(seed_ratio_percent_done(true, false, 0, 0), 0.0);
        assert!((seed_ratio_percent_done(true, false, 100, 40) - 0.6).abs() < 1e-9);
    }
}
