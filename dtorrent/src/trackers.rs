//! Tracker Set Editor: validates a proposed tracker list, sorts it by tier, and atomically
//! rewrites the torrent's saved metainfo file.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use bencoder::bencode::{Bencode, ToBencode};

use crate::collaborators::{Announcer, TorrentId};
use crate::torrent_parser::torrent::Torrent;

/// A tracker URL, parsed into protocol/host/port/endpoint. `udp://` is accepted for editing and
/// persistence purposes even though this engine never speaks the UDP tracker protocol itself.
#[derive(Debug, PartialEq, Clone)]
pub struct TrackerUrl {
    pub protocol: ConnectionProtocol,
    pub host: String,
    pub port: u32,
    pub endpoint: String,
}

#[derive(Debug, PartialEq, Clone)]
pub enum ConnectionProtocol {
    Http,
    Https,
    Udp,
}

#[derive(Debug, PartialEq)]
pub enum TrackerUrlError {
    InvalidTrackerURL,
    UnsupportedConnectionProtocol,
    InvalidPortNumber,
}

impl TrackerUrl {
    pub fn parse(url: &str) -> Result<Self, TrackerUrlError> {
        let (url_without_protocol, protocol) = Self::identify_and_remove_protocol(url)?;
        let (url_without_endpoint, endpoint) =
            Self::identify_and_remove_endpoint(&url_without_protocol)?;
        let host = Self::identify_host(&url_without_endpoint)?;

        let port: u32 = if url_without_endpoint.contains(':') {
            Self::identify_port(&url_without_endpoint)?
        } else {
            match protocol {
                ConnectionProtocol::Https => 443,
                ConnectionProtocol::Http => 80,
                ConnectionProtocol::Udp => 80,
            }
        };

        Ok(Self {
            protocol,
            host,
            port,
            endpoint,
        })
    }

    fn identify_and_remove_protocol(url: &str) -> Result<(String, ConnectionProtocol), TrackerUrlError> {
        let mut splitted_url = url.split("://");

        let protocol = match splitted_url.next() {
            Some("http") => ConnectionProtocol::Http,
            Some("https") => ConnectionProtocol::Https,
            Some("udp") => ConnectionProtocol::Udp,
            Some(_) => return Err(TrackerUrlError::UnsupportedConnectionProtocol),
            None => return Err(TrackerUrlError::InvalidTrackerURL),
        };

        match splitted_url.next() {
            Some(rest) => Ok((rest.to_string(), protocol)),
            None => Err(TrackerUrlError::InvalidTrackerURL),
        }
    }

    fn identify_and_remove_endpoint(url: &str) -> Result<(String, String), TrackerUrlError> {
        let mut splitted_url = url.split('/');

        let url_without_endpoint = match splitted_url.next() {
            Some(u) => u,
            None => return Err(TrackerUrlError::InvalidTrackerURL),
        };

        let endpoint = splitted_url.collect::<Vec<_>>().join("/");
        Ok((url_without_endpoint.to_string(), endpoint))
    }

    fn identify_host(url: &str) -> Result<String, TrackerUrlError> {
        match url.split(':').next() {
            Some(host) if !host.is_empty() => Ok(host.to_string()),
            _ => Err(TrackerUrlError::InvalidTrackerURL),
        }
    }

    fn identify_port(url: &str) -> Result<u32, TrackerUrlError> {
        match url.split(':').last() {
            Some(port) => port.parse().map_err(|_| TrackerUrlError::InvalidPortNumber),
            None => Err(TrackerUrlError::InvalidTrackerURL),
        }
    }
}

#[derive(Debug)]
pub enum SetTrackersError {
    Empty,
    InvalidUrl(String, TrackerUrlError),
    ReparseFailed,
    Io(std::io::Error),
}

impl From<std::io::Error> for SetTrackersError {
    fn from(e: std::io::Error) -> Self {
        SetTrackersError::Io(e)
    }
}

/// Validates every URL, then stable-sorts `(tier, url)` pairs by tier (ties keep their
/// original relative order via the secondary index key).
fn validate_and_sort(proposed: &[(u32, String)]) -> Result<Vec<(u32, String)>, SetTrackersError> {
    if proposed.is_empty() {
        return Err(SetTrackersError::Empty);
    }
    for (tier, url) in proposed {
        TrackerUrl::parse(url).map_err(|e| SetTrackersError::InvalidUrl(url.clone(), e))?;
        let _ = tier;
    }

    let mut indexed: Vec<(usize, u32, String)> = proposed
        .iter()
        .cloned()
        .enumerate()
        .map(|(i, (t, u))| (i, t, u))
        .collect();
    indexed.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));
    Ok(indexed.into_iter().map(|(_, t, u)| (t, u)).collect())
}

fn group_by_tier(sorted: Vec<(u32, String)>) -> Vec<Vec<String>> {
    let mut groups: Vec<Vec<String>> = Vec::new();
    let mut current_tier: Option<u32> = None;
    for (tier, url) in sorted {
        if current_tier != Some(tier) {
            groups.push(Vec::new());
            current_tier = Some(tier);
        }
        groups.last_mut().expect("just pushed").push(url);
    }
    groups
}

/// Replaces `torrent`'s tracker list: validates, re-sorts by tier, atomically rewrites the
/// metainfo file at `metainfo_path`, re-parsing the candidate as a sanity check before
/// committing. Clears the current tracker error if its URL is no longer present, and resets
/// the announcer for this torrent.
pub fn set_trackers(
    torrent: &mut Torrent,
    metainfo_path: &Path,
    proposed: &[(u32, String)],
    current_error_tracker: Option<&str>,
    announcer: &mut impl Announcer,
    torrent_id: TorrentId,
) -> Result<(), SetTrackersError> {
    let sorted = validate_and_sort(proposed)?;
    let old_urls: HashSet<String> = torrent
        .tiers()
        .into_iter()
        .flatten()
        .collect();

    let groups = group_by_tier(sorted);
    let new_announce = groups[0][0].clone();
    let new_announce_list = if proposed.len() > 1 { groups.clone() } else { Vec::new() };

    let mut candidate = torrent.clone();
    candidate.announce_url = new_announce.clone();
    candidate.announce_list = new_announce_list.clone();

    let encoded = Bencode::encode(&candidate);
    let decoded = Bencode::decode(&encoded).map_err(|_| SetTrackersError::ReparseFailed)?;
    Torrent::from(decoded).map_err(|_| SetTrackersError::ReparseFailed)?;

    let tmp_path = metainfo_path.with_extension("tmp");
    fs::write(&tmp_path, &encoded)?;
    fs::rename(&tmp_path, metainfo_path)?;

    torrent.announce_url = new_announce;
    torrent.announce_list = new_announce_list;

    let new_urls: HashSet<String> = torrent.tiers().into_iter().flatten().collect();
    let removed: Vec<String> = old_urls.difference(&new_urls).cloned().collect();
    if let Some(err_url) = current_error_tracker {
        if removed.iter().any(|u| u == err_url) {
            announcer.clear_tracker_errors(torrent_id, &removed);
        }
    }

    announcer.unregister(torrent_id);
    announcer.register(torrent_id, &torrent.tiers());

    Ok(())
}
