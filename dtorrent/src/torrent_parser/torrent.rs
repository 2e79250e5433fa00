use std::fmt::Write;
use std::{collections::BTreeMap, num::ParseIntError};

use sha1::{Digest, Sha1};

use bencoder::bencode::{Bencode, ToBencode};

use super::info::{FromInfoError, Info};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Torrent {
    pub announce_url: String,
    /// Tracker tiers, parsed from `announce-list` (BEP12); empty when the torrent only carries
    /// a plain `announce` key.
    pub announce_list: Vec<Vec<String>>,
    pub info: Info,
    pub info_hash: String,
}

#[derive(Debug, PartialEq)]
pub enum FromTorrentError {
    MissingAnnounce,
    MissingInfo,
    FromInfoError(FromInfoError),
    InfoHashError,
    NotADict,
    AnnounceListNotAList,
    AnnounceTierNotAList,
    AnnounceUrlNotAString,
}

impl Torrent {
    pub fn from(bencode: Bencode) -> Result<Torrent, FromTorrentError> {
        let mut announce_url = String::new();
        let mut announce_list = Vec::new();
        let mut info: Option<Info> = None;

        let d = match bencode {
            Bencode::BDict(s) => s,
            _ => return Err(FromTorrentError::NotADict),
        };

        for (k, v) in d.iter() {
            if k == b"announce" {
                announce_url = Torrent::create_announce(v)?;
            } else if k == b"announce-list" {
                announce_list = Torrent::create_announce_list(v)?;
            } else if k == b"info" {
                info = Some(Torrent::create_info(v)?);
            }
        }

        if announce_url.is_empty() {
            return Err(FromTorrentError::MissingAnnounce);
        }

        let info = match info {
            Some(x) => x,
            None => return Err(FromTorrentError::MissingInfo),
        };

        let info_hash = Torrent::create_info_hash(&info)?;

        Ok(Torrent {
            announce_url,
            announce_list,
            info,
            info_hash,
        })
    }

    fn create_announce(bencode: &Bencode) -> Result<String, FromTorrentError> {
        let announce_url = match bencode {
            Bencode::BString(s) => s,
            _ => return Err(FromTorrentError::MissingAnnounce),
        };

        let announce_url = match String::from_utf8(announce_url.to_vec()) {
            Ok(s) => s,
            Err(_) => return Err(FromTorrentError::MissingAnnounce),
        };

        Ok(announce_url)
    }

    fn create_announce_list(bencode: &Bencode) -> Result<Vec<Vec<String>>, FromTorrentError> {
        let tiers = match bencode {
            Bencode::BList(l) => l,
            _ => return Err(FromTorrentError::AnnounceListNotAList),
        };

        tiers
            .iter()
            .map(|tier| match tier {
                Bencode::BList(urls) => urls
                    .iter()
                    .map(|u| match u {
                        Bencode::BString(s) => String::from_utf8(s.to_vec())
                            .map_err(|_| FromTorrentError::AnnounceUrlNotAString),
                        _ => Err(FromTorrentError::AnnounceUrlNotAString),
                    })
                    .collect(),
                _ => Err(FromTorrentError::AnnounceTierNotAList),
            })
            .collect()
    }

    fn create_info(bencode: &Bencode) -> Result<Info, FromTorrentError> {
        let info = match Info::from(bencode) {
            Ok(x) => x,
            Err(err) => return Err(FromTorrentError::FromInfoError(err)),
        };

        Ok(info)
    }

    pub fn create_info_hash(info: &Info) -> Result<String, FromTorrentError> {
        let bencoded_info = Bencode::encode(info);
        let hash = Sha1::digest(bencoded_info);

        let mut hex_string = String::with_capacity(hash.len() * 2);

        for b in hash {
            match write!(&mut hex_string, "{:02x}", b) {
                Ok(_) => (),
                Err(_) => return Err(FromTorrentError::InfoHashError),
            }
        }

        Ok(hex_string)
    }

    /// Returns the info hash of the torrent as a byte array.
    pub fn get_info_hash_as_bytes(&self) -> Result<Vec<u8>, ParseIntError> {
        Self::decode_hex(self.info_hash.as_str())
    }

    /// SHA1("req2" ++ info_hash), used by the encrypted peer handshake to look a torrent up
    /// without exposing the plain info hash on the wire.
    pub fn obfuscated_hash(&self) -> Result<Vec<u8>, ParseIntError> {
        let info_hash_bytes = self.get_info_hash_as_bytes()?;
        let mut buf = b"req2".to_vec();
        buf.extend(info_hash_bytes);
        Ok(Sha1::digest(buf).to_vec())
    }

    fn decode_hex(s: &str) -> Result<Vec<u8>, ParseIntError> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16))
            .collect()
    }

    /// Returns the name of the torrent.
    pub fn name(&self) -> String {
        self.info.name.clone()
    }

    /// Returns the size of pieces of the torrent.
    pub fn piece_length(&self) -> u32 {
        self.info.piece_length as u32
    }

    /// Returns the total length in bytes of the torrent's content, across all files.
    pub fn length(&self) -> u64 {
        self.info.total_length() as u64
    }

    /// Returns the number of pieces of the torrent.
    pub fn total_pieces(&self) -> u32 {
        (self.length() as f64 / self.info.piece_length as f64).ceil() as u32
    }

    /// Returns the size of the last piece of the torrent.
    pub fn last_piece_size(&self) -> u32 {
        let remainder = self.length() % self.info.piece_length as u64;
        if remainder == 0 {
            self.info.piece_length as u32
        } else {
            remainder as u32
        }
    }

    pub fn info_hash(&self) -> String {
        self.info_hash.clone()
    }

    /// Tracker tiers, falling back to a single tier containing just `announce_url` when no
    /// `announce-list` was present in the metainfo.
    pub fn tiers(&self) -> Vec<Vec<String>> {
        if self.announce_list.is_empty() {
            vec![vec![self.announce_url.clone()]]
        } else {
            self.announce_list.clone()
        }
    }
}

impl ToBencode for Torrent {
    fn to_bencode(&self) -> Bencode {
        let mut m = BTreeMap::new();
        m.insert(b"announce".to_vec(), self.announce_url.to_bencode());
        if !self.announce_list.is_empty() {
            m.insert(b"announce-list".to_vec(), self.announce_list.to_bencode());
        }
        m.insert(b"info".to_vec(), self.info.to_bencode());
        Bencode::BDict(m)
    }
}
