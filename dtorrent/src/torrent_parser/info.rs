use std::collections::BTreeMap;

use bencoder::bencode::{Bencode, ToBencode};

/// One entry of a multi-file torrent's `files` list.
///
/// `path` holds the BEP3 path segments relative to `Info::name`, e.g. `["subdir", "movie.mkv"]`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileInfo {
    pub length: i64,
    pub path: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Info {
    pub length: i64,
    pub name: String,
    pub piece_length: i64,
    pub pieces: Vec<u8>,
    /// Non-empty for multi-file torrents; empty for single-file ones, in which case `length`
    /// carries the single file's size.
    pub files: Vec<FileInfo>,
}

#[derive(Debug, PartialEq)]
pub enum FromInfoError {
    MissingLength,
    MissingName,
    MissingPieceLength,
    MissingPieces,
    NotADict,
    FilesNotAList,
    FileEntryNotADict,
    MissingFileLength,
    MissingFilePath,
    FilePathNotAList,
    FilePathSegmentNotAString,
}

impl Info {
    pub fn from(bencode: &Bencode) -> Result<Info, FromInfoError> {
        let mut name = String::new();
        let mut length = 0;
        let mut piece_length = 0;
        let mut pieces = Vec::new();
        let mut files = Vec::new();

        let d = match bencode {
            Bencode::BDict(s) => s,
            _ => return Err(FromInfoError::NotADict),
        };

        for (k, v) in d.iter() {
            if k == b"name" {
                name = Info::create_name(v)?;
            } else if k == b"length" {
                length = Info::create_length(v)?;
            } else if k == b"piece length" {
                piece_length = Info::create_piece_length(v)?;
            } else if k == b"pieces" {
                pieces = Info::create_pieces(v)?;
            } else if k == b"files" {
                files = Info::create_files(v)?;
            }
        }

        Ok(Info {
            length,
            name,
            piece_length,
            pieces,
            files,
        })
    }

    /// Total size in bytes of the torrent's content: summed across `files` for multi-file
    /// torrents, or taken directly from `length` for single-file ones.
    pub fn total_length(&self) -> i64 {
        if self.is_multi_file() {
            self.files.iter().map(|f| f.length).sum()
        } else {
            self.length
        }
    }

    pub fn is_multi_file(&self) -> bool {
        !self.files.is_empty()
    }

    fn create_name(bencode: &Bencode) -> Result<String, FromInfoError> {
        let c = match bencode {
            &Bencode::BString(ref s) => s,
            _ => return Err(FromInfoError::MissingName),
        };

        let name = match String::from_utf8(c.to_vec()) {
            Ok(s) => s,
            Err(_) => return Err(FromInfoError::MissingName),
        };

        Ok(name)
    }

    fn create_length(bencode: &Bencode) -> Result<i64, FromInfoError> {
        let c = match bencode {
            &Bencode::BNumber(ref s) => s,
            _ => return Err(FromInfoError::MissingLength),
        };
        Ok(*c)
    }

    fn create_piece_length(bencode: &Bencode) -> Result<i64, FromInfoError> {
        let c = match bencode {
            &Bencode::BNumber(ref s) => s,
            _ => return Err(FromInfoError::MissingPieceLength),
        };
        Ok(*c)
    }

    fn create_pieces(bencode: &Bencode) -> Result<Vec<u8>, FromInfoError> {
        let c = match bencode {
            &Bencode::BString(ref s) => s,
            _ => return Err(FromInfoError::MissingPieces),
        };
        Ok(c.to_vec())
    }

    fn create_files(bencode: &Bencode) -> Result<Vec<FileInfo>, FromInfoError> {
        let list = match bencode {
            Bencode::BList(l) => l,
            _ => return Err(FromInfoError::FilesNotAList),
        };

        list.iter().map(Info::create_file_entry).collect()
    }

    fn create_file_entry(bencode: &Bencode) -> Result<FileInfo, FromInfoError> {
        let d = match bencode {
            Bencode::BDict(d) => d,
            _ => return Err(FromInfoError::FileEntryNotADict),
        };

        let length = match d.get(b"length".as_slice()) {
            Some(Bencode::BNumber(n)) => *n,
            _ => return Err(FromInfoError::MissingFileLength),
        };

        let path_list = match d.get(b"path".as_slice()) {
            Some(Bencode::BList(l)) => l,
            Some(_) => return Err(FromInfoError::FilePathNotAList),
            None => return Err(FromInfoError::MissingFilePath),
        };

        let path = path_list
            .iter()
            .map(|segment| match segment {
                Bencode::BString(s) => String::from_utf8(s.to_vec())
                    .map_err(|_| FromInfoError::FilePathSegmentNotAString),
                _ => Err(FromInfoError::FilePathSegmentNotAString),
            })
            .collect::<Result<Vec<String>, FromInfoError>>()?;

        Ok(FileInfo { length, path })
    }
}

impl ToBencode for FileInfo {
    fn to_bencode(&self) -> Bencode {
        let mut f = BTreeMap::new();
        f.insert(b"length".to_vec(), self.length.to_bencode());
        f.insert(b"path".to_vec(), self.path.to_bencode());
        Bencode::BDict(f)
    }
}

impl ToBencode for Info {
    fn to_bencode(&self) -> Bencode {
        let mut info = BTreeMap::new();
        info.insert(b"name".to_vec(), self.name.to_bencode());
        info.insert(b"piece length".to_vec(), self.piece_length.to_bencode());
        info.insert(b"pieces".to_vec(), self.pieces.to_bencode());
        if self.is_multi_file() {
            info.insert(b"files".to_vec(), self.files.to_bencode());
        } else {
            info.insert(b"length".to_vec(), self.length.to_bencode());
        }
        Bencode::BDict(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_info_empty() {
        let bencode = Bencode::BDict(BTreeMap::new());
        let info = Info::from(&bencode).unwrap();
        assert_eq!(info.length, 0);
        assert_eq!(info.name, String::new());
        assert_eq!(info.piece_length, 0);
        assert_eq!(info.pieces, Vec::new());
        assert!(info.files.is_empty());
    }

    #[test]
    fn test_from_info_full() {
        let mut info = BTreeMap::new();
        info.insert(b"length".to_vec(), Bencode::BNumber(1));
        info.insert(b"name".to_vec(), Bencode::BString(b"test1".to_vec()));
        info.insert(b"piece length".to_vec(), Bencode::BNumber(2));
        info.insert(b"pieces".to_vec(), Bencode::BString(b"test2".to_vec()));
        let bencode = Bencode::BDict(info);

        let response = Info::from(&bencode).unwrap();
        assert_eq!(response.length, 1);
        assert_eq!(response.name, "test1");
        assert_eq!(response.piece_length, 2);
        assert_eq!(response.pieces, b"test2");
        assert_eq!(response.total_length(), 1);
        assert!(!response.is_multi_file());
    }

    #[test]
    fn test_from_info_with_multiple_files() {
        let mut info = BTreeMap::new();
        info.insert(b"name".to_vec(), Bencode::BString(b"test1".to_vec()));
        info.insert(b"piece length".to_vec(), Bencode::BNumber(2));
        info.insert(b"pieces".to_vec(), Bencode::BString(b"test2".to_vec()));

        let mut file_a = BTreeMap::new();
        file_a.insert(b"length".to_vec(), Bencode::BNumber(10));
        file_a.insert(
            b"path".to_vec(),
            Bencode::BList(vec![Bencode::BString(b"a.txt".to_vec())]),
        );

        let mut file_b = BTreeMap::new();
        file_b.insert(b"length".to_vec(), Bencode::BNumber(20));
        file_b.insert(
            b"path".to_vec(),
            Bencode::BList(vec![
                Bencode::BString(b"subdir".to_vec()),
                Bencode::BString(b"b.txt".to_vec()),
            ]),
        );

        info.insert(
            b"files".to_vec(),
            Bencode::BList(vec![Bencode::BDict(file_a), Bencode::BDict(file_b)]),
        );
        let bencode = Bencode::BDict(info);

        let response = Info::from(&bencode).unwrap();
        assert!(response.is_multi_file());
        assert_eq!(response.files.len(), 2);
        assert_eq!(response.files[0].length, 10);
        assert_eq!(response.files[0].path, vec!["a.txt".to_string()]);
        assert_eq!(response.files[1].length, 20);
        assert_eq!(
            response.files[1].path,
            vec!["subdir".to_string(), "b.txt".to_string()]
        );
        assert_eq!(response.total_length(), 30);
    }

    #[test]
    fn test_from_info_file_entry_missing_length() {
        let mut info = BTreeMap::new();
        info.insert(b"name".to_vec(), Bencode::BString(b"test1".to_vec()));
        info.insert(b"piece length".to_vec(), Bencode::BNumber(2));
        info.insert(b"pieces".to_vec(), Bencode::BString(b"test2".to_vec()));

        let mut bad_file = BTreeMap::new();
        bad_file.insert(
            b"path".to_vec(),
            Bencode::BList(vec![Bencode::BString(b"a.txt".to_vec())]),
        );
        info.insert(
            b"files".to_vec(),
            Bencode::BList(vec![Bencode::BDict(bad_file)]),
        );
        let bencode = Bencode::BDict(info);

        let err = Info::from(&bencode).unwrap_err();
        assert_eq!(err, FromInfoError::MissingFileLength);
    }

    #[test]
    fn test_multi_file_round_trip() {
        let mut info = BTreeMap::new();
        info.insert(b"name".to_vec(), Bencode::BString(b"pack".to_vec()));
        info.insert(b"piece length".to_vec(), Bencode::BNumber(4));
        info.insert(b"pieces".to_vec(), Bencode::BString(b"xxxx".to_vec()));
        let mut file_a = BTreeMap::new();
        file_a.insert(b"length".to_vec(), Bencode::BNumber(4));
        file_a.insert(
            b"path".to_vec(),
            Bencode::BList(vec![Bencode::BString(b"a".to_vec())]),
        );
        info.insert(
            b"files".to_vec(),
            Bencode::BList(vec![Bencode::BDict(file_a)]),
        );
        let bencode = Bencode::BDict(info);

        let parsed = Info::from(&bencode).unwrap();
        let reencoded = Bencode::encode(&parsed);
        let reparsed = Info::from(&Bencode::decode(&reencoded).unwrap()).unwrap();
        assert_eq!(parsed, reparsed);
    }
}
