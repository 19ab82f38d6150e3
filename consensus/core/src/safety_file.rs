// Copyright (c) The Savanna Finality Authors
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use finality_config::{BlsPublicKey, DIGEST_LENGTH};
use finality_types::{BlockRef, FinalityError, FinalityResult, FinalizerSafetyInfo};

/// Marks a v1 safety file: magic + count + entries + trailing crc32, as
/// opposed to the legacy v0 format of raw concatenated entries with no
/// header (§4.5 "Safety file format").
const MAGIC: u64 = 0x5AFE_1111_5AFE_1111;

/// One finalizer's persisted safety state, as stored on disk: its public
/// key plus the `fsi` it must never regress.
type Entry = (BlsPublicKey, FinalizerSafetyInfo);

/// Reads and writes the finalizer safety persistence file. Holds the file
/// open across calls once created, truncating and rewriting it in full on
/// every save - the original's `persist_file` idiom, since the file is tiny
/// and correctness depends on every save being a complete, self-consistent
/// snapshot rather than an append (§4.5).
pub struct SafetyFile {
    path: PathBuf,
    file: Option<File>,
}

impl SafetyFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path, file: None }
    }

    /// Loads every entry in the file into a map keyed by public key. Returns
    /// an empty map if the file does not exist yet, matching the original's
    /// "use defaults" behavior on a fresh node (§4.5 `load_finalizer_safety_info`).
    pub fn load(&self) -> FinalityResult<HashMap<BlsPublicKey, FinalizerSafetyInfo>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let mut bytes = Vec::new();
        File::open(&self.path)?.read_to_end(&mut bytes)?;
        if bytes.is_empty() {
            return Ok(HashMap::new());
        }
        if bytes.len() >= 8 && u64::from_le_bytes(bytes[0..8].try_into().unwrap()) == MAGIC {
            parse_v1(&bytes)
        } else {
            parse_v0(&bytes)
        }
    }

    /// Rewrites the file from scratch in the current (v1) format. Opens the
    /// file for read-write on first use and keeps it open thereafter.
    pub fn save(&mut self, entries: &[Entry]) -> FinalityResult<()> {
        if self.file.is_none() {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            self.file = Some(
                OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .open(&self.path)?,
            );
        }
        let file = self.file.as_mut().expect("just ensured open");

        let mut payload = Vec::new();
        payload.extend_from_slice(&MAGIC.to_le_bytes());
        payload.extend_from_slice(&(entries.len() as u64).to_le_bytes());
        for (key, fsi) in entries {
            encode_entry(&mut payload, key, fsi);
        }
        let checksum = crc32fast::hash(&payload);

        file.seek(SeekFrom::Start(0))?;
        file.write_all(&payload)?;
        file.write_all(&checksum.to_le_bytes())?;
        let len = payload.len() as u64 + 4;
        file.set_len(len)?;
        file.flush()?;
        Ok(())
    }
}

fn encode_entry(buf: &mut Vec<u8>, key: &BlsPublicKey, fsi: &FinalizerSafetyInfo) {
    let key_bytes = key.to_bytes();
    buf.extend_from_slice(&(key_bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(key_bytes);
    encode_block_ref(buf, &fsi.last_vote);
    buf.extend_from_slice(&fsi.last_vote_range_start.to_le_bytes());
    encode_block_ref(buf, &fsi.lock);
    buf.extend_from_slice(&fsi.other_branch_latest_time.to_le_bytes());
}

fn encode_block_ref(buf: &mut Vec<u8>, block_ref: &BlockRef) {
    buf.extend_from_slice(&block_ref.block_id.0);
    buf.extend_from_slice(&block_ref.timestamp.to_le_bytes());
    buf.extend_from_slice(block_ref.finality_digest.as_bytes());
    buf.extend_from_slice(&block_ref.active_finalizer_policy_generation.to_le_bytes());
    match block_ref.pending_finalizer_policy_generation {
        None => buf.push(0),
        Some(gen) => {
            buf.push(1);
            buf.extend_from_slice(&gen.to_le_bytes());
        }
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, len: usize) -> FinalityResult<&'a [u8]> {
        if self.pos + len > self.bytes.len() {
            return Err(FinalityError::SafetyFileCorrupt("truncated".to_string()));
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn take_u64(&mut self) -> FinalityResult<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn take_u32(&mut self) -> FinalityResult<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn take_u8(&mut self) -> FinalityResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }
}

fn decode_block_ref(cursor: &mut Cursor<'_>) -> FinalityResult<BlockRef> {
    let block_id_bytes = cursor.take(DIGEST_LENGTH)?;
    let mut block_id = [0u8; DIGEST_LENGTH];
    block_id.copy_from_slice(block_id_bytes);
    let timestamp = cursor.take_u64()?;
    let digest_bytes = cursor.take(DIGEST_LENGTH)?;
    let mut digest = [0u8; DIGEST_LENGTH];
    digest.copy_from_slice(digest_bytes);
    let active_generation = cursor.take_u32()?;
    let has_pending = cursor.take_u8()?;
    let pending_generation = if has_pending == 1 {
        Some(cursor.take_u32()?)
    } else {
        None
    };
    Ok(BlockRef {
        block_id: finality_types::BlockId(block_id),
        timestamp,
        finality_digest: finality_types::FinalityDigest::new(digest),
        active_finalizer_policy_generation: active_generation,
        pending_finalizer_policy_generation: pending_generation,
    })
}

fn decode_entry(cursor: &mut Cursor<'_>) -> FinalityResult<Entry> {
    let key_len = cursor.take_u32()? as usize;
    let key_bytes = cursor.take(key_len)?;
    let key = BlsPublicKey::from_bytes(key_bytes)
        .map_err(|_| FinalityError::SafetyFileCorrupt("bad public key".to_string()))?;
    let last_vote = decode_block_ref(cursor)?;
    let last_vote_range_start = cursor.take_u64()?;
    let lock = decode_block_ref(cursor)?;
    let other_branch_latest_time = cursor.take_u64()?;
    Ok((
        key,
        FinalizerSafetyInfo {
            last_vote,
            last_vote_range_start,
            lock,
            other_branch_latest_time,
        },
    ))
}

fn parse_v1(bytes: &[u8]) -> FinalityResult<HashMap<BlsPublicKey, FinalizerSafetyInfo>> {
    if bytes.len() < 20 {
        return Err(FinalityError::SafetyFileCorrupt("truncated".to_string()));
    }
    let payload = &bytes[..bytes.len() - 4];
    let trailer = &bytes[bytes.len() - 4..];
    let expected = u32::from_le_bytes(trailer.try_into().unwrap());
    let actual = crc32fast::hash(payload);
    if expected != actual {
        return Err(FinalityError::SafetyFileCorrupt("bad crc32".to_string()));
    }

    let mut cursor = Cursor::new(payload);
    let magic = cursor.take_u64()?;
    debug_assert_eq!(magic, MAGIC);
    let count = cursor.take_u64()?;

    let mut map = HashMap::new();
    for _ in 0..count {
        let (key, fsi) = decode_entry(&mut cursor)?;
        map.insert(key, fsi);
    }
    Ok(map)
}

/// Parses the legacy header-less format: entries packed back to back until
/// EOF, with no count or checksum to validate against (§4.5 "v0 compatibility").
fn parse_v0(bytes: &[u8]) -> FinalityResult<HashMap<BlsPublicKey, FinalizerSafetyInfo>> {
    let mut cursor = Cursor::new(bytes);
    let mut map = HashMap::new();
    while cursor.remaining() > 0 {
        let (key, fsi) = decode_entry(&mut cursor)?;
        map.insert(key, fsi);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng as _};

    fn key(seed: u8) -> BlsPublicKey {
        let mut rng = StdRng::from_seed([seed; 32]);
        finality_config::BlsKeyPair::generate(&mut rng).public()
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("safety.dat");
        let mut file = SafetyFile::new(path.clone());

        let fsi = FinalizerSafetyInfo {
            last_vote: BlockRef {
                block_id: finality_types::BlockId([7u8; DIGEST_LENGTH]),
                timestamp: 42,
                finality_digest: finality_types::FinalityDigest::default(),
                active_finalizer_policy_generation: 1,
                pending_finalizer_policy_generation: Some(2),
            },
            last_vote_range_start: 10,
            lock: BlockRef::default(),
            other_branch_latest_time: 0,
        };
        let entries = vec![(key(1), fsi)];
        file.save(&entries).unwrap();

        let loaded = SafetyFile::new(path).load().unwrap();
        assert_eq!(loaded.get(&key(1)), Some(&fsi));
    }

    #[test]
    fn load_on_missing_file_returns_empty_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does_not_exist.dat");
        let loaded = SafetyFile::new(path).load().unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn corrupted_crc_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("safety.dat");
        let mut file = SafetyFile::new(path.clone());
        file.save(&[(key(1), FinalizerSafetyInfo::unset())]).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(&path, bytes).unwrap();

        let err = SafetyFile::new(path).load().unwrap_err();
        assert!(matches!(err, FinalityError::SafetyFileCorrupt(_)));
    }

    #[test]
    fn v0_format_without_header_parses_as_raw_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.dat");
        let fsi = FinalizerSafetyInfo::unset();
        let mut raw = Vec::new();
        encode_entry(&mut raw, &key(3), &fsi);
        std::fs::write(&path, &raw).unwrap();

        let loaded = SafetyFile::new(path).load().unwrap();
        assert_eq!(loaded.get(&key(3)), Some(&fsi));
    }

    #[test]
    fn second_save_fully_replaces_entry_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("safety.dat");
        let mut file = SafetyFile::new(path.clone());

        file.save(&[
            (key(1), FinalizerSafetyInfo::unset()),
            (key(2), FinalizerSafetyInfo::unset()),
        ])
        .unwrap();
        file.save(&[(key(1), FinalizerSafetyInfo::unset())]).unwrap();

        let loaded = SafetyFile::new(path).load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains_key(&key(1)));
    }
}
