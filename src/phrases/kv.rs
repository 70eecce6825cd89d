// Copyright (c) 2025 Semrel Contributors
// Licensed under the Semrel License. See LICENSE file for details.

//! Durable string-keyed store backing the link probability estimator.
//!
//! A [`KvStore`] is an append-only log inside a directory. Each entry is
//! written as:
//!
//! ```text
//! [timestamp: u64][key_len: u16][val_len: u32][key bytes][bincode value]
//! ```
//!
//! The latest entry for a key wins. Opening an existing store scans the log
//! to rebuild the in-memory key → offset index; an incomplete entry at the
//! end of the log (an interrupted write) is reported and cut off. A store
//! opened read-only reports the bad tail and leaves the file untouched.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SemrelError};

/// Name of the log file inside a store directory.
pub const LOG_FILE: &str = "entries.log";

/// Size of an entry header in bytes (8 + 2 + 4).
pub const ENTRY_HEADER_SIZE: usize = 14;

/// Largest value accepted when reading an entry header back.
const MAX_VALUE_LEN: u32 = 1 << 30;

/// Runtime options for a [`KvStore`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KvConfig {
    /// Sync to disk after every `put`.
    ///
    /// Off by default: stores are written during a build and synced once
    /// at the end with [`KvStore::sync`].
    pub sync_on_write: bool,

    /// Open the log without write access. `put` fails with
    /// `SemrelError::ReadOnly` and a damaged tail is skipped, not cut off.
    pub read_only: bool,
}

#[derive(Debug, Clone, Copy)]
struct EntryHeader {
    timestamp: u64,
    key_len: u16,
    val_len: u32,
}

impl EntryHeader {
    fn new(key_len: u16, val_len: u32) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);
        Self {
            timestamp,
            key_len,
            val_len,
        }
    }

    fn to_bytes(self) -> [u8; ENTRY_HEADER_SIZE] {
        let mut buf = [0u8; ENTRY_HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.timestamp.to_le_bytes());
        buf[8..10].copy_from_slice(&self.key_len.to_le_bytes());
        buf[10..14].copy_from_slice(&self.val_len.to_le_bytes());
        buf
    }

    fn from_bytes(buf: &[u8; ENTRY_HEADER_SIZE]) -> Self {
        let mut timestamp = [0u8; 8];
        timestamp.copy_from_slice(&buf[0..8]);
        let mut key_len = [0u8; 2];
        key_len.copy_from_slice(&buf[8..10]);
        let mut val_len = [0u8; 4];
        val_len.copy_from_slice(&buf[10..14]);
        Self {
            timestamp: u64::from_le_bytes(timestamp),
            key_len: u16::from_le_bytes(key_len),
            val_len: u32::from_le_bytes(val_len),
        }
    }

    fn is_valid(&self) -> bool {
        self.key_len > 0 && self.val_len < MAX_VALUE_LEN
    }

    fn entry_len(&self) -> u64 {
        ENTRY_HEADER_SIZE as u64 + self.key_len as u64 + self.val_len as u64
    }
}

/// Append-only, string-keyed store of serializable values.
///
/// Reads take `&self` and may run concurrently; they are serialized on the
/// file handle. Writes take `&mut self`.
///
/// # Examples
///
/// ```rust,no_run
/// use semrel::phrases::KvStore;
///
/// let mut store: KvStore<f64> = KvStore::open("probabilities").unwrap();
/// store.put("en:new york", &0.38).unwrap();
/// assert_eq!(store.get("en:new york").unwrap(), Some(0.38));
/// ```
pub struct KvStore<V> {
    dir: PathBuf,
    file: Mutex<File>,
    index: HashMap<String, u64>,
    file_len: u64,
    config: KvConfig,
    _value: PhantomData<fn() -> V>,
}

impl<V> std::fmt::Debug for KvStore<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvStore")
            .field("dir", &self.dir)
            .field("keys", &self.index.len())
            .field("file_len", &self.file_len)
            .finish()
    }
}

impl<V: Serialize + DeserializeOwned> KvStore<V> {
    /// Open or create the store in `dir` with the default configuration.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Self::with_config(dir, KvConfig::default())
    }

    /// Open an existing store for queries only.
    pub fn open_read_only<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Self::with_config(
            dir,
            KvConfig {
                read_only: true,
                ..Default::default()
            },
        )
    }

    /// Open or create the store in `dir`.
    ///
    /// The directory is created if needed, unless `config.read_only` is set,
    /// in which case the log must already exist. An existing log is scanned
    /// to rebuild the index.
    pub fn with_config<P: AsRef<Path>>(dir: P, config: KvConfig) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let file = if config.read_only {
            File::open(dir.join(LOG_FILE))?
        } else {
            std::fs::create_dir_all(&dir)?;
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(dir.join(LOG_FILE))?
        };
        let file_len = file.metadata()?.len();

        let mut store = Self {
            dir,
            file: Mutex::new(file),
            index: HashMap::new(),
            file_len,
            config,
            _value: PhantomData,
        };
        if file_len > 0 {
            store.rebuild_index()?;
        }
        Ok(store)
    }

    /// Returns `true` if `dir` already holds a store.
    pub fn exists<P: AsRef<Path>>(dir: P) -> bool {
        dir.as_ref().join(LOG_FILE).is_file()
    }

    /// Directory of the store.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a value, replacing any earlier value for `key`.
    ///
    /// # Errors
    ///
    /// * `SemrelError::EmptyKey` - if the key is empty
    /// * `SemrelError::KeyTooLong` - if the key exceeds 65535 bytes
    /// * `SemrelError::ReadOnly` - if the store was opened read-only
    pub fn put(&mut self, key: &str, value: &V) -> Result<()> {
        if self.config.read_only {
            return Err(SemrelError::ReadOnly(self.dir.display().to_string()));
        }
        if key.is_empty() {
            return Err(SemrelError::EmptyKey);
        }
        if key.len() > u16::MAX as usize {
            return Err(SemrelError::KeyTooLong(key.len()));
        }

        let value_bytes = bincode::serialize(value)?;
        let header = EntryHeader::new(key.len() as u16, value_bytes.len() as u32);
        let offset = self.file_len;

        let file = self.file.get_mut();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&header.to_bytes())?;
        file.write_all(key.as_bytes())?;
        file.write_all(&value_bytes)?;
        if self.config.sync_on_write {
            file.sync_data()?;
        }

        self.file_len += header.entry_len();
        self.index.insert(key.to_string(), offset);
        Ok(())
    }

    /// Latest value for `key`, or `None` if it was never written.
    pub fn get(&self, key: &str) -> Result<Option<V>> {
        match self.index.get(key) {
            Some(&offset) => Ok(Some(self.read_value_at(offset)?.1)),
            None => Ok(None),
        }
    }

    /// Returns `true` if `key` has a value.
    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns `true` if the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// All distinct keys, in no particular order.
    pub fn keys(&self) -> Vec<String> {
        self.index.keys().cloned().collect()
    }

    /// Iterate over the latest `(key, value)` of every key in log order.
    pub fn iter(&self) -> impl Iterator<Item = Result<(String, V)>> + '_ {
        let mut offsets: Vec<u64> = self.index.values().copied().collect();
        offsets.sort_unstable();
        offsets.into_iter().map(move |offset| self.read_value_at(offset))
    }

    /// Returns `true` if the store rejects writes.
    pub fn is_read_only(&self) -> bool {
        self.config.read_only
    }

    /// Flush written entries to disk. A no-op on a read-only store.
    pub fn sync(&mut self) -> Result<()> {
        if self.config.read_only {
            return Ok(());
        }
        let file = self.file.get_mut();
        file.flush()?;
        file.sync_all()?;
        Ok(())
    }

    fn read_value_at(&self, offset: u64) -> Result<(String, V)> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;

        let mut header_buf = [0u8; ENTRY_HEADER_SIZE];
        file.read_exact(&mut header_buf)?;
        let header = EntryHeader::from_bytes(&header_buf);
        if !header.is_valid() {
            return Err(SemrelError::CorruptedEntry(offset));
        }

        let mut key_buf = vec![0u8; header.key_len as usize];
        file.read_exact(&mut key_buf)?;
        let key = String::from_utf8(key_buf).map_err(|_| SemrelError::CorruptedEntry(offset))?;

        let mut value_buf = vec![0u8; header.val_len as usize];
        file.read_exact(&mut value_buf)?;
        drop(file);

        Ok((key, bincode::deserialize(&value_buf)?))
    }

    /// Scan the log and rebuild the index. An invalid or incomplete entry
    /// ends the scan; a writable log is truncated to the last complete
    /// entry so later appends stay reachable.
    fn rebuild_index(&mut self) -> Result<()> {
        let file = self.file.get_mut();
        file.seek(SeekFrom::Start(0))?;

        let mut offset = 0u64;
        let mut recovered = 0usize;
        loop {
            if offset == self.file_len {
                break;
            }
            if offset + ENTRY_HEADER_SIZE as u64 > self.file_len {
                log::warn!(
                    "{}: truncated header at offset {}, discarding tail",
                    self.dir.display(),
                    offset
                );
                break;
            }

            let mut header_buf = [0u8; ENTRY_HEADER_SIZE];
            file.read_exact(&mut header_buf)?;
            let header = EntryHeader::from_bytes(&header_buf);
            if !header.is_valid() || offset + header.entry_len() > self.file_len {
                log::warn!(
                    "{}: invalid or truncated entry at offset {}, discarding tail",
                    self.dir.display(),
                    offset
                );
                break;
            }

            let mut key_buf = vec![0u8; header.key_len as usize];
            file.read_exact(&mut key_buf)?;
            let key = match String::from_utf8(key_buf) {
                Ok(key) => key,
                Err(_) => {
                    log::warn!(
                        "{}: invalid UTF-8 key at offset {}, discarding tail",
                        self.dir.display(),
                        offset
                    );
                    break;
                }
            };
            file.seek(SeekFrom::Current(header.val_len as i64))?;

            self.index.insert(key, offset);
            recovered += 1;
            offset += header.entry_len();
        }

        if offset < self.file_len {
            if self.config.read_only {
                log::warn!(
                    "{}: recovered {} entries, ignoring {} trailing bytes (read-only)",
                    self.dir.display(),
                    recovered,
                    self.file_len - offset
                );
            } else {
                file.set_len(offset)?;
                log::warn!(
                    "{}: recovered {} entries, dropped {} trailing bytes",
                    self.dir.display(),
                    recovered,
                    self.file_len - offset
                );
            }
            self.file_len = offset;
        }
        Ok(())
    }
}
