//! Append-only journal of resolver edge mutations.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [ENTRY 1: codec frame of JournalEntry]
//! [ENTRY 2: codec frame of JournalEntry]
//! ...
//! ```
//! Replaying the entries in order rebuilds the edge set exactly. Compaction
//! rewrites the file as one upsert per live edge.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Error as IoError, ErrorKind, Result as IoResult, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::edge::Edge;
use crate::codec;
use crate::identifier::Identifier;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub record: JournalRecord,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JournalRecord {
    Upsert(Edge),
    Remove { source: Identifier, target: Identifier },
}

struct JournalState {
    writer: BufWriter<File>,
    sequence: u64,
}

pub struct Journal {
    path: PathBuf,
    state: Mutex<JournalState>,
    sync_on_write: bool,
}

fn poisoned() -> IoError {
    IoError::new(ErrorKind::Other, "poisoned lock: journal")
}

impl Journal {
    /// Opens or creates a journal file.
    pub fn open(path: &Path, sync_on_write: bool) -> IoResult<Self> {
        let exists = path.exists() && std::fs::metadata(path)?.len() >= 5;

        let sequence = if exists {
            let (last, valid_len) = Self::scan(path)?;
            if valid_len < std::fs::metadata(path)?.len() {
                warn!(path = %path.display(), valid_len, "truncating torn journal tail");
                OpenOptions::new().write(true).open(path)?.set_len(valid_len)?;
            }
            last
        } else {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?;
            codec::write_header(&mut file)?;
            if sync_on_write {
                file.sync_all()?;
            }
            0
        };

        let file = OpenOptions::new().append(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(JournalState {
                writer: BufWriter::new(file),
                sequence,
            }),
            sync_on_write,
        })
    }

    fn lock(&self) -> IoResult<MutexGuard<'_, JournalState>> {
        self.state.lock().map_err(|_| poisoned())
    }

    /// Appends a record, returning its sequence number.
    pub fn append(&self, record: JournalRecord) -> IoResult<u64> {
        let mut state = self.lock()?;
        let sequence = state.sequence + 1;
        let encoded = codec::encode(&JournalEntry {
            sequence,
            timestamp: Utc::now(),
            record,
        })?;

        state.writer.write_all(&encoded)?;
        state.writer.flush()?;
        if self.sync_on_write {
            state.writer.get_ref().sync_all()?;
        }

        state.sequence = sequence;
        Ok(sequence)
    }

    pub fn iter(&self) -> IoResult<JournalIterator> {
        JournalIterator::new(&self.path)
    }

    pub fn current_sequence(&self) -> IoResult<u64> {
        Ok(self.lock()?.sequence)
    }

    pub fn size_bytes(&self) -> IoResult<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    /// Replaces the journal with the given records.
    ///
    /// The new journal is written to a sibling file and renamed over the old
    /// one, so a crash leaves either the old or the new journal intact.
    pub fn rewrite(&self, records: impl IntoIterator<Item = JournalRecord>) -> IoResult<()> {
        let mut state = self.lock()?;
        state.writer.flush()?;

        let tmp_path = self.path.with_extension("compact");
        let mut sequence = 0;
        {
            let mut tmp = BufWriter::new(
                OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&tmp_path)?,
            );
            codec::write_header(&mut tmp)?;
            let now = Utc::now();
            for record in records {
                sequence += 1;
                tmp.write_all(&codec::encode(&JournalEntry {
                    sequence,
                    timestamp: now,
                    record,
                })?)?;
            }
            tmp.flush()?;
            tmp.get_ref().sync_all()?;
        }

        std::fs::rename(&tmp_path, &self.path)?;

        let file = OpenOptions::new().append(true).open(&self.path)?;
        state.writer = BufWriter::new(file);
        state.sequence = sequence;
        Ok(())
    }

    /// Returns the last valid sequence and the byte length of the valid
    /// prefix.
    fn scan(path: &Path) -> IoResult<(u64, u64)> {
        let mut iter = JournalIterator::new(path)?;
        let mut last = 0;
        let mut valid_len = iter.position()?;
        loop {
            match iter.next() {
                Some(Ok(entry)) => {
                    last = entry.sequence;
                    valid_len = iter.position()?;
                }
                Some(Err(e)) => {
                    warn!(path = %path.display(), after = last, error = %e, "journal corruption detected");
                    break;
                }
                None => break,
            }
        }
        Ok((last, valid_len))
    }
}

pub struct JournalIterator {
    reader: BufReader<File>,
    file_size: u64,
}

impl JournalIterator {
    fn new(path: &Path) -> IoResult<Self> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        codec::read_header(&mut reader)?;
        Ok(Self { reader, file_size })
    }

    fn position(&mut self) -> IoResult<u64> {
        self.reader.stream_position()
    }

    fn at_eof(&mut self) -> IoResult<bool> {
        Ok(self.position()? >= self.file_size)
    }
}

impl Iterator for JournalIterator {
    type Item = IoResult<JournalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.at_eof() {
            Ok(true) => return None,
            Ok(false) => {}
            Err(e) => return Some(Err(e)),
        }

        match codec::decode(&mut self.reader) {
            Ok(entry) => Some(Ok(entry)),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => None,
            Err(e) => Some(Err(e)),
        }
    }
}
