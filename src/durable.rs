//! A module which implements a simple mechanism for crash-proof storage of an object's state.
//!
//! A [`DurableStore`] persists one logical object under a `(directory, object_id)` handle.
//! Whenever a savepoint is reached, [`DurableStore::save`] writes the object's state to disk.
//! The application or the machine may fail at any point: a failure mid-write is detected on the
//! next open and the previously stored state is loaded instead.
//!
//! Design approach, shared with many write-ahead schemes:
//!
//! * toggle writes between two files,
//! * include a monotonically increasing serial number in each record to rank the two files,
//! * prefix each record with an MD5 digest of its content,
//! * sync the file descriptor to disk after each write.
//!
//! This does not protect against on-disk corruption after a successful commit. A record that is
//! damaged after it was durably written is indistinguishable from one whose write never
//! completed, so the store silently falls back to the older record. An application that made
//! promises based on the newer record would then appear to renege on them. The window is tiny,
//! but it exists; this store is not for life-support systems.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

// Record format, big-endian:
//
//   offset  0: 16 bytes  md5 digest of everything that follows
//   offset 16:  8 bytes  serial number
//   offset 24:  8 bytes  payload length
//   offset 32:  N bytes  payload (bincode-encoded object)

const DIGEST_LEN: u64 = 16;
const HEADER_LEN: u64 = DIGEST_LEN + 8 + 8;

#[derive(Debug, Error)]
pub enum DurabilityError {
    #[error("durable store i/o failure: {0}")]
    Io(#[from] io::Error),

    #[error("durable store payload encoding failure: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("stored record digest does not match its content")]
    HashMismatch,

    #[error("stored record is truncated")]
    Truncated,

    #[error("unrecoverable durability failure: neither file holds a readable record")]
    Unrecoverable,

    #[error("the durable store has been closed")]
    Closed,
}

impl DurabilityError {
    // A corrupted file is recoverable as long as its sibling is readable; anything else aborts
    // the open.
    fn is_corruption(&self) -> bool {
        match self {
            DurabilityError::HashMismatch
            | DurabilityError::Truncated
            | DurabilityError::Encoding(_) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum NextWrite {
    A,
    B,
}

/// Crash-safe persistence of a single logical object in a pair of alternating files named
/// `<object_id>_a.durable` and `<object_id>_b.durable`.
pub struct DurableStore<S> {
    path_a: PathBuf,
    path_b: PathBuf,

    // None once close() has run.
    files: Option<(File, File)>,

    serial: u64,
    next_write: NextWrite,
    recovered: Option<S>,
}

impl<S> DurableStore<S>
where
    S: Serialize + DeserializeOwned,
{
    /// Opens (creating files as needed) and recovers the store for `object_id` in `dirname`.
    ///
    /// Fails with [`DurabilityError::Unrecoverable`] when both files exist, at least one is
    /// non-empty, and neither holds a readable record. An application whose store is in that
    /// state must not start.
    pub fn open(dirname: &Path, object_id: &str) -> Result<Self, DurabilityError> {
        if !dirname.is_dir() {
            return Err(DurabilityError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("invalid directory: {}", dirname.display()),
            )));
        }

        let path_a = dirname.join(format!("{}_a.durable", object_id));
        let path_b = dirname.join(format!("{}_b.durable", object_id));

        let created = !path_a.exists() || !path_b.exists();

        let mut file_a = OpenOptions::new().read(true).write(true).create(true).open(&path_a)?;
        let mut file_b = OpenOptions::new().read(true).write(true).create(true).open(&path_b)?;

        if created {
            // The files themselves are synced on every save; their creation is only durable
            // once the directory entry is.
            sync_directory(dirname)?;
        }

        let record_a = classify(read_record::<S>(&mut file_a))?;
        let record_b = classify(read_record::<S>(&mut file_b))?;

        let (serial, next_write, recovered) = match (record_a, record_b) {
            (Some((serial_a, object_a)), Some((serial_b, object_b))) => {
                if serial_a > serial_b {
                    (serial_a + 1, NextWrite::B, Some(object_a))
                } else {
                    (serial_b + 1, NextWrite::A, Some(object_b))
                }
            }
            (Some((serial_a, object_a)), None) => (serial_a + 1, NextWrite::B, Some(object_a)),
            (None, Some((serial_b, object_b))) => (serial_b + 1, NextWrite::A, Some(object_b)),
            (None, None) => {
                if file_a.metadata()?.len() == 0 && file_b.metadata()?.len() == 0 {
                    // A brand new store.
                    (1, NextWrite::A, None)
                } else {
                    return Err(DurabilityError::Unrecoverable);
                }
            }
        };

        Ok(DurableStore {
            path_a,
            path_b,
            files: Some((file_a, file_b)),
            serial,
            next_write,
            recovered,
        })
    }

    /// The serial number the next save will carry.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// The object recovered at open time, if any.
    pub fn recovered(&self) -> Option<&S> {
        self.recovered.as_ref()
    }

    /// Takes ownership of the recovered object.
    pub fn take_recovered(&mut self) -> Option<S> {
        self.recovered.take()
    }

    /// Durably writes the object's state. On return the record has been handed to the disk with
    /// the strongest sync primitive the platform offers; the previously written record remains
    /// readable in the sibling file until the save after this one.
    pub fn save(&mut self, object: &S) -> Result<(), DurabilityError> {
        let (file_a, file_b) = self.files.as_mut().ok_or(DurabilityError::Closed)?;

        let serial = self.serial;
        let file = match self.next_write {
            NextWrite::A => file_a,
            NextWrite::B => file_b,
        };

        self.serial += 1;
        self.next_write = match self.next_write {
            NextWrite::A => NextWrite::B,
            NextWrite::B => NextWrite::A,
        };
        self.recovered = None;

        write_record(file, serial, object)
    }

    /// Releases both file handles. Idempotent.
    pub fn close(&mut self) {
        self.files = None;
    }

    pub fn path_a(&self) -> &Path {
        &self.path_a
    }

    pub fn path_b(&self) -> &Path {
        &self.path_b
    }
}

// Corruption of a single file is recoverable; real i/o failures are not.
fn classify<S>(result: Result<(u64, S), DurabilityError>) -> Result<Option<(u64, S)>, DurabilityError> {
    match result {
        Ok(record) => Ok(Some(record)),
        Err(ref error) if error.is_corruption() => Ok(None),
        Err(error) => Err(error),
    }
}

fn read_chunk(file: &mut File, buf: &mut [u8]) -> Result<(), DurabilityError> {
    file.read_exact(buf).map_err(|error| {
        if error.kind() == io::ErrorKind::UnexpectedEof {
            DurabilityError::Truncated
        } else {
            DurabilityError::Io(error)
        }
    })
}

/// Returns the `(serial_number, object)` stored in `file`, or the corruption kind that prevents
/// reading it.
fn read_record<S>(file: &mut File) -> Result<(u64, S), DurabilityError>
where
    S: DeserializeOwned,
{
    file.seek(SeekFrom::Start(0))?;

    let mut digest = [0u8; DIGEST_LEN as usize];
    let mut serial_bytes = [0u8; 8];
    let mut length_bytes = [0u8; 8];

    read_chunk(file, &mut digest)?;
    read_chunk(file, &mut serial_bytes)?;
    read_chunk(file, &mut length_bytes)?;

    let serial = u64::from_be_bytes(serial_bytes);
    let length = u64::from_be_bytes(length_bytes);

    // A corrupt length field must not drive the payload read; the file itself bounds it.
    if length > file.metadata()?.len().saturating_sub(HEADER_LEN) {
        return Err(DurabilityError::Truncated);
    }

    let mut payload = vec![0u8; length as usize];
    read_chunk(file, &mut payload)?;

    let mut body = Vec::with_capacity(16 + payload.len());
    body.extend_from_slice(&serial_bytes);
    body.extend_from_slice(&length_bytes);
    body.extend_from_slice(&payload);

    if md5::compute(&body).0 != digest {
        return Err(DurabilityError::HashMismatch);
    }

    let object = bincode::deserialize(&payload)?;

    Ok((serial, object))
}

fn write_record<S>(file: &mut File, serial: u64, object: &S) -> Result<(), DurabilityError>
where
    S: Serialize,
{
    let payload = bincode::serialize(object)?;

    let mut body = Vec::with_capacity(16 + payload.len());
    body.extend_from_slice(&serial.to_be_bytes());
    body.extend_from_slice(&(payload.len() as u64).to_be_bytes());
    body.extend_from_slice(&payload);

    let digest = md5::compute(&body);

    file.seek(SeekFrom::Start(0))?;
    file.write_all(&digest.0)?;
    file.write_all(&body)?;

    // sync_data is the data-sync primitive (fdatasync on Linux, the full-sync fcntl on macOS);
    // the record is not committed until it returns.
    file.sync_data()?;

    Ok(())
}

#[cfg(unix)]
fn sync_directory(dirname: &Path) -> Result<(), DurabilityError> {
    File::open(dirname)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_directory(_dirname: &Path) -> Result<(), DurabilityError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
    struct State {
        round: u64,
        value: String,
    }

    fn state(round: u64, value: &str) -> State {
        State {
            round,
            value: value.to_string(),
        }
    }

    fn corrupt_one_byte(path: &Path, offset: u64) {
        use std::os::unix::fs::FileExt;
        let file = OpenOptions::new().read(true).write(true).open(path).unwrap();
        let mut byte = [0u8; 1];
        file.read_exact_at(&mut byte, offset).unwrap();
        byte[0] ^= 0xff;
        file.write_all_at(&byte, offset).unwrap();
    }

    #[test]
    fn a_new_store_is_empty_with_serial_one() {
        let dir = tempfile::tempdir().unwrap();
        let store: DurableStore<State> = DurableStore::open(dir.path(), "node1").unwrap();

        assert_eq!(store.serial(), 1);
        assert!(store.recovered().is_none());
        assert!(store.path_a().exists());
        assert!(store.path_b().exists());
    }

    #[test]
    fn opening_a_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");

        match DurableStore::<State>::open(&missing, "node1") {
            Err(DurabilityError::Io(_)) => {}
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn save_then_reopen_round_trips() {
        let dir = tempfile::tempdir().unwrap();

        let mut store: DurableStore<State> = DurableStore::open(dir.path(), "node1").unwrap();
        store.save(&state(7, "chosen")).unwrap();
        store.close();

        let store: DurableStore<State> = DurableStore::open(dir.path(), "node1").unwrap();
        assert_eq!(store.recovered(), Some(&state(7, "chosen")));
        assert_eq!(store.serial(), 2);
    }

    #[test]
    fn the_highest_serial_wins_on_reopen() {
        let dir = tempfile::tempdir().unwrap();

        let mut store: DurableStore<State> = DurableStore::open(dir.path(), "node1").unwrap();
        for round in 1..=5 {
            store.save(&state(round, "v")).unwrap();
        }
        store.close();

        let store: DurableStore<State> = DurableStore::open(dir.path(), "node1").unwrap();
        assert_eq!(store.recovered(), Some(&state(5, "v")));
        assert_eq!(store.serial(), 6);
    }

    #[test]
    fn truncating_the_stale_file_keeps_the_latest_record() {
        let dir = tempfile::tempdir().unwrap();

        let mut store: DurableStore<State> = DurableStore::open(dir.path(), "node1").unwrap();
        store.save(&state(1, "s1")).unwrap(); // file a
        store.save(&state(2, "s2")).unwrap(); // file b
        let stale = store.path_a().to_path_buf();
        store.close();

        OpenOptions::new().write(true).truncate(true).open(&stale).unwrap();

        let store: DurableStore<State> = DurableStore::open(dir.path(), "node1").unwrap();
        assert_eq!(store.recovered(), Some(&state(2, "s2")));
    }

    #[test]
    fn a_crashed_write_falls_back_to_the_previous_record() {
        let dir = tempfile::tempdir().unwrap();

        let mut store: DurableStore<State> = DurableStore::open(dir.path(), "node1").unwrap();
        store.save(&state(1, "s1")).unwrap(); // file a
        store.save(&state(2, "s2")).unwrap(); // file b
        let newest = store.path_b().to_path_buf();
        store.close();

        // The write of s2 "never completed".
        OpenOptions::new().write(true).truncate(true).open(&newest).unwrap();

        let store: DurableStore<State> = DurableStore::open(dir.path(), "node1").unwrap();
        assert_eq!(store.recovered(), Some(&state(1, "s1")));
        assert_eq!(store.serial(), 2);
    }

    #[test]
    fn recovery_resumes_writing_into_the_unreadable_file() {
        let dir = tempfile::tempdir().unwrap();

        let mut store: DurableStore<State> = DurableStore::open(dir.path(), "node1").unwrap();
        store.save(&state(1, "s1")).unwrap();
        store.save(&state(2, "s2")).unwrap();
        let stale = store.path_a().to_path_buf();
        store.close();

        OpenOptions::new().write(true).truncate(true).open(&stale).unwrap();

        let mut store: DurableStore<State> = DurableStore::open(dir.path(), "node1").unwrap();
        store.save(&state(3, "s3")).unwrap();
        store.close();

        let store: DurableStore<State> = DurableStore::open(dir.path(), "node1").unwrap();
        assert_eq!(store.recovered(), Some(&state(3, "s3")));
        assert_eq!(store.serial(), 4);
    }

    #[test]
    fn a_flipped_payload_byte_is_detected_as_corruption() {
        let dir = tempfile::tempdir().unwrap();

        let mut store: DurableStore<State> = DurableStore::open(dir.path(), "node1").unwrap();
        store.save(&state(1, "s1")).unwrap();
        store.save(&state(2, "s2")).unwrap();
        let newest = store.path_b().to_path_buf();
        store.close();

        corrupt_one_byte(&newest, HEADER_LEN + 2);

        let store: DurableStore<State> = DurableStore::open(dir.path(), "node1").unwrap();
        assert_eq!(store.recovered(), Some(&state(1, "s1")));
    }

    #[test]
    fn both_files_unreadable_is_unrecoverable() {
        let dir = tempfile::tempdir().unwrap();

        let mut store: DurableStore<State> = DurableStore::open(dir.path(), "node1").unwrap();
        store.save(&state(1, "s1")).unwrap();
        store.save(&state(2, "s2")).unwrap();
        let path_a = store.path_a().to_path_buf();
        let path_b = store.path_b().to_path_buf();
        store.close();

        corrupt_one_byte(&path_a, HEADER_LEN + 1);
        corrupt_one_byte(&path_b, HEADER_LEN + 1);

        match DurableStore::<State>::open(dir.path(), "node1") {
            Err(DurabilityError::Unrecoverable) => {}
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn save_after_close_is_rejected_and_close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();

        let mut store: DurableStore<State> = DurableStore::open(dir.path(), "node1").unwrap();
        store.close();
        store.close();

        match store.save(&state(1, "s1")) {
            Err(DurabilityError::Closed) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn stores_with_different_object_ids_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();

        let mut store1: DurableStore<State> = DurableStore::open(dir.path(), "node1").unwrap();
        let mut store2: DurableStore<State> = DurableStore::open(dir.path(), "node2").unwrap();
        store1.save(&state(1, "one")).unwrap();
        store2.save(&state(2, "two")).unwrap();
        store1.close();
        store2.close();

        let store1: DurableStore<State> = DurableStore::open(dir.path(), "node1").unwrap();
        let store2: DurableStore<State> = DurableStore::open(dir.path(), "node2").unwrap();
        assert_eq!(store1.recovered(), Some(&state(1, "one")));
        assert_eq!(store2.recovered(), Some(&state(2, "two")));
    }
}
