//! Two-stream persistent log: sample data plus session metadata.
//!
//! Both streams are opened, cleared and closed together. Every operation holds the
//! single log-wide lock for its whole duration, so a `clear` can never interleave
//! with an `append`, and the consumer task and the control path never write to the
//! streams at the same time. Nested steps (the implicit close inside `open`) run on
//! the already-held guard instead of re-locking.
//!
//! Each stream keeps its own write position (end of data) and read cursor, so a
//! remote reader can page through the data stream while nothing else moves it.
//!
//! I/O failures are returned to the caller as-is; nothing is retried here.

use parking_lot::Mutex;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use tracing::{debug, error, info};

use super::medium::{LogStream, StorageMedium};
use crate::error::{AppResult, RecorderError};

/// Names of the two streams on the medium.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamNames {
    /// Sample data stream
    pub data: String,
    /// Record metadata stream
    pub meta: String,
}

impl Default for StreamNames {
    fn default() -> Self {
        Self {
            data: "MOCAP.DAT".to_string(),
            meta: "META.DAT".to_string(),
        }
    }
}

struct Stream {
    name: String,
    handle: Box<dyn LogStream>,
    read_pos: u64,
    write_pos: u64,
}

impl Stream {
    fn open(medium: &dyn StorageMedium, name: &str) -> AppResult<Self> {
        let mut handle = medium.open_stream(name).map_err(|e| {
            error!(stream = name, error = %e, "Open failed");
            e
        })?;
        let write_pos = handle.seek(SeekFrom::End(0))?;
        Ok(Self {
            name: name.to_string(),
            handle,
            read_pos: 0,
            write_pos,
        })
    }

    fn clear(&mut self) -> AppResult<()> {
        self.handle.truncate().map_err(|e| {
            error!(stream = %self.name, error = %e, "Truncate failed");
            e
        })?;
        self.handle.seek(SeekFrom::Start(0))?;
        self.read_pos = 0;
        self.write_pos = 0;
        Ok(())
    }

    /// A failed write leaves `write_pos` where it was, so a torn tail stays
    /// invisible to readers and is overwritten by the next append.
    fn append(&mut self, bytes: &[u8]) -> AppResult<usize> {
        self.handle.seek(SeekFrom::Start(self.write_pos))?;
        if let Err(e) = self.handle.write_all(bytes) {
            error!(stream = %self.name, write_pos = self.write_pos, error = %e, "Append failed");
            return Err(e.into());
        }
        self.write_pos += bytes.len() as u64;
        Ok(bytes.len())
    }

    fn read_from(&mut self, offset: u64, buf: &mut [u8]) -> AppResult<usize> {
        let available = self.write_pos.saturating_sub(offset);
        let len = buf.len().min(usize::try_from(available).unwrap_or(usize::MAX));
        let buf = &mut buf[..len];
        self.handle.seek(SeekFrom::Start(offset))?;
        let mut filled = 0;
        while filled < buf.len() {
            match self.handle.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }

    fn read(&mut self, buf: &mut [u8]) -> AppResult<usize> {
        let n = self.read_from(self.read_pos, buf)?;
        self.read_pos += n as u64;
        Ok(n)
    }
}

struct OpenStreams {
    data: Stream,
    meta: Stream,
}

/// Mutex-guarded data + meta log on a storage medium.
pub struct PersistentLog {
    medium: Arc<dyn StorageMedium>,
    names: StreamNames,
    streams: Mutex<Option<OpenStreams>>,
}

impl PersistentLog {
    /// Mount `medium` and build a closed log over it.
    pub fn mount(medium: Arc<dyn StorageMedium>, names: StreamNames) -> AppResult<Self> {
        medium.mount()?;
        info!(medium = %medium.describe(), data = %names.data, meta = %names.meta, "Init success");
        Ok(Self {
            medium,
            names,
            streams: Mutex::new(None),
        })
    }

    /// Open both streams, closing them first if already open.
    ///
    /// Streams are created when absent and positioned for append.
    pub fn open(&self) -> AppResult<()> {
        let mut guard = self.streams.lock();
        if guard.is_some() {
            Self::close_locked(&mut guard).map_err(|e| {
                error!(error = %e, "Fail to close on open");
                e
            })?;
        }

        let data = Stream::open(self.medium.as_ref(), &self.names.data)?;
        let meta = Stream::open(self.medium.as_ref(), &self.names.meta)?;
        info!(
            data_len = data.write_pos,
            meta_len = meta.write_pos,
            "Open success"
        );
        *guard = Some(OpenStreams { data, meta });
        Ok(())
    }

    /// Truncate both streams to zero length and rewind their cursors.
    pub fn clear(&self) -> AppResult<()> {
        let mut guard = self.streams.lock();
        let streams = guard.as_mut().ok_or(RecorderError::NotOpen)?;
        streams.data.clear()?;
        streams.meta.clear()?;
        debug!("Clear success");
        Ok(())
    }

    /// Append to the data stream. Returns the number of bytes written.
    pub fn append(&self, bytes: &[u8]) -> AppResult<usize> {
        self.with_streams(|streams| streams.data.append(bytes))
    }

    /// Append to the meta stream. Returns the number of bytes written.
    pub fn meta_write(&self, bytes: &[u8]) -> AppResult<usize> {
        self.with_streams(|streams| streams.meta.append(bytes))
    }

    /// Sequential read from the data stream's cursor.
    ///
    /// Returns fewer bytes than `buf.len()` at the end of the stream, zero once
    /// everything has been read.
    pub fn read(&self, buf: &mut [u8]) -> AppResult<usize> {
        self.with_streams(|streams| streams.data.read(buf))
    }

    /// Random read from the data stream. The cursor is not moved.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> AppResult<usize> {
        self.with_streams(|streams| streams.data.read_from(offset, buf))
    }

    /// Sequential read from the meta stream's cursor.
    pub fn meta_read(&self, buf: &mut [u8]) -> AppResult<usize> {
        self.with_streams(|streams| streams.meta.read(buf))
    }

    /// Random read from the meta stream. The cursor is not moved.
    pub fn meta_read_at(&self, offset: u64, buf: &mut [u8]) -> AppResult<usize> {
        self.with_streams(|streams| streams.meta.read_from(offset, buf))
    }

    /// Move the data stream's read cursor.
    pub fn seek_read(&self, offset: u64) -> AppResult<()> {
        self.with_streams(|streams| {
            streams.data.read_pos = offset;
            Ok(())
        })
    }

    /// Flush and close both streams. No-op when not open.
    ///
    /// Both handles are released even if flushing one of them fails; the first
    /// failure is returned.
    pub fn close(&self) -> AppResult<()> {
        let mut guard = self.streams.lock();
        Self::close_locked(&mut guard)
    }

    fn close_locked(slot: &mut Option<OpenStreams>) -> AppResult<()> {
        let Some(mut streams) = slot.take() else {
            return Ok(());
        };
        let data = streams.data.handle.sync();
        let meta = streams.meta.handle.sync();
        drop(streams);

        data.and(meta).map_err(|e| {
            error!(error = %e, "Close failed");
            RecorderError::Io(e)
        })?;
        info!("Close success");
        Ok(())
    }

    /// Whether both streams are open.
    pub fn is_open(&self) -> bool {
        self.streams.lock().is_some()
    }

    /// Current length of the data stream in bytes.
    pub fn data_len(&self) -> AppResult<u64> {
        self.with_streams(|streams| Ok(streams.data.write_pos))
    }

    /// Current length of the meta stream in bytes.
    pub fn meta_len(&self) -> AppResult<u64> {
        self.with_streams(|streams| Ok(streams.meta.write_pos))
    }

    /// Stream names on the medium.
    pub fn names(&self) -> &StreamNames {
        &self.names
    }

    fn with_streams<T>(&self, f: impl FnOnce(&mut OpenStreams) -> AppResult<T>) -> AppResult<T> {
        let mut guard = self.streams.lock();
        let streams = guard.as_mut().ok_or(RecorderError::NotOpen)?;
        f(streams)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::medium::{FsMedium, MemoryMedium};

    fn memory_log() -> (MemoryMedium, PersistentLog) {
        let medium = MemoryMedium::new();
        let log = PersistentLog::mount(Arc::new(medium.clone()), StreamNames::default()).unwrap();
        (medium, log)
    }

    #[test]
    fn test_operations_require_open_log() {
        let (_medium, log) = memory_log();
        let mut buf = [0u8; 4];

        assert!(!log.is_open());
        assert!(matches!(log.append(b"x"), Err(RecorderError::NotOpen)));
        assert!(matches!(log.meta_write(b"x"), Err(RecorderError::NotOpen)));
        assert!(matches!(log.read(&mut buf), Err(RecorderError::NotOpen)));
        assert!(matches!(log.clear(), Err(RecorderError::NotOpen)));
        // Closing a closed log is fine.
        log.close().unwrap();
    }

    #[test]
    fn test_append_then_sequential_read() {
        let (_medium, log) = memory_log();
        log.open().unwrap();
        log.clear().unwrap();

        assert_eq!(log.append(b"hello ").unwrap(), 6);
        assert_eq!(log.append(b"world").unwrap(), 5);

        let mut buf = [0u8; 4];
        assert_eq!(log.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"hell");

        let mut rest = [0u8; 16];
        let n = log.read(&mut rest).unwrap();
        assert_eq!(&rest[..n], b"o world");
        assert_eq!(log.read(&mut rest).unwrap(), 0);

        // Appends after reading keep going at the end of the stream.
        log.append(b"!").unwrap();
        assert_eq!(log.read(&mut rest).unwrap(), 1);
        assert_eq!(log.data_len().unwrap(), 12);
    }

    #[test]
    fn test_clear_after_open_reads_nothing() {
        let (medium, log) = memory_log();
        log.open().unwrap();
        log.append(&[1u8; 64]).unwrap();
        log.meta_write(&[2u8; 8]).unwrap();

        log.clear().unwrap();

        let mut buf = [0u8; 64];
        assert_eq!(log.read(&mut buf).unwrap(), 0);
        assert_eq!(log.meta_read(&mut buf).unwrap(), 0);
        assert_eq!(medium.contents("MOCAP.DAT"), Some(vec![]));

        log.append(&[3u8; 4]).unwrap();
        assert_eq!(log.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], &[3, 3, 3, 3]);
    }

    #[test]
    fn test_reopen_appends_after_existing_data() {
        let (_medium, log) = memory_log();
        log.open().unwrap();
        log.append(b"abc").unwrap();

        // Second open without close behaves as close-then-reopen.
        log.open().unwrap();
        assert!(log.is_open());
        log.append(b"def").unwrap();

        let mut buf = [0u8; 8];
        let n = log.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"abcdef");
    }

    #[test]
    fn test_random_reads_leave_cursor() {
        let (_medium, log) = memory_log();
        log.open().unwrap();
        log.append(b"0123456789").unwrap();
        log.meta_write(b"meta").unwrap();

        let mut buf = [0u8; 3];
        assert_eq!(log.read_at(5, &mut buf).unwrap(), 3);
        assert_eq!(&buf, b"567");
        assert_eq!(log.read_at(9, &mut buf).unwrap(), 1);
        assert_eq!(log.meta_read_at(0, &mut buf).unwrap(), 3);
        assert_eq!(&buf, b"met");

        assert_eq!(log.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"012");

        log.seek_read(8).unwrap();
        assert_eq!(log.read(&mut buf).unwrap(), 2);
    }

    #[test]
    fn test_open_failure_leaves_log_closed() {
        let (medium, log) = memory_log();
        medium.fail_open(true);
        assert!(matches!(log.open(), Err(RecorderError::Io(_))));
        assert!(!log.is_open());
    }

    #[test]
    fn test_close_failure_still_releases_streams() {
        let (medium, log) = memory_log();
        log.open().unwrap();
        medium.fail_sync(true);

        assert!(matches!(log.close(), Err(RecorderError::Io(_))));
        assert!(!log.is_open());
    }

    #[test]
    fn test_write_failure_is_propagated() {
        let (medium, log) = memory_log();
        log.open().unwrap();
        medium.fail_writes(true);

        assert!(matches!(log.append(b"x"), Err(RecorderError::Io(_))));
        assert_eq!(log.data_len().unwrap(), 0);
    }

    #[test]
    fn test_torn_append_stays_unreadable() {
        let (medium, log) = memory_log();
        log.open().unwrap();
        log.append(&[1u8; 52]).unwrap();

        medium.fail_writes_after(20);
        assert!(matches!(log.append(&[2u8; 52]), Err(RecorderError::Io(_))));
        assert_eq!(log.data_len().unwrap(), 52);
        assert_eq!(medium.contents("MOCAP.DAT").unwrap().len(), 72);

        let mut buf = [0u8; 128];
        assert_eq!(log.read(&mut buf).unwrap(), 52);
        assert!(buf[..52].iter().all(|&b| b == 1));
        assert_eq!(log.read(&mut buf).unwrap(), 0);
        assert_eq!(log.read_at(40, &mut buf).unwrap(), 12);

        // The next append lands over the torn bytes.
        medium.fail_writes(false);
        log.append(&[3u8; 52]).unwrap();
        assert_eq!(log.read(&mut buf).unwrap(), 52);
        assert!(buf[..52].iter().all(|&b| b == 3));
        assert_eq!(medium.contents("MOCAP.DAT").unwrap().len(), 104);
    }

    #[test]
    fn test_fs_log_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let medium: Arc<dyn StorageMedium> = Arc::new(FsMedium::new(dir.path()));

        {
            let log = PersistentLog::mount(Arc::clone(&medium), StreamNames::default()).unwrap();
            log.open().unwrap();
            log.clear().unwrap();
            log.append(&[7u8; 52]).unwrap();
            log.meta_write(&[1u8; 8]).unwrap();
            log.close().unwrap();
        }

        let log = PersistentLog::mount(medium, StreamNames::default()).unwrap();
        log.open().unwrap();
        assert_eq!(log.data_len().unwrap(), 52);
        let mut meta = [0u8; 8];
        assert_eq!(log.meta_read(&mut meta).unwrap(), 8);
        assert_eq!(meta, [1u8; 8]);
        assert!(dir.path().join("MOCAP.DAT").exists());
        assert!(dir.path().join("META.DAT").exists());
    }
}
