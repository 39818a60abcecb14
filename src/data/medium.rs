//! Storage media the persistent log is written to.
//!
//! A medium is mounted once and then hands out named byte streams. The log never
//! touches paths or devices directly, which keeps the block/filesystem driver an
//! external collaborator:
//!
//! - [`FsMedium`]: a directory on the host filesystem (SD card mount point on the
//!   device, any directory elsewhere)
//! - [`MemoryMedium`]: volatile in-memory streams with fault injection, for
//!   simulation and tests

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// An open byte stream on a storage medium.
pub trait LogStream: Read + Write + Seek + Send {
    /// Truncate the stream to zero length. The position is left unchanged.
    fn truncate(&mut self) -> io::Result<()>;

    /// Flush buffered data down to the medium.
    fn sync(&mut self) -> io::Result<()>;
}

/// A mountable medium holding named streams.
pub trait StorageMedium: Send + Sync {
    /// Make the medium available. Called once before any stream is opened.
    fn mount(&self) -> io::Result<()>;

    /// Open `name` for reading and writing, creating it if absent.
    fn open_stream(&self, name: &str) -> io::Result<Box<dyn LogStream>>;

    /// Human-readable location, for logs.
    fn describe(&self) -> String;
}

impl LogStream for File {
    fn truncate(&mut self) -> io::Result<()> {
        self.set_len(0)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.flush()?;
        self.sync_data()
    }
}

// =============================================================================
// FsMedium - Host filesystem directory
// =============================================================================

/// Streams stored as files in one directory.
#[derive(Debug, Clone)]
pub struct FsMedium {
    mount_point: PathBuf,
}

impl FsMedium {
    /// Medium rooted at `mount_point`.
    pub fn new(mount_point: impl Into<PathBuf>) -> Self {
        Self {
            mount_point: mount_point.into(),
        }
    }

    /// Directory the streams live in.
    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }
}

impl StorageMedium for FsMedium {
    fn mount(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.mount_point)?;
        if !self.mount_point.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is not a directory", self.mount_point.display()),
            ));
        }
        info!(mount_point = %self.mount_point.display(), "Medium mounted");
        Ok(())
    }

    fn open_stream(&self, name: &str) -> io::Result<Box<dyn LogStream>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.mount_point.join(name))?;
        Ok(Box::new(file))
    }

    fn describe(&self) -> String {
        self.mount_point.display().to_string()
    }
}

// =============================================================================
// MemoryMedium - Volatile streams with fault injection
// =============================================================================

type SharedBytes = Arc<Mutex<Vec<u8>>>;

#[derive(Default)]
struct Faults {
    open: AtomicBool,
    write: AtomicBool,
    truncate: AtomicBool,
    sync: AtomicBool,
    write_budget: Mutex<Option<usize>>,
}

fn injected(kind: &str) -> io::Error {
    io::Error::other(format!("injected {kind} failure"))
}

/// In-memory medium. Stream contents survive close and reopen for as long as
/// the medium lives; every clone shares the same streams.
#[derive(Clone, Default)]
pub struct MemoryMedium {
    streams: Arc<Mutex<HashMap<String, SharedBytes>>>,
    faults: Arc<Faults>,
}

impl MemoryMedium {
    /// Empty medium.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of a stream's contents, if it was ever opened.
    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        self.streams.lock().get(name).map(|bytes| bytes.lock().clone())
    }

    /// Make subsequent `open_stream` calls fail.
    pub fn fail_open(&self, fail: bool) {
        self.faults.open.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent writes fail. `false` also lifts a `fail_writes_after` limit.
    pub fn fail_writes(&self, fail: bool) {
        self.faults.write.store(fail, Ordering::SeqCst);
        if !fail {
            *self.faults.write_budget.lock() = None;
        }
    }

    /// Let only `bytes` more bytes through, then fail every write.
    ///
    /// A write crossing the limit is cut short, leaving a torn record behind.
    pub fn fail_writes_after(&self, bytes: usize) {
        *self.faults.write_budget.lock() = Some(bytes);
    }

    /// Make subsequent truncations fail.
    pub fn fail_truncate(&self, fail: bool) {
        self.faults.truncate.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent syncs (and therefore closes) fail.
    pub fn fail_sync(&self, fail: bool) {
        self.faults.sync.store(fail, Ordering::SeqCst);
    }
}

impl StorageMedium for MemoryMedium {
    fn mount(&self) -> io::Result<()> {
        Ok(())
    }

    fn open_stream(&self, name: &str) -> io::Result<Box<dyn LogStream>> {
        if self.faults.open.load(Ordering::SeqCst) {
            return Err(injected("open"));
        }
        let bytes = Arc::clone(self.streams.lock().entry(name.to_string()).or_default());
        Ok(Box::new(MemoryStream {
            bytes,
            position: 0,
            faults: Arc::clone(&self.faults),
        }))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

struct MemoryStream {
    bytes: SharedBytes,
    position: u64,
    faults: Arc<Faults>,
}

impl MemoryStream {
    fn with_cursor<T>(&mut self, f: impl FnOnce(&mut Cursor<&mut Vec<u8>>) -> T) -> T {
        let mut bytes = self.bytes.lock();
        let mut cursor = Cursor::new(&mut *bytes);
        cursor.set_position(self.position);
        let result = f(&mut cursor);
        self.position = cursor.position();
        result
    }
}

impl Read for MemoryStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.with_cursor(|cursor| cursor.read(buf))
    }
}

impl Write for MemoryStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.faults.write.load(Ordering::SeqCst) {
            return Err(injected("write"));
        }
        let allowed = {
            let mut budget = self.faults.write_budget.lock();
            match budget.as_mut() {
                Some(0) => return Err(injected("write")),
                Some(left) => {
                    let n = buf.len().min(*left);
                    *left -= n;
                    n
                }
                None => buf.len(),
            }
        };
        self.with_cursor(|cursor| cursor.write(&buf[..allowed]))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemoryStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.with_cursor(|cursor| cursor.seek(pos))
    }
}

impl LogStream for MemoryStream {
    fn truncate(&mut self) -> io::Result<()> {
        if self.faults.truncate.load(Ordering::SeqCst) {
            return Err(injected("truncate"));
        }
        self.bytes.lock().clear();
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        if self.faults.sync.load(Ordering::SeqCst) {
            return Err(injected("sync"));
        }
        Ok(())
    }
}
