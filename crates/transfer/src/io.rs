//! Storage collaborators: readable sources and positional sinks.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::TransferError;
use crate::types::TransferMetadata;
use crate::validation::validate_file_name;

/// Byte source with a known length.
pub trait ByteSource: Send {
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fills `buf` from `offset`; short reads are errors.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Sequential reader over the whole source, used for digesting.
    fn reader(&mut self) -> io::Result<Box<dyn Read + '_>>;
}

/// Positional byte sink for one inbound transfer.
pub trait ByteSink: Send {
    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()>;

    /// Sequential reader over everything written so far.
    fn reader(&mut self) -> io::Result<Box<dyn Read + '_>>;

    /// Releases the sink. `keep == false` discards what was written.
    fn finish(&mut self, keep: bool) -> io::Result<()>;
}

/// Opens destination sinks for inbound transfers.
pub trait SinkProvider: Send {
    fn open_sink(&mut self, metadata: &TransferMetadata)
    -> Result<Box<dyn ByteSink>, TransferError>;
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Reads a file on disk.
pub struct FileSource {
    file: File,
    len: u64,
}

impl FileSource {
    pub fn open(path: &Path) -> Result<Self, TransferError> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self { file, len })
    }
}

impl ByteSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)
    }

    fn reader(&mut self) -> io::Result<Box<dyn Read + '_>> {
        self.file.seek(SeekFrom::Start(0))?;
        Ok(Box::new(&mut self.file))
    }
}

/// In-memory source.
pub struct MemorySource {
    data: Vec<u8>,
}

impl MemorySource {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl ByteSource for MemorySource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let start = usize::try_from(offset).map_err(io::Error::other)?;
        let end = start
            .checked_add(buf.len())
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))?;
        buf.copy_from_slice(&self.data[start..end]);
        Ok(())
    }

    fn reader(&mut self) -> io::Result<Box<dyn Read + '_>> {
        Ok(Box::new(self.data.as_slice()))
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Most numbered alternatives tried before giving up on a destination name.
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// Writes chunks into a private part file at exact offsets.
///
/// The part file sits next to the destination and is only renamed into place
/// by `finish(true)`. Existing files are never truncated, replaced or removed:
/// if the destination is taken, the next free `name (n).ext` is used.
pub struct FileSink {
    path: PathBuf,
    part_path: PathBuf,
    file: Option<File>,
}

impl FileSink {
    /// Creates a fresh part file for `path`.
    pub fn create(path: &Path) -> Result<Self, TransferError> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        let file_name = path
            .file_name()
            .ok_or_else(|| TransferError::InvalidPath(path.display().to_string()))?;
        std::fs::create_dir_all(parent)?;

        // Short prefix of the name keeps the part file under name-length limits.
        let prefix: String = file_name.to_string_lossy().chars().take(64).collect();
        let part_path = parent.join(format!(
            ".{prefix}.{}.part",
            uuid::Uuid::new_v4().simple()
        ));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&part_path)?;
        Ok(Self {
            path: path.to_path_buf(),
            part_path,
            file: Some(file),
        })
    }

    /// Destination path; after a kept `finish` this is where the file landed.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn part_path(&self) -> &Path {
        &self.part_path
    }

    fn file(&mut self) -> io::Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("sink already finished"))
    }

    fn publish(&mut self) -> io::Result<()> {
        let dest = reserve_destination(&self.path)?;
        if let Err(e) = std::fs::rename(&self.part_path, &dest) {
            // Only the empty placeholder we just created is removed.
            let _ = std::fs::remove_file(&dest);
            let _ = std::fs::remove_file(&self.part_path);
            return Err(e);
        }
        debug!(path = %dest.display(), "file stored");
        self.path = dest;
        Ok(())
    }
}

/// Claims the first free name among `path`, `stem (1).ext`, `stem (2).ext`, ...
///
/// The claim is an empty file created with `create_new`, so a concurrent
/// writer can never be handed the same name.
fn reserve_destination(path: &Path) -> io::Result<PathBuf> {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());

    for n in 0..MAX_NAME_ATTEMPTS {
        let candidate = match (n, &ext) {
            (0, _) => path.to_path_buf(),
            (_, Some(ext)) => path.with_file_name(format!("{stem} ({n}).{ext}")),
            (_, None) => path.with_file_name(format!("{stem} ({n})")),
        };
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(_) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free name for {}", path.display()),
    ))
}

impl ByteSink for FileSink {
    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        let file = self.file()?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)
    }

    fn reader(&mut self) -> io::Result<Box<dyn Read + '_>> {
        let file = self.file()?;
        file.flush()?;
        file.seek(SeekFrom::Start(0))?;
        Ok(Box::new(file))
    }

    fn finish(&mut self, keep: bool) -> io::Result<()> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        if keep {
            file.sync_all()?;
            drop(file);
            return self.publish();
        }
        drop(file);
        debug!(path = %self.part_path.display(), "discarding partial file");
        std::fs::remove_file(&self.part_path)
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        // A sink dropped without finish() was never verified.
        if self.file.is_some() {
            let _ = self.finish(false);
        }
    }
}

/// Shared in-memory buffer; clone the handle to inspect the result.
#[derive(Clone, Default)]
pub struct MemorySink {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the bytes written so far.
    pub fn contents(&self) -> Vec<u8> {
        self.buf.lock().map(|b| b.clone()).unwrap_or_default()
    }
}

impl ByteSink for MemorySink {
    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        let start = usize::try_from(offset).map_err(io::Error::other)?;
        let end = start + data.len();
        let mut buf = self
            .buf
            .lock()
            .map_err(|_| io::Error::other("memory sink poisoned"))?;
        if buf.len() < end {
            buf.resize(end, 0);
        }
        buf[start..end].copy_from_slice(data);
        Ok(())
    }

    fn reader(&mut self) -> io::Result<Box<dyn Read + '_>> {
        Ok(Box::new(Cursor::new(self.contents())))
    }

    fn finish(&mut self, keep: bool) -> io::Result<()> {
        if !keep {
            self.buf
                .lock()
                .map_err(|_| io::Error::other("memory sink poisoned"))?
                .clear();
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

/// Stores inbound files under a base directory, named by the peer.
pub struct DirectoryStorage {
    base_path: PathBuf,
}

impl DirectoryStorage {
    pub fn new(base_path: &Path) -> Self {
        Self {
            base_path: base_path.to_path_buf(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

impl SinkProvider for DirectoryStorage {
    fn open_sink(
        &mut self,
        metadata: &TransferMetadata,
    ) -> Result<Box<dyn ByteSink>, TransferError> {
        // The name comes from the peer; never let it escape base_path.
        validate_file_name(&metadata.name)?;
        let sink = FileSink::create(&self.base_path.join(&metadata.name))?;
        Ok(Box::new(sink))
    }
}

/// Keeps inbound files in memory, keyed by transfer id.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    files: Arc<Mutex<HashMap<String, MemorySink>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Contents received for `id`, if a sink was ever opened for it.
    pub fn get(&self, id: &str) -> Option<Vec<u8>> {
        let files = self.files.lock().ok()?;
        files.get(id).map(MemorySink::contents)
    }

    /// Number of sinks opened so far.
    pub fn opened(&self) -> usize {
        self.files.lock().map(|f| f.len()).unwrap_or(0)
    }
}

impl SinkProvider for MemoryStorage {
    fn open_sink(
        &mut self,
        metadata: &TransferMetadata,
    ) -> Result<Box<dyn ByteSink>, TransferError> {
        let sink = MemorySink::new();
        self.files
            .lock()
            .map_err(|_| TransferError::Io(io::Error::other("memory storage poisoned")))?
            .insert(metadata.id.to_string(), sink.clone());
        Ok(Box::new(sink))
    }
}
