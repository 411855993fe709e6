use crate::error::Error;
use crate::storage::{File, Storage};
use crate::IResult;
use std::collections::{HashMap, HashSet};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

type FileNode = Arc<Mutex<FileContent>>;

/// Called by every `File::sync` before it completes.
pub type SyncHook = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct FileContent {
    data: Vec<u8>,
    locked: bool,
}

#[derive(Default)]
struct Faults {
    write_error: AtomicBool,
    sync_error: AtomicBool,
    sync_hook: Mutex<Option<SyncHook>>,
}

#[derive(Default)]
struct MemStorageInner {
    files: RwLock<HashMap<PathBuf, FileNode>>,
    dirs: RwLock<HashSet<PathBuf>>,
    faults: Faults,
}

/// An in-memory `Storage`. Clones share the same namespace.
///
/// Writes and syncs can be made to fail on demand to simulate a crash in the
/// middle of a manifest commit.
#[derive(Clone, Default)]
pub struct MemStorage {
    inner: Arc<MemStorageInner>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `File::write` fail (or succeed again).
    pub fn set_write_error(&self, fail: bool) {
        self.inner.faults.write_error.store(fail, Ordering::Release);
    }

    /// Make every subsequent `File::sync` fail (or succeed again).
    pub fn set_sync_error(&self, fail: bool) {
        self.inner.faults.sync_error.store(fail, Ordering::Release);
    }

    /// Run `hook` inside every subsequent `File::sync`, e.g. to hold a
    /// commit in the middle of its manifest write. `None` removes it.
    pub fn set_sync_hook(&self, hook: Option<SyncHook>) {
        *self
            .inner
            .faults
            .sync_hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = hook;
    }

    fn node<P: AsRef<Path>>(&self, name: P) -> IResult<FileNode> {
        self.inner
            .files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name.as_ref())
            .cloned()
            .ok_or_else(|| not_found(name.as_ref()))
    }

    fn file(&self, name: &Path, node: FileNode) -> MemFile {
        MemFile {
            name: name.to_path_buf(),
            node,
            pos: 0,
            storage: self.inner.clone(),
        }
    }
}

fn not_found(name: &Path) -> Error {
    Error::IO(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("{} not found", name.display()),
    ))
}

fn injected(op: &str) -> Error {
    Error::IO(std::io::Error::new(
        std::io::ErrorKind::Other,
        format!("injected {} error", op),
    ))
}

impl Storage for MemStorage {
    type F = MemFile;

    fn create<P: AsRef<Path>>(&self, name: P) -> IResult<Self::F> {
        let node = FileNode::default();
        self.inner
            .files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.as_ref().to_path_buf(), node.clone());
        Ok(self.file(name.as_ref(), node))
    }

    fn open<P: AsRef<Path>>(&self, name: P) -> IResult<Self::F> {
        let node = self.node(&name)?;
        Ok(self.file(name.as_ref(), node))
    }

    fn remove<P: AsRef<Path>>(&self, name: P) -> IResult<()> {
        self.inner
            .files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name.as_ref())
            .map(|_| ())
            .ok_or_else(|| not_found(name.as_ref()))
    }

    fn remove_dir<P: AsRef<Path>>(&self, dir: P, recursively: bool) -> IResult<()> {
        let dir = dir.as_ref();
        let mut files = self.inner.files.write().unwrap_or_else(PoisonError::into_inner);
        let children: Vec<PathBuf> = files.keys().filter(|p| p.starts_with(dir)).cloned().collect();
        if !children.is_empty() && !recursively {
            return Err(Error::IO(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("{} is not empty", dir.display()),
            )));
        }
        for child in children {
            files.remove(&child);
        }
        self.inner
            .dirs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|d| !d.starts_with(dir));
        Ok(())
    }

    fn exists<P: AsRef<Path>>(&self, name: P) -> bool {
        let name = name.as_ref();
        self.inner
            .files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
            || self
                .inner
                .dirs
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(name)
    }

    fn list<P: AsRef<Path>>(&self, dir: P) -> IResult<Vec<PathBuf>> {
        let files = self.inner.files.read().unwrap_or_else(PoisonError::into_inner);
        let mut v: Vec<PathBuf> = files
            .keys()
            .filter(|p| p.parent() == Some(dir.as_ref()))
            .cloned()
            .collect();
        v.sort();
        Ok(v)
    }

    fn rename<P: AsRef<Path>>(&self, src: P, target: P) -> IResult<()> {
        let mut files = self.inner.files.write().unwrap_or_else(PoisonError::into_inner);
        let node = files
            .remove(src.as_ref())
            .ok_or_else(|| not_found(src.as_ref()))?;
        files.insert(target.as_ref().to_path_buf(), node);
        Ok(())
    }

    fn mkdir_all<P: AsRef<Path>>(&self, dir: P) -> IResult<()> {
        let mut dirs = self.inner.dirs.write().unwrap_or_else(PoisonError::into_inner);
        for ancestor in dir.as_ref().ancestors() {
            if !ancestor.as_os_str().is_empty() {
                dirs.insert(ancestor.to_path_buf());
            }
        }
        Ok(())
    }
}

/// A handle on a `MemStorage` file with its own cursor.
pub struct MemFile {
    name: PathBuf,
    node: FileNode,
    pos: usize,
    storage: Arc<MemStorageInner>,
}

impl File for MemFile {
    fn lock_file(&self) -> IResult<()> {
        let mut content = self.node.lock().unwrap_or_else(PoisonError::into_inner);
        if content.locked {
            return Err(Error::IO(std::io::Error::new(
                std::io::ErrorKind::WouldBlock,
                format!("{} is already locked", self.name.display()),
            )));
        }
        content.locked = true;
        Ok(())
    }

    fn unlock_file(&self) -> IResult<()> {
        self.node.lock().unwrap_or_else(PoisonError::into_inner).locked = false;
        Ok(())
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> IResult<usize> {
        let content = self.node.lock().unwrap_or_else(PoisonError::into_inner);
        let offset = offset as usize;
        if offset >= content.data.len() {
            return Ok(0);
        }
        let n = std::cmp::min(buf.len(), content.data.len() - offset);
        buf[..n].copy_from_slice(&content.data[offset..offset + n]);
        Ok(n)
    }

    fn read(&mut self, buf: &mut [u8]) -> IResult<usize> {
        let n = self.read_at(buf, self.pos as u64)?;
        self.pos += n;
        Ok(n)
    }

    fn read_all(&mut self, buf: &mut Vec<u8>) -> IResult<usize> {
        let content = self.node.lock().unwrap_or_else(PoisonError::into_inner);
        let start = std::cmp::min(self.pos, content.data.len());
        buf.extend_from_slice(&content.data[start..]);
        let n = content.data.len() - start;
        self.pos = content.data.len();
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> IResult<usize> {
        if self.storage.faults.write_error.load(Ordering::Acquire) {
            return Err(injected("write"));
        }
        let mut content = self.node.lock().unwrap_or_else(PoisonError::into_inner);
        let end = self.pos + buf.len();
        if content.data.len() < end {
            content.data.resize(end, 0);
        }
        content.data[self.pos..end].copy_from_slice(buf);
        self.pos = end;
        Ok(buf.len())
    }

    fn flush(&mut self) -> IResult<()> {
        Ok(())
    }

    fn sync(&mut self) -> IResult<()> {
        let hook = self
            .storage
            .faults
            .sync_hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(hook) = hook {
            hook();
        }
        if self.storage.faults.sync_error.load(Ordering::Acquire) {
            return Err(injected("sync"));
        }
        Ok(())
    }

    fn seek(&mut self, pos: SeekFrom) -> IResult<u64> {
        let len = self.len()? as i64;
        let target = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::End(n) => len + n,
            SeekFrom::Current(n) => self.pos as i64 + n,
        };
        if target < 0 {
            return Err(Error::IO(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek to a negative position",
            )));
        }
        self.pos = target as usize;
        Ok(self.pos as u64)
    }

    fn len(&self) -> IResult<u64> {
        Ok(self.node.lock().unwrap_or_else(PoisonError::into_inner).data.len() as u64)
    }

    fn close(&mut self) -> IResult<()> {
        Ok(())
    }
}
