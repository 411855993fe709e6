use crate::error::Error;
use crate::storage::{File, Storage};
use crate::IResult;
use fs2::FileExt;
use std::fs::File as SysFile;
use std::fs::{create_dir_all, read_dir, remove_dir, remove_dir_all, remove_file, rename, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// `Storage` backed by the local filesystem.
#[derive(Default, Clone, Copy, Debug)]
pub struct FileStorage;

impl Storage for FileStorage {
    type F = SysFile;

    fn create<P: AsRef<Path>>(&self, name: P) -> IResult<Self::F> {
        Ok(OpenOptions::new()
            .write(true)
            .read(true)
            .create(true)
            .truncate(true)
            .open(name)?)
    }

    fn open<P: AsRef<Path>>(&self, name: P) -> IResult<Self::F> {
        Ok(OpenOptions::new().write(true).read(true).open(name)?)
    }

    fn remove<P: AsRef<Path>>(&self, name: P) -> IResult<()> {
        Ok(remove_file(name)?)
    }

    fn remove_dir<P: AsRef<Path>>(&self, dir: P, recursively: bool) -> IResult<()> {
        if recursively {
            remove_dir_all(dir)?;
        } else {
            remove_dir(dir)?;
        }
        Ok(())
    }

    fn exists<P: AsRef<Path>>(&self, name: P) -> bool {
        name.as_ref().exists()
    }

    fn list<P: AsRef<Path>>(&self, dir: P) -> IResult<Vec<PathBuf>> {
        if !dir.as_ref().is_dir() {
            return Ok(vec![]);
        }
        let mut v = vec![];
        for entry in read_dir(dir)? {
            v.push(entry?.path());
        }
        Ok(v)
    }

    fn rename<P: AsRef<Path>>(&self, src: P, target: P) -> IResult<()> {
        Ok(rename(src, target)?)
    }

    fn mkdir_all<P: AsRef<Path>>(&self, dir: P) -> IResult<()> {
        Ok(create_dir_all(dir)?)
    }
}

impl File for SysFile {
    fn lock_file(&self) -> IResult<()> {
        Ok(SysFile::try_lock_exclusive(self)?)
    }

    fn unlock_file(&self) -> IResult<()> {
        Ok(FileExt::unlock(self)?)
    }

    #[cfg(unix)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> IResult<usize> {
        Ok(std::os::unix::prelude::FileExt::read_at(self, buf, offset)?)
    }

    #[cfg(windows)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> IResult<usize> {
        Ok(std::os::windows::prelude::FileExt::seek_read(self, buf, offset)?)
    }

    fn read(&mut self, buf: &mut [u8]) -> IResult<usize> {
        // A short read is only EOF when nothing more comes back.
        let mut read = 0;
        while read < buf.len() {
            match Read::read(self, &mut buf[read..]) {
                Ok(0) => break,
                Ok(n) => read += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(Error::IO(e)),
            }
        }
        Ok(read)
    }

    fn read_all(&mut self, buf: &mut Vec<u8>) -> IResult<usize> {
        Ok(Read::read_to_end(self, buf)?)
    }

    fn write(&mut self, buf: &[u8]) -> IResult<usize> {
        Write::write_all(self, buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> IResult<()> {
        Ok(Write::flush(self)?)
    }

    fn sync(&mut self) -> IResult<()> {
        Ok(SysFile::sync_all(self)?)
    }

    fn seek(&mut self, pos: SeekFrom) -> IResult<u64> {
        Ok(Seek::seek(self, pos)?)
    }

    fn len(&self) -> IResult<u64> {
        Ok(SysFile::metadata(self)?.len())
    }

    fn close(&mut self) -> IResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_exact_at() {
        let dir = tempfile::tempdir().unwrap();
        let name = dir.path().join("test");
        let storage = FileStorage;
        let mut f = storage.create(&name).unwrap();
        File::write(&mut f, "hello world".as_bytes()).unwrap();
        File::sync(&mut f).unwrap();
        let tests = vec![
            (0, "hello world"),
            (0, ""),
            (1, "ello"),
            (4, "o world"),
            (100, ""),
        ];
        let rf = storage.open(&name).unwrap();
        let mut buffer = vec![];
        for (offset, expect) in tests {
            buffer.resize(expect.as_bytes().len(), 0u8);
            rf.read_exact_at(buffer.as_mut_slice(), offset).unwrap();
            assert_eq!(buffer, Vec::from(String::from(expect)));
        }
        // EOF case
        buffer.resize(100, 0u8);
        rf.read_exact_at(buffer.as_mut_slice(), 2)
            .expect_err("failed to fill whole buffer");
    }

    #[test]
    fn test_list_rename_remove() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage;
        let sub = dir.path().join("a").join("b");
        storage.mkdir_all(&sub).unwrap();
        let from = sub.join("x");
        let to = sub.join("y");
        storage.create(&from).unwrap();
        storage.rename(&from, &to).unwrap();
        assert!(!storage.exists(&from));
        assert!(storage.exists(&to));
        assert_eq!(storage.list(&sub).unwrap(), vec![to.clone()]);
        storage.remove(&to).unwrap();
        assert!(storage.list(&sub).unwrap().is_empty());
        assert!(storage.list(dir.path().join("missing")).unwrap().is_empty());
    }

    #[test]
    fn test_lock_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage;
        let f = storage.create(dir.path().join("LOCK")).unwrap();
        f.lock_file().unwrap();
        let other = storage.open(dir.path().join("LOCK")).unwrap();
        assert!(other.lock_file().is_err());
        f.unlock_file().unwrap();
        other.lock_file().unwrap();
    }
}
