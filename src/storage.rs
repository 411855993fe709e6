use crate::error::Error;
use crate::IResult;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

pub mod file;
pub mod mem;

/// A filesystem abstraction the version set persists its manifest through.
pub trait Storage: Send + Sync + 'static {
    type F: File + 'static;

    /// Create the named file, truncating it if it already exists.
    fn create<P: AsRef<Path>>(&self, name: P) -> IResult<Self::F>;

    /// Open an existing file for reading and writing.
    fn open<P: AsRef<Path>>(&self, name: P) -> IResult<Self::F>;

    /// Delete the named file.
    fn remove<P: AsRef<Path>>(&self, name: P) -> IResult<()>;

    /// Removes a directory at this path. If `recursively`, removes all its contents.
    fn remove_dir<P: AsRef<Path>>(&self, dir: P, recursively: bool) -> IResult<()>;

    /// Returns true iff the named file or dir exists.
    fn exists<P: AsRef<Path>>(&self, name: P) -> bool;

    /// Returns a list of the path to each file in given directory.
    ///
    /// If the given directory does not exist an empty list is returned.
    fn list<P: AsRef<Path>>(&self, dir: P) -> IResult<Vec<PathBuf>>;

    /// Rename a file or directory to a new name, replacing the original file if
    /// `target` already exists.
    fn rename<P: AsRef<Path>>(&self, src: P, target: P) -> IResult<()>;

    /// Recursively create a directory and all of its parent components if they
    /// are missing.
    fn mkdir_all<P: AsRef<Path>>(&self, dir: P) -> IResult<()>;
}

pub trait File: Send + Sync {
    /// Lock the file for exclusive usage. Fails if the file is already locked.
    fn lock_file(&self) -> IResult<()>;

    fn unlock_file(&self) -> IResult<()>;

    /// Reads bytes from an offset in this source into a buffer, returning how
    /// many bytes were read.
    ///
    /// This function may yield fewer bytes than the size of `buf`, if it was
    /// interrupted or hit the "EOF".
    fn read_at(&self, buf: &mut [u8], offset: u64) -> IResult<usize>;

    /// Reads the exact number of bytes required to fill `buf` from an `offset`.
    ///
    /// Errors if the "EOF" is encountered before filling the buffer.
    fn read_exact_at(&self, mut buf: &mut [u8], mut offset: u64) -> IResult<()> {
        while !buf.is_empty() {
            match self.read_at(buf, offset) {
                Ok(0) => break,
                Ok(n) => {
                    let tmp = buf;
                    buf = &mut tmp[n..];
                    offset += n as u64;
                }
                Err(Error::IO(err)) if err.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        if !buf.is_empty() {
            return Err(Error::IO(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "failed to fill whole buffer.",
            )));
        }
        Ok(())
    }

    /// Read bytes from the current position into `buf`, returning how many
    /// bytes were read. Zero means end of file.
    fn read(&mut self, buf: &mut [u8]) -> IResult<usize>;

    /// Read all remaining bytes into `buf`, returning how many were read.
    fn read_all(&mut self, buf: &mut Vec<u8>) -> IResult<usize>;

    /// Write all of `buf` at the current position, returning its length.
    fn write(&mut self, buf: &[u8]) -> IResult<usize>;

    /// Flush buffered bytes to the OS.
    fn flush(&mut self) -> IResult<()>;

    /// Flush file content and metadata to stable storage.
    fn sync(&mut self) -> IResult<()>;

    fn seek(&mut self, pos: SeekFrom) -> IResult<u64>;

    fn len(&self) -> IResult<u64>;

    fn close(&mut self) -> IResult<()>;
}

/// Write `data` to the named file and sync it to disk iff `should_sync` is true.
/// A partially written file is removed.
pub fn write_string_to_file<S: Storage, P: AsRef<Path>>(
    storage: &S,
    data: &str,
    file_name: P,
    should_sync: bool,
) -> IResult<()> {
    let mut file = storage.create(&file_name)?;
    let res = file.write(data.as_bytes()).and_then(|_| {
        if should_sync {
            file.sync()
        } else {
            file.flush()
        }
    });
    let res = res.and_then(|_| file.close());
    if res.is_err() {
        let _ = storage.remove(&file_name);
    }
    res
}

/// Read the whole named file into a string.
pub fn read_file_to_string<S: Storage, P: AsRef<Path>>(storage: &S, file_name: P) -> IResult<String> {
    let mut file = storage.open(&file_name)?;
    let mut buf = vec![];
    file.read_all(&mut buf)?;
    String::from_utf8(buf).map_err(|e| {
        Error::Corruption(format!(
            "{} is not valid utf8: {}",
            file_name.as_ref().display(),
            e
        ))
    })
}
