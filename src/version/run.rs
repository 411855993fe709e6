use crate::db::format::InternalKey;
use crate::util::coding::{VarintU32, VarintU64};
use crate::version::version_edit::FileMetaData;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// A group of sorted files written together by one compaction, or a single
/// level-0 file.
///
/// Files inside a run never overlap and are kept in key order, so a run can
/// be read like one big sorted file. `origins` lists the ids of the level-0
/// files whose data the run has absorbed; the routing index refers to runs
/// through these ids.
///
/// A run is assembled with `insert_file`/`insert_origin` and then shared as
/// `Arc<Run>` by every version containing it, after which it never changes.
#[derive(Clone, Default, PartialEq)]
pub struct Run {
    id: u64,
    level: usize,
    files: Vec<Arc<FileMetaData>>,
    origins: Vec<u64>,
}

impl Run {
    pub fn new(id: u64, level: usize) -> Self {
        Run {
            id,
            level,
            files: vec![],
            origins: vec![],
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn level(&self) -> usize {
        self.level
    }

    #[inline]
    pub fn files(&self) -> &[Arc<FileMetaData>] {
        &self.files
    }

    #[inline]
    pub fn origins(&self) -> &[u64] {
        &self.origins
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub(crate) fn set_level(&mut self, level: usize) {
        self.level = level;
    }

    /// Append a file. Files must be added in key order.
    pub fn insert_file(&mut self, file: FileMetaData) {
        self.files.push(Arc::new(file));
    }

    pub(crate) fn insert_file_arc(&mut self, file: Arc<FileMetaData>) {
        self.files.push(file);
    }

    /// Record that the run holds data that entered through level-0 file
    /// `origin`. Adding a known origin is a no-op.
    pub fn insert_origin(&mut self, origin: u64) {
        if !self.origins.contains(&origin) {
            self.origins.push(origin);
        }
    }

    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.file_size).sum()
    }

    /// Smallest key of the run. Only meaningful for a non-empty run.
    pub fn smallest(&self) -> Option<&InternalKey> {
        self.files.first().map(|f| &f.smallest)
    }

    /// Largest key of the run. Only meaningful for a non-empty run.
    pub fn largest(&self) -> Option<&InternalKey> {
        self.files.last().map(|f| &f.largest)
    }

    /// Append the wire form of the run:
    ///
    /// ```text
    ///   id (varint64) | level (varint32) | file count (varint32)
    ///   per file: level (varint32) | number (varint64) | size (varint64)
    ///             | smallest (prefixed) | largest (prefixed)
    ///   origin count (varint32) | origins (varint64 each)
    /// ```
    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        VarintU64::put_varint(dst, self.id);
        VarintU32::put_varint(dst, self.level as u32);
        VarintU32::put_varint(dst, self.files.len() as u32);
        for f in self.files.iter() {
            VarintU32::put_varint(dst, self.level as u32);
            VarintU64::put_varint(dst, f.number);
            VarintU64::put_varint(dst, f.file_size);
            VarintU32::put_varint_prefixed_slice(dst, f.smallest.data());
            VarintU32::put_varint_prefixed_slice(dst, f.largest.data());
        }
        VarintU32::put_varint(dst, self.origins.len() as u32);
        for origin in self.origins.iter() {
            VarintU64::put_varint(dst, *origin);
        }
    }

    /// Decode a run written by `encode_to` and advance `src` past it. The
    /// error names the field that failed.
    pub fn decode_from(src: &mut &[u8]) -> Result<Run, &'static str> {
        let id = VarintU64::drain_read(src).ok_or("run id")?;
        let level = VarintU32::drain_read(src).ok_or("run level")? as usize;
        let file_count = VarintU32::drain_read(src).ok_or("run file count")?;
        let mut run = Run::new(id, level);
        for _ in 0..file_count {
            let file_level = VarintU32::drain_read(src).ok_or("run file level")? as usize;
            if file_level != level {
                return Err("run file level");
            }
            let number = VarintU64::drain_read(src).ok_or("run file number")?;
            let file_size = VarintU64::drain_read(src).ok_or("run file size")?;
            let smallest = decode_internal_key(src).ok_or("run file smallest key")?;
            let largest = decode_internal_key(src).ok_or("run file largest key")?;
            run.insert_file(FileMetaData::new(number, file_size, smallest, largest));
        }
        let origin_count = VarintU32::drain_read(src).ok_or("run origin count")?;
        for _ in 0..origin_count {
            let origin = VarintU64::drain_read(src).ok_or("run origin")?;
            run.origins.push(origin);
        }
        Ok(run)
    }
}

fn decode_internal_key(src: &mut &[u8]) -> Option<InternalKey> {
    let data = VarintU32::get_varint_prefixed_slice(src)?;
    let key = InternalKey::decoded_from(data);
    if key.parsed().is_some() {
        Some(key)
    } else {
        None
    }
}

impl Debug for Run {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "run #{} @ level {} origins {:?} [", self.id, self.level, self.origins)?;
        for (i, file) in self.files.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}:{}", file.number, file.file_size)?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::format::ValueType;

    fn file(number: u64, smallest: &str, largest: &str) -> FileMetaData {
        FileMetaData::new(
            number,
            number * 100,
            InternalKey::new(smallest.as_bytes(), 1, ValueType::Value),
            InternalKey::new(largest.as_bytes(), 2, ValueType::Deletion),
        )
    }

    #[test]
    fn test_run_accessors() {
        let mut run = Run::new(3, 2);
        assert!(run.is_empty());
        assert!(run.smallest().is_none());
        run.insert_file(file(10, "a", "c"));
        run.insert_file(file(11, "d", "f"));
        run.insert_origin(7);
        run.insert_origin(9);
        run.insert_origin(7);
        assert_eq!(run.id(), 3);
        assert_eq!(run.level(), 2);
        assert_eq!(run.origins(), &[7, 9]);
        assert_eq!(run.total_size(), 2100);
        assert_eq!(run.smallest().unwrap().user_key(), b"a");
        assert_eq!(run.largest().unwrap().user_key(), b"f");
    }

    #[test]
    fn test_run_encode_decode() {
        let mut run = Run::new(1 << 52, 5);
        run.insert_file(file(1 << 51, "a", "b"));
        run.insert_file(file(12, "c", "z"));
        run.insert_origin(1 << 50);
        let mut buf = vec![];
        run.encode_to(&mut buf);
        buf.push(0xff);
        let mut src = buf.as_slice();
        let decoded = Run::decode_from(&mut src).unwrap();
        assert_eq!(decoded, run);
        assert_eq!(src, &[0xff]);
    }

    #[test]
    fn test_run_decode_truncated() {
        let mut run = Run::new(4, 1);
        run.insert_file(file(12, "c", "z"));
        run.insert_origin(3);
        let mut buf = vec![];
        run.encode_to(&mut buf);
        for cut in 0..buf.len() {
            let mut src = &buf[..cut];
            assert!(Run::decode_from(&mut src).is_err(), "cut at {}", cut);
        }
    }

    #[test]
    fn test_run_decode_rejects_bad_file_key() {
        let mut bad = b"k".to_vec();
        bad.extend_from_slice(&[0x7f, 1, 0, 0, 0, 0, 0, 0]);
        let mut run = Run::new(4, 1);
        run.insert_file(FileMetaData::new(
            12,
            100,
            InternalKey::decoded_from(&bad),
            InternalKey::new(b"z", 1, ValueType::Value),
        ));
        let mut buf = vec![];
        run.encode_to(&mut buf);
        let mut src = buf.as_slice();
        assert!(Run::decode_from(&mut src).is_err());
    }
}
