//! The record log the manifest is written with.
//!
//! The file is a sequence of 32KiB blocks. Each block holds physical records:
//!
//! ```text
//!   +--------------+------------+----------+-------------+
//!   | checksum (4) | length (2) | type (1) | payload     |
//!   +--------------+------------+----------+-------------+
//! ```
//!
//! A logical record that does not fit the rest of a block is split into a
//! `First`, any number of `Middle` and a `Last` fragment. A block tail shorter
//! than a header is zero-filled.

pub mod reader;
pub mod writer;

#[derive(Debug, Clone, Copy, Eq, PartialEq, FromPrimitive)]
pub enum RecordType {
    // Zero is reserved for preallocated files.
    Zero = 0,
    Full = 1,

    // For fragments.
    First = 2,
    Middle = 3,
    Last = 4,
}

pub const MAX_RECORD_TYPE: usize = RecordType::Last as usize;

pub const BLOCK_SIZE: usize = 32768;

/// Header is checksum(4 bytes)  + length(2 bytes) + type(1 byte).
pub const HEADER_SIZE: usize = 4 + 2 + 1;

#[cfg(test)]
mod tests {
    use super::reader::{Reader, Reporter};
    use super::writer::Writer;
    use super::*;
    use crate::storage::mem::MemStorage;
    use crate::storage::{File, Storage};
    use crate::util::reporter::LogReporter;

    fn big_string(partial: &str, n: usize) -> Vec<u8> {
        partial.as_bytes().iter().cycle().take(n).cloned().collect()
    }

    fn write_records(storage: &MemStorage, records: &[Vec<u8>]) {
        let f = storage.create("log").unwrap();
        let mut writer = Writer::new(f);
        for r in records {
            writer.add_record(r).unwrap();
        }
        writer.sync().unwrap();
    }

    fn read_records(storage: &MemStorage) -> (Vec<Vec<u8>>, LogReporter) {
        let reporter = LogReporter::new();
        let f = storage.open("log").unwrap();
        let mut reader = Reader::new(f, Some(Box::new(reporter.clone())), true, 0);
        let mut out = vec![];
        let mut buf = vec![];
        while reader.read_record(&mut buf) {
            out.push(buf.clone());
        }
        (out, reporter)
    }

    #[test]
    fn test_read_write() {
        let mut tests = vec![
            vec![],
            b"foo".to_vec(),
            big_string("bar", BLOCK_SIZE - HEADER_SIZE),
            big_string("baz", BLOCK_SIZE * 3 + 17),
            b"x".to_vec(),
            big_string("qux", BLOCK_SIZE - HEADER_SIZE - 3),
            b"tail".to_vec(),
        ];
        let storage = MemStorage::new();
        write_records(&storage, &tests);
        let (got, reporter) = read_records(&storage);
        assert!(reporter.result().is_ok());
        assert_eq!(got.len(), tests.len());
        for (got, expect) in got.into_iter().zip(tests.drain(..)) {
            assert_eq!(got, expect);
        }
    }

    #[test]
    fn test_append_with_offset() {
        let storage = MemStorage::new();
        write_records(&storage, &[big_string("a", 1000), big_string("b", BLOCK_SIZE)]);
        let mut f = storage.open("log").unwrap();
        let len = f.seek(std::io::SeekFrom::End(0)).unwrap();
        let mut writer = Writer::with_offset(f, len);
        writer.add_record(b"appended").unwrap();
        let (got, reporter) = read_records(&storage);
        assert!(reporter.result().is_ok());
        assert_eq!(got.len(), 3);
        assert_eq!(got[2], b"appended".to_vec());
    }

    #[test]
    fn test_checksum_mismatch_is_reported() {
        let storage = MemStorage::new();
        write_records(&storage, &[b"first".to_vec(), b"second".to_vec()]);
        {
            let mut f = storage.open("log").unwrap();
            // flip a payload byte of the first record
            f.seek(std::io::SeekFrom::Start(HEADER_SIZE as u64)).unwrap();
            f.write(b"F").unwrap();
        }
        let (got, reporter) = read_records(&storage);
        // the corrupted block is dropped entirely
        assert!(got.is_empty());
        assert!(reporter.result().unwrap_err().is_corruption());
    }

    #[test]
    fn test_truncated_tail_is_eof() {
        let storage = MemStorage::new();
        write_records(&storage, &[b"complete".to_vec(), big_string("partial", 100)]);
        let mut data = vec![];
        storage.open("log").unwrap().read_all(&mut data).unwrap();
        let mut f = storage.create("log").unwrap();
        f.write(&data[..data.len() - 10]).unwrap();
        let (got, reporter) = read_records(&storage);
        assert_eq!(got, vec![b"complete".to_vec()]);
        assert!(reporter.result().is_ok());
    }

    #[test]
    fn test_initial_offset_skips_earlier_records() {
        let storage = MemStorage::new();
        let records = vec![big_string("a", 100), big_string("b", 100), b"c".to_vec()];
        write_records(&storage, &records);
        let second = (HEADER_SIZE + 100) as u64;
        let tests = vec![
            (0, vec![0, 1, 2]),
            (second, vec![1, 2]),
            (second + 1, vec![2]),
        ];
        for (offset, expect) in tests {
            let reporter = LogReporter::new();
            let f = storage.open("log").unwrap();
            let mut reader = Reader::new(f, Some(Box::new(reporter.clone())), true, offset);
            let mut got = vec![];
            let mut buf = vec![];
            while reader.read_record(&mut buf) {
                got.push(buf.clone());
            }
            let expect: Vec<Vec<u8>> = expect.into_iter().map(|i: usize| records[i].clone()).collect();
            assert_eq!(got, expect, "offset {}", offset);
            assert!(reporter.result().is_ok());
        }
    }

    struct Counting(usize);

    impl Reporter for Counting {
        fn corruption(&mut self, _bytes: u64, _reason: &str) {
            self.0 += 1;
        }
    }

    #[test]
    fn test_reader_without_reporter_skips_bad_records() {
        let storage = MemStorage::new();
        write_records(&storage, &[b"a".to_vec()]);
        let mut f = storage.open("log").unwrap();
        f.seek(std::io::SeekFrom::Start(0)).unwrap();
        f.write(&[0, 0, 0, 0]).unwrap();
        let mut reader = Reader::new(storage.open("log").unwrap(), None, true, 0);
        let mut buf = vec![];
        assert!(!reader.read_record(&mut buf));
        let mut reader = Reader::new(
            storage.open("log").unwrap(),
            Some(Box::new(Counting(0))),
            false,
            0,
        );
        assert!(reader.read_record(&mut buf));
        assert_eq!(buf, b"a".to_vec());
    }
}
