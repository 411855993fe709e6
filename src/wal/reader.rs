use crate::storage::File;
use crate::util::coding::decode_fixed_32;
use crate::util::crc32;
use crate::wal::{RecordType, BLOCK_SIZE, HEADER_SIZE};
use log::warn;
use num_traits::FromPrimitive;
use std::io::SeekFrom;

enum ReadError {
    Eof,
    BadRecord,
}

pub trait Reporter {
    /// Some corruption was detected. `bytes` is the approximate number
    /// of bytes dropped due to the corruption.
    fn corruption(&mut self, bytes: u64, reason: &str);
}

pub struct Reader<F: File> {
    file: F,
    reporter: Option<Box<dyn Reporter>>,
    // Whether to verify the checksum of each record.
    checksum: bool,
    buffer: Vec<u8>,
    // Unconsumed bytes live in `buffer[buffer_start..buffer_end]`.
    buffer_start: usize,
    buffer_end: usize,
    // Last `read` indicated EOF by returning < `BLOCK_SIZE`.
    eof: bool,
    // Offset of the last record returned by `read_record`.
    last_record_offset: u64,
    // Offset of the first location past the end of buffer.
    end_of_buffer_offset: u64,
    // Offset at which to start looking for the first record to return.
    initial_offset: u64,
    // True if we are resynchronizing after a seek (initial_offset > 0). In
    // particular, a run of `Middle` and `Last` records can be silently
    // skipped in this mode.
    resyncing: bool,
}

impl<F: File> Reader<F> {
    pub fn new(
        file: F,
        reporter: Option<Box<dyn Reporter>>,
        checksum: bool,
        initial_offset: u64,
    ) -> Self {
        Reader {
            file,
            reporter,
            checksum,
            buffer: vec![0; BLOCK_SIZE],
            buffer_start: 0,
            buffer_end: 0,
            eof: false,
            last_record_offset: 0,
            end_of_buffer_offset: 0,
            initial_offset,
            resyncing: initial_offset > 0,
        }
    }

    #[inline]
    fn buffered(&self) -> usize {
        self.buffer_end - self.buffer_start
    }

    #[inline]
    fn clear_buffer(&mut self) {
        self.buffer_start = 0;
        self.buffer_end = 0;
    }

    /// Read the next logical record into `buf`. Returns false at the end of
    /// the input. Corrupted fragments are reported and skipped.
    pub fn read_record(&mut self, buf: &mut Vec<u8>) -> bool {
        if self.last_record_offset < self.initial_offset && !self.skip_to_initial_block() {
            return false;
        }
        buf.clear();
        let mut in_fragmented_record = false;
        let mut prospective_record_offset = 0;

        loop {
            let (t, start, end) = match self.read_physical_record() {
                Ok(r) => r,
                Err(ReadError::Eof) => {
                    // A writer that died mid-record leaves a partial record
                    // behind. Drop it silently.
                    buf.clear();
                    return false;
                }
                Err(ReadError::BadRecord) => {
                    if in_fragmented_record {
                        self.report_drop(buf.len() as u64, "error in middle of record");
                        in_fragmented_record = false;
                        buf.clear();
                    }
                    continue;
                }
            };
            let fragment_len = end - start;

            if self.resyncing {
                match t {
                    RecordType::Middle => continue,
                    RecordType::Last => {
                        self.resyncing = false;
                        continue;
                    }
                    _ => self.resyncing = false,
                }
            }

            let physical_record_offset = self.end_of_buffer_offset
                - self.buffered() as u64
                - HEADER_SIZE as u64
                - fragment_len as u64;

            match t {
                RecordType::Full => {
                    if in_fragmented_record && !buf.is_empty() {
                        self.report_drop(buf.len() as u64, "partial record without end(1)");
                    }
                    buf.clear();
                    buf.extend_from_slice(&self.buffer[start..end]);
                    self.last_record_offset = physical_record_offset;
                    return true;
                }
                RecordType::First => {
                    if in_fragmented_record && !buf.is_empty() {
                        self.report_drop(buf.len() as u64, "partial record without end(2)");
                    }
                    prospective_record_offset = physical_record_offset;
                    buf.clear();
                    buf.extend_from_slice(&self.buffer[start..end]);
                    in_fragmented_record = true;
                }
                RecordType::Middle => {
                    if in_fragmented_record {
                        buf.extend_from_slice(&self.buffer[start..end]);
                    } else {
                        self.report_drop(
                            fragment_len as u64,
                            "missing start of fragmented record(1)",
                        );
                    }
                }
                RecordType::Last => {
                    if in_fragmented_record {
                        buf.extend_from_slice(&self.buffer[start..end]);
                        self.last_record_offset = prospective_record_offset;
                        return true;
                    }
                    self.report_drop(fragment_len as u64, "missing start of fragmented record(2)");
                }
                RecordType::Zero => {
                    let dropped = fragment_len + if in_fragmented_record { buf.len() } else { 0 };
                    self.report_drop(dropped as u64, "unexpected zero record type");
                    in_fragmented_record = false;
                    buf.clear();
                }
            }
        }
    }

    /// Returns the type of the next physical record and the bounds of its
    /// payload inside `self.buffer`.
    fn read_physical_record(&mut self) -> Result<(RecordType, usize, usize), ReadError> {
        loop {
            if self.buffered() < HEADER_SIZE {
                if self.eof {
                    // A truncated header at the end of the file is treated as
                    // EOF, the writer crashed while writing it.
                    self.clear_buffer();
                    return Err(ReadError::Eof);
                }
                // Skip the trailer of the last block and read the next one.
                self.clear_buffer();
                match self.file.read(&mut self.buffer) {
                    Ok(n) => {
                        self.end_of_buffer_offset += n as u64;
                        self.buffer_end = n;
                        if n < BLOCK_SIZE {
                            self.eof = true;
                        }
                    }
                    Err(e) => {
                        self.report_drop(BLOCK_SIZE as u64, &e.to_string());
                        self.eof = true;
                        return Err(ReadError::Eof);
                    }
                }
                continue;
            }

            let header = &self.buffer[self.buffer_start..self.buffer_start + HEADER_SIZE];
            let length = header[4] as usize | ((header[5] as usize) << 8);
            let type_byte = header[6];
            if HEADER_SIZE + length > self.buffered() {
                let drop_size = self.buffered();
                self.clear_buffer();
                if !self.eof {
                    self.report_drop(drop_size as u64, "bad record length");
                    return Err(ReadError::BadRecord);
                }
                // The writer died in the middle of writing the payload.
                return Err(ReadError::Eof);
            }

            if type_byte == RecordType::Zero as u8 && length == 0 {
                // Preallocated zero space. Skip the rest of the block
                // without reporting.
                self.clear_buffer();
                return Err(ReadError::BadRecord);
            }

            let payload_start = self.buffer_start + HEADER_SIZE;
            let payload_end = payload_start + length;
            if self.checksum {
                let expected = crc32::unmask(decode_fixed_32(header));
                let actual = crc32::hash(&self.buffer[payload_start - 1..payload_end]);
                if actual != expected {
                    // `length` itself may be corrupted, so nothing else in the
                    // buffer can be trusted.
                    let drop_size = self.buffered();
                    self.clear_buffer();
                    self.report_drop(drop_size as u64, "checksum mismatch");
                    return Err(ReadError::BadRecord);
                }
            }

            self.buffer_start = payload_end;

            // Skip physical records that started before `initial_offset`.
            let record_start =
                self.end_of_buffer_offset - (self.buffered() + HEADER_SIZE + length) as u64;
            if record_start < self.initial_offset {
                return Err(ReadError::BadRecord);
            }

            return match RecordType::from_u8(type_byte) {
                Some(t) => Ok((t, payload_start, payload_end)),
                None => {
                    self.report_drop(
                        (HEADER_SIZE + length) as u64,
                        &format!("unknown record type {}", type_byte),
                    );
                    Err(ReadError::BadRecord)
                }
            };
        }
    }

    pub fn last_record_offset(&self) -> u64 {
        self.last_record_offset
    }

    /// Skips all blocks that are completely before `initial_offset`.
    fn skip_to_initial_block(&mut self) -> bool {
        let offset_in_block = self.initial_offset % BLOCK_SIZE as u64;
        let mut block_start_location = self.initial_offset - offset_in_block;

        // Don't search a block if we'd be in the trailer.
        if offset_in_block > (BLOCK_SIZE - 6) as u64 {
            block_start_location += BLOCK_SIZE as u64;
        }
        self.end_of_buffer_offset = block_start_location;

        if block_start_location > 0 {
            if let Err(e) = self.file.seek(SeekFrom::Start(block_start_location)) {
                self.report_drop(block_start_location, &e.to_string());
                return false;
            }
        }
        true
    }

    fn report_drop(&mut self, bytes: u64, reason: &str) {
        match self.reporter.as_mut() {
            Some(reporter) => {
                if self.end_of_buffer_offset < bytes
                    || self.end_of_buffer_offset - bytes >= self.initial_offset
                {
                    reporter.corruption(bytes, reason);
                }
            }
            None => warn!("[WAL Reader] dropped {} bytes: {}", bytes, reason),
        }
    }

    /// Deliver the file's ownership.
    #[inline]
    pub fn into_file(self) -> F {
        self.file
    }
}
