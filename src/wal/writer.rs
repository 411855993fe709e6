use crate::storage::File;
use crate::util::coding::encode_fixed_32;
use crate::util::crc32;
use crate::wal::{RecordType, BLOCK_SIZE, HEADER_SIZE, MAX_RECORD_TYPE};
use crate::IResult;

pub struct Writer<F: File> {
    dest: F,
    /// Current offset in block.
    block_offset: usize,

    /// Crc32 values for all supported record types. These are pre-computed to
    /// reduce the overhead of computing the crc of the record type stored in
    /// the header.
    crc: [u32; MAX_RECORD_TYPE + 1],
}

impl<F: File> Writer<F> {
    /// Create a writer that will append data to an empty `dest`.
    pub fn new(dest: F) -> Self {
        Self::with_offset(dest, 0)
    }

    /// Create a writer that appends to `dest`, which already holds
    /// `dest_length` bytes and is positioned at its end.
    pub fn with_offset(dest: F, dest_length: u64) -> Self {
        let mut crc = [0; MAX_RECORD_TYPE + 1];
        for (t, c) in crc.iter_mut().enumerate() {
            *c = crc32::hash(&[t as u8]);
        }
        Writer {
            dest,
            block_offset: (dest_length % BLOCK_SIZE as u64) as usize,
            crc,
        }
    }

    /// Append a slice into the underlying log file.
    pub fn add_record(&mut self, s: &[u8]) -> IResult<()> {
        let mut left = s.len();
        let mut begin = true;
        // Fragment the record if necessary and emit it. Note that if slice
        // is empty, we still want to iterate once to emit a single
        // zero-length record.
        loop {
            let left_over = BLOCK_SIZE - self.block_offset;
            if left_over < HEADER_SIZE {
                // Switch to a new block.
                if left_over > 0 {
                    self.dest.write(&[0; HEADER_SIZE - 1][..left_over])?;
                }
                self.block_offset = 0;
            }

            // Invariant: we never leave less than `HEADER_SIZE` bytes in a block.
            debug_assert!(
                BLOCK_SIZE - self.block_offset >= HEADER_SIZE,
                "[WAL Writer] the left space of block {} is less than header size {}",
                BLOCK_SIZE - self.block_offset,
                HEADER_SIZE
            );

            let avail = BLOCK_SIZE - self.block_offset - HEADER_SIZE;
            let fragment_length = std::cmp::min(left, avail);
            let end = left == fragment_length;
            let record_type = match (begin, end) {
                (true, true) => RecordType::Full,
                (true, false) => RecordType::First,
                (false, true) => RecordType::Last,
                (false, false) => RecordType::Middle,
            };

            let start = s.len() - left;
            self.emit_physical_record(record_type, &s[start..start + fragment_length])?;
            left -= fragment_length;
            begin = false;
            if left == 0 {
                break;
            }
        }
        Ok(())
    }

    /// Flush the written records to stable storage.
    pub fn sync(&mut self) -> IResult<()> {
        self.dest.flush()?;
        self.dest.sync()
    }

    fn emit_physical_record(&mut self, t: RecordType, data: &[u8]) -> IResult<()> {
        let length = data.len();
        debug_assert!(
            length <= 0xffff,
            "[WAL Writer] the data length in a record must fit 2 bytes but got {}",
            length
        );

        let mut buf = [0u8; HEADER_SIZE];
        buf[4] = (length & 0xff) as u8;
        buf[5] = (length >> 8) as u8;
        buf[6] = t as u8;

        // Compute the crc of the record type and the payload.
        let crc = crc32::mask(crc32::extend(self.crc[t as usize], data));
        encode_fixed_32(&mut buf, crc);

        self.dest.write(&buf)?;
        self.dest.write(data)?;
        self.dest.flush()?;
        self.block_offset += HEADER_SIZE + length;
        Ok(())
    }

    /// Deliver the file's ownership.
    #[inline]
    pub fn into_file(self) -> F {
        self.dest
    }
}
