use crate::db::format::InternalKey;
use crate::opt::MAX_LEVELS;
use crate::util::coding::{VarintU32, VarintU64};
use crate::version::run::Run;
use crate::{Error, IResult};
use num_traits::FromPrimitive;
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicI64, Ordering};

/// Tags of the manifest record fields. The numbers are persisted and must
/// never change.
#[derive(Debug, Clone, Copy, Eq, PartialEq, FromPrimitive)]
enum Tag {
    Comparator = 1,
    LogNumber = 2,
    NextFileNumber = 3,
    LastSequence = 4,
    PrevLogNumber = 9,
    SnapshotRun = 11,
    NewRun = 12,
    InputLevel = 13,
    OutputLevel = 14,
    RetiredRun = 15,
}

/// Descriptor of one sorted file.
pub struct FileMetaData {
    /// Seeks allowed until the file is worth compacting.
    pub allowed_seeks: AtomicI64,
    /// File size in bytes
    pub file_size: u64,
    pub number: u64,
    /// Smallest internal key served by table
    pub smallest: InternalKey,
    /// Largest internal key served by table
    pub largest: InternalKey,
}

impl FileMetaData {
    pub fn new(number: u64, file_size: u64, smallest: InternalKey, largest: InternalKey) -> Self {
        FileMetaData {
            allowed_seeks: AtomicI64::new(0),
            file_size,
            number,
            smallest,
            largest,
        }
    }
}

impl Clone for FileMetaData {
    fn clone(&self) -> Self {
        FileMetaData {
            allowed_seeks: AtomicI64::new(self.allowed_seeks.load(Ordering::Acquire)),
            file_size: self.file_size,
            number: self.number,
            smallest: self.smallest.clone(),
            largest: self.largest.clone(),
        }
    }
}

/// Seek statistics are runtime state and do not take part in equality.
impl PartialEq for FileMetaData {
    fn eq(&self, other: &Self) -> bool {
        self.number == other.number
            && self.file_size == other.file_size
            && self.smallest == other.smallest
            && self.largest == other.largest
    }
}

impl Debug for FileMetaData {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "#{}({} bytes) [{:?} .. {:?}]",
            self.number, self.file_size, self.smallest, self.largest
        )
    }
}

/// The run produced by one compaction or flush.
#[derive(Clone, PartialEq, Debug)]
pub struct NewRun {
    /// Level the retired runs are removed from.
    pub input_level: usize,
    /// Level `run` is installed at.
    pub output_level: usize,
    pub run: Run,
}

/// A delta between two versions, persisted as one manifest record.
///
/// An edit carries either every live run (`snapshot_runs`, written at the
/// head of a new manifest) or the outcome of one compaction (`new_run` plus
/// the `retired` runs it replaces), never both.
#[derive(Clone, Default, PartialEq)]
pub struct VersionEdit {
    pub comparator_name: Option<String>,
    pub log_number: Option<u64>,
    pub prev_log_number: Option<u64>,
    pub next_file_number: Option<u64>,
    pub last_sequence: Option<u64>,

    pub snapshot_runs: Vec<Run>,
    pub new_run: Option<NewRun>,
    /// Retired run id to the origin ids that move to `new_run`.
    pub retired: BTreeMap<u64, Vec<u64>>,
}

impl VersionEdit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the edit to the empty state.
    #[inline]
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    #[inline]
    pub fn set_comparator_name(&mut self, name: &str) {
        self.comparator_name = Some(name.to_owned());
    }

    #[inline]
    pub fn set_log_number(&mut self, log_num: u64) {
        self.log_number = Some(log_num);
    }

    #[inline]
    pub fn set_prev_log_number(&mut self, num: u64) {
        self.prev_log_number = Some(num);
    }

    #[inline]
    pub fn set_next_file(&mut self, file_num: u64) {
        self.next_file_number = Some(file_num);
    }

    #[inline]
    pub fn set_last_sequence(&mut self, seq: u64) {
        self.last_sequence = Some(seq);
    }

    /// Add a run to the snapshot form.
    pub fn add_snapshot_run(&mut self, run: Run) {
        self.snapshot_runs.push(run);
    }

    /// Set the run a compaction from `input_level` writes at `output_level`.
    pub fn set_new_run(&mut self, input_level: usize, output_level: usize, mut run: Run) {
        run.set_level(output_level);
        self.new_run = Some(NewRun {
            input_level,
            output_level,
            run,
        });
    }

    /// Mark `run` as retired by this edit. Its origins move to the new run.
    pub fn retire_run(&mut self, run: &Run) {
        self.retired.insert(run.id(), run.origins().to_vec());
    }

    /// Returns true if the edit is in snapshot form. An edit that touches no
    /// runs at all is a (empty) snapshot.
    #[inline]
    pub fn is_snapshot(&self) -> bool {
        self.new_run.is_none()
    }

    /// Check that exactly one form is populated.
    pub fn check_form(&self) -> IResult<()> {
        if self.new_run.is_some() && !self.snapshot_runs.is_empty() {
            return Err(Error::InvalidArgument(
                "edit carries both snapshot runs and a new run".to_owned(),
            ));
        }
        if self.new_run.is_none() && !self.retired.is_empty() {
            return Err(Error::InvalidArgument(
                "edit retires runs without a new run".to_owned(),
            ));
        }
        if let Some(nr) = &self.new_run {
            if nr.input_level >= MAX_LEVELS || nr.output_level >= MAX_LEVELS {
                return Err(Error::InvalidArgument(format!(
                    "edit levels {} -> {} out of range",
                    nr.input_level, nr.output_level
                )));
            }
        }
        Ok(())
    }

    /// Encode the edit into `dst`.
    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        if let Some(name) = &self.comparator_name {
            VarintU32::put_varint(dst, Tag::Comparator as u32);
            VarintU32::put_varint_prefixed_slice(dst, name.as_bytes());
        }
        if let Some(n) = self.log_number {
            VarintU32::put_varint(dst, Tag::LogNumber as u32);
            VarintU64::put_varint(dst, n);
        }
        if let Some(n) = self.prev_log_number {
            VarintU32::put_varint(dst, Tag::PrevLogNumber as u32);
            VarintU64::put_varint(dst, n);
        }
        if let Some(n) = self.next_file_number {
            VarintU32::put_varint(dst, Tag::NextFileNumber as u32);
            VarintU64::put_varint(dst, n);
        }
        if let Some(n) = self.last_sequence {
            VarintU32::put_varint(dst, Tag::LastSequence as u32);
            VarintU64::put_varint(dst, n);
        }
        match &self.new_run {
            Some(nr) => {
                VarintU32::put_varint(dst, Tag::InputLevel as u32);
                VarintU32::put_varint(dst, nr.input_level as u32);
                VarintU32::put_varint(dst, Tag::OutputLevel as u32);
                VarintU32::put_varint(dst, nr.output_level as u32);
                VarintU32::put_varint(dst, Tag::NewRun as u32);
                nr.run.encode_to(dst);
                for (run_id, origins) in self.retired.iter() {
                    VarintU32::put_varint(dst, Tag::RetiredRun as u32);
                    VarintU64::put_varint(dst, *run_id);
                    VarintU32::put_varint(dst, origins.len() as u32);
                    for origin in origins {
                        VarintU64::put_varint(dst, *origin);
                    }
                }
            }
            None => {
                for run in self.snapshot_runs.iter() {
                    VarintU32::put_varint(dst, Tag::SnapshotRun as u32);
                    run.encode_to(dst);
                }
            }
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut dst = vec![];
        self.encode_to(&mut dst);
        dst
    }

    /// Decode an edit from one manifest record. Every byte must be consumed.
    pub fn decode_from(src: &[u8]) -> IResult<Self> {
        let mut edit = VersionEdit::new();
        let mut input_level = None;
        let mut output_level = None;
        let mut new_run = None;
        let mut s = src;
        while !s.is_empty() {
            let tag = VarintU32::drain_read(&mut s)
                .ok_or_else(|| corruption("invalid tag"))?;
            let tag = Tag::from_u32(tag).ok_or_else(|| corruption("unknown tag"))?;
            match tag {
                Tag::Comparator => {
                    let name = VarintU32::get_varint_prefixed_slice(&mut s)
                        .ok_or_else(|| corruption("comparator name"))?;
                    let name = String::from_utf8(name.to_vec())
                        .map_err(|_| corruption("comparator name"))?;
                    edit.comparator_name = Some(name);
                }
                Tag::LogNumber => {
                    edit.log_number = Some(read_u64(&mut s, "log number")?);
                }
                Tag::PrevLogNumber => {
                    edit.prev_log_number = Some(read_u64(&mut s, "previous log number")?);
                }
                Tag::NextFileNumber => {
                    edit.next_file_number = Some(read_u64(&mut s, "next file number")?);
                }
                Tag::LastSequence => {
                    edit.last_sequence = Some(read_u64(&mut s, "last sequence number")?);
                }
                Tag::InputLevel => {
                    input_level = Some(read_level(&mut s, "input level")?);
                }
                Tag::OutputLevel => {
                    output_level = Some(read_level(&mut s, "output level")?);
                }
                Tag::SnapshotRun => {
                    let run = read_run(&mut s)?;
                    edit.snapshot_runs.push(run);
                }
                Tag::NewRun => {
                    if new_run.is_some() {
                        return Err(corruption("duplicate new run"));
                    }
                    new_run = Some(read_run(&mut s)?);
                }
                Tag::RetiredRun => {
                    let run_id = read_u64(&mut s, "retired run id")?;
                    let count = VarintU32::drain_read(&mut s)
                        .ok_or_else(|| corruption("retired origin count"))?;
                    let mut origins = Vec::with_capacity(count as usize);
                    for _ in 0..count {
                        origins.push(read_u64(&mut s, "retired origin")?);
                    }
                    edit.retired.insert(run_id, origins);
                }
            }
        }

        match (input_level, output_level, new_run) {
            (None, None, None) => {}
            (Some(input_level), Some(output_level), Some(run)) => {
                if run.level() != output_level {
                    return Err(corruption("new run level"));
                }
                edit.new_run = Some(NewRun {
                    input_level,
                    output_level,
                    run,
                });
            }
            _ => return Err(corruption("incomplete new run")),
        }
        if edit.new_run.is_some() && !edit.snapshot_runs.is_empty() {
            return Err(corruption("snapshot runs mixed with a new run"));
        }
        if edit.new_run.is_none() && !edit.retired.is_empty() {
            return Err(corruption("retired runs without a new run"));
        }
        Ok(edit)
    }
}

fn corruption(field: &str) -> Error {
    Error::Corruption(format!("VersionEdit: {}", field))
}

fn read_u64(src: &mut &[u8], field: &str) -> IResult<u64> {
    VarintU64::drain_read(src).ok_or_else(|| corruption(field))
}

fn read_level(src: &mut &[u8], field: &str) -> IResult<usize> {
    match VarintU32::drain_read(src) {
        Some(level) if (level as usize) < MAX_LEVELS => Ok(level as usize),
        _ => Err(corruption(field)),
    }
}

fn read_run(src: &mut &[u8]) -> IResult<Run> {
    let run = Run::decode_from(src).map_err(corruption)?;
    if run.level() >= MAX_LEVELS {
        return Err(corruption("run level"));
    }
    Ok(run)
}

impl Debug for VersionEdit {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "VersionEdit {{")?;
        if let Some(name) = &self.comparator_name {
            write!(f, "\n  Comparator: {}", name)?;
        }
        if let Some(n) = self.log_number {
            write!(f, "\n  LogNumber: {}", n)?;
        }
        if let Some(n) = self.prev_log_number {
            write!(f, "\n  PrevLogNumber: {}", n)?;
        }
        if let Some(n) = self.next_file_number {
            write!(f, "\n  NextFile: {}", n)?;
        }
        if let Some(n) = self.last_sequence {
            write!(f, "\n  LastSeq: {}", n)?;
        }
        for run in self.snapshot_runs.iter() {
            write!(f, "\n  SnapshotRun: {:?}", run)?;
        }
        if let Some(nr) = &self.new_run {
            write!(
                f,
                "\n  NewRun: {} -> {} {:?}",
                nr.input_level, nr.output_level, nr.run
            )?;
        }
        for (id, origins) in self.retired.iter() {
            write!(f, "\n  RetiredRun: #{} origins {:?}", id, origins)?;
        }
        write!(f, "\n}}")
    }
}
