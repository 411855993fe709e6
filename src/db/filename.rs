use crate::storage::{read_file_to_string, write_string_to_file, Storage};
use crate::{Error, IResult};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FileType {
    Log,
    Lock,
    Table,
    Manifest,
    Current,
    Temp,
}

/// Returns the path of the file with the given type and number inside `dirname`.
/// `number` is ignored for `Lock` and `Current`.
pub fn generate_filename<P: AsRef<Path>>(dirname: P, filetype: FileType, number: u64) -> PathBuf {
    let name = match filetype {
        FileType::Log => format!("{:06}.log", number),
        FileType::Lock => "LOCK".to_owned(),
        FileType::Table => format!("{:06}.sst", number),
        FileType::Manifest => format!("MANIFEST-{:06}", number),
        FileType::Current => "CURRENT".to_owned(),
        FileType::Temp => format!("{:06}.dbtmp", number),
    };
    dirname.as_ref().join(name)
}

/// Parse a bare file name (no directory) produced by `generate_filename`.
///
/// ```text
///   CURRENT
///   LOCK
///   MANIFEST-[0-9]+
///   [0-9]+.(log|sst|dbtmp)
/// ```
pub fn parse_filename<P: AsRef<Path>>(filename: P) -> Option<(FileType, u64)> {
    let name = filename.as_ref().file_name()?.to_str()?;
    match name {
        "CURRENT" => Some((FileType::Current, 0)),
        "LOCK" => Some((FileType::Lock, 0)),
        _ => {
            if let Some(rest) = name.strip_prefix("MANIFEST-") {
                return parse_number(rest).map(|n| (FileType::Manifest, n));
            }
            let dot = name.find('.')?;
            let number = parse_number(&name[..dot])?;
            let filetype = match &name[dot + 1..] {
                "log" => FileType::Log,
                "sst" => FileType::Table,
                "dbtmp" => FileType::Temp,
                _ => return None,
            };
            Some((filetype, number))
        }
    }
}

fn parse_number(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Make the CURRENT file point to the manifest with the given number.
///
/// The content is first written to a temp file and then renamed over CURRENT,
/// so readers never observe a half written pointer.
pub fn update_current<S: Storage, P: AsRef<Path>>(
    storage: &S,
    dirname: P,
    manifest_file_num: u64,
) -> IResult<()> {
    let manifest = generate_filename(&dirname, FileType::Manifest, manifest_file_num);
    let manifest_name = manifest
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::InvalidArgument(format!("bad manifest path {:?}", manifest)))?;
    let content = format!("{}\n", manifest_name);
    let tmp = generate_filename(&dirname, FileType::Temp, manifest_file_num);
    write_string_to_file(storage, &content, &tmp, true)?;
    if let Err(e) = storage.rename(&tmp, &generate_filename(&dirname, FileType::Current, 0)) {
        let _ = storage.remove(&tmp);
        return Err(e);
    }
    Ok(())
}

/// Returns the manifest file name CURRENT points to.
pub fn read_current<S: Storage, P: AsRef<Path>>(storage: &S, dirname: P) -> IResult<String> {
    let current = read_file_to_string(storage, generate_filename(&dirname, FileType::Current, 0))?;
    match current.strip_suffix('\n') {
        Some(name) if !name.is_empty() && !name.contains('\n') => Ok(name.to_owned()),
        _ => Err(Error::Corruption(
            "CURRENT file does not end with newline".to_owned(),
        )),
    }
}
