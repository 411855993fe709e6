use crate::{Error, IResult};

mod concat;
mod merger;

pub use concat::ConcatenateIterator;
pub use merger::MergingIterator;

/// A common trait for iterating all the key/value entries of an ordered
/// source.
///
/// An `Iter` is either positioned at a key/value pair, or not valid. Both
/// `key` and `value` require the iterator to be valid.
pub trait Iter {
    /// An iterator is either positioned at a key/value pair, or
    /// not valid. This method returns true iff the iterator is valid.
    fn valid(&self) -> bool;

    /// Position at the first key in the source. The iterator is valid
    /// after this call iff the source is not empty.
    fn seek_to_first(&mut self);

    /// Position at the last key in the source. The iterator is
    /// valid after this call iff the source is not empty.
    fn seek_to_last(&mut self);

    /// Position at the first key in the source that is at or past target.
    fn seek(&mut self, target: &[u8]);

    /// Moves to the next entry in the source.
    fn next(&mut self);

    /// Moves to the previous entry in the source.
    fn prev(&mut self);

    fn key(&self) -> &[u8];

    fn value(&self) -> &[u8];

    /// If an error has occurred, return it and clear it. Else return Ok(()).
    fn status(&mut self) -> IResult<()>;
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Direction {
    Forward,
    Reverse,
}

/// An iterator over nothing, optionally carrying the error that made its
/// source unavailable.
#[derive(Default)]
pub struct EmptyIterator {
    err: Option<Error>,
}

impl EmptyIterator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_error(err: Error) -> Self {
        EmptyIterator { err: Some(err) }
    }
}

impl Iter for EmptyIterator {
    fn valid(&self) -> bool {
        false
    }

    fn seek_to_first(&mut self) {}

    fn seek_to_last(&mut self) {}

    fn seek(&mut self, _target: &[u8]) {}

    fn next(&mut self) {}

    fn prev(&mut self) {}

    fn key(&self) -> &[u8] {
        &[]
    }

    fn value(&self) -> &[u8] {
        &[]
    }

    fn status(&mut self) -> IResult<()> {
        match self.err.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_iterator() {
        let mut iter = EmptyIterator::new();
        iter.seek_to_first();
        assert!(!iter.valid());
        assert!(iter.status().is_ok());

        let mut iter = EmptyIterator::with_error(Error::Corruption("bad table".to_owned()));
        iter.seek(b"a");
        assert!(!iter.valid());
        assert!(iter.status().unwrap_err().is_corruption());
        // the error is taken once
        assert!(iter.status().is_ok());
    }
}
