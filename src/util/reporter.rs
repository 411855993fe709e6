use crate::wal::reader::Reporter;
use crate::{Error, IResult};
use std::cell::RefCell;
use std::rc::Rc;

/// A `Reporter` that remembers the first corruption seen while a manifest is
/// being replayed. The reader owns one clone and the caller keeps another to
/// collect the outcome with [`LogReporter::result`].
#[derive(Clone, Default)]
pub struct LogReporter {
    inner: Rc<RefCell<LogReporterInner>>,
}

#[derive(Default)]
struct LogReporterInner {
    dropped_bytes: u64,
    reason: Option<String>,
}

impl LogReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn result(&self) -> IResult<()> {
        let inner = self.inner.borrow();
        match &inner.reason {
            None => Ok(()),
            Some(reason) => Err(Error::Corruption(format!(
                "{} ({} bytes dropped)",
                reason, inner.dropped_bytes
            ))),
        }
    }
}

impl Reporter for LogReporter {
    fn corruption(&mut self, bytes: u64, reason: &str) {
        let mut inner = self.inner.borrow_mut();
        inner.dropped_bytes += bytes;
        if inner.reason.is_none() {
            inner.reason = Some(reason.to_owned());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_reporter_keeps_first_reason() {
        let reporter = LogReporter::new();
        assert!(reporter.result().is_ok());
        let mut handle = reporter.clone();
        handle.corruption(10, "checksum mismatch");
        handle.corruption(5, "bad record length");
        match reporter.result() {
            Err(Error::Corruption(msg)) => {
                assert!(msg.contains("checksum mismatch"));
                assert!(msg.contains("15 bytes"));
            }
            other => panic!("unexpected result {:?}", other),
        }
    }
}
