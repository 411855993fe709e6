pub mod filename;
pub mod format;
pub mod routed_iterator;
pub mod router;
