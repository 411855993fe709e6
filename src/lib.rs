#[macro_use]
extern crate num_derive;

pub mod btree;
pub mod compaction;
pub mod db;
mod error;
pub mod iterator;
pub mod opt;
pub mod storage;
pub mod table_cache;
pub mod util;
pub mod version;
pub mod wal;

pub use btree::{BPlusTree, Cursor, OrderedIndex};
pub use compaction::Compaction;
pub use db::router::KeyRouter;
pub use error::{Error, IResult};
pub use version::run::Run;
pub use version::version_edit::{FileMetaData, VersionEdit};
pub use version::version_set::{CatalogState, VersionSet};
pub use version::{ValueLookup, Version};
