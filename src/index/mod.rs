pub mod build;
pub mod collect;
pub mod division;
pub mod header;
pub mod reader;
pub mod sort;
pub mod stats;
pub mod types;
pub mod writer;

pub use build::build_index;
pub use division::DivisionTable;
pub use reader::{EntryIndex, FieldIndex};
pub use types::*;
pub use writer::IndexWriter;
