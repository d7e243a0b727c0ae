pub mod cache;
pub mod cursor;
pub mod loader;
pub mod parser;
pub mod resolver;
pub mod types;

pub use cache::{AliasCache, CacheHandle, CacheManager};
pub use cursor::Session;
pub use parser::parse_query;
pub use types::{FieldQuery, LinkOp, Query, QueryType, Record};
