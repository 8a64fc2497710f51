pub mod catalog;
pub mod filter;
pub mod torrent_parser;

pub use catalog::Catalog;
pub use filter::{selectors, EntityKind, Filter, Operator, Value, ValueMap};
pub use torrent_parser::{ListedFile, TorrentParser};
