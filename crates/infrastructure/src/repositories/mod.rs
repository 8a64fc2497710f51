mod app_state_store;
mod media_store;
mod models;
mod predicate;
mod sqlite_catalog;
mod store_error;
mod torrent_store;

pub use sqlite_catalog::SqliteCatalog;
