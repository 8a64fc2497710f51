pub mod database;
pub mod parser;
pub mod process;
pub mod repositories;
pub mod tasks;

pub use database::{Database, DatabaseOptions};
pub use parser::MetainfoParser;
pub use process::{ProcessError, ProcessManager, ProcessOptions, ProcessReport};
pub use repositories::SqliteCatalog;
pub use tasks::{standard_registry, SyncOptions, TaskOptions, UnrarOptions};
