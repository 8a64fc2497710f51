use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager, CustomizeConnection};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use domain::CatalogError;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

pub mod backup;
pub mod schema;
pub use schema::*;

pub type SqlitePool = r2d2::Pool<ConnectionManager<SqliteConnection>>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    pub path: PathBuf,
    /// How long a connection waits on a locked database.
    pub busy_timeout: Duration,
    /// Log filtered statements at debug level.
    pub debug: bool,
    pub pool_size: u32,
}

impl DatabaseOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout: Duration::from_secs(30),
            debug: false,
            pool_size: 4,
        }
    }
}

#[derive(Debug)]
struct ConnectionSetup {
    busy_timeout: Duration,
}

impl CustomizeConnection<SqliteConnection, r2d2::Error> for ConnectionSetup {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), r2d2::Error> {
        conn.batch_execute(&format!(
            "PRAGMA foreign_keys = ON; PRAGMA busy_timeout = {};",
            self.busy_timeout.as_millis()
        ))
        .map_err(r2d2::Error::QueryError)
    }
}

pub struct Database {
    pool: SqlitePool,
    path: PathBuf,
}

impl Database {
    /// Opens (creating if needed) the database file and migrates it to the
    /// latest schema version.
    pub fn open(options: &DatabaseOptions) -> Result<Self, CatalogError> {
        if let Some(parent) = options.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| CatalogError::new("creating the database directory", e))?;
            }
        }

        let manager = ConnectionManager::<SqliteConnection>::new(options.path.display().to_string());
        let pool = r2d2::Pool::builder()
            .max_size(options.pool_size.max(1))
            .connection_customizer(Box::new(ConnectionSetup {
                busy_timeout: options.busy_timeout,
            }))
            .build(manager)
            .map_err(|e| CatalogError::new("creating the SQLite connection pool", e))?;

        let database = Database {
            pool,
            path: options.path.clone(),
        };
        database.migrate()?;
        Ok(database)
    }

    pub fn get_pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn migrate(&self) -> Result<(), CatalogError> {
        let mut conn = self
            .pool
            .get()
            .map_err(|e| CatalogError::new("acquiring a connection", e))?;
        let applied = conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| CatalogError::new("running migrations", e))?;
        if applied.is_empty() {
            debug!(path = %self.path.display(), "catalog schema up to date");
        } else {
            info!(
                path = %self.path.display(),
                versions = ?applied.iter().map(|v| v.to_string()).collect::<Vec<_>>(),
                "catalog migrated"
            );
        }
        Ok(())
    }
}
