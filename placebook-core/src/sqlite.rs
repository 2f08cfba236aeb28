use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags, TransactionBehavior};

use crate::error::{DirectoryError, DirectoryResult};

const DIRECTORY_SCHEMA: &str = include_str!("../../sql/directory.sql");

pub fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA busy_timeout = 5000;\n\
         PRAGMA journal_mode = WAL;\n\
         PRAGMA synchronous = NORMAL;\n\
         PRAGMA cache_size = -64000;\n\
         PRAGMA temp_store = MEMORY;\n\
         PRAGMA foreign_keys = ON;\n",
    )
}

#[derive(Debug, Clone)]
pub struct DatabaseBuilder {
    path: Option<PathBuf>,
    read_only: bool,
    create_if_missing: bool,
}

impl Default for DatabaseBuilder {
    fn default() -> Self {
        Self {
            path: None,
            read_only: false,
            create_if_missing: true,
        }
    }
}

impl DatabaseBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn build(self) -> DirectoryResult<Database> {
        let path = self.path.ok_or(DirectoryError::MissingStore)?;
        let mut flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };

        if !self.read_only && self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }

        Ok(Database { path, flags })
    }
}

/// Handle to the directory database shared by every store.
///
/// Cheap to clone; each operation opens its own connection so callers on
/// different threads never share one.
#[derive(Debug, Clone)]
pub struct Database {
    path: PathBuf,
    flags: OpenFlags,
}

impl Database {
    pub fn builder() -> DatabaseBuilder {
        DatabaseBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> DirectoryResult<Self> {
        DatabaseBuilder::new().path(path).build()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn open(&self) -> DirectoryResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            DirectoryError::OpenDatabase {
                path: self.path.clone(),
                source,
            }
        })?;
        configure_connection(&conn).map_err(|source| DirectoryError::OpenDatabase {
            path: self.path.clone(),
            source,
        })?;
        Ok(conn)
    }

    /// Runs `body` inside a `BEGIN IMMEDIATE` transaction, committing on `Ok`.
    ///
    /// The write lock is taken up front, so read-check-write sequences in
    /// `body` cannot interleave with another writer.
    pub(crate) fn write<T, F>(&self, body: F) -> DirectoryResult<T>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> DirectoryResult<T>,
    {
        let mut conn = self.open()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = body(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    pub fn initialize(&self) -> DirectoryResult<()> {
        let conn = self.open()?;
        conn.execute_batch(DIRECTORY_SCHEMA)?;
        Ok(())
    }
}
