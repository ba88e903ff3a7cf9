use std::path::PathBuf;
use std::sync::Arc;

use crate::app::error::{GleanerError, Result};
use crate::store::sqlite::SqliteStore;

pub struct AppContext {
    pub store: Arc<SqliteStore>,
}

impl AppContext {
    pub fn new(db_path: Option<PathBuf>) -> Result<Self> {
        let db_path = match db_path {
            Some(p) => p,
            None => Self::default_db_path()?,
        };

        let store = Arc::new(SqliteStore::new(&db_path)?);
        Ok(Self { store })
    }

    pub fn in_memory() -> Result<Self> {
        let store = Arc::new(SqliteStore::in_memory()?);
        Ok(Self { store })
    }

    fn default_db_path() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| GleanerError::Config("Could not find data directory".into()))?;
        let gleaner_dir = data_dir.join("gleaner");
        std::fs::create_dir_all(&gleaner_dir)?;
        Ok(gleaner_dir.join("gleaner.db"))
    }
}
