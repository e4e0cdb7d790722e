//! Module de gestion de la base de données SQLite pour le cache
//!
//! Ce module persiste les entrées du cache d'artefacts (clé, valeur, expiration).
//! La map en mémoire de [`crate::ArtifactCache`] reste la source de vérité ;
//! la base n'est relue qu'à l'ouverture.

use rusqlite::{params, Connection};
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Entrée de cache persistée
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Clé opaque de l'artefact (clé d'image côté source)
    pub key: String,
    /// Valeur résolue (URL publique)
    pub value: String,
    /// Expiration en millisecondes epoch, `0` signifie « n'expire jamais »
    pub expiry: i64,
}

impl CacheEntry {
    /// Indique si l'entrée est expirée à l'instant `now_ms`.
    ///
    /// Une entrée est expirée lorsque `expiry > 0` et `now > expiry`.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expiry > 0 && now_ms > self.expiry
    }
}

/// Base de données SQLite pour le cache
#[derive(Debug)]
pub struct DB {
    conn: Mutex<Connection>,
    table_name: String,
}

impl DB {
    /// Initialise une base de données sur disque avec une table personnalisée
    ///
    /// # Exemple
    ///
    /// ```rust,no_run
    /// use pmocache::db::DB;
    /// use std::path::Path;
    ///
    /// let db = DB::init(Path::new("cache.db"), "artifacts").unwrap();
    /// ```
    pub fn init(path: &Path, table_name: &str) -> Result<Self, rusqlite::Error> {
        Self::with_connection(Connection::open(path)?, table_name)
    }

    /// Initialise une base en mémoire (aucune persistance entre sessions)
    pub fn in_memory(table_name: &str) -> Result<Self, rusqlite::Error> {
        Self::with_connection(Connection::open_in_memory()?, table_name)
    }

    fn with_connection(conn: Connection, table_name: &str) -> Result<Self, rusqlite::Error> {
        let create_table_sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expiry INTEGER NOT NULL DEFAULT 0
            )",
            table_name
        );

        conn.execute(&create_table_sql, [])?;

        Ok(Self {
            conn: Mutex::new(conn),
            table_name: table_name.to_string(),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ajoute ou remplace une entrée
    pub fn upsert(&self, entry: &CacheEntry) -> rusqlite::Result<()> {
        let conn = self.conn();
        let sql = format!(
            "INSERT INTO {} (key, value, expiry)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                 value = excluded.value,
                 expiry = excluded.expiry",
            self.table_name
        );
        conn.execute(&sql, params![entry.key, entry.value, entry.expiry])?;
        Ok(())
    }

    /// Récupère une entrée par sa clé
    pub fn get(&self, key: &str) -> rusqlite::Result<Option<CacheEntry>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT key, value, expiry FROM {} WHERE key = ?1",
            self.table_name
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![key], Self::row_to_entry)?;
        rows.next().transpose()
    }

    /// Supprime une entrée
    pub fn delete(&self, key: &str) -> rusqlite::Result<()> {
        let conn = self.conn();
        let sql = format!("DELETE FROM {} WHERE key = ?1", self.table_name);
        conn.execute(&sql, params![key])?;
        Ok(())
    }

    /// Vide complètement la table
    pub fn purge(&self) -> rusqlite::Result<()> {
        let conn = self.conn();
        let sql = format!("DELETE FROM {}", self.table_name);
        conn.execute(&sql, [])?;
        Ok(())
    }

    /// Récupère toutes les entrées, triées par clé
    pub fn get_all(&self) -> rusqlite::Result<Vec<CacheEntry>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT key, value, expiry FROM {} ORDER BY key ASC",
            self.table_name
        );
        let mut stmt = conn.prepare(&sql)?;
        let entries = stmt.query_map([], Self::row_to_entry)?;
        entries.collect()
    }

    /// Compte le nombre d'entrées, expirées comprises
    pub fn count(&self) -> rusqlite::Result<usize> {
        let conn = self.conn();
        let sql = format!("SELECT COUNT(*) FROM {}", self.table_name);
        let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<CacheEntry> {
        Ok(CacheEntry {
            key: row.get(0)?,
            value: row.get(1)?,
            expiry: row.get(2)?,
        })
    }
}
