//! Cache d'artefacts avec durée de vie et éviction paresseuse

use crate::clock::{Clock, SystemClock};
use crate::db::{CacheEntry, DB};
use crate::CacheError;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const TABLE_NAME: &str = "artifacts";

/// Magasin clé → valeur avec TTL, miroir SQLite.
///
/// Toutes les mutations sont écrites dans la base avant de rendre la main.
/// Une erreur de persistance est journalisée mais jamais remontée à l'appelant :
/// l'état en mémoire fait foi pour la session en cours.
#[derive(Debug)]
pub struct ArtifactCache {
    entries: Mutex<BTreeMap<String, CacheEntry>>,
    db: DB,
    clock: Arc<dyn Clock>,
}

impl ArtifactCache {
    /// Ouvre (ou crée) le cache persistant situé à `path`.
    ///
    /// Le répertoire parent est créé si nécessaire et les entrées déjà
    /// présentes sont rechargées en mémoire, expirées comprises.
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = DB::init(path, TABLE_NAME)?;
        let entries = db
            .get_all()?
            .into_iter()
            .map(|e| (e.key.clone(), e))
            .collect::<BTreeMap<_, _>>();

        tracing::debug!(
            "Artifact cache opened at {} ({} entries)",
            path.display(),
            entries.len()
        );

        Ok(Self {
            entries: Mutex::new(entries),
            db,
            clock: Arc::new(SystemClock),
        })
    }

    /// Cache non persistant, utilisé en repli quand le fichier est inaccessible.
    pub fn in_memory() -> Result<Self, CacheError> {
        Ok(Self {
            entries: Mutex::new(BTreeMap::new()),
            db: DB::in_memory(TABLE_NAME)?,
            clock: Arc::new(SystemClock),
        })
    }

    /// Remplace l'horloge utilisée pour les calculs d'expiration.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Retourne la valeur associée à `key` si elle existe et n'a pas expiré.
    ///
    /// Une entrée expirée est supprimée (mémoire et base) lors de cette lecture.
    pub fn get(&self, key: &str) -> Option<String> {
        let now = self.clock.now_ms();
        let mut entries = self.entries();
        match entries.get(key) {
            None => return None,
            Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
            Some(_) => {}
        }

        entries.remove(key);
        tracing::debug!("Cache entry {} expired, evicted", key);
        if let Err(e) = self.db.delete(key) {
            tracing::warn!("Failed to persist eviction of {}: {}", key, e);
        }
        None
    }

    /// Stocke `value` sous `key` avec une durée de vie en millisecondes.
    ///
    /// `ttl_ms <= 0` crée une entrée qui n'expire jamais.
    pub fn set(&self, key: &str, value: &str, ttl_ms: i64) {
        let expiry = if ttl_ms > 0 {
            self.clock.now_ms().saturating_add(ttl_ms)
        } else {
            0
        };
        let entry = CacheEntry {
            key: key.to_string(),
            value: value.to_string(),
            expiry,
        };

        let mut entries = self.entries();
        if let Err(e) = self.db.upsert(&entry) {
            tracing::warn!("Failed to persist cache entry {}: {}", key, e);
        }
        entries.insert(entry.key.clone(), entry);
    }

    /// Liste les entrées non expirées, triées par clé. Ne modifie rien.
    pub fn get_all(&self) -> Vec<CacheEntry> {
        let now = self.clock.now_ms();
        self.entries()
            .values()
            .filter(|e| !e.is_expired(now))
            .cloned()
            .collect()
    }

    /// Supprime une entrée. Retourne `true` si elle existait.
    pub fn remove(&self, key: &str) -> bool {
        let mut entries = self.entries();
        let existed = entries.remove(key).is_some();
        if existed {
            if let Err(e) = self.db.delete(key) {
                tracing::warn!("Failed to persist removal of {}: {}", key, e);
            }
        }
        existed
    }

    /// Vide entièrement le cache.
    pub fn clear(&self) {
        let mut entries = self.entries();
        entries.clear();
        if let Err(e) = self.db.purge() {
            tracing::warn!("Failed to persist cache purge: {}", e);
        }
    }

    /// Nombre d'entrées en mémoire, expirées non encore évincées comprises.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
