//! # pmocache - Cache d'artefacts à durée de vie pour PMOPresence
//!
//! Cette crate fournit un magasin clé → valeur avec expiration (TTL), utilisé pour
//! mémoriser l'URL publique obtenue après l'upload d'une pochette. Une pochette
//! déjà uploadée n'est jamais renvoyée tant que son entrée n'a pas expiré.
//!
//! ## Vue d'ensemble
//!
//! - Map en mémoire, autoritaire pour la session
//! - Miroir SQLite écrit de manière synchrone à chaque mutation
//! - Éviction paresseuse : une entrée expirée est supprimée lors de sa lecture,
//!   il n'y a aucun balayage en arrière-plan
//! - Horloge injectable ([`Clock`]) pour simuler le temps dans les tests
//!
//! ## Architecture
//!
//! ```text
//! pmocache
//!     ├── clock.rs    - Horloge murale (système ou manuelle)
//!     ├── db.rs       - Persistance SQLite des entrées
//!     └── cache.rs    - ArtifactCache (TTL + éviction paresseuse)
//! ```
//!
//! ## Utilisation
//!
//! ```rust,no_run
//! use pmocache::ArtifactCache;
//! use std::path::Path;
//!
//! let cache = ArtifactCache::open(Path::new("./data/cache.db"))?;
//! cache.set("image-key", "https://files.example.com/abc.jpg", 30 * 24 * 3600 * 1000);
//! assert_eq!(cache.get("image-key").as_deref(), Some("https://files.example.com/abc.jpg"));
//! # Ok::<(), pmocache::CacheError>(())
//! ```
//!
//! ## Schéma de base de données
//!
//! ```sql
//! CREATE TABLE artifacts (
//!     key TEXT PRIMARY KEY,          -- Clé opaque de l'artefact
//!     value TEXT NOT NULL,           -- URL résolue
//!     expiry INTEGER NOT NULL        -- Expiration en ms epoch (0 = jamais)
//! );
//! ```

pub mod cache;
pub mod clock;
pub mod db;

pub use cache::ArtifactCache;
pub use clock::{Clock, ManualClock, SystemClock};
pub use db::{CacheEntry, DB};

use thiserror::Error;

/// Erreurs de la couche de persistance du cache
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),
}
