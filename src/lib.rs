//! Divipola: territorial reference resolution for public-health extracts
//!
//! Population registries, vaccination logs, case reports and animal-mortality
//! reports spell place names inconsistently. This crate tags each record with the
//! canonical DIVIPOLA code of its department, municipality, township (vereda) or
//! urban center (cabecera) by resolving the free-text name against an
//! authoritative reference dataset.
//!
//! 1. **Normalization** -- Upper-case, alias substitution, accent folding and
//!    whitespace collapsing, applied identically to reference and query names
//! 2. **Indexing** -- One pass over the reference file builds a flat name-to-code
//!    map, per-level record lists in file order, and a municipality-to-children map
//! 3. **Caching** -- The index is rebuilt only when the reference file's
//!    modification time changes (or on explicit reload), with single-flight rebuilds
//! 4. **Resolution** -- Context-scoped exact match, global exact match, first
//!    containment match in file order, then a municipality-only sentinel code
//!
//! # Key Modules
//!
//! - [`normalize`] -- Comparison keys for territorial names
//! - [`parser`] -- Reference dataset reader with bounded retry
//! - [`index`] -- Immutable `ReferenceIndex` and data-quality counts
//! - [`cache`] -- `ReferenceCache`, the only owner of the current index
//! - [`resolver`] -- `CodeResolver` and the lookup chain
//! - [`stats`] -- Lock-free outcome counters for auditing exact vs. guessed matches
//! - [`batch`] -- Parallel resolution of a whole extract column
//! - [`models`] -- `Level`, `TerritorialRecord`, `Outcome`, `Resolution`
//! - [`config`] -- Defaults for sentinel code, retries and buffers
//!
//! # Example Usage
//!
//! ```no_run
//! use divipola::{CodeResolver, Level, ReferenceCache};
//! use std::sync::Arc;
//!
//! let cache = Arc::new(ReferenceCache::new("data/tolima_territorios.csv"));
//! let resolver = CodeResolver::new(cache);
//!
//! let municipio = resolver.resolve(Level::Municipality, "Ibagué", None);
//! let vereda = resolver.resolve(Level::Township, "La Esperanza", Some("Ibagué"));
//! println!("{:?} {:?}", municipio.code(), vereda.code());
//! ```

pub mod batch;
pub mod cache;
pub mod config;
pub mod error;
pub mod index;
pub mod models;
pub mod normalize;
pub mod parser;
pub mod resolver;
pub mod stats;

pub use cache::ReferenceCache;
pub use index::ReferenceIndex;
pub use models::{Level, Outcome, Resolution, TerritorialRecord};
pub use normalize::normalize;
pub use resolver::{CodeResolver, ResolverConfig};
