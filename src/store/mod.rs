// ==============================================================================
// store/mod.rs - Relational Persistence Boundary
// ==============================================================================
// Description: Store/Session traits shared by the PostgreSQL and SQLite
//              backends; every write is one atomic upsert statement
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================
// Write contracts:
//   find_or_create   resolve_location / resolve_variant / resolve_gene
//                    INSERT ... ON CONFLICT (natural key) DO UPDATE ... RETURNING id
//   upsert_additive  merge_frequency
//                    INSERT ... ON CONFLICT (variant, collection) DO UPDATE
//                    SET counter = counter + excluded.counter
//   insert           create_collection
//   link_if_absent   link_gene_location
//                    INSERT ... ON CONFLICT DO NOTHING
// ==============================================================================

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::genotype::GenotypeTally;
use crate::ledger::Receipt;
use crate::models::{
    Collection, CollectionId, GeneId, GeneSpan, LocationId, LocationKey, VariantId, VariantKey,
};

pub mod postgres;
pub mod sqlite;

pub use postgres::PgStore;
pub use sqlite::SqliteStore;

/// Persistence errors, classified by how ingestion must react to them
#[derive(Error, Debug)]
pub enum StoreError {
    /// Database unreachable or the connection broke; fatal to the whole run
    #[error("Database connection failure: {0}")]
    Connection(String),

    /// A constraint rejected a write in a way the upserts should never allow
    #[error("Integrity violation for {key}: {message}")]
    Integrity { key: String, message: String },

    #[error("Database error: {0}")]
    Query(String),

    #[error("Value {0} does not fit a database integer column")]
    Overflow(u64),
}

impl StoreError {
    pub fn is_connection(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }
}

/// Where the database lives
#[derive(Clone)]
pub enum DatabaseTarget {
    Postgres(sqlx::postgres::PgConnectOptions),
    Sqlite(PathBuf),
}

impl fmt::Display for DatabaseTarget {
    // Never prints the password
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseTarget::Postgres(options) => write!(
                f,
                "postgres://{}@{}:{}/{}",
                options.get_username(),
                options.get_host(),
                options.get_port(),
                options.get_database().unwrap_or_default()
            ),
            DatabaseTarget::Sqlite(path) => write!(f, "sqlite:{}", path.display()),
        }
    }
}

impl fmt::Debug for DatabaseTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DatabaseTarget({})", self)
    }
}

/// Open a store for the target
pub async fn connect(target: &DatabaseTarget, max_connections: u32) -> Result<Arc<dyn Store>, StoreError> {
    match target {
        DatabaseTarget::Postgres(options) => {
            let store = PgStore::connect(options.clone(), max_connections).await?;
            Ok(Arc::new(store))
        }
        DatabaseTarget::Sqlite(path) => Ok(Arc::new(SqliteStore::open(path)?)),
    }
}

/// Row counts of every table, for run logs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableCounts {
    pub locations: u64,
    pub variants: u64,
    pub collections: u64,
    pub frequencies: u64,
    pub genes: u64,
    pub gene_locations: u64,
    pub receipts: u64,
}

/// Tables in creation order, paired with the counter they fill
pub(crate) const TABLES: [&str; 7] = [
    "variant_locations",
    "variants",
    "collections",
    "variant_frequencies",
    "genes",
    "gene_locations",
    "ingest_receipts",
];

impl TableCounts {
    pub(crate) fn from_counts(counts: [u64; 7]) -> Self {
        let [locations, variants, collections, frequencies, genes, gene_locations, receipts] = counts;
        Self {
            locations,
            variants,
            collections,
            frequencies,
            genes,
            gene_locations,
            receipts,
        }
    }
}

/// Secondary indexes for position and gene queries (same SQL on both backends)
pub(crate) const INDEX_STATEMENTS: [&str; 5] = [
    "CREATE INDEX IF NOT EXISTS idx_variant_locations_position
        ON variant_locations (chromosome, position)",
    "CREATE INDEX IF NOT EXISTS idx_variants_rs_id ON variants (rs_id)",
    "CREATE INDEX IF NOT EXISTS idx_variant_frequencies_collection
        ON variant_frequencies (collection_id)",
    "CREATE INDEX IF NOT EXISTS idx_gene_locations_location
        ON gene_locations (variant_location_id)",
    "CREATE INDEX IF NOT EXISTS idx_genes_symbol ON genes (symbol)",
];

/// A database that hands out transactional sessions
#[async_trait]
pub trait Store: Send + Sync {
    /// Short backend name for logs
    fn backend(&self) -> &'static str;

    /// Create all tables (idempotent)
    async fn create_schema(&self) -> Result<(), StoreError>;

    /// Create the secondary indexes (idempotent)
    async fn create_indexes(&self) -> Result<(), StoreError>;

    /// Start a transaction
    ///
    /// Dropping the session without calling [`Session::commit`] rolls it back.
    async fn begin(&self) -> Result<Box<dyn Session>, StoreError>;

    async fn row_counts(&self) -> Result<TableCounts, StoreError>;
}

/// One transaction against the store
#[async_trait]
pub trait Session: Send {
    /// Find or create the location with this natural key
    async fn resolve_location(&mut self, key: &LocationKey) -> Result<LocationId, StoreError>;

    /// Find or create the variant; `rs_id` is only stored when the row is created
    async fn resolve_variant(
        &mut self,
        key: &VariantKey,
        rs_id: Option<&str>,
    ) -> Result<VariantId, StoreError>;

    async fn create_collection(
        &mut self,
        name: Option<&str>,
        sample_count: u64,
    ) -> Result<Collection, StoreError>;

    async fn collection(&mut self, id: CollectionId) -> Result<Option<Collection>, StoreError>;

    /// Add a tally to the frequency row of (variant, collection), creating it if absent
    async fn merge_frequency(
        &mut self,
        variant: VariantId,
        collection: CollectionId,
        tally: &GenotypeTally,
    ) -> Result<(), StoreError>;

    async fn frequency(
        &mut self,
        variant: VariantId,
        collection: CollectionId,
    ) -> Result<Option<GenotypeTally>, StoreError>;

    async fn resolve_gene(&mut self, symbol: &str) -> Result<GeneId, StoreError>;

    /// Link a gene to a location; returns false when the link already existed
    async fn link_gene_location(&mut self, gene: GeneId, location: LocationId) -> Result<bool, StoreError>;

    /// Stored locations of a genome version inside a span (inclusive)
    async fn locations_in_span(
        &mut self,
        span: &GeneSpan,
        genome_version: &str,
    ) -> Result<Vec<LocationId>, StoreError>;

    /// Receipt of a file in one collection, or its earliest receipt in any
    async fn receipt(
        &mut self,
        digest: &str,
        collection: Option<CollectionId>,
    ) -> Result<Option<Receipt>, StoreError>;

    /// Store a receipt; with `replace` an existing receipt for the same digest and
    /// collection is overwritten, otherwise it is an integrity violation
    async fn record_receipt(&mut self, receipt: &Receipt, replace: bool) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

pub(crate) fn to_db(value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Overflow(value))
}

// Columns carry CHECK (>= 0)
pub(crate) fn from_db(value: i64) -> u64 {
    value.max(0) as u64
}

/// Counter columns of a tally in column order
pub(crate) fn tally_columns(tally: &GenotypeTally) -> Result<[i64; 6], StoreError> {
    Ok([
        to_db(tally.alternate_allele_count)?,
        to_db(tally.allele_number)?,
        to_db(tally.hom_ref)?,
        to_db(tally.het)?,
        to_db(tally.hom_alt)?,
        to_db(tally.missing)?,
    ])
}

pub(crate) fn tally_from_columns(columns: [i64; 6]) -> GenotypeTally {
    let [alternate_allele_count, allele_number, hom_ref, het, hom_alt, missing] = columns.map(from_db);
    GenotypeTally {
        alternate_allele_count,
        allele_number,
        hom_ref,
        het,
        hom_alt,
        missing,
    }
}
