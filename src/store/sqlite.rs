// ==============================================================================
// store/sqlite.rs - Embedded SQLite Backend
// ==============================================================================
// Description: Variant-frequency schema in a single SQLite file; sessions are
//              serialized through one connection
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    from_db, tally_columns, tally_from_columns, to_db, Session, Store, StoreError, TableCounts,
    INDEX_STATEMENTS, TABLES,
};
use crate::genotype::GenotypeTally;
use crate::ledger::Receipt;
use crate::models::{
    chromosome_aliases, Collection, CollectionId, GeneId, GeneSpan, LocationId, LocationKey,
    VariantId, VariantKey,
};

const SCHEMA: [&str; 7] = [
    "CREATE TABLE IF NOT EXISTS variant_locations (
        id INTEGER PRIMARY KEY,
        chromosome TEXT NOT NULL,
        position INTEGER NOT NULL CHECK (position >= 0),
        reference_allele TEXT NOT NULL,
        genome_version TEXT NOT NULL,
        UNIQUE (chromosome, position, reference_allele, genome_version)
    )",
    "CREATE TABLE IF NOT EXISTS variants (
        id INTEGER PRIMARY KEY,
        variant_location_id INTEGER NOT NULL REFERENCES variant_locations (id),
        rs_id TEXT,
        alternate_allele TEXT NOT NULL,
        UNIQUE (variant_location_id, alternate_allele)
    )",
    "CREATE TABLE IF NOT EXISTS collections (
        id INTEGER PRIMARY KEY,
        name TEXT,
        sample_count INTEGER NOT NULL CHECK (sample_count >= 0)
    )",
    "CREATE TABLE IF NOT EXISTS variant_frequencies (
        id INTEGER PRIMARY KEY,
        variant_id INTEGER NOT NULL REFERENCES variants (id),
        collection_id INTEGER NOT NULL REFERENCES collections (id),
        alternate_allele_count INTEGER NOT NULL CHECK (alternate_allele_count >= 0),
        allele_number INTEGER NOT NULL CHECK (allele_number >= alternate_allele_count),
        hom_ref_count INTEGER NOT NULL CHECK (hom_ref_count >= 0),
        het_count INTEGER NOT NULL CHECK (het_count >= 0),
        hom_alt_count INTEGER NOT NULL CHECK (hom_alt_count >= 0),
        missing_count INTEGER NOT NULL CHECK (missing_count >= 0),
        UNIQUE (variant_id, collection_id)
    )",
    "CREATE TABLE IF NOT EXISTS genes (
        id INTEGER PRIMARY KEY,
        symbol TEXT NOT NULL UNIQUE
    )",
    "CREATE TABLE IF NOT EXISTS gene_locations (
        id INTEGER PRIMARY KEY,
        gene_id INTEGER NOT NULL REFERENCES genes (id),
        variant_location_id INTEGER NOT NULL REFERENCES variant_locations (id),
        UNIQUE (gene_id, variant_location_id)
    )",
    "CREATE TABLE IF NOT EXISTS ingest_receipts (
        file_digest TEXT NOT NULL,
        file_name TEXT NOT NULL,
        collection_id INTEGER NOT NULL REFERENCES collections (id),
        records INTEGER NOT NULL,
        malformed_records INTEGER NOT NULL,
        run_id TEXT NOT NULL,
        ingested_at TEXT NOT NULL,
        PRIMARY KEY (file_digest, collection_id)
    )",
];

const UPSERT_LOCATION: &str = "INSERT INTO variant_locations (chromosome, position, reference_allele, genome_version)
     VALUES (?1, ?2, ?3, ?4)
     ON CONFLICT (chromosome, position, reference_allele, genome_version)
     DO UPDATE SET chromosome = excluded.chromosome
     RETURNING id";

const UPSERT_VARIANT: &str = "INSERT INTO variants (variant_location_id, rs_id, alternate_allele)
     VALUES (?1, ?2, ?3)
     ON CONFLICT (variant_location_id, alternate_allele)
     DO UPDATE SET alternate_allele = excluded.alternate_allele
     RETURNING id";

const MERGE_FREQUENCY: &str = "INSERT INTO variant_frequencies (
         variant_id, collection_id, alternate_allele_count, allele_number,
         hom_ref_count, het_count, hom_alt_count, missing_count)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
     ON CONFLICT (variant_id, collection_id) DO UPDATE SET
         alternate_allele_count = variant_frequencies.alternate_allele_count + excluded.alternate_allele_count,
         allele_number = variant_frequencies.allele_number + excluded.allele_number,
         hom_ref_count = variant_frequencies.hom_ref_count + excluded.hom_ref_count,
         het_count = variant_frequencies.het_count + excluded.het_count,
         hom_alt_count = variant_frequencies.hom_alt_count + excluded.hom_alt_count,
         missing_count = variant_frequencies.missing_count + excluded.missing_count";

const UPSERT_GENE: &str = "INSERT INTO genes (symbol) VALUES (?1)
     ON CONFLICT (symbol) DO UPDATE SET symbol = excluded.symbol
     RETURNING id";

const INSERT_RECEIPT: &str = "INSERT INTO ingest_receipts (
         file_digest, file_name, collection_id, records, malformed_records, run_id, ingested_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";

const REPLACE_RECEIPT: &str = "INSERT INTO ingest_receipts (
         file_digest, file_name, collection_id, records, malformed_records, run_id, ingested_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
     ON CONFLICT (file_digest, collection_id) DO UPDATE SET
         file_name = excluded.file_name,
         records = excluded.records,
         malformed_records = excluded.malformed_records,
         run_id = excluded.run_id,
         ingested_at = excluded.ingested_at";

/// Map a rusqlite error onto the store taxonomy
fn classify(err: rusqlite::Error, key: impl FnOnce() -> String) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, message) => match failure.code {
            ErrorCode::ConstraintViolation => StoreError::Integrity {
                key: key(),
                message: message.clone().unwrap_or_else(|| failure.to_string()),
            },
            ErrorCode::CannotOpen
            | ErrorCode::NotADatabase
            | ErrorCode::DatabaseCorrupt
            | ErrorCode::SystemIoFailure
            | ErrorCode::DiskFull
            | ErrorCode::PermissionDenied => StoreError::Connection(err.to_string()),
            _ => StoreError::Query(err.to_string()),
        },
        _ => StoreError::Query(err.to_string()),
    }
}

fn query_error(err: rusqlite::Error) -> StoreError {
    classify(err, || "statement".to_string())
}

/// SQLite database file holding the variant-frequency schema
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a database file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .map_err(|e| StoreError::Connection(format!("{}: {}", path.display(), e)))?;

        info!("Opened SQLite database: {:?}", path);
        Self::configure(conn)
    }

    /// Private in-memory database
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Connection(e.to_string()))?;
        Self::configure(conn)
    }

    fn configure(conn: Connection) -> Result<Self, StoreError> {
        // Note: Using execute_batch for PRAGMA statements (handles return values automatically)
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(query_error)?;
        conn.busy_timeout(Duration::from_secs(30)).map_err(query_error)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl Store for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn create_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        for statement in SCHEMA {
            conn.execute_batch(statement).map_err(query_error)?;
        }
        info!("SQLite schema ready ({} tables)", SCHEMA.len());
        Ok(())
    }

    async fn create_indexes(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        for statement in INDEX_STATEMENTS {
            conn.execute_batch(statement).map_err(query_error)?;
        }
        info!("SQLite indexes ready ({} indexes)", INDEX_STATEMENTS.len());
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn Session>, StoreError> {
        let conn = self.conn.clone().lock_owned().await;
        conn.execute_batch("BEGIN IMMEDIATE").map_err(query_error)?;
        Ok(Box::new(SqliteSession { conn, open: true }))
    }

    async fn row_counts(&self) -> Result<TableCounts, StoreError> {
        let conn = self.conn.lock().await;
        let mut counts = [0u64; 7];
        for (count, table) in counts.iter_mut().zip(TABLES) {
            let rows: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
                .map_err(query_error)?;
            *count = from_db(rows);
        }
        Ok(TableCounts::from_counts(counts))
    }
}

/// An open `BEGIN IMMEDIATE` transaction; rolled back on drop unless committed
pub struct SqliteSession {
    conn: OwnedMutexGuard<Connection>,
    open: bool,
}

impl Drop for SqliteSession {
    fn drop(&mut self) {
        if self.open {
            match self.conn.execute_batch("ROLLBACK") {
                Ok(()) => debug!("SQLite session rolled back"),
                Err(e) => warn!("SQLite rollback failed: {}", e),
            }
        }
    }
}

#[async_trait]
impl Session for SqliteSession {
    async fn resolve_location(&mut self, key: &LocationKey) -> Result<LocationId, StoreError> {
        let position = to_db(key.position)?;
        self.conn
            .prepare_cached(UPSERT_LOCATION)
            .and_then(|mut stmt| {
                stmt.query_row(
                    params![key.chromosome, position, key.reference_allele, key.genome_version],
                    |row| row.get::<_, i64>(0),
                )
            })
            .map(LocationId)
            .map_err(|e| classify(e, || key.to_string()))
    }

    async fn resolve_variant(
        &mut self,
        key: &VariantKey,
        rs_id: Option<&str>,
    ) -> Result<VariantId, StoreError> {
        self.conn
            .prepare_cached(UPSERT_VARIANT)
            .and_then(|mut stmt| {
                stmt.query_row(
                    params![key.location_id.get(), rs_id, key.alternate_allele],
                    |row| row.get::<_, i64>(0),
                )
            })
            .map(VariantId)
            .map_err(|e| classify(e, || key.to_string()))
    }

    async fn create_collection(
        &mut self,
        name: Option<&str>,
        sample_count: u64,
    ) -> Result<Collection, StoreError> {
        let id = self
            .conn
            .query_row(
                "INSERT INTO collections (name, sample_count) VALUES (?1, ?2) RETURNING id",
                params![name, to_db(sample_count)?],
                |row| row.get::<_, i64>(0),
            )
            .map_err(|e| classify(e, || format!("collection {:?}", name)))?;

        Ok(Collection {
            id: CollectionId(id),
            name: name.map(str::to_string),
            sample_count,
        })
    }

    async fn collection(&mut self, id: CollectionId) -> Result<Option<Collection>, StoreError> {
        self.conn
            .query_row(
                "SELECT id, name, sample_count FROM collections WHERE id = ?1",
                params![id.get()],
                |row| {
                    Ok(Collection {
                        id: CollectionId(row.get(0)?),
                        name: row.get(1)?,
                        sample_count: from_db(row.get(2)?),
                    })
                },
            )
            .optional()
            .map_err(query_error)
    }

    async fn merge_frequency(
        &mut self,
        variant: VariantId,
        collection: CollectionId,
        tally: &GenotypeTally,
    ) -> Result<(), StoreError> {
        let [ac, an, hom_ref, het, hom_alt, missing] = tally_columns(tally)?;
        self.conn
            .prepare_cached(MERGE_FREQUENCY)
            .and_then(|mut stmt| {
                stmt.execute(params![
                    variant.get(),
                    collection.get(),
                    ac,
                    an,
                    hom_ref,
                    het,
                    hom_alt,
                    missing
                ])
            })
            .map(|_| ())
            .map_err(|e| classify(e, || format!("frequency of variant {} in collection {}", variant, collection)))
    }

    async fn frequency(
        &mut self,
        variant: VariantId,
        collection: CollectionId,
    ) -> Result<Option<GenotypeTally>, StoreError> {
        self.conn
            .query_row(
                "SELECT alternate_allele_count, allele_number, hom_ref_count, het_count, hom_alt_count, missing_count
                 FROM variant_frequencies WHERE variant_id = ?1 AND collection_id = ?2",
                params![variant.get(), collection.get()],
                |row| {
                    Ok(tally_from_columns([
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ]))
                },
            )
            .optional()
            .map_err(query_error)
    }

    async fn resolve_gene(&mut self, symbol: &str) -> Result<GeneId, StoreError> {
        self.conn
            .prepare_cached(UPSERT_GENE)
            .and_then(|mut stmt| stmt.query_row(params![symbol], |row| row.get::<_, i64>(0)))
            .map(GeneId)
            .map_err(|e| classify(e, || format!("gene {}", symbol)))
    }

    async fn link_gene_location(&mut self, gene: GeneId, location: LocationId) -> Result<bool, StoreError> {
        self.conn
            .prepare_cached(
                "INSERT INTO gene_locations (gene_id, variant_location_id) VALUES (?1, ?2)
                 ON CONFLICT (gene_id, variant_location_id) DO NOTHING",
            )
            .and_then(|mut stmt| stmt.execute(params![gene.get(), location.get()]))
            .map(|inserted| inserted > 0)
            .map_err(|e| classify(e, || format!("gene {} at location {}", gene, location)))
    }

    async fn locations_in_span(
        &mut self,
        span: &GeneSpan,
        genome_version: &str,
    ) -> Result<Vec<LocationId>, StoreError> {
        let [name, alias] = chromosome_aliases(&span.chromosome);
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT id FROM variant_locations
                 WHERE chromosome IN (?1, ?2) AND genome_version = ?3
                   AND position BETWEEN ?4 AND ?5
                 ORDER BY id",
            )
            .map_err(query_error)?;

        let rows = stmt
            .query_map(
                params![name, alias, genome_version, to_db(span.start)?, to_db(span.end)?],
                |row| row.get::<_, i64>(0),
            )
            .map_err(query_error)?;

        let mut locations = Vec::new();
        for row in rows {
            locations.push(LocationId(row.map_err(query_error)?));
        }
        Ok(locations)
    }

    async fn receipt(
        &mut self,
        digest: &str,
        collection: Option<CollectionId>,
    ) -> Result<Option<Receipt>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT file_name, collection_id, records, malformed_records, run_id, ingested_at
                 FROM ingest_receipts
                 WHERE file_digest = ?1 AND (?2 IS NULL OR collection_id = ?2)
                 ORDER BY ingested_at
                 LIMIT 1",
                params![digest, collection.map(|id| id.get())],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()
            .map_err(query_error)?;

        let Some((file_name, collection_id, records, malformed_records, run_id, ingested_at)) = row else {
            return Ok(None);
        };

        let run_id = Uuid::parse_str(&run_id)
            .map_err(|e| StoreError::Query(format!("receipt {} has invalid run id: {}", digest, e)))?;
        let ingested_at = DateTime::parse_from_rfc3339(&ingested_at)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| StoreError::Query(format!("receipt {} has invalid timestamp: {}", digest, e)))?;

        Ok(Some(Receipt {
            digest: digest.to_string(),
            file_name,
            collection_id: CollectionId(collection_id),
            records: from_db(records),
            malformed_records: from_db(malformed_records),
            run_id,
            ingested_at,
        }))
    }

    async fn record_receipt(&mut self, receipt: &Receipt, replace: bool) -> Result<(), StoreError> {
        let sql = if replace { REPLACE_RECEIPT } else { INSERT_RECEIPT };
        self.conn
            .execute(
                sql,
                params![
                    receipt.digest,
                    receipt.file_name,
                    receipt.collection_id.get(),
                    to_db(receipt.records)?,
                    to_db(receipt.malformed_records)?,
                    receipt.run_id.to_string(),
                    receipt.ingested_at.to_rfc3339(),
                ],
            )
            .map(|_| ())
            .map_err(|e| classify(e, || format!("receipt for {} ({})", receipt.file_name, receipt.digest)))
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut session = self;
        session.conn.execute_batch("COMMIT").map_err(query_error)?;
        session.open = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    async fn temp_store() -> (TempDir, SqliteStore) {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("variants.db")).unwrap();
        store.create_schema().await.unwrap();
        (dir, store)
    }

    fn location(chromosome: &str, position: u64) -> LocationKey {
        LocationKey {
            chromosome: chromosome.to_string(),
            position,
            reference_allele: "A".to_string(),
            genome_version: "GRCh38".to_string(),
        }
    }

    fn tally(hom_ref: u64, het: u64, hom_alt: u64, missing: u64) -> GenotypeTally {
        GenotypeTally {
            alternate_allele_count: het + 2 * hom_alt,
            allele_number: 2 * (hom_ref + het + hom_alt),
            hom_ref,
            het,
            hom_alt,
            missing,
        }
    }

    #[tokio::test]
    async fn test_resolve_location_is_idempotent() {
        let (_dir, store) = temp_store().await;

        let mut session = store.begin().await.unwrap();
        let first = session.resolve_location(&location("chr1", 1000)).await.unwrap();
        let again = session.resolve_location(&location("chr1", 1000)).await.unwrap();
        assert_eq!(first, again);

        let mut other_build = location("chr1", 1000);
        other_build.genome_version = "GRCh37".to_string();
        assert_ne!(session.resolve_location(&other_build).await.unwrap(), first);
        session.commit().await.unwrap();

        // A later session converges on the same row
        let mut session = store.begin().await.unwrap();
        assert_eq!(session.resolve_location(&location("chr1", 1000)).await.unwrap(), first);
        session.commit().await.unwrap();

        assert_eq!(store.row_counts().await.unwrap().locations, 2);
    }

    #[tokio::test]
    async fn test_resolve_variant_keeps_first_rs_id() {
        let (_dir, store) = temp_store().await;
        let mut session = store.begin().await.unwrap();

        let location_id = session.resolve_location(&location("chr1", 1000)).await.unwrap();
        let key = VariantKey {
            location_id,
            alternate_allele: "G".to_string(),
        };
        let first = session.resolve_variant(&key, Some("rs1")).await.unwrap();
        let again = session.resolve_variant(&key, Some("rs999")).await.unwrap();
        assert_eq!(first, again);

        let other = VariantKey {
            location_id,
            alternate_allele: "T".to_string(),
        };
        assert_ne!(session.resolve_variant(&other, None).await.unwrap(), first);
        session.commit().await.unwrap();

        let conn = store.conn.lock().await;
        let rs_id: Option<String> = conn
            .query_row("SELECT rs_id FROM variants WHERE id = ?1", params![first.get()], |row| row.get(0))
            .unwrap();
        assert_eq!(rs_id.as_deref(), Some("rs1"));
    }

    #[tokio::test]
    async fn test_merge_frequency_is_additive() {
        let (_dir, store) = temp_store().await;
        let mut session = store.begin().await.unwrap();

        let location_id = session.resolve_location(&location("chr1", 1000)).await.unwrap();
        let key = VariantKey {
            location_id,
            alternate_allele: "G".to_string(),
        };
        let variant = session.resolve_variant(&key, None).await.unwrap();
        let split = session.create_collection(Some("split"), 6).await.unwrap();
        let whole = session.create_collection(Some("whole"), 6).await.unwrap();

        let t1 = tally(1, 1, 1, 0);
        let t2 = tally(0, 1, 0, 2);
        session.merge_frequency(variant, split.id, &t1).await.unwrap();
        session.merge_frequency(variant, split.id, &t2).await.unwrap();
        session.merge_frequency(variant, whole.id, &(t1 + t2)).await.unwrap();

        let merged = session.frequency(variant, split.id).await.unwrap().unwrap();
        let combined = session.frequency(variant, whole.id).await.unwrap().unwrap();
        assert_eq!(merged, combined);
        assert_eq!(merged.samples(), 6);
        assert_eq!(merged.allele_number, 8);
        session.commit().await.unwrap();

        assert_eq!(store.row_counts().await.unwrap().frequencies, 2);
    }

    #[tokio::test]
    async fn test_new_collection_gets_its_own_row() {
        let (_dir, store) = temp_store().await;
        let mut session = store.begin().await.unwrap();

        let location_id = session.resolve_location(&location("chr1", 1000)).await.unwrap();
        let key = VariantKey {
            location_id,
            alternate_allele: "G".to_string(),
        };
        let variant = session.resolve_variant(&key, Some("rs1")).await.unwrap();
        let first = session.create_collection(None, 3).await.unwrap();
        let second = session.create_collection(None, 2).await.unwrap();

        session.merge_frequency(variant, first.id, &tally(1, 1, 1, 0)).await.unwrap();
        session.merge_frequency(variant, second.id, &tally(1, 0, 0, 1)).await.unwrap();

        let row = session.frequency(variant, second.id).await.unwrap().unwrap();
        assert_eq!((row.hom_ref, row.missing, row.allele_number, row.alternate_allele_count), (1, 1, 2, 0));
        assert_eq!(session.frequency(variant, first.id).await.unwrap().unwrap().samples(), 3);
    }

    #[tokio::test]
    async fn test_dropped_session_rolls_back() {
        let (_dir, store) = temp_store().await;

        {
            let mut session = store.begin().await.unwrap();
            session.resolve_location(&location("chr1", 1000)).await.unwrap();
            session.create_collection(Some("abandoned"), 3).await.unwrap();
        }

        let counts = store.row_counts().await.unwrap();
        assert_eq!(counts.locations, 0);
        assert_eq!(counts.collections, 0);

        // The connection is usable again
        let mut session = store.begin().await.unwrap();
        session.resolve_location(&location("chr1", 1000)).await.unwrap();
        session.commit().await.unwrap();
        assert_eq!(store.row_counts().await.unwrap().locations, 1);
    }

    #[tokio::test]
    async fn test_gene_links_are_idempotent() {
        let (_dir, store) = temp_store().await;
        let mut session = store.begin().await.unwrap();

        let inside = session.resolve_location(&location("chr13", 150)).await.unwrap();
        let edge = session.resolve_location(&location("chr13", 200)).await.unwrap();
        session.resolve_location(&location("chr13", 201)).await.unwrap();
        session.resolve_location(&location("chr14", 150)).await.unwrap();

        let span = GeneSpan {
            symbol: "BRCA2".to_string(),
            chromosome: "13".to_string(),
            start: 100,
            end: 200,
        };
        let found = session.locations_in_span(&span, "GRCh38").await.unwrap();
        assert_eq!(found, vec![inside, edge]);
        assert!(session.locations_in_span(&span, "GRCh37").await.unwrap().is_empty());

        let gene = session.resolve_gene("BRCA2").await.unwrap();
        assert_eq!(session.resolve_gene("BRCA2").await.unwrap(), gene);
        assert!(session.link_gene_location(gene, inside).await.unwrap());
        assert!(!session.link_gene_location(gene, inside).await.unwrap());
        session.commit().await.unwrap();

        assert_eq!(store.row_counts().await.unwrap().gene_locations, 1);
    }

    #[tokio::test]
    async fn test_receipts() {
        let (_dir, store) = temp_store().await;
        let mut session = store.begin().await.unwrap();
        let collection = session.create_collection(Some("cohort"), 3).await.unwrap();

        let receipt = Receipt {
            digest: "abc123".to_string(),
            file_name: "cohort.vcf".to_string(),
            collection_id: collection.id,
            records: 10,
            malformed_records: 1,
            run_id: Uuid::new_v4(),
            ingested_at: DateTime::parse_from_rfc3339("2026-10-18T12:00:00Z").unwrap().with_timezone(&Utc),
        };
        assert!(session.receipt("abc123", None).await.unwrap().is_none());
        session.record_receipt(&receipt, false).await.unwrap();
        assert_eq!(session.receipt("abc123", None).await.unwrap(), Some(receipt.clone()));
        assert_eq!(
            session.receipt("abc123", Some(collection.id)).await.unwrap(),
            Some(receipt.clone())
        );

        let duplicate = session.record_receipt(&receipt, false).await;
        assert!(matches!(duplicate, Err(StoreError::Integrity { .. })));

        let mut replacement = receipt.clone();
        replacement.records = 11;
        session.record_receipt(&replacement, true).await.unwrap();
        assert_eq!(session.receipt("abc123", None).await.unwrap().unwrap().records, 11);
    }

    #[tokio::test]
    async fn test_receipts_are_per_collection() {
        let (_dir, store) = temp_store().await;
        let mut session = store.begin().await.unwrap();
        let first = session.create_collection(Some("first"), 2).await.unwrap();
        let second = session.create_collection(Some("second"), 2).await.unwrap();

        let receipt = Receipt {
            digest: "abc123".to_string(),
            file_name: "cohort.vcf".to_string(),
            collection_id: first.id,
            records: 10,
            malformed_records: 0,
            run_id: Uuid::new_v4(),
            ingested_at: DateTime::parse_from_rfc3339("2026-10-18T12:00:00Z").unwrap().with_timezone(&Utc),
        };
        session.record_receipt(&receipt, false).await.unwrap();
        assert!(session.receipt("abc123", Some(second.id)).await.unwrap().is_none());

        let later = Receipt {
            collection_id: second.id,
            ingested_at: DateTime::parse_from_rfc3339("2026-10-18T13:00:00Z").unwrap().with_timezone(&Utc),
            ..receipt.clone()
        };
        session.record_receipt(&later, false).await.unwrap();

        let found = session.receipt("abc123", Some(second.id)).await.unwrap().unwrap();
        assert_eq!(found.collection_id, second.id);
        // Without a collection the earliest receipt answers
        let earliest = session.receipt("abc123", None).await.unwrap().unwrap();
        assert_eq!(earliest.collection_id, first.id);
        session.commit().await.unwrap();

        assert_eq!(store.row_counts().await.unwrap().receipts, 2);
    }

    #[tokio::test]
    async fn test_unknown_collection_and_foreign_keys() {
        let (_dir, store) = temp_store().await;
        let mut session = store.begin().await.unwrap();

        assert!(session.collection(CollectionId(42)).await.unwrap().is_none());

        let result = session
            .merge_frequency(VariantId(7), CollectionId(42), &tally(1, 0, 0, 0))
            .await;
        assert!(matches!(result, Err(StoreError::Integrity { .. })));
    }

    #[tokio::test]
    async fn test_schema_and_indexes_are_idempotent() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create_schema().await.unwrap();
        store.create_schema().await.unwrap();
        store.create_indexes().await.unwrap();
        store.create_indexes().await.unwrap();
        assert_eq!(store.row_counts().await.unwrap(), TableCounts::default());
    }

    #[test]
    fn test_classify_errors() {
        let constraint = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
            Some("UNIQUE constraint failed".to_string()),
        );
        match classify(constraint, || "location chr1:1".to_string()) {
            StoreError::Integrity { key, message } => {
                assert_eq!(key, "location chr1:1");
                assert_eq!(message, "UNIQUE constraint failed");
            }
            other => panic!("unexpected {:?}", other),
        }

        let cannot_open = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN),
            None,
        );
        assert!(classify(cannot_open, String::new).is_connection());

        assert!(matches!(
            query_error(rusqlite::Error::QueryReturnedNoRows),
            StoreError::Query(_)
        ));
    }
}
