// ==============================================================================
// store/postgres.rs - PostgreSQL Backend
// ==============================================================================
// Description: Variant-frequency schema on a pooled PostgreSQL connection;
//              each session is one pooled transaction
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;
use tracing::info;
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
    r#"
    CREATE TABLE IF NOT EXISTS variant_locations (
        id BIGSERIAL PRIMARY KEY,
        chromosome TEXT NOT NULL,
        position BIGINT NOT NULL CHECK (position >= 0),
        reference_allele TEXT NOT NULL,
        genome_version TEXT NOT NULL,
        UNIQUE (chromosome, position, reference_allele, genome_version)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS variants (
        id BIGSERIAL PRIMARY KEY,
        variant_location_id BIGINT NOT NULL REFERENCES variant_locations (id),
        rs_id TEXT,
        alternate_allele TEXT NOT NULL,
        UNIQUE (variant_location_id, alternate_allele)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS collections (
        id BIGSERIAL PRIMARY KEY,
        name TEXT,
        sample_count BIGINT NOT NULL CHECK (sample_count >= 0)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS variant_frequencies (
        id BIGSERIAL PRIMARY KEY,
        variant_id BIGINT NOT NULL REFERENCES variants (id),
        collection_id BIGINT NOT NULL REFERENCES collections (id),
        alternate_allele_count BIGINT NOT NULL CHECK (alternate_allele_count >= 0),
        allele_number BIGINT NOT NULL CHECK (allele_number >= alternate_allele_count),
        hom_ref_count BIGINT NOT NULL CHECK (hom_ref_count >= 0),
        het_count BIGINT NOT NULL CHECK (het_count >= 0),
        hom_alt_count BIGINT NOT NULL CHECK (hom_alt_count >= 0),
        missing_count BIGINT NOT NULL CHECK (missing_count >= 0),
        UNIQUE (variant_id, collection_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS genes (
        id BIGSERIAL PRIMARY KEY,
        symbol TEXT NOT NULL UNIQUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS gene_locations (
        id BIGSERIAL PRIMARY KEY,
        gene_id BIGINT NOT NULL REFERENCES genes (id),
        variant_location_id BIGINT NOT NULL REFERENCES variant_locations (id),
        UNIQUE (gene_id, variant_location_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ingest_receipts (
        file_digest TEXT NOT NULL,
        file_name TEXT NOT NULL,
        collection_id BIGINT NOT NULL REFERENCES collections (id),
        records BIGINT NOT NULL,
        malformed_records BIGINT NOT NULL,
        run_id UUID NOT NULL,
        ingested_at TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (file_digest, collection_id)
    )
    "#,
];

const RECEIPT_COLUMNS: &str =
    "file_digest, file_name, collection_id, records, malformed_records, run_id, ingested_at";

/// Map a sqlx error onto the store taxonomy
fn classify(err: sqlx::Error, key: impl FnOnce() -> String) -> StoreError {
    use sqlx::error::ErrorKind;

    match &err {
        sqlx::Error::Database(db) => match db.kind() {
            ErrorKind::UniqueViolation
            | ErrorKind::ForeignKeyViolation
            | ErrorKind::NotNullViolation
            | ErrorKind::CheckViolation => StoreError::Integrity {
                key: key(),
                message: db.message().to_string(),
            },
            _ => StoreError::Query(err.to_string()),
        },
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::Connection(err.to_string()),
        _ => StoreError::Query(err.to_string()),
    }
}

fn query_error(err: sqlx::Error) -> StoreError {
    classify(err, || "statement".to_string())
}

/// Pooled PostgreSQL database
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(options: PgConnectOptions, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        info!("Connected to PostgreSQL (pool size {})", max_connections.max(1));
        Ok(Self { pool })
    }
}

#[async_trait]
impl Store for PgStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn create_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(query_error)?;
        }
        info!("PostgreSQL schema ready ({} tables)", SCHEMA.len());
        Ok(())
    }

    async fn create_indexes(&self) -> Result<(), StoreError> {
        for statement in INDEX_STATEMENTS {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(query_error)?;
        }
        info!("PostgreSQL indexes ready ({} indexes)", INDEX_STATEMENTS.len());
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn Session>, StoreError> {
        let tx = self.pool.begin().await.map_err(query_error)?;
        Ok(Box::new(PgSession { tx }))
    }

    async fn row_counts(&self) -> Result<TableCounts, StoreError> {
        let mut counts = [0u64; 7];
        for (count, table) in counts.iter_mut().zip(TABLES) {
            let sql = format!("SELECT COUNT(*) FROM {}", table);
            let rows: i64 = sqlx::query_scalar(&sql)
                .fetch_one(&self.pool)
                .await
                .map_err(query_error)?;
            *count = from_db(rows);
        }
        Ok(TableCounts::from_counts(counts))
    }
}

/// One pooled transaction; sqlx rolls it back when dropped uncommitted
pub struct PgSession {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl Session for PgSession {
    async fn resolve_location(&mut self, key: &LocationKey) -> Result<LocationId, StoreError> {
        sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO variant_locations (chromosome, position, reference_allele, genome_version)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (chromosome, position, reference_allele, genome_version)
            DO UPDATE SET chromosome = EXCLUDED.chromosome
            RETURNING id
            "#,
        )
        .bind(&key.chromosome)
        .bind(to_db(key.position)?)
        .bind(&key.reference_allele)
        .bind(&key.genome_version)
        .fetch_one(&mut *self.tx)
        .await
        .map(LocationId)
        .map_err(|e| classify(e, || key.to_string()))
    }

    async fn resolve_variant(
        &mut self,
        key: &VariantKey,
        rs_id: Option<&str>,
    ) -> Result<VariantId, StoreError> {
        sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO variants (variant_location_id, rs_id, alternate_allele)
            VALUES ($1, $2, $3)
            ON CONFLICT (variant_location_id, alternate_allele)
            DO UPDATE SET alternate_allele = EXCLUDED.alternate_allele
            RETURNING id
            "#,
        )
        .bind(key.location_id.get())
        .bind(rs_id)
        .bind(&key.alternate_allele)
        .fetch_one(&mut *self.tx)
        .await
        .map(VariantId)
        .map_err(|e| classify(e, || key.to_string()))
    }

    async fn create_collection(
        &mut self,
        name: Option<&str>,
        sample_count: u64,
    ) -> Result<Collection, StoreError> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO collections (name, sample_count) VALUES ($1, $2) RETURNING id",
        )
        .bind(name)
        .bind(to_db(sample_count)?)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| classify(e, || format!("collection {:?}", name)))?;

        Ok(Collection {
            id: CollectionId(id),
            name: name.map(str::to_string),
            sample_count,
        })
    }

    async fn collection(&mut self, id: CollectionId) -> Result<Option<Collection>, StoreError> {
        let row: Option<(i64, Option<String>, i64)> =
            sqlx::query_as("SELECT id, name, sample_count FROM collections WHERE id = $1")
                .bind(id.get())
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(query_error)?;

        Ok(row.map(|(id, name, sample_count)| Collection {
            id: CollectionId(id),
            name,
            sample_count: from_db(sample_count),
        }))
    }

    async fn merge_frequency(
        &mut self,
        variant: VariantId,
        collection: CollectionId,
        tally: &GenotypeTally,
    ) -> Result<(), StoreError> {
        let [ac, an, hom_ref, het, hom_alt, missing] = tally_columns(tally)?;
        sqlx::query(
            r#"
            INSERT INTO variant_frequencies (
                variant_id, collection_id, alternate_allele_count, allele_number,
                hom_ref_count, het_count, hom_alt_count, missing_count
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (variant_id, collection_id) DO UPDATE SET
                alternate_allele_count = variant_frequencies.alternate_allele_count + EXCLUDED.alternate_allele_count,
                allele_number = variant_frequencies.allele_number + EXCLUDED.allele_number,
                hom_ref_count = variant_frequencies.hom_ref_count + EXCLUDED.hom_ref_count,
                het_count = variant_frequencies.het_count + EXCLUDED.het_count,
                hom_alt_count = variant_frequencies.hom_alt_count + EXCLUDED.hom_alt_count,
                missing_count = variant_frequencies.missing_count + EXCLUDED.missing_count
            "#,
        )
        .bind(variant.get())
        .bind(collection.get())
        .bind(ac)
        .bind(an)
        .bind(hom_ref)
        .bind(het)
        .bind(hom_alt)
        .bind(missing)
        .execute(&mut *self.tx)
        .await
        .map(|_| ())
        .map_err(|e| classify(e, || format!("frequency of variant {} in collection {}", variant, collection)))
    }

    async fn frequency(
        &mut self,
        variant: VariantId,
        collection: CollectionId,
    ) -> Result<Option<GenotypeTally>, StoreError> {
        let row: Option<(i64, i64, i64, i64, i64, i64)> = sqlx::query_as(
            r#"
            SELECT alternate_allele_count, allele_number, hom_ref_count, het_count, hom_alt_count, missing_count
            FROM variant_frequencies
            WHERE variant_id = $1 AND collection_id = $2
            "#,
        )
        .bind(variant.get())
        .bind(collection.get())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(query_error)?;

        Ok(row.map(|(ac, an, hom_ref, het, hom_alt, missing)| {
            tally_from_columns([ac, an, hom_ref, het, hom_alt, missing])
        }))
    }

    async fn resolve_gene(&mut self, symbol: &str) -> Result<GeneId, StoreError> {
        sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO genes (symbol) VALUES ($1)
            ON CONFLICT (symbol) DO UPDATE SET symbol = EXCLUDED.symbol
            RETURNING id
            "#,
        )
        .bind(symbol)
        .fetch_one(&mut *self.tx)
        .await
        .map(GeneId)
        .map_err(|e| classify(e, || format!("gene {}", symbol)))
    }

    async fn link_gene_location(&mut self, gene: GeneId, location: LocationId) -> Result<bool, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO gene_locations (gene_id, variant_location_id) VALUES ($1, $2)
            ON CONFLICT (gene_id, variant_location_id) DO NOTHING
            "#,
        )
        .bind(gene.get())
        .bind(location.get())
        .execute(&mut *self.tx)
        .await
        .map(|result| result.rows_affected() > 0)
        .map_err(|e| classify(e, || format!("gene {} at location {}", gene, location)))
    }

    async fn locations_in_span(
        &mut self,
        span: &GeneSpan,
        genome_version: &str,
    ) -> Result<Vec<LocationId>, StoreError> {
        let [name, alias] = chromosome_aliases(&span.chromosome);
        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM variant_locations
            WHERE chromosome IN ($1, $2) AND genome_version = $3
              AND position BETWEEN $4 AND $5
            ORDER BY id
            "#,
        )
        .bind(name)
        .bind(alias)
        .bind(genome_version)
        .bind(to_db(span.start)?)
        .bind(to_db(span.end)?)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(query_error)?;

        Ok(ids.into_iter().map(LocationId).collect())
    }

    async fn receipt(
        &mut self,
        digest: &str,
        collection: Option<CollectionId>,
    ) -> Result<Option<Receipt>, StoreError> {
        let sql = format!(
            "SELECT {} FROM ingest_receipts
             WHERE file_digest = $1 AND ($2::BIGINT IS NULL OR collection_id = $2)
             ORDER BY ingested_at
             LIMIT 1",
            RECEIPT_COLUMNS
        );
        let row: Option<(String, String, i64, i64, i64, Uuid, DateTime<Utc>)> = sqlx::query_as(&sql)
            .bind(digest)
            .bind(collection.map(|id| id.get()))
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(query_error)?;

        Ok(row.map(
            |(digest, file_name, collection_id, records, malformed_records, run_id, ingested_at)| Receipt {
                digest,
                file_name,
                collection_id: CollectionId(collection_id),
                records: from_db(records),
                malformed_records: from_db(malformed_records),
                run_id,
                ingested_at,
            },
        ))
    }

    async fn record_receipt(&mut self, receipt: &Receipt, replace: bool) -> Result<(), StoreError> {
        let conflict = if replace {
            r#"
            ON CONFLICT (file_digest, collection_id) DO UPDATE SET
                file_name = EXCLUDED.file_name,
                records = EXCLUDED.records,
                malformed_records = EXCLUDED.malformed_records,
                run_id = EXCLUDED.run_id,
                ingested_at = EXCLUDED.ingested_at
            "#
        } else {
            ""
        };
        let sql = format!(
            "INSERT INTO ingest_receipts ({}) VALUES ($1, $2, $3, $4, $5, $6, $7) {}",
            RECEIPT_COLUMNS, conflict
        );

        sqlx::query(&sql)
            .bind(&receipt.digest)
            .bind(&receipt.file_name)
            .bind(receipt.collection_id.get())
            .bind(to_db(receipt.records)?)
            .bind(to_db(receipt.malformed_records)?)
            .bind(receipt.run_id)
            .bind(receipt.ingested_at)
            .execute(&mut *self.tx)
            .await
            .map(|_| ())
            .map_err(|e| classify(e, || format!("receipt for {} ({})", receipt.file_name, receipt.digest)))
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let session = *self;
        session.tx.commit().await.map_err(query_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_classify_connection_errors() {
        assert!(classify(sqlx::Error::PoolTimedOut, String::new).is_connection());
        assert!(classify(sqlx::Error::PoolClosed, String::new).is_connection());

        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        assert!(classify(sqlx::Error::Io(io), String::new).is_connection());
    }

    #[test]
    fn test_classify_query_errors() {
        assert!(matches!(
            query_error(sqlx::Error::RowNotFound),
            StoreError::Query(_)
        ));
        assert!(matches!(
            query_error(sqlx::Error::ColumnNotFound("id".to_string())),
            StoreError::Query(_)
        ));
    }

    /// Runs against a live server only when VARMT_TEST_DATABASE_URL is set
    #[tokio::test]
    async fn test_live_round_trip() {
        let Ok(url) = std::env::var("VARMT_TEST_DATABASE_URL") else {
            return;
        };
        let options = PgConnectOptions::from_str(&url).unwrap();
        let store = PgStore::connect(options, 2).await.unwrap();
        store.create_schema().await.unwrap();
        store.create_indexes().await.unwrap();

        let key = LocationKey {
            chromosome: "chrTest".to_string(),
            position: 1000,
            reference_allele: "A".to_string(),
            genome_version: format!("test-{}", Uuid::new_v4()),
        };

        let mut session = store.begin().await.unwrap();
        let location = session.resolve_location(&key).await.unwrap();
        assert_eq!(session.resolve_location(&key).await.unwrap(), location);

        let variant = session
            .resolve_variant(
                &VariantKey {
                    location_id: location,
                    alternate_allele: "G".to_string(),
                },
                Some("rs1"),
            )
            .await
            .unwrap();
        let collection = session.create_collection(None, 3).await.unwrap();

        let tally = GenotypeTally {
            alternate_allele_count: 3,
            allele_number: 6,
            hom_ref: 1,
            het: 1,
            hom_alt: 1,
            missing: 0,
        };
        session.merge_frequency(variant, collection.id, &tally).await.unwrap();
        session.merge_frequency(variant, collection.id, &tally).await.unwrap();
        assert_eq!(
            session.frequency(variant, collection.id).await.unwrap(),
            Some(tally + tally)
        );

        // Leave the shared database untouched
        drop(session);
        let mut session = store.begin().await.unwrap();
        assert!(session.collection(collection.id).await.unwrap().is_none());
    }
}
