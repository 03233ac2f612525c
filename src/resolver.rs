// ==============================================================================
// resolver.rs - Location and Variant Identity Resolution
// ==============================================================================
// Description: Maps VCF records to stable location/variant ids through
//              find-or-create upserts, with a bounded per-session cache
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

use std::collections::HashMap;
use tracing::debug;

use crate::models::{LocationId, LocationKey, VariantId, VariantKey};
use crate::parsers::VCFRecord;
use crate::store::{Session, StoreError};

/// Cached keys per map before the cache is dropped and refilled
pub const CACHE_LIMIT: usize = 100_000;

/// Resolves natural keys to row ids for one session
///
/// Ids created by an uncommitted session vanish on rollback, so a resolver
/// must not outlive the session it was used with.
pub struct IdentityResolver {
    genome_version: String,
    locations: HashMap<LocationKey, LocationId>,
    variants: HashMap<VariantKey, VariantId>,
    hits: u64,
}

impl IdentityResolver {
    pub fn new(genome_version: impl Into<String>) -> Self {
        Self {
            genome_version: genome_version.into(),
            locations: HashMap::new(),
            variants: HashMap::new(),
            hits: 0,
        }
    }

    /// Cache hits so far
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Id of the record's (chromosome, position, reference, genome version)
    pub async fn resolve_location(
        &mut self,
        session: &mut dyn Session,
        record: &VCFRecord,
    ) -> Result<LocationId, StoreError> {
        let key = record.location_key(&self.genome_version);
        if let Some(id) = self.locations.get(&key) {
            self.hits += 1;
            return Ok(*id);
        }

        let id = session.resolve_location(&key).await?;
        if self.locations.len() >= CACHE_LIMIT {
            debug!("Location cache full, clearing {} entries", self.locations.len());
            self.locations.clear();
        }
        self.locations.insert(key, id);
        Ok(id)
    }

    /// Id of one ALT allele at a resolved location
    pub async fn resolve_variant(
        &mut self,
        session: &mut dyn Session,
        location_id: LocationId,
        alternate_allele: &str,
        rs_id: Option<&str>,
    ) -> Result<VariantId, StoreError> {
        let key = VariantKey {
            location_id,
            alternate_allele: alternate_allele.to_string(),
        };
        if let Some(id) = self.variants.get(&key) {
            self.hits += 1;
            return Ok(*id);
        }

        let id = session.resolve_variant(&key, rs_id).await?;
        if self.variants.len() >= CACHE_LIMIT {
            debug!("Variant cache full, clearing {} entries", self.variants.len());
            self.variants.clear();
        }
        self.variants.insert(key, id);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{SqliteStore, Store};

    fn record(chromosome: &str, position: u64, reference: &str, alternates: &[&str]) -> VCFRecord {
        VCFRecord {
            line: 1,
            chromosome: chromosome.to_string(),
            position,
            rs_id: Some("rs1".to_string()),
            reference_allele: reference.to_string(),
            alternate_alleles: alternates.iter().map(|a| a.to_string()).collect(),
            calls: Vec::new(),
        }
    }

    async fn memory_store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create_schema().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_same_key_same_id() {
        let store = memory_store().await;
        let mut session = store.begin().await.unwrap();
        let mut resolver = IdentityResolver::new("GRCh38");

        let site = record("chr1", 1000, "A", &["G"]);
        let first = resolver.resolve_location(session.as_mut(), &site).await.unwrap();
        let again = resolver.resolve_location(session.as_mut(), &site).await.unwrap();
        assert_eq!(first, again);
        assert_eq!(resolver.hits(), 1);

        let other_ref = record("chr1", 1000, "AT", &["G"]);
        assert_ne!(resolver.resolve_location(session.as_mut(), &other_ref).await.unwrap(), first);

        let g = resolver.resolve_variant(session.as_mut(), first, "G", Some("rs1")).await.unwrap();
        let t = resolver.resolve_variant(session.as_mut(), first, "T", None).await.unwrap();
        assert_ne!(g, t);
        assert_eq!(resolver.resolve_variant(session.as_mut(), first, "G", None).await.unwrap(), g);
    }

    #[tokio::test]
    async fn test_fresh_resolver_converges_on_committed_ids() {
        let store = memory_store().await;
        let site = record("chr2", 500, "C", &["A", "T"]);

        let mut session = store.begin().await.unwrap();
        let mut resolver = IdentityResolver::new("GRCh38");
        let location = resolver.resolve_location(session.as_mut(), &site).await.unwrap();
        let variant = resolver.resolve_variant(session.as_mut(), location, "T", None).await.unwrap();
        session.commit().await.unwrap();

        let mut session = store.begin().await.unwrap();
        let mut resolver = IdentityResolver::new("GRCh38");
        assert_eq!(resolver.resolve_location(session.as_mut(), &site).await.unwrap(), location);
        assert_eq!(
            resolver.resolve_variant(session.as_mut(), location, "T", None).await.unwrap(),
            variant
        );
        assert_eq!(resolver.hits(), 0);
    }

    #[tokio::test]
    async fn test_genome_version_is_part_of_identity() {
        let store = memory_store().await;
        let mut session = store.begin().await.unwrap();
        let site = record("chr1", 1000, "A", &["G"]);

        let mut grch38 = IdentityResolver::new("GRCh38");
        let mut grch37 = IdentityResolver::new("GRCh37");

        let a = grch38.resolve_location(session.as_mut(), &site).await.unwrap();
        let b = grch37.resolve_location(session.as_mut(), &site).await.unwrap();
        assert_ne!(a, b);
    }
}
