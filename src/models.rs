// ==============================================================================
// models.rs - Variant Frequency Data Models
// ==============================================================================
// Description: Identities and natural keys of the variant-frequency schema
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;

/// Genome assembly attached to every location when none is given
pub const DEFAULT_GENOME_VERSION: &str = "GRCh38";

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

row_id!(
    /// Row id in `variant_locations`
    LocationId
);
row_id!(
    /// Row id in `variants`
    VariantId
);
row_id!(
    /// Row id in `collections`
    CollectionId
);
row_id!(
    /// Row id in `genes`
    GeneId
);

/// Natural key of a genomic location
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocationKey {
    /// Chromosome name exactly as written in the VCF (e.g., "chr1" or "1")
    pub chromosome: String,

    /// 1-based position of the first reference base
    pub position: u64,

    /// Reference allele (e.g., "A")
    pub reference_allele: String,

    /// Genome assembly (e.g., "GRCh38")
    pub genome_version: String,
}

impl fmt::Display for LocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{} ({})",
            self.chromosome, self.position, self.reference_allele, self.genome_version
        )
    }
}

/// Natural key of a variant: one alternate allele at one location
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VariantKey {
    pub location_id: LocationId,
    pub alternate_allele: String,
}

impl fmt::Display for VariantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "location {} alt {}", self.location_id, self.alternate_allele)
    }
}

/// A batch of samples, created once per input file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub id: CollectionId,
    pub name: Option<String>,
    pub sample_count: u64,
}

/// Genomic span of a gene, inclusive of both endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneSpan {
    #[serde(alias = "gene", alias = "symbol", alias = "Gene name")]
    pub symbol: String,

    #[serde(alias = "chrom", alias = "Chromosome/scaffold name")]
    pub chromosome: String,

    #[serde(alias = "Gene start (bp)")]
    pub start: u64,

    #[serde(alias = "Gene end (bp)")]
    pub end: u64,
}

/// Both spellings of a chromosome name ("chr1" and "1")
///
/// Gene tables and VCF files disagree on the `chr` prefix, so span lookups try both.
pub fn chromosome_aliases(chromosome: &str) -> [String; 2] {
    match chromosome.strip_prefix("chr") {
        Some(bare) => [chromosome.to_string(), bare.to_string()],
        None => [chromosome.to_string(), format!("chr{}", chromosome)],
    }
}
