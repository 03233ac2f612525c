// ==============================================================================
// parsers/mod.rs - File parser modules
// ==============================================================================
// Description: Parsers for VCF inputs and auxiliary gene span tables
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

pub mod vcf;
pub mod gene_spans;

pub use vcf::{discover_inputs, VCFParseError, VCFReader, VCFRecord};
pub use gene_spans::{parse_gene_spans, read_gene_spans, GeneSpanError};
