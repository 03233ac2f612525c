// ==============================================================================
// parsers/gene_spans.rs - Gene Span Table Parser
// ==============================================================================
// Description: Loads gene symbol → genomic span tables for location linking
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================
// Format: tab-separated (or comma-separated for *.csv) with header
// Example:
//   gene	chromosome	start	end
//   BRCA2	13	32315086	32400268
//   TP53	17	7661779	7687538
// Ensembl BioMart column names ("Gene name", "Chromosome/scaffold name",
// "Gene start (bp)", "Gene end (bp)") are accepted as well.
// ==============================================================================

use csv::{ReaderBuilder, Trim};
use std::io::Read;
use std::path::Path;
use thiserror::Error;

use crate::models::GeneSpan;

/// Errors that can occur while loading a gene span table
#[derive(Error, Debug)]
pub enum GeneSpanError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Gene span table error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Gene span table is empty")]
    EmptyFile,
}

/// Read a gene span table from a file
pub fn read_gene_spans(path: impl AsRef<Path>) -> Result<Vec<GeneSpan>, GeneSpanError> {
    let path = path.as_ref();
    let delimiter = if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("csv")) {
        b','
    } else {
        b'\t'
    };

    let file = std::fs::File::open(path)?;
    parse_gene_spans(file, delimiter)
}

/// Parse a gene span table from any reader
pub fn parse_gene_spans<R: Read>(source: R, delimiter: u8) -> Result<Vec<GeneSpan>, GeneSpanError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .delimiter(delimiter)
        .trim(Trim::All)
        .from_reader(source);

    let mut spans = Vec::new();
    for result in reader.deserialize() {
        let span: GeneSpan = result?;
        spans.push(span);
    }

    if spans.is_empty() {
        return Err(GeneSpanError::EmptyFile);
    }

    Ok(spans)
}
