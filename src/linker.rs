// ==============================================================================
// linker.rs - Gene-Position Linker
// ==============================================================================
// Description: Links gene symbols to the stored variant locations their
//              genomic spans cover
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::models::GeneSpan;
use crate::store::{Session, StoreError};

/// Outcome of one linking pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkReport {
    /// Spans read
    pub spans: u64,

    /// Distinct gene symbols among accepted spans
    pub genes: u64,

    /// Spans with start > end
    pub rejected_spans: u64,

    pub links_created: u64,
    pub links_existing: u64,
}

/// Link every span's gene to the locations of `genome_version` it covers
///
/// Links are inserted if absent, so running this again over the same spans
/// changes nothing. The caller commits the session.
pub async fn link_genes<I>(
    session: &mut dyn Session,
    spans: I,
    genome_version: &str,
) -> Result<LinkReport, StoreError>
where
    I: IntoIterator<Item = GeneSpan>,
    I::IntoIter: Send,
{
    let mut report = LinkReport::default();
    let mut symbols = HashSet::new();

    for span in spans {
        report.spans += 1;

        if span.start > span.end {
            warn!(
                "Rejecting span for {}: start {} > end {}",
                span.symbol, span.start, span.end
            );
            report.rejected_spans += 1;
            continue;
        }

        let gene = session.resolve_gene(&span.symbol).await?;
        if symbols.insert(span.symbol.clone()) {
            report.genes += 1;
        }

        let locations = session.locations_in_span(&span, genome_version).await?;
        debug!(
            "{} ({}:{}-{}) covers {} locations",
            span.symbol,
            span.chromosome,
            span.start,
            span.end,
            locations.len()
        );

        for location in locations {
            if session.link_gene_location(gene, location).await? {
                report.links_created += 1;
            } else {
                report.links_existing += 1;
            }
        }
    }

    info!(
        "Linked {} genes: {} new links, {} existing, {} spans rejected",
        report.genes, report.links_created, report.links_existing, report.rejected_spans
    );

    Ok(report)
}
