// ==============================================================================
// main.rs - vcf2db Entry Point
// ==============================================================================
// Description: Creates the schema, ingests VCF files, links genes and builds
//              indexes, in that order
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use varmt_db::config::Args;
use varmt_db::linker::link_genes;
use varmt_db::parsers::read_gene_spans;
use varmt_db::pipeline::Ingestor;
use varmt_db::store;

#[tokio::main]
async fn main() -> Result<()> {
    // .env must be loaded before clap reads DATABASE_URL
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "varmt_db=info,vcf2db=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse command line arguments
    let args = Args::parse();
    args.validate()?;
    let target = args.database_target()?;

    info!("vcf2db starting against {}", target);

    let store = store::connect(&target, args.max_connections)
        .await
        .with_context(|| format!("Failed to open database {}", target))?;

    if args.tables {
        store.create_schema().await.context("Failed to create tables")?;
    }

    let mut failed_files = 0;
    if let (true, Some(vcf)) = (args.insert, args.vcf.as_deref()) {
        let ingestor = Ingestor::new(store.clone(), args.ingest_options());
        let summary = ingestor
            .run(vcf)
            .await
            .with_context(|| format!("Ingestion of {:?} aborted", vcf))?;

        for report in summary.failed_files() {
            error!("{:?} was not ingested: {:?}", report.path, report.status);
        }
        failed_files = summary.failed_files().count();

        if let Some(path) = &args.report {
            let json = serde_json::to_string_pretty(&summary)?;
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write run report {:?}", path))?;
            info!("Run report written to {:?}", path);
        }
    }

    if let Some(genes) = &args.genes {
        let spans = read_gene_spans(genes)
            .with_context(|| format!("Failed to read gene spans from {:?}", genes))?;
        info!("Loaded {} gene spans from {:?}", spans.len(), genes);

        let mut session = store.begin().await?;
        link_genes(session.as_mut(), spans, &args.genome_version)
            .await
            .context("Gene linking failed")?;
        session.commit().await?;
    }

    if args.indexes {
        store.create_indexes().await.context("Failed to create indexes")?;
    }

    match store.row_counts().await {
        Ok(counts) => info!("Row counts: {}", serde_json::to_string(&counts)?),
        Err(e) => warn!("Could not count rows: {}", e),
    }

    if failed_files > 0 {
        anyhow::bail!("{} file(s) failed to ingest", failed_files);
    }

    info!("vcf2db finished");
    Ok(())
}
