// ==============================================================================
// pipeline.rs - VCF Ingestion Pipeline
// ==============================================================================
// Description: Streams VCF files into per-collection variant frequencies, one
//              transaction per file, several files at once
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================
// Per file:
//   1. SHA-256 digest; skip when the target collection (or, with none given,
//      any collection) already has a receipt for it, unless forced
//   2. New collection sized from the header, or append to an existing one
//   3. For each record and each ALT allele:
//        location -> variant -> tally -> additive merge
//   4. Receipt, then commit
// Any error before the commit rolls the whole file back.
// ==============================================================================

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::ledger::{file_digest, Receipt};
use crate::models::{CollectionId, DEFAULT_GENOME_VERSION};
use crate::parsers::{discover_inputs, VCFParseError, VCFReader};
use crate::resolver::IdentityResolver;
use crate::store::{Store, StoreError};

/// Records between progress log lines
pub const PROGRESS_INTERVAL: u64 = 10_000;

/// How a run ingests its files
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Attached to every location of the run
    pub genome_version: String,

    /// Append to this collection instead of creating one per file
    pub collection: Option<CollectionId>,

    /// Files processed at once
    pub jobs: usize,

    /// Re-ingest files that already have a receipt
    pub force: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            genome_version: DEFAULT_GENOME_VERSION.to_string(),
            collection: None,
            jobs: 1,
            force: false,
        }
    }
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("VCF error: {0}")]
    Parse(#[from] VCFParseError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Collection {collection} holds {expected} samples but the file has {found}")]
    SampleCountMismatch {
        collection: CollectionId,
        expected: u64,
        found: u64,
    },

    #[error("Collection {0} does not exist")]
    UnknownCollection(CollectionId),

    #[error("Failed to digest {}: {source}", .path.display())]
    Digest {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to list VCF files in {}: {source}", .path.display())]
    Discovery {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("No VCF files found in {}", .0.display())]
    NoInputs(PathBuf),

    #[error("Run aborted, database connection lost: {0}")]
    Connection(String),
}

impl IngestError {
    /// Errors that stop the remaining files of a run
    pub fn is_fatal_to_run(&self) -> bool {
        match self {
            IngestError::Store(e) => e.is_connection(),
            IngestError::Connection(_) => true,
            _ => false,
        }
    }
}

/// Outcome of one input file
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileStatus {
    Ingested {
        collection_id: CollectionId,
        records: u64,
        variants: u64,
        malformed_records: u64,
    },
    AlreadyIngested {
        collection_id: CollectionId,
        ingested_at: DateTime<Utc>,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileReport {
    pub path: PathBuf,
    pub digest: Option<String>,
    #[serde(flatten)]
    pub status: FileStatus,
}

/// Everything a run did, written as JSON by `--report`
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub genome_version: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub files: Vec<FileReport>,
}

impl RunSummary {
    pub fn succeeded(&self) -> bool {
        self.failed_files().next().is_none()
    }

    pub fn failed_files(&self) -> impl Iterator<Item = &FileReport> + '_ {
        self.files
            .iter()
            .filter(|report| matches!(report.status, FileStatus::Failed { .. }))
    }

    pub fn ingested_files(&self) -> usize {
        self.files
            .iter()
            .filter(|report| matches!(report.status, FileStatus::Ingested { .. }))
            .count()
    }
}

/// Drives VCF files into a store
pub struct Ingestor {
    store: Arc<dyn Store>,
    options: IngestOptions,
    run_id: Uuid,
}

impl Ingestor {
    pub fn new(store: Arc<dyn Store>, options: IngestOptions) -> Self {
        Self {
            store,
            options,
            run_id: Uuid::new_v4(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Ingest a VCF file or every VCF file of a directory
    ///
    /// A failing file is reported and its siblings continue; a lost database
    /// connection stops the run and rolls back every file still in flight.
    pub async fn run(&self, input: &Path) -> Result<RunSummary, IngestError> {
        let started_at = Utc::now();
        let files = discover_inputs(input).map_err(|source| IngestError::Discovery {
            path: input.to_path_buf(),
            source,
        })?;
        if files.is_empty() {
            return Err(IngestError::NoInputs(input.to_path_buf()));
        }

        info!(
            "Run {}: {} file(s) into {} ({}), {} at a time",
            self.run_id,
            files.len(),
            self.store.backend(),
            self.options.genome_version,
            self.options.jobs.max(1)
        );

        let mut tasks = stream::iter(files.into_iter().map(|path| async move {
            let (digest, outcome) = match digest_of(&path) {
                Ok(digest) => (Some(digest.clone()), self.ingest_digested(&path, digest).await),
                Err(e) => (None, Err(e)),
            };
            (path, digest, outcome)
        }))
        .buffer_unordered(self.options.jobs.max(1));

        let mut reports = Vec::new();
        let mut aborted = None;
        while let Some((path, digest, outcome)) = tasks.next().await {
            match outcome {
                Ok(report) => reports.push(report),
                Err(e) if e.is_fatal_to_run() => {
                    error!("Aborting run at {:?}: {}", path, e);
                    aborted = Some(e);
                    break;
                }
                Err(e) => {
                    error!("Failed to ingest {:?}: {}", path, e);
                    reports.push(FileReport {
                        path,
                        digest,
                        status: FileStatus::Failed { error: e.to_string() },
                    });
                }
            }
        }
        // Dropping the stream rolls back the sessions still open
        drop(tasks);

        if let Some(e) = aborted {
            return Err(match e {
                IngestError::Store(StoreError::Connection(message)) => IngestError::Connection(message),
                other => other,
            });
        }

        reports.sort_by(|a, b| a.path.cmp(&b.path));
        let summary = RunSummary {
            run_id: self.run_id,
            genome_version: self.options.genome_version.clone(),
            started_at,
            finished_at: Utc::now(),
            files: reports,
        };

        info!(
            "Run {} finished: {} ingested, {} failed, {} total",
            self.run_id,
            summary.ingested_files(),
            summary.failed_files().count(),
            summary.files.len()
        );
        Ok(summary)
    }

    /// Ingest one file inside one transaction
    pub async fn ingest_file(&self, path: &Path) -> Result<FileReport, IngestError> {
        let digest = digest_of(path)?;
        self.ingest_digested(path, digest).await
    }

    async fn ingest_digested(&self, path: &Path, digest: String) -> Result<FileReport, IngestError> {
        let span = info_span!(
            "ingest",
            file = %path.file_name().unwrap_or_default().to_string_lossy(),
            run_id = %self.run_id
        );
        self.ingest_in_session(path, digest).instrument(span).await
    }

    async fn ingest_in_session(&self, path: &Path, digest: String) -> Result<FileReport, IngestError> {
        let reader = VCFReader::open(path)?;
        let sample_count = reader.sample_count() as u64;
        debug!("{} samples, digest {}", sample_count, digest);

        let mut session = self.store.begin().await?;

        // Receipts are per collection; without one any earlier receipt counts
        if let Some(existing) = session.receipt(&digest, self.options.collection).await? {
            if !self.options.force {
                info!(
                    "Already ingested into collection {} at {}, skipping",
                    existing.collection_id, existing.ingested_at
                );
                return Ok(FileReport {
                    path: path.to_path_buf(),
                    digest: Some(digest),
                    status: FileStatus::AlreadyIngested {
                        collection_id: existing.collection_id,
                        ingested_at: existing.ingested_at,
                    },
                });
            }
            if self.options.collection.is_some() {
                warn!(
                    "Forcing re-ingest into collection {}; its counts will be added again",
                    existing.collection_id
                );
            } else {
                warn!(
                    "Forcing re-ingest of a file already merged into collection {}; it gets a new collection",
                    existing.collection_id
                );
            }
        }

        let collection = match self.options.collection {
            Some(id) => {
                let collection = session
                    .collection(id)
                    .await?
                    .ok_or(IngestError::UnknownCollection(id))?;
                if collection.sample_count != sample_count {
                    return Err(IngestError::SampleCountMismatch {
                        collection: id,
                        expected: collection.sample_count,
                        found: sample_count,
                    });
                }
                collection
            }
            None => {
                session
                    .create_collection(Some(&collection_name(path)), sample_count)
                    .await?
            }
        };
        info!("Ingesting into collection {} ({} samples)", collection.id, sample_count);

        let mut resolver = IdentityResolver::new(self.options.genome_version.as_str());
        let mut records = 0u64;
        let mut variants = 0u64;
        let mut malformed_records = 0u64;

        for result in reader {
            let record = match result {
                Ok(record) => record,
                Err(e) if e.is_recoverable() => {
                    warn!("Skipping record: {}", e);
                    malformed_records += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            records += 1;

            if !record.alternate_alleles.is_empty() {
                let location = resolver.resolve_location(session.as_mut(), &record).await?;
                for (target, allele) in record.alternates() {
                    let variant = resolver
                        .resolve_variant(session.as_mut(), location, allele, record.rs_id.as_deref())
                        .await?;
                    let tally = record.tally(target);
                    debug_assert!(tally.is_consistent_with(sample_count));
                    session.merge_frequency(variant, collection.id, &tally).await?;
                    variants += 1;
                }
            }

            if records % PROGRESS_INTERVAL == 0 {
                info!("{} records, {} variants merged", records, variants);
            }
        }

        let receipt = Receipt {
            digest: digest.clone(),
            file_name: path
                .file_name()
                .unwrap_or_default()
                .to_string_lossy()
                .into_owned(),
            collection_id: collection.id,
            records,
            malformed_records,
            run_id: self.run_id,
            ingested_at: Utc::now(),
        };
        session.record_receipt(&receipt, self.options.force).await?;
        session.commit().await?;

        info!(
            "Committed {} records ({} variants, {} malformed, {} cache hits) into collection {}",
            records,
            variants,
            malformed_records,
            resolver.hits(),
            collection.id
        );

        Ok(FileReport {
            path: path.to_path_buf(),
            digest: Some(digest),
            status: FileStatus::Ingested {
                collection_id: collection.id,
                records,
                variants,
                malformed_records,
            },
        })
    }
}

fn digest_of(path: &Path) -> Result<String, IngestError> {
    file_digest(path).map_err(|source| IngestError::Digest {
        path: path.to_path_buf(),
        source,
    })
}

/// Default collection name: the file name without its VCF extension
fn collection_name(path: &Path) -> String {
    let name = path.file_name().unwrap_or_default().to_string_lossy();
    name.strip_suffix(".vcf.gz")
        .or_else(|| name.strip_suffix(".vcf"))
        .unwrap_or(&name)
        .to_string()
}
