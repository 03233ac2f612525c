// ==============================================================================
// config.rs - Command Line and Connection Configuration
// ==============================================================================
// Description: vcf2db arguments, validation and database target resolution
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================
// Connection precedence:
//   1. --database-url / DATABASE_URL
//   2. DATABASE_URL_FILE (file holding the URL)
//   3. --host --port --database --username with --password or --password-file
// `sqlite:<path>` URLs select the embedded backend.
// ==============================================================================

use clap::Parser;
use sqlx::postgres::PgConnectOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

use crate::models::{CollectionId, DEFAULT_GENOME_VERSION};
use crate::pipeline::IngestOptions;
use crate::store::DatabaseTarget;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Nothing to do: pass at least one of --tables, --insert, --genes, --indexes")]
    NoAction,

    #[error("--insert requires --vcf")]
    MissingVcf,

    #[error("Missing connection parameter: {0} (or set DATABASE_URL)")]
    MissingParameter(&'static str),

    #[error("Failed to read {what} from {}: {source}", .path.display())]
    UnreadableFile {
        what: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{what} file {} is empty", .path.display())]
    EmptyFile { what: &'static str, path: PathBuf },

    #[error("Unsupported database URL scheme '{0}' (expected postgres:// or sqlite:)")]
    UnsupportedUrl(String),

    #[error("Invalid database URL: {0}")]
    InvalidUrl(String),

    #[error("--jobs must be at least 1")]
    InvalidJobs,

    #[error("--max-connections must be at least 1")]
    InvalidMaxConnections,
}

/// Load VCF genotype counts into a relational variant-frequency database
#[derive(Parser, Debug, Clone)]
#[command(name = "vcf2db", author, version, about, long_about = None)]
pub struct Args {
    /// Database URL, postgres://... or sqlite:<path> (or use DATABASE_URL_FILE env var)
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// File containing the database URL
    #[arg(long, env = "DATABASE_URL_FILE", hide = true)]
    pub database_url_file: Option<PathBuf>,

    /// PostgreSQL host
    #[arg(short = 'l', long)]
    pub host: Option<String>,

    /// PostgreSQL port
    #[arg(long, default_value_t = 5432)]
    pub port: u16,

    /// PostgreSQL database name
    #[arg(short, long)]
    pub database: Option<String>,

    /// PostgreSQL user
    #[arg(short, long)]
    pub username: Option<String>,

    /// PostgreSQL password
    #[arg(short, long)]
    pub password: Option<String>,

    /// File containing just the PostgreSQL password
    #[arg(long, value_name = "FILE")]
    pub password_file: Option<PathBuf>,

    /// Create the tables
    #[arg(short, long)]
    pub tables: bool,

    /// Ingest the VCF input given by --vcf
    #[arg(short, long)]
    pub insert: bool,

    /// Link genes to stored locations from a gene span table (TSV or CSV)
    #[arg(short, long, value_name = "FILE")]
    pub genes: Option<PathBuf>,

    /// Create the secondary indexes
    #[arg(long)]
    pub indexes: bool,

    /// VCF file or directory of VCF files
    #[arg(short, long, value_name = "PATH")]
    pub vcf: Option<PathBuf>,

    /// Genome build attached to every location
    #[arg(short = 'r', long, default_value = DEFAULT_GENOME_VERSION)]
    pub genome_version: String,

    /// Append to an existing collection instead of creating one per file
    #[arg(long, value_name = "ID")]
    pub collection: Option<i64>,

    /// Files ingested at once
    #[arg(short, long, default_value_t = 1)]
    pub jobs: usize,

    /// Re-ingest files that were already ingested (their counts are added again)
    #[arg(long)]
    pub force: bool,

    /// Write a JSON run summary to this file
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// PostgreSQL pool size
    #[arg(long, default_value_t = 5)]
    pub max_connections: u32,
}

impl Args {
    /// Reject invocations that cannot do anything useful
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.tables || self.insert || self.genes.is_some() || self.indexes) {
            return Err(ConfigError::NoAction);
        }
        if self.insert && self.vcf.is_none() {
            return Err(ConfigError::MissingVcf);
        }
        if self.jobs == 0 {
            return Err(ConfigError::InvalidJobs);
        }
        if self.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections);
        }
        Ok(())
    }

    pub fn database_target(&self) -> Result<DatabaseTarget, ConfigError> {
        if let Some(url) = &self.database_url {
            return parse_database_url(url.trim());
        }
        if let Some(path) = &self.database_url_file {
            let url = read_secret(path, "database URL")?;
            return parse_database_url(&url);
        }

        let host = self.host.as_deref().ok_or(ConfigError::MissingParameter("--host"))?;
        let database = self
            .database
            .as_deref()
            .ok_or(ConfigError::MissingParameter("--database"))?;
        let username = self
            .username
            .as_deref()
            .ok_or(ConfigError::MissingParameter("--username"))?;
        let password = match (&self.password, &self.password_file) {
            (Some(password), _) => password.clone(),
            (None, Some(path)) => read_secret(path, "password")?,
            (None, None) => return Err(ConfigError::MissingParameter("--password or --password-file")),
        };

        Ok(DatabaseTarget::Postgres(
            PgConnectOptions::new()
                .host(host)
                .port(self.port)
                .database(database)
                .username(username)
                .password(&password),
        ))
    }

    pub fn ingest_options(&self) -> IngestOptions {
        IngestOptions {
            genome_version: self.genome_version.clone(),
            collection: self.collection.map(CollectionId),
            jobs: self.jobs,
            force: self.force,
        }
    }
}

fn parse_database_url(url: &str) -> Result<DatabaseTarget, ConfigError> {
    if let Some(path) = url.strip_prefix("sqlite://").or_else(|| url.strip_prefix("sqlite:")) {
        if path.is_empty() {
            return Err(ConfigError::InvalidUrl("sqlite URL without a path".to_string()));
        }
        return Ok(DatabaseTarget::Sqlite(PathBuf::from(path)));
    }

    match url.split_once("://").map(|(scheme, _)| scheme) {
        Some("postgres") | Some("postgresql") => PgConnectOptions::from_str(url)
            .map(DatabaseTarget::Postgres)
            .map_err(|e| ConfigError::InvalidUrl(e.to_string())),
        // Scheme only; the rest may hold credentials
        Some(scheme) => Err(ConfigError::UnsupportedUrl(scheme.to_string())),
        None => Err(ConfigError::InvalidUrl("missing scheme".to_string())),
    }
}

/// First line of a secret file, without surrounding whitespace
fn read_secret(path: &Path, what: &'static str) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::UnreadableFile {
        what,
        path: path.to_path_buf(),
        source,
    })?;

    let secret = content.lines().next().unwrap_or_default().trim();
    if secret.is_empty() {
        return Err(ConfigError::EmptyFile {
            what,
            path: path.to_path_buf(),
        });
    }
    Ok(secret.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn parse(args: &[&str]) -> Args {
        let mut parsed = Args::try_parse_from(std::iter::once("vcf2db").chain(args.iter().copied())).unwrap();
        // Keep the test environment's DATABASE_URL out of the picture
        if !args.contains(&"--database-url") {
            parsed.database_url = None;
            parsed.database_url_file = None;
        }
        parsed
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["-t"]);
        assert_eq!(args.port, 5432);
        assert_eq!(args.genome_version, "GRCh38");
        assert_eq!(args.jobs, 1);
        assert_eq!(args.max_connections, 5);
        assert!(!args.force);
        args.validate().unwrap();
    }

    #[test]
    fn test_validate() {
        assert!(matches!(parse(&[]).validate(), Err(ConfigError::NoAction)));
        assert!(matches!(parse(&["-i"]).validate(), Err(ConfigError::MissingVcf)));
        assert!(matches!(
            parse(&["-i", "-v", "in.vcf", "-j", "0"]).validate(),
            Err(ConfigError::InvalidJobs)
        ));
        parse(&["--insert", "--vcf", "in.vcf", "--indexes"]).validate().unwrap();
        parse(&["--genes", "genes.tsv"]).validate().unwrap();
    }

    #[test]
    fn test_sqlite_url() {
        let args = parse(&["--database-url", "sqlite:/tmp/variants.db", "-t"]);
        match args.database_target().unwrap() {
            DatabaseTarget::Sqlite(path) => assert_eq!(path, PathBuf::from("/tmp/variants.db")),
            other => panic!("unexpected {}", other),
        }

        let args = parse(&["--database-url", "sqlite://relative.db", "-t"]);
        assert!(matches!(args.database_target().unwrap(), DatabaseTarget::Sqlite(_)));
    }

    #[test]
    fn test_postgres_url() {
        let args = parse(&["--database-url", "postgres://varmt:pw@db:5433/variants", "-t"]);
        let target = args.database_target().unwrap();
        assert_eq!(target.to_string(), "postgres://varmt@db:5433/variants");
    }

    #[test]
    fn test_unsupported_url_hides_credentials() {
        let args = parse(&["--database-url", "mysql://root:hunter2@db/variants", "-t"]);
        let err = args.database_target().unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedUrl(ref scheme) if scheme == "mysql"));
        assert!(!err.to_string().contains("hunter2"));
    }

    #[test]
    fn test_url_file() {
        let mut url_file = NamedTempFile::new().unwrap();
        writeln!(url_file, "sqlite:/var/lib/varmt/variants.db").unwrap();

        let mut args = parse(&["-t"]);
        args.database_url_file = Some(url_file.path().to_path_buf());
        assert!(matches!(args.database_target().unwrap(), DatabaseTarget::Sqlite(_)));
    }

    #[test]
    fn test_discrete_parameters_with_password_file() {
        let mut password_file = NamedTempFile::new().unwrap();
        writeln!(password_file, "s3cret").unwrap();

        let path = password_file.path().to_str().unwrap().to_string();
        let args = parse(&[
            "-l", "db.local", "-d", "variants", "-u", "loader", "--password-file", &path, "-t",
        ]);
        let target = args.database_target().unwrap();
        assert_eq!(target.to_string(), "postgres://loader@db.local:5432/variants");
    }

    #[test]
    fn test_missing_parameters() {
        let args = parse(&["-l", "db.local", "-d", "variants", "-t"]);
        assert!(matches!(
            args.database_target(),
            Err(ConfigError::MissingParameter("--username"))
        ));

        let args = parse(&["-l", "db.local", "-d", "variants", "-u", "loader", "-t"]);
        assert!(matches!(
            args.database_target(),
            Err(ConfigError::MissingParameter("--password or --password-file"))
        ));
    }

    #[test]
    fn test_unreadable_and_empty_password_file() {
        let args = parse(&[
            "-l", "h", "-d", "d", "-u", "u", "--password-file", "/nonexistent/pgpass", "-t",
        ]);
        assert!(matches!(
            args.database_target(),
            Err(ConfigError::UnreadableFile { what: "password", .. })
        ));

        let empty = NamedTempFile::new().unwrap();
        let path = empty.path().to_str().unwrap().to_string();
        let args = parse(&["-l", "h", "-d", "d", "-u", "u", "--password-file", &path, "-t"]);
        assert!(matches!(args.database_target(), Err(ConfigError::EmptyFile { .. })));
    }

    #[test]
    fn test_ingest_options() {
        let args = parse(&[
            "-i", "-v", "dir", "-r", "GRCh37", "--collection", "4", "-j", "3", "--force",
        ]);
        let options = args.ingest_options();
        assert_eq!(options.genome_version, "GRCh37");
        assert_eq!(options.collection, Some(CollectionId(4)));
        assert_eq!(options.jobs, 3);
        assert!(options.force);
    }
}
