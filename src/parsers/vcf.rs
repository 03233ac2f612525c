// ==============================================================================
// parsers/vcf.rs - Streaming VCF record reader
// ==============================================================================
// Description: Lazy reader producing normalized variant records with per-sample
//              genotype calls from plain or gzip/BGZF-compressed VCF files
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================
// References:
// - VCF 4.3 Spec: https://samtools.github.io/hts-specs/VCFv4.3.pdf
// - noodles-vcf: https://docs.rs/noodles-vcf/0.81.0/noodles_vcf/
// ==============================================================================

use flate2::read::MultiGzDecoder;
use noodles_vcf as vcf;
use noodles_vcf::variant::record::samples::keys::key;
use noodles_vcf::variant::record::samples::series::value::Genotype as _;
use noodles_vcf::variant::record::samples::series::Value;
use noodles_vcf::variant::record::samples::Series as _;
use noodles_vcf::variant::record::{AlternateBases as _, Ids as _};
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

use crate::genotype::{Call, GenotypeTally};
use crate::models::LocationKey;

/// Gzip magic number (BGZF files share it)
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Fixed columns before FORMAT: CHROM POS ID REF ALT QUAL FILTER INFO
const FIXED_COLUMNS: usize = 8;

/// Parsed VCF record with the fields the frequency pipeline needs
#[derive(Debug, Clone, PartialEq)]
pub struct VCFRecord {
    /// 1-based line number in the (decompressed) file
    pub line: usize,

    /// Chromosome exactly as written (e.g., "chr1")
    pub chromosome: String,

    /// Base pair position on chromosome
    pub position: u64,

    /// First non-missing ID (e.g., "rs12345")
    pub rs_id: Option<String>,

    /// Reference allele (e.g., "A")
    pub reference_allele: String,

    /// Alternate alleles in ALT order (e.g., ["G", "T"])
    pub alternate_alleles: Vec<String>,

    /// One call per sample, in header order
    pub calls: Vec<Call>,
}

impl VCFRecord {
    /// Expand the record into one `(allele_index, allele)` per ALT allele
    ///
    /// Allele indices are 1-based, matching GT values.
    pub fn alternates(&self) -> impl Iterator<Item = (u32, &str)> + '_ {
        self.alternate_alleles
            .iter()
            .enumerate()
            .map(|(i, allele)| (i as u32 + 1, allele.as_str()))
    }

    /// Genotype counts of this site for one ALT allele
    pub fn tally(&self, target: u32) -> GenotypeTally {
        GenotypeTally::from_calls(&self.calls, target)
    }

    pub fn location_key(&self, genome_version: &str) -> LocationKey {
        LocationKey {
            chromosome: self.chromosome.clone(),
            position: self.position,
            reference_allele: self.reference_allele.clone(),
            genome_version: genome_version.to_string(),
        }
    }
}

/// VCF reading errors
#[derive(Error, Debug)]
pub enum VCFParseError {
    #[error("Failed to open VCF file: {0}")]
    FileOpenError(String),

    #[error("Failed to read VCF header: {0}")]
    HeaderError(String),

    #[error("Malformed record at line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

impl VCFParseError {
    /// Malformed records are skipped; everything else ends the file
    pub fn is_recoverable(&self) -> bool {
        matches!(self, VCFParseError::Malformed { .. })
    }
}

/// Lazy, single-pass reader over the records of one VCF file
///
/// # Example
/// ```no_run
/// use varmt_db::parsers::VCFReader;
///
/// let reader = VCFReader::open("cohort.vcf.gz")?;
/// println!("{} samples", reader.sample_count());
/// for record in reader {
///     match record {
///         Ok(record) => println!("{}:{}", record.chromosome, record.position),
///         Err(e) if e.is_recoverable() => eprintln!("skipping: {}", e),
///         Err(e) => return Err(e),
///     }
/// }
/// # Ok::<(), varmt_db::parsers::VCFParseError>(())
/// ```
pub struct VCFReader {
    reader: vcf::io::Reader<Box<dyn BufRead + Send>>,
    header: vcf::Header,
    sample_names: Vec<String>,
    record: vcf::Record,
    line: usize,
    buf: Vec<u8>,
}

impl VCFReader {
    /// Open a VCF file; gzip and BGZF compression are detected by magic number
    pub fn open(path: impl AsRef<Path>) -> Result<Self, VCFParseError> {
        let path = path.as_ref();

        let mut file = File::open(path)
            .map(BufReader::new)
            .map_err(|e| VCFParseError::FileOpenError(format!("{}: {}", path.display(), e)))?;

        let compressed = file.fill_buf()?.starts_with(&GZIP_MAGIC);
        let inner: Box<dyn BufRead + Send> = if compressed {
            Box::new(BufReader::new(MultiGzDecoder::new(file)))
        } else {
            Box::new(file)
        };

        Self::from_reader(inner)
    }

    /// Read the header from any buffered source and position at the first record
    pub fn from_reader<R: BufRead + Send + 'static>(inner: R) -> Result<Self, VCFParseError> {
        let inner: Box<dyn BufRead + Send> = Box::new(inner);
        let mut reader = vcf::io::Reader::new(inner);

        let mut raw_header = String::new();
        reader
            .header_reader()
            .read_to_string(&mut raw_header)
            .map_err(|e| VCFParseError::HeaderError(format!("{}", e)))?;

        if !raw_header.lines().any(|line| line.starts_with("#CHROM")) {
            return Err(VCFParseError::HeaderError(
                "missing #CHROM header line".to_string(),
            ));
        }

        let header: vcf::Header = raw_header
            .parse()
            .map_err(|e| VCFParseError::HeaderError(format!("{}", e)))?;
        let sample_names = header.sample_names().iter().cloned().collect();

        Ok(Self {
            reader,
            header,
            sample_names,
            record: vcf::Record::default(),
            line: raw_header.lines().count(),
            buf: Vec::new(),
        })
    }

    pub fn sample_names(&self) -> &[String] {
        &self.sample_names
    }

    /// Number of sample columns declared by the header
    pub fn sample_count(&self) -> usize {
        self.sample_names.len()
    }

    /// Decode one data line through noodles
    fn parse_record(&mut self, text: &str) -> Result<VCFRecord, VCFParseError> {
        let line = self.line;
        let malformed = |reason: String| VCFParseError::Malformed { line, reason };

        let sample_count = self.sample_names.len();
        let columns = text.split('\t').count();
        let expected = if sample_count == 0 {
            FIXED_COLUMNS
        } else {
            FIXED_COLUMNS + 1 + sample_count
        };
        // Sites-only files may still carry an (unused) FORMAT column
        let sites_only_with_format = sample_count == 0 && columns == FIXED_COLUMNS + 1;
        if columns != expected && !sites_only_with_format {
            return Err(malformed(format!(
                "expected {} columns, found {}",
                expected, columns
            )));
        }

        vcf::io::Reader::new(text.as_bytes())
            .read_record(&mut self.record)
            .map_err(|e| malformed(format!("{}", e)))?;
        let record = &self.record;

        let chromosome = record.reference_sequence_name();
        if chromosome.is_empty() {
            return Err(malformed("empty CHROM".to_string()));
        }

        let position = match record.variant_start() {
            Some(Ok(position)) => position.get() as u64,
            Some(Err(e)) => return Err(malformed(format!("invalid POS: {}", e))),
            None => return Err(malformed("POS 0 is not a variant site".to_string())),
        };

        let rs_id = record
            .ids()
            .iter()
            .find(|id| !id.is_empty() && *id != ".")
            .map(str::to_string);

        let reference_allele = record.reference_bases();
        if reference_allele.is_empty() || reference_allele == "." {
            return Err(malformed("missing REF allele".to_string()));
        }

        let alternate_bases = record.alternate_bases();
        let mut alternate_alleles = Vec::new();
        let mut seen = HashSet::new();
        for allele in alternate_bases.iter() {
            let allele = allele.map_err(|e| malformed(format!("invalid ALT: {}", e)))?;
            if allele.is_empty() || allele == "." {
                return Err(malformed(format!("invalid ALT '{}'", alternate_bases.as_ref())));
            }
            if !seen.insert(allele) {
                return Err(malformed(format!("repeated ALT allele '{}'", allele)));
            }
            alternate_alleles.push(allele.to_string());
        }

        let calls = if sample_count == 0 {
            Vec::new()
        } else {
            let samples = record.samples();
            match samples.select(key::GENOTYPE) {
                Some(series) => samples
                    .iter()
                    .zip(series.iter(&self.header))
                    .map(|(sample, value)| {
                        genotype_call(sample.as_ref(), value, alternate_alleles.len())
                    })
                    .collect(),
                None => vec![Call::Missing; sample_count],
            }
        };
        if calls.len() != sample_count {
            return Err(malformed(format!(
                "expected {} samples, found {}",
                sample_count,
                calls.len()
            )));
        }

        Ok(VCFRecord {
            line,
            chromosome: chromosome.to_string(),
            position,
            rs_id,
            reference_allele: reference_allele.to_string(),
            alternate_alleles,
            calls,
        })
    }
}

/// Turn one sample's GT value into a call; anything unusable is missing
fn genotype_call(raw: &str, value: io::Result<Option<Value<'_>>>, alternate_count: usize) -> Call {
    // noodles splits genotypes by char offset, which is only safe for ASCII
    if !raw.is_ascii() {
        return Call::Missing;
    }

    match value {
        Ok(Some(Value::Genotype(genotype))) => Call::from_alleles(
            genotype
                .iter()
                .map(|allele| allele.ok().and_then(|(position, _)| position)),
            alternate_count,
        ),
        _ => Call::Missing,
    }
}

impl Iterator for VCFReader {
    type Item = Result<VCFRecord, VCFParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            // Lines are framed here so one bad line cannot desynchronize the stream
            let mut buf = std::mem::take(&mut self.buf);
            buf.clear();
            match self.reader.get_mut().read_until(b'\n', &mut buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(VCFParseError::IoError(e))),
            }
            self.line += 1;

            let result = match std::str::from_utf8(&buf) {
                Ok(text) => {
                    let text = text.trim_end_matches(['\n', '\r']);
                    if text.is_empty() {
                        None
                    } else {
                        Some(self.parse_record(text))
                    }
                }
                Err(_) => Some(Err(VCFParseError::Malformed {
                    line: self.line,
                    reason: "invalid UTF-8".to_string(),
                })),
            };
            self.buf = buf;

            if result.is_some() {
                return result;
            }
        }
    }
}

/// Resolve the VCF files named by a path
///
/// A file is returned as is; a directory yields its `*.vcf` and `*.vcf.gz`
/// files (not recursive), sorted by name.
pub fn discover_inputs(path: impl AsRef<Path>) -> io::Result<Vec<PathBuf>> {
    let path = path.as_ref();
    if !path.is_dir() {
        if !path.exists() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} does not exist", path.display()),
            ));
        }
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(path).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy();
        if entry.file_type().is_file() && (name.ends_with(".vcf") || name.ends_with(".vcf.gz")) {
            files.push(entry.into_path());
        }
    }

    Ok(files)
}
