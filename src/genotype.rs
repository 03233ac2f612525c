// ==============================================================================
// genotype.rs - Genotype Calls and Zygosity Tallies
// ==============================================================================
// Description: Classifies per-sample GT calls against one target ALT allele and
//              accumulates per-collection genotype counts
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================
// Algorithm (zygosity is relative to the target ALT allele `t`):
//   - any allele absent ("."), unparsable, out of range, ploidy > 2 → missing
//   - every allele == t                                             → hom_alt
//   - some but not every allele == t (rest REF or another ALT)      → het
//   - no allele == t (REF, or a non-target ALT counted as REF)      → hom_ref
//
//   allele_number          = sum of ploidy over fully called samples
//   alternate_allele_count = occurrences of t among fully called samples
//
//   Multi-allelic example, GT 1/2 at REF=A ALT=G,T:
//     target G (1) → het, target T (2) → het; never hom_alt for either
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};

/// Highest ploidy the diploid tally model accepts
pub const MAX_PLOIDY: usize = 2;

/// One sample's genotype call at a site
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// Allele indices (0 = REF, 1.. = ALT) of a fully called genotype
    Called(Vec<u32>),
    /// No usable call: absent, partial, unparsable or out of range
    Missing,
}

impl Call {
    /// Build a call from decoded allele positions (`None` for a `.` allele)
    ///
    /// # Arguments
    /// * `alleles` - Allele positions in GT order (0 = REF, 1.. = ALT)
    /// * `alternate_count` - Number of ALT alleles at the site
    ///
    /// Anything that cannot be counted becomes [`Call::Missing`]; this never fails.
    ///
    /// # Examples
    /// ```
    /// use varmt_db::genotype::Call;
    ///
    /// assert_eq!(Call::from_alleles([Some(0), Some(1)], 1), Call::Called(vec![0, 1]));
    /// assert_eq!(Call::from_alleles([Some(1), Some(2)], 2), Call::Called(vec![1, 2]));
    /// assert_eq!(Call::from_alleles([None, None], 1), Call::Missing);
    /// assert_eq!(Call::from_alleles([Some(0), Some(3)], 1), Call::Missing);
    /// ```
    pub fn from_alleles<I>(alleles: I, alternate_count: usize) -> Call
    where
        I: IntoIterator<Item = Option<usize>>,
    {
        let mut called = Vec::with_capacity(MAX_PLOIDY);
        for allele in alleles {
            match allele {
                Some(index) if index <= alternate_count && called.len() < MAX_PLOIDY => {
                    called.push(index as u32)
                }
                _ => return Call::Missing,
            }
        }

        if called.is_empty() {
            Call::Missing
        } else {
            Call::Called(called)
        }
    }
}

/// Zygosity class of one sample with respect to one target allele
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Zygosity {
    HomRef,
    Het,
    HomAlt,
    Missing,
}

/// Classify a call against the target ALT allele (1-based index)
pub fn classify(call: &Call, target: u32) -> Zygosity {
    let alleles = match call {
        Call::Called(alleles) if !alleles.is_empty() => alleles,
        _ => return Zygosity::Missing,
    };

    let target_copies = alleles.iter().filter(|&&a| a == target).count();
    if target_copies == 0 {
        Zygosity::HomRef
    } else if target_copies == alleles.len() {
        Zygosity::HomAlt
    } else {
        Zygosity::Het
    }
}

/// Genotype counts for one variant in one collection
///
/// Tallies add field by field, which is the same arithmetic the database
/// applies when a frequency row is merged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenotypeTally {
    pub alternate_allele_count: u64,
    pub allele_number: u64,
    pub hom_ref: u64,
    pub het: u64,
    pub hom_alt: u64,
    pub missing: u64,
}

impl GenotypeTally {
    /// Tally all sample calls of a site against one target ALT allele
    ///
    /// # Examples
    /// ```
    /// use varmt_db::genotype::{Call, GenotypeTally};
    ///
    /// let calls = vec![
    ///     Call::Called(vec![0, 0]),
    ///     Call::Called(vec![0, 1]),
    ///     Call::Called(vec![1, 1]),
    /// ];
    /// let tally = GenotypeTally::from_calls(&calls, 1);
    /// assert_eq!((tally.hom_ref, tally.het, tally.hom_alt, tally.missing), (1, 1, 1, 0));
    /// assert_eq!(tally.allele_number, 6);
    /// assert_eq!(tally.alternate_allele_count, 3);
    /// ```
    pub fn from_calls(calls: &[Call], target: u32) -> Self {
        let mut tally = Self::default();
        for call in calls {
            tally.observe(call, target);
        }
        tally
    }

    /// Count one sample
    pub fn observe(&mut self, call: &Call, target: u32) {
        match classify(call, target) {
            Zygosity::Missing => {
                self.missing += 1;
                return;
            }
            Zygosity::HomRef => self.hom_ref += 1,
            Zygosity::Het => self.het += 1,
            Zygosity::HomAlt => self.hom_alt += 1,
        }

        if let Call::Called(alleles) = call {
            self.allele_number += alleles.len() as u64;
            self.alternate_allele_count += alleles.iter().filter(|&&a| a == target).count() as u64;
        }
    }

    /// Number of samples counted
    pub fn samples(&self) -> u64 {
        self.hom_ref + self.het + self.hom_alt + self.missing
    }

    /// Check the frequency-row invariants against a collection size
    pub fn is_consistent_with(&self, sample_count: u64) -> bool {
        self.samples() == sample_count
            && self.allele_number <= 2 * sample_count
            && self.alternate_allele_count <= self.allele_number
    }
}

impl AddAssign for GenotypeTally {
    fn add_assign(&mut self, other: Self) {
        self.alternate_allele_count += other.alternate_allele_count;
        self.allele_number += other.allele_number;
        self.hom_ref += other.hom_ref;
        self.het += other.het;
        self.hom_alt += other.hom_alt;
        self.missing += other.missing;
    }
}

impl Add for GenotypeTally {
    type Output = Self;

    fn add(mut self, other: Self) -> Self {
        self += other;
        self
    }
}
