//! In-memory genotype table shared by every codec.
//!
//! Samples keep their insertion order; locus names are kept in a sorted set so
//! that every writer emits columns in the same order regardless of which file
//! contributed them.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use thiserror::Error;

/// Allele code used for a missing call.
pub const MISSING_ALLELE: &str = "-9";

/// The two allele codes carried by one sample at one locus.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct AllelePair(pub String, pub String);

impl AllelePair {
    pub fn new(first: impl Into<String>, second: impl Into<String>) -> Self {
        Self(first.into(), second.into())
    }

    pub fn missing() -> Self {
        Self::new(MISSING_ALLELE, MISSING_ALLELE)
    }

    pub fn is_missing(&self) -> bool {
        self.0 == MISSING_ALLELE && self.1 == MISSING_ALLELE
    }

    pub fn first(&self) -> &str {
        &self.0
    }

    pub fn second(&self) -> &str {
        &self.1
    }
}

impl<A, B> From<(A, B)> for AllelePair
where
    A: Into<String>,
    B: Into<String>,
{
    fn from((first, second): (A, B)) -> Self {
        Self::new(first, second)
    }
}

impl fmt::Display for AllelePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.0, self.1)
    }
}

/// Per-sample genotypes keyed by locus name.
pub type LocusMap = BTreeMap<String, AllelePair>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GenotypeError {
    #[error("sample {sample}: {loci} loci but {genotypes} genotypes")]
    DimensionMismatch {
        sample: String,
        loci: usize,
        genotypes: usize,
    },
}

/// A set of samples typed at a set of loci.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GenotypeModel {
    samples: Vec<String>,
    loci: BTreeSet<String>,
    data: BTreeMap<String, LocusMap>,
}

impl GenotypeModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds locus names to the model without touching any sample.
    pub fn add_loci<I, S>(&mut self, loci: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.loci.extend(loci.into_iter().map(Into::into));
        self
    }

    /// Records one sample's genotypes, positionally matched against `loci`.
    ///
    /// A sample that is already present keeps its position in the sample
    /// order and has its locus map replaced.
    pub fn add<S>(
        &mut self,
        sample: &str,
        loci: &[S],
        genotypes: Vec<AllelePair>,
    ) -> Result<&mut Self, GenotypeError>
    where
        S: AsRef<str>,
    {
        if loci.len() != genotypes.len() {
            return Err(GenotypeError::DimensionMismatch {
                sample: sample.to_string(),
                loci: loci.len(),
                genotypes: genotypes.len(),
            });
        }

        self.add_loci(loci.iter().map(|locus| locus.as_ref().to_string()));
        let map: LocusMap = loci
            .iter()
            .map(|locus| locus.as_ref().to_string())
            .zip(genotypes)
            .collect();
        self.insert_sample(sample.to_string(), map);
        Ok(self)
    }

    /// Folds `other` into this model: loci are unioned and `other`'s sample
    /// list is appended as is. An identifier present on both sides is listed
    /// twice, and both rows read `other`'s genotypes.
    pub fn merge(&mut self, other: &GenotypeModel) -> &mut Self {
        self.loci.extend(other.loci.iter().cloned());
        self.samples.extend(other.samples.iter().cloned());
        for (sample, map) in &other.data {
            self.data.insert(sample.clone(), map.clone());
        }
        self
    }

    /// Builds a new model holding `first` followed by `second`.
    pub fn combine(first: &GenotypeModel, second: &GenotypeModel) -> GenotypeModel {
        let mut combined = GenotypeModel::new();
        combined.merge(first).merge(second);
        combined
    }

    fn insert_sample(&mut self, sample: String, map: LocusMap) {
        if self.data.insert(sample.clone(), map).is_none() {
            self.samples.push(sample);
        }
    }

    pub fn loci(&self) -> impl ExactSizeIterator<Item = &str> {
        self.loci.iter().map(String::as_str)
    }

    pub fn has_locus(&self, locus: &str) -> bool {
        self.loci.contains(locus)
    }

    pub fn n_loci(&self) -> usize {
        self.loci.len()
    }

    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    /// Genotype of `sample` at `locus`; `None` if either is unknown.
    /// A known locus the sample was never typed at reads as missing.
    pub fn get(&self, sample: &str, locus: &str) -> Option<AllelePair> {
        let map = self.data.get(sample)?;
        if !self.loci.contains(locus) {
            return None;
        }
        Some(map.get(locus).cloned().unwrap_or_else(AllelePair::missing))
    }

    /// Samples in insertion order with their locus maps.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &LocusMap)> {
        self.samples
            .iter()
            .filter_map(|sample| self.data.get(sample).map(|map| (sample.as_str(), map)))
    }
}
