use std::collections::{HashMap, HashSet};

use crate::hyperloglogplus::HyperLogLogPlusMinus;
use crate::taxonomy::TaxonId;

/// Storage for the distinct-minimizer estimate of one taxon.
pub trait KmerContainer: Clone + Default {
    fn insert(&mut self, kmer: u64);
    fn distinct(&self) -> u64;
    fn merge(&mut self, other: &Self);
}

impl KmerContainer for HyperLogLogPlusMinus {
    fn insert(&mut self, kmer: u64) {
        HyperLogLogPlusMinus::insert(self, kmer);
    }

    fn distinct(&self) -> u64 {
        self.cardinality()
    }

    fn merge(&mut self, other: &Self) {
        HyperLogLogPlusMinus::merge(self, other);
    }
}

impl KmerContainer for HashSet<u64> {
    fn insert(&mut self, kmer: u64) {
        HashSet::insert(self, kmer);
    }

    fn distinct(&self) -> u64 {
        self.len() as u64
    }

    fn merge(&mut self, other: &Self) {
        self.extend(other.iter().copied());
    }
}

/// Per-taxon read and minimizer tallies.
#[derive(Clone, Default, Debug)]
pub struct ReadCounts<T: KmerContainer> {
    n_reads: u64,
    n_kmers: u64,
    kmers: T,
}

impl<T: KmerContainer> ReadCounts<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_counts(n_reads: u64, n_kmers: u64) -> Self {
        ReadCounts {
            n_reads,
            n_kmers,
            kmers: T::default(),
        }
    }

    pub fn read_count(&self) -> u64 {
        self.n_reads
    }

    pub fn increment_read_count(&mut self) {
        self.n_reads += 1;
    }

    pub fn kmer_count(&self) -> u64 {
        self.n_kmers
    }

    pub fn distinct_kmer_count(&self) -> u64 {
        self.kmers.distinct()
    }

    pub fn add_kmer(&mut self, kmer: u64) {
        self.n_kmers += 1;
        self.kmers.insert(kmer);
    }

    pub fn merge(&mut self, other: &Self) {
        self.n_reads += other.n_reads;
        self.n_kmers += other.n_kmers;
        self.kmers.merge(&other.kmers);
    }
}

#[cfg(feature = "exact_counting")]
pub type TaxonCounter = ReadCounts<HashSet<u64>>;

#[cfg(not(feature = "exact_counting"))]
pub type TaxonCounter = ReadCounts<HyperLogLogPlusMinus>;

pub type TaxonCounters = HashMap<TaxonId, TaxonCounter>;

/// Per-read hit tallies; cleared between reads.
pub type TaxonCounts = HashMap<TaxonId, u32>;
