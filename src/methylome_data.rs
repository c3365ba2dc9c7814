//! Per-CpG `(n_meth, n_unmeth)` columnar data and the aggregation kernels
//! that collapse it into intervals, bins, or windows.

use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::error::CompressionError;
use crate::genome_index::GenomeIndex;
use crate::level_element::{CoveredLevelElement, LevelElement};
use crate::query::QueryContainer;

/// Ordered sequence of per-CpG `(n_meth, n_unmeth)` pairs, one per CpG site
/// in genome-index order. Coverage exceeding `u16::MAX` is saturated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethylomeData {
    pairs: Vec<(u16, u16)>,
}

impl MethylomeData {
    #[must_use]
    pub fn new(pairs: Vec<(u16, u16)>) -> Self {
        Self { pairs }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[(u16, u16)] {
        &self.pairs
    }

    /// Raw little-endian `(u16, u16)` byte encoding, uncompressed.
    #[must_use]
    pub fn to_raw_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.pairs.len() * 4);
        for &(m, u) in &self.pairs {
            bytes.extend_from_slice(&m.to_le_bytes());
            bytes.extend_from_slice(&u.to_le_bytes());
        }
        bytes
    }

    /// Parse raw little-endian `(u16, u16)` bytes.
    #[must_use]
    pub fn from_raw_bytes(bytes: &[u8]) -> Self {
        let pairs = bytes
            .chunks_exact(4)
            .map(|c| {
                let m = u16::from_le_bytes([c[0], c[1]]);
                let u = u16::from_le_bytes([c[2], c[3]]);
                (m, u)
            })
            .collect();
        Self { pairs }
    }

    /// DEFLATE-compress the raw encoding.
    pub fn to_compressed_bytes(&self) -> Result<Vec<u8>, CompressionError> {
        let raw = self.to_raw_bytes();
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&raw)
            .map_err(|e| CompressionError::DecompressionFailed(e.to_string()))?;
        encoder
            .finish()
            .map_err(|e| CompressionError::DecompressionFailed(e.to_string()))
    }

    /// Inflate a DEFLATE-compressed blob back into per-CpG pairs.
    pub fn from_compressed_bytes(bytes: &[u8]) -> Result<Self, CompressionError> {
        let mut decoder = DeflateDecoder::new(bytes);
        let mut raw = Vec::new();
        decoder
            .read_to_end(&mut raw)
            .map_err(|_| CompressionError::BadData)?;
        if raw.len() % 4 != 0 {
            return Err(CompressionError::ShortOutput);
        }
        Ok(Self::from_raw_bytes(&raw))
    }

    /// Element-wise saturated addition. Callers (`Methylome::add`) are
    /// responsible for checking `index_hash`/`n_cpgs` equality first; this
    /// layer only enforces matching length.
    #[must_use]
    pub fn add(&self, other: &Self) -> Option<Self> {
        if self.pairs.len() != other.pairs.len() {
            return None;
        }
        let pairs = self
            .pairs
            .iter()
            .zip(other.pairs.iter())
            .map(|(&(m1, u1), &(m2, u2))| (m1.saturating_add(m2), u1.saturating_add(u2)))
            .collect();
        Some(Self { pairs })
    }

    /// §4.2 `get_levels(query)`: for each `(lo, hi)`, sum `n_meth`/`n_unmeth`
    /// over the slice, saturating in `u32`.
    #[must_use]
    pub fn get_levels(&self, query: &QueryContainer) -> Vec<LevelElement> {
        query
            .iter()
            .map(|&(lo, hi)| self.sum_range(lo, hi))
            .collect()
    }

    #[must_use]
    pub fn get_levels_covered(&self, query: &QueryContainer) -> Vec<CoveredLevelElement> {
        query
            .iter()
            .map(|&(lo, hi)| self.sum_range_covered(lo, hi))
            .collect()
    }

    fn sum_range(&self, lo: u32, hi: u32) -> LevelElement {
        let mut n_meth = 0u32;
        let mut n_unmeth = 0u32;
        for &(m, u) in &self.pairs[lo as usize..hi as usize] {
            n_meth = n_meth.saturating_add(u32::from(m));
            n_unmeth = n_unmeth.saturating_add(u32::from(u));
        }
        LevelElement::new(n_meth, n_unmeth)
    }

    fn sum_range_covered(&self, lo: u32, hi: u32) -> CoveredLevelElement {
        let mut n_meth = 0u32;
        let mut n_unmeth = 0u32;
        let mut n_covered = 0u32;
        for &(m, u) in &self.pairs[lo as usize..hi as usize] {
            n_meth = n_meth.saturating_add(u32::from(m));
            n_unmeth = n_unmeth.saturating_add(u32::from(u));
            if m > 0 || u > 0 {
                n_covered += 1;
            }
        }
        CoveredLevelElement::new(n_meth, n_unmeth, n_covered)
    }

    /// §4.2 `get_levels(bin_size, index)`: one bin per `bin_size` genomic
    /// positions per chromosome, emitted even when empty.
    #[must_use]
    pub fn get_levels_bins(&self, index: &GenomeIndex, bin_size: u32) -> Vec<LevelElement> {
        self.bin_ranges(index, bin_size)
            .into_iter()
            .map(|(lo, hi)| self.sum_range(lo, hi))
            .collect()
    }

    #[must_use]
    pub fn get_levels_bins_covered(&self, index: &GenomeIndex, bin_size: u32) -> Vec<CoveredLevelElement> {
        self.bin_ranges(index, bin_size)
            .into_iter()
            .map(|(lo, hi)| self.sum_range_covered(lo, hi))
            .collect()
    }

    fn bin_ranges(&self, index: &GenomeIndex, bin_size: u32) -> Vec<(u32, u32)> {
        let mut ranges = Vec::new();
        for ch in 0..index.n_chroms() as usize {
            let size = index.chrom_size[ch];
            let mut g = 0u32;
            while g < size {
                let end = (g + bin_size).min(size);
                ranges.push(index.cpg_range(ch, g, end));
                g += bin_size;
            }
        }
        ranges
    }

    /// §4.2 `get_levels(window_size, window_step, index)`: stepped starts;
    /// each window's CpG range is `[lower_bound(start),
    /// lower_bound(start+window_size))`.
    #[must_use]
    pub fn get_levels_windows(&self, index: &GenomeIndex, window_size: u32, window_step: u32) -> Vec<LevelElement> {
        self.window_ranges(index, window_size, window_step)
            .into_iter()
            .map(|(lo, hi)| self.sum_range(lo, hi))
            .collect()
    }

    #[must_use]
    pub fn get_levels_windows_covered(
        &self,
        index: &GenomeIndex,
        window_size: u32,
        window_step: u32,
    ) -> Vec<CoveredLevelElement> {
        self.window_ranges(index, window_size, window_step)
            .into_iter()
            .map(|(lo, hi)| self.sum_range_covered(lo, hi))
            .collect()
    }

    fn window_ranges(&self, index: &GenomeIndex, window_size: u32, window_step: u32) -> Vec<(u32, u32)> {
        let mut ranges = Vec::new();
        for ch in 0..index.n_chroms() as usize {
            let size = index.chrom_size[ch];
            let mut g = 0u32;
            while g < size {
                let end = (g + window_size).min(size);
                ranges.push(index.cpg_range(ch, g, end));
                g += window_step;
            }
        }
        ranges
    }

    /// §4.2 `global_levels`: aggregate across the whole methylome.
    #[must_use]
    pub fn global_levels(&self) -> LevelElement {
        self.sum_range(0, self.pairs.len() as u32)
    }

    #[must_use]
    pub fn global_levels_covered(&self) -> CoveredLevelElement {
        self.sum_range_covered(0, self.pairs.len() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interval::GenomicInterval;

    fn toy_index() -> GenomeIndex {
        GenomeIndex::new(
            "toy",
            vec!["chr1".to_string()],
            vec![1000],
            vec![vec![10, 50, 100, 900]],
        )
    }

    fn toy_data() -> MethylomeData {
        MethylomeData::new(vec![(5, 5), (0, 0), (10, 0), (1, 9)])
    }

    #[test]
    fn test_raw_round_trip() {
        let d = toy_data();
        let bytes = d.to_raw_bytes();
        let d2 = MethylomeData::from_raw_bytes(&bytes);
        assert_eq!(d, d2);
    }

    #[test]
    fn test_compressed_round_trip() {
        let d = toy_data();
        let compressed = d.to_compressed_bytes().unwrap();
        let d2 = MethylomeData::from_compressed_bytes(&compressed).unwrap();
        assert_eq!(d, d2);
    }

    #[test]
    fn test_saturating_add() {
        let a = MethylomeData::new(vec![(u16::MAX - 1, 0)]);
        let b = MethylomeData::new(vec![(5, 0)]);
        let sum = a.add(&b).unwrap();
        assert_eq!(sum.as_slice()[0].0, u16::MAX);
    }

    #[test]
    fn test_get_levels_from_query() {
        let g = toy_index();
        let d = toy_data();
        let intervals = vec![GenomicInterval::new(0, 0, 60)];
        let query = g.make_query(&intervals).unwrap();
        let levels = d.get_levels(&query);
        assert_eq!(levels.len(), 1);
        assert_eq!(levels[0], LevelElement::new(5, 5));
    }

    #[test]
    fn test_aggregation_equivalence_query_vs_direct() {
        let g = toy_index();
        let d = toy_data();
        let intervals = vec![GenomicInterval::new(0, 0, 1000)];
        let via_query = d.get_levels(&g.make_query(&intervals).unwrap());
        // Equivalent to summing across the full methylome directly.
        assert_eq!(via_query[0], d.global_levels());
    }

    #[test]
    fn test_bin_count_matches_index() {
        let g = toy_index();
        let d = toy_data();
        let bins = d.get_levels_bins(&g, 100);
        assert_eq!(bins.len() as u32, g.n_bins(100));
    }

    #[test]
    fn test_covered_bounds() {
        let g = toy_index();
        let d = toy_data();
        let covered = d.get_levels_bins_covered(&g, 1000);
        assert_eq!(covered.len(), 1);
        assert!(covered[0].n_covered <= 4);
    }

    #[test]
    fn test_empty_range_is_zero() {
        let d = toy_data();
        let q = QueryContainer::from_ranges(vec![(2, 2)]);
        let levels = d.get_levels(&q);
        assert_eq!(levels[0], LevelElement::default());
    }
}
