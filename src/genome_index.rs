//! On-disk, memory-mappable enumeration of every CpG site in a reference
//! genome, in canonical order, with O(log N) interval-to-offset lookup.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::interval::GenomicInterval;
use crate::query::QueryContainer;

/// JSON sidecar persisted alongside the binary position data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenomeIndexMetadata {
    pub version: String,
    pub assembly: String,
    pub n_cpgs: u64,
    pub index_hash: u64,
    pub chrom_order: Vec<String>,
    pub chrom_size: Vec<u32>,
    pub chrom_offset: Vec<u64>,
    pub chrom_index: HashMap<String, u32>,
}

/// A genome's CpG sites enumerated in canonical order: chromosome order as
/// given at construction time, increasing position within a chromosome.
///
/// Read-only after construction; shared across worker threads via `Arc`.
#[derive(Debug)]
pub struct GenomeIndex {
    pub assembly: String,
    pub hash: u64,
    pub chrom_order: Vec<String>,
    pub chrom_size: Vec<u32>,
    /// Prefix-sum count of CpG sites before chromosome `i`.
    pub chrom_offset: Vec<u64>,
    pub chrom_index: HashMap<String, u32>,
    /// Per-chromosome, strictly increasing CpG positions.
    positions: Vec<Vec<u32>>,
    pub n_cpgs: u64,
}

const FILE_VERSION: &str = "1";

impl GenomeIndex {
    /// Construct from chromosome names/sizes and per-chromosome CpG
    /// positions (each already sorted and strictly increasing), computing
    /// offsets and the stable hash.
    ///
    /// # Panics
    ///
    /// Panics if `chrom_order`, `chrom_size`, and `positions` differ in
    /// length, or if any chromosome's positions are not strictly increasing
    /// and bounded by its size — these are construction-time invariants
    /// owned entirely by this crate (the FASTA parser producing the raw
    /// positions is out of scope), not conditions that arise from untrusted
    /// input.
    #[must_use]
    pub fn new(assembly: impl Into<String>, chrom_order: Vec<String>, chrom_size: Vec<u32>, positions: Vec<Vec<u32>>) -> Self {
        assert_eq!(chrom_order.len(), chrom_size.len());
        assert_eq!(chrom_order.len(), positions.len());
        for (pos, &size) in positions.iter().zip(chrom_size.iter()) {
            assert!(pos.windows(2).all(|w| w[0] < w[1]));
            assert!(pos.last().is_none_or(|&p| p < size));
        }

        let mut chrom_offset = Vec::with_capacity(chrom_order.len());
        let mut running = 0u64;
        for pos in &positions {
            chrom_offset.push(running);
            running += pos.len() as u64;
        }
        let n_cpgs = running;

        let chrom_index = chrom_order
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i as u32))
            .collect();

        let hash = compute_hash(&chrom_order, &chrom_size, &positions);

        Self {
            assembly: assembly.into(),
            hash,
            chrom_order,
            chrom_size,
            chrom_offset,
            chrom_index,
            positions,
            n_cpgs,
        }
    }

    #[must_use]
    pub fn n_chroms(&self) -> u32 {
        self.chrom_order.len() as u32
    }

    /// §4.1 `make_query`: binary-search each interval's `[start, stop)` into
    /// the chromosome's CpG-position vector, yielding global CpG offsets.
    pub fn make_query(&self, intervals: &[GenomicInterval]) -> Result<QueryContainer, StorageError> {
        let mut ranges = Vec::with_capacity(intervals.len());
        for iv in intervals {
            let ch = iv.ch_id as usize;
            let positions = self
                .positions
                .get(ch)
                .ok_or_else(|| StorageError::ChromNameNotFound(iv.ch_id.to_string()))?;
            let size = self.chrom_size[ch];
            let start = iv.start.min(size);
            let stop = iv.stop.min(size);
            let offset = self.chrom_offset[ch];
            let lo = offset + lower_bound(positions, start) as u64;
            let hi = offset + lower_bound(positions, stop) as u64;
            ranges.push((lo as u32, hi as u32));
        }
        Ok(QueryContainer::from_ranges(ranges))
    }

    /// §4.1 `n_bins`: sum over chromosomes of `ceil(chrom_size / bin_size)`.
    #[must_use]
    pub fn n_bins(&self, bin_size: u32) -> u32 {
        self.chrom_size
            .iter()
            .map(|&size| size.div_ceil(bin_size))
            .sum()
    }

    /// §4.1 `n_windows`: sum over chromosomes of the number of window starts
    /// in `[0, chrom_size)` stepped by `window_step`.
    #[must_use]
    pub fn n_windows(&self, window_size: u32, window_step: u32) -> u32 {
        let _ = window_size; // window starts don't depend on the window's own size
        self.chrom_size
            .iter()
            .map(|&size| size.div_ceil(window_step))
            .sum()
    }

    /// CpG offset range `[lo, hi)` for the half-open genomic range
    /// `[start, stop)` on chromosome `ch`, as global CpG ordinals.
    #[must_use]
    pub fn cpg_range(&self, ch: usize, start: u32, stop: u32) -> (u32, u32) {
        let positions = &self.positions[ch];
        let size = self.chrom_size[ch];
        let start = start.min(size);
        let stop = stop.min(size);
        let offset = self.chrom_offset[ch];
        let lo = offset + lower_bound(positions, start) as u64;
        let hi = offset + lower_bound(positions, stop) as u64;
        (lo as u32, hi as u32)
    }

    #[must_use]
    pub fn positions_for(&self, ch: usize) -> &[u32] {
        &self.positions[ch]
    }

    /// §4.1 `is_consistent`: hash recomputation equals the stored hash.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        compute_hash(&self.chrom_order, &self.chrom_size, &self.positions) == self.hash
    }

    fn data_path(dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{name}.cpg_idx"))
    }

    fn meta_path(dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{name}.cpg_idx.json"))
    }

    /// Write the binary position data and JSON metadata sidecar atomically
    /// (write to a temp file in the same directory, then rename).
    pub fn write(&self, dir: &Path, name: &str) -> Result<(), StorageError> {
        let mut bytes = Vec::with_capacity(self.n_cpgs as usize * 4);
        for pos in &self.positions {
            for &p in pos {
                bytes.extend_from_slice(&p.to_le_bytes());
            }
        }
        write_atomic(&Self::data_path(dir, name), &bytes)?;

        let meta = GenomeIndexMetadata {
            version: FILE_VERSION.to_string(),
            assembly: self.assembly.clone(),
            n_cpgs: self.n_cpgs,
            index_hash: self.hash,
            chrom_order: self.chrom_order.clone(),
            chrom_size: self.chrom_size.clone(),
            chrom_offset: self.chrom_offset.clone(),
            chrom_index: self.chrom_index.clone(),
        };
        let json = serde_json::to_vec_pretty(&meta)?;
        write_atomic(&Self::meta_path(dir, name), &json)?;
        Ok(())
    }

    /// Read metadata first, then mmap the binary data and split it into
    /// per-chromosome position slices according to `chrom_offset`.
    pub fn read(dir: &Path, name: &str) -> Result<Self, StorageError> {
        let meta_bytes = fs::read(Self::meta_path(dir, name))?;
        let meta: GenomeIndexMetadata = serde_json::from_slice(&meta_bytes)?;

        let file = fs::File::open(Self::data_path(dir, name))?;
        // SAFETY: the file is opened read-only and not expected to be
        // mutated concurrently by another process while mapped; this matches
        // the read-only, shared-after-load lifecycle described in §3.
        let mmap = unsafe { Mmap::map(&file)? };
        if mmap.len() as u64 != meta.n_cpgs * 4 {
            return Err(StorageError::LengthMismatch {
                expected: meta.n_cpgs * 4,
                actual: mmap.len() as u64,
            });
        }

        let mut positions = Vec::with_capacity(meta.chrom_order.len());
        for i in 0..meta.chrom_order.len() {
            let start = meta.chrom_offset[i] as usize * 4;
            let end = if i + 1 < meta.chrom_offset.len() {
                meta.chrom_offset[i + 1] as usize * 4
            } else {
                mmap.len()
            };
            let chunk = &mmap[start..end];
            let pos: Vec<u32> = chunk
                .chunks_exact(4)
                .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            positions.push(pos);
        }

        let hash = compute_hash(&meta.chrom_order, &meta.chrom_size, &positions);
        if hash != meta.index_hash {
            return Err(StorageError::IndexHashMismatch {
                expected: meta.index_hash,
                actual: hash,
            });
        }

        Ok(Self {
            assembly: meta.assembly,
            hash: meta.index_hash,
            chrom_order: meta.chrom_order,
            chrom_size: meta.chrom_size,
            chrom_offset: meta.chrom_offset,
            chrom_index: meta.chrom_index,
            positions,
            n_cpgs: meta.n_cpgs,
        })
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = tempfile::NamedTempFile::new_in(dir)?;
    fs::write(tmp.path(), bytes)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Index of the first position `>= target`, i.e. `lower_bound`.
fn lower_bound(positions: &[u32], target: u32) -> usize {
    positions.partition_point(|&p| p < target)
}

/// A stable, endianness-normalised 64-bit FNV-1a accumulation over
/// little-endian-encoded chromosome names, sizes, and positions. Deliberately
/// not the process's default `HashMap` hasher (randomized per-process, unfit
/// for an on-disk identity value) and not derived from `Hash` (whose exact
/// byte stream is not a stability guarantee across Rust versions).
fn compute_hash(chrom_order: &[String], chrom_size: &[u32], positions: &[Vec<u32>]) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut h = FNV_OFFSET;
    let mut feed = |bytes: &[u8]| {
        for &b in bytes {
            h ^= u64::from(b);
            h = h.wrapping_mul(FNV_PRIME);
        }
    };

    for (name, &size) in chrom_order.iter().zip(chrom_size.iter()) {
        feed(name.as_bytes());
        feed(&size.to_le_bytes());
    }
    for pos in positions {
        for &p in pos {
            feed(&p.to_le_bytes());
        }
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy_index() -> GenomeIndex {
        GenomeIndex::new(
            "toyGenome",
            vec!["chr1".to_string(), "chr2".to_string()],
            vec![1000, 500],
            vec![vec![10, 50, 100, 900], vec![5, 400]],
        )
    }

    #[test]
    fn test_construction_invariants() {
        let g = toy_index();
        assert_eq!(g.n_cpgs, 6);
        assert_eq!(g.chrom_offset, vec![0, 4]);
        assert_eq!(g.n_chroms(), 2);
        assert!(g.is_consistent());
    }

    #[test]
    fn test_make_query_basic() {
        let g = toy_index();
        let intervals = vec![
            GenomicInterval::new(0, 0, 60),   // covers 10, 50 -> offsets 0..2
            GenomicInterval::new(1, 0, 500),  // covers 5, 400 -> offsets 4..6
            GenomicInterval::new(0, 200, 300), // covers nothing
        ];
        let q = g.make_query(&intervals).unwrap();
        assert_eq!(q.len(), 3);
        assert_eq!(q.get(0), (0, 2));
        assert_eq!(q.get(1), (4, 6));
        assert_eq!(q.get(2), (2, 2));
    }

    #[test]
    fn test_make_query_unknown_chrom() {
        let g = toy_index();
        let bad = vec![GenomicInterval::new(5, 0, 10)];
        assert!(g.make_query(&bad).is_err());
    }

    #[test]
    fn test_n_bins_and_windows() {
        let g = toy_index();
        // chr1: ceil(1000/300)=4, chr2: ceil(500/300)=2 -> 6
        assert_eq!(g.n_bins(300), 6);
        // window starts stepped by 200: chr1 ceil(1000/200)=5, chr2 ceil(500/200)=3 -> 8
        assert_eq!(g.n_windows(400, 200), 8);
    }

    #[test]
    fn test_read_write_round_trip() {
        let g = toy_index();
        let dir = tempfile::tempdir().unwrap();
        g.write(dir.path(), "toyGenome").unwrap();
        let g2 = GenomeIndex::read(dir.path(), "toyGenome").unwrap();
        assert_eq!(g2.hash, g.hash);
        assert_eq!(g2.n_cpgs, g.n_cpgs);
        assert_eq!(g2.chrom_order, g.chrom_order);
        assert_eq!(g2.positions_for(0), g.positions_for(0));
    }

    #[test]
    fn test_hash_stable_across_rebuild() {
        let a = toy_index();
        let b = toy_index();
        assert_eq!(a.hash, b.hash);
    }
}
