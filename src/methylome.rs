//! A methylome: [`MethylomeData`] plus the metadata that ties it to a
//! specific genome index.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::genome_index::GenomeIndex;
use crate::methylome_data::MethylomeData;

const FILE_VERSION: &str = "1";

/// JSON sidecar persisted alongside the (optionally compressed) data file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethylomeMetadata {
    pub index_hash: u64,
    pub n_cpgs: u64,
    pub is_compressed: bool,
    pub methylome_hash: u64,
    pub version: String,
    pub creation_time: String,
}

/// A methylome: per-CpG data plus the metadata that identifies the genome
/// index it is consistent with. Loaded lazily and cached by
/// [`crate::methylome_set::MethylomeSet`].
#[derive(Debug, Clone)]
pub struct Methylome {
    pub metadata: MethylomeMetadata,
    pub data: MethylomeData,
}

impl Methylome {
    fn data_path(dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{name}.m16"))
    }

    fn meta_path(dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{name}.m16.json"))
    }

    /// Construct a fresh methylome from in-memory data, computing its
    /// metadata against the given index. `creation_time` is supplied by the
    /// caller (this crate does not read the system clock internally, to stay
    /// consistent with the no-`Date.now()`-equivalent discipline used
    /// elsewhere for reproducible construction).
    #[must_use]
    pub fn build(data: MethylomeData, index: &GenomeIndex, is_compressed: bool, creation_time: impl Into<String>) -> Self {
        let methylome_hash = compute_methylome_hash(&data);
        let metadata = MethylomeMetadata {
            index_hash: index.hash,
            n_cpgs: data.len() as u64,
            is_compressed,
            methylome_hash,
            version: FILE_VERSION.to_string(),
            creation_time: creation_time.into(),
        };
        Self { metadata, data }
    }

    /// §4.2 `is_consistent`: true iff `metadata.index_hash == index.hash`.
    #[must_use]
    pub fn is_consistent(&self, index: &GenomeIndex) -> bool {
        self.metadata.index_hash == index.hash
    }

    /// §4.2 `add`: element-wise saturated addition; requires equal
    /// `index_hash` and `n_cpgs`.
    pub fn add(&self, other: &Self) -> Result<Self, StorageError> {
        if self.metadata.index_hash != other.metadata.index_hash {
            return Err(StorageError::InconsistentGenomes(
                self.metadata.index_hash,
                other.metadata.index_hash,
            ));
        }
        let data = self
            .data
            .add(&other.data)
            .ok_or(StorageError::LengthMismatch {
                expected: self.metadata.n_cpgs,
                actual: other.metadata.n_cpgs,
            })?;
        let mut metadata = self.metadata.clone();
        metadata.methylome_hash = compute_methylome_hash(&data);
        Ok(Self { metadata, data })
    }

    /// Write metadata then data, atomically with respect to the pair (temp
    /// file + rename in the target directory, same discipline as
    /// [`GenomeIndex::write`]).
    ///
    /// [`GenomeIndex::write`]: crate::genome_index::GenomeIndex::write
    pub fn write(&self, dir: &Path, name: &str) -> Result<(), StorageError> {
        let bytes = if self.metadata.is_compressed {
            self.data.to_compressed_bytes()?
        } else {
            self.data.to_raw_bytes()
        };
        write_atomic(&Self::data_path(dir, name), &bytes)?;

        let json = serde_json::to_vec_pretty(&self.metadata)?;
        write_atomic(&Self::meta_path(dir, name), &json)?;
        Ok(())
    }

    /// Read metadata first, then map/load the data file, decompressing if
    /// `is_compressed`. Integrity check: `length(data) == metadata.n_cpgs`.
    pub fn read(dir: &Path, name: &str) -> Result<Self, StorageError> {
        let meta_bytes = fs::read(Self::meta_path(dir, name))?;
        let metadata: MethylomeMetadata = serde_json::from_slice(&meta_bytes)?;

        let raw_bytes = fs::read(Self::data_path(dir, name))?;
        let data = if metadata.is_compressed {
            MethylomeData::from_compressed_bytes(&raw_bytes)?
        } else {
            MethylomeData::from_raw_bytes(&raw_bytes)
        };

        if data.len() as u64 != metadata.n_cpgs {
            return Err(StorageError::LengthMismatch {
                expected: metadata.n_cpgs,
                actual: data.len() as u64,
            });
        }

        Ok(Self { metadata, data })
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = tempfile::NamedTempFile::new_in(dir)?;
    fs::write(tmp.path(), bytes)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Content hash of the methylome's data, independent of the genome-index
/// hash; used only to detect accidental data corruption or duplication, not
/// as a wire-protocol identity.
fn compute_methylome_hash(data: &MethylomeData) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut h = FNV_OFFSET;
    for &(m, u) in data.as_slice() {
        for b in m.to_le_bytes().iter().chain(u.to_le_bytes().iter()) {
            h ^= u64::from(*b);
            h = h.wrapping_mul(FNV_PRIME);
        }
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy_index() -> GenomeIndex {
        GenomeIndex::new(
            "toy",
            vec!["chr1".to_string()],
            vec![1000],
            vec![vec![10, 50, 100, 900]],
        )
    }

    #[test]
    fn test_build_and_consistency() {
        let index = toy_index();
        let data = MethylomeData::new(vec![(1, 1), (2, 2), (3, 3), (4, 4)]);
        let m = Methylome::build(data, &index, true, "2026-01-01T00:00:00Z");
        assert!(m.is_consistent(&index));
        assert_eq!(m.metadata.n_cpgs, 4);
    }

    #[test]
    fn test_write_read_round_trip_compressed() {
        let index = toy_index();
        let data = MethylomeData::new(vec![(1, 1), (2, 2), (3, 3), (4, 4)]);
        let m = Methylome::build(data, &index, true, "2026-01-01T00:00:00Z");

        let dir = tempfile::tempdir().unwrap();
        m.write(dir.path(), "SRX000001").unwrap();
        let m2 = Methylome::read(dir.path(), "SRX000001").unwrap();
        assert_eq!(m.data, m2.data);
        assert_eq!(m.metadata.index_hash, m2.metadata.index_hash);
    }

    #[test]
    fn test_write_read_round_trip_uncompressed() {
        let index = toy_index();
        let data = MethylomeData::new(vec![(9, 0), (0, 9)]);
        let m = Methylome::build(data, &index, false, "2026-01-01T00:00:00Z");

        let dir = tempfile::tempdir().unwrap();
        m.write(dir.path(), "SRX000002").unwrap();
        let m2 = Methylome::read(dir.path(), "SRX000002").unwrap();
        assert_eq!(m.data, m2.data);
    }

    #[test]
    fn test_add_requires_same_index() {
        let index_a = toy_index();
        let index_b = GenomeIndex::new("other", vec!["chr1".to_string()], vec![2000], vec![vec![1, 2]]);
        let a = Methylome::build(MethylomeData::new(vec![(1, 1), (1, 1)]), &index_a, false, "t");
        let b = Methylome::build(MethylomeData::new(vec![(1, 1), (1, 1)]), &index_b, false, "t");
        assert!(a.add(&b).is_err());
    }

    #[test]
    fn test_add_saturates() {
        let index = toy_index();
        let a = Methylome::build(MethylomeData::new(vec![(u16::MAX, 0)]), &index, false, "t");
        let b = Methylome::build(MethylomeData::new(vec![(10, 0)]), &index, false, "t");
        let sum = a.add(&b).unwrap();
        assert_eq!(sum.data.as_slice()[0].0, u16::MAX);
    }
}
