//! Request compute phase (§4.5 `handle_request`/`compute`): validates a
//! parsed request, resolves the genome index and named methylomes through
//! the shared caches, and aggregates levels into a [`LevelContainerMD`].
//!
//! Owns both caches and is itself read-only after construction (§5
//! "Shared-resource policy"), so a single `Arc<RequestHandler>` is cloned
//! into every connection task.

use std::path::PathBuf;
use std::sync::Arc;

use crate::error::ServerError;
use crate::genome_index::GenomeIndex;
use crate::genome_index_set::GenomeIndexSet;
use crate::level_element::{CoveredLevelElement, LevelContainerMD, LevelElement};
use crate::methylome::Methylome;
use crate::methylome_set::MethylomeSet;
use crate::parallel;
use crate::query::QueryContainer;
use crate::request::Request;

/// The two shapes a computed response body can take, selected by whether
/// the request's type is a `*_covered` variant (§3 "LevelElement variants").
pub enum ComputedLevels {
    Uncovered(LevelContainerMD<LevelElement>),
    Covered(LevelContainerMD<CoveredLevelElement>),
}

impl ComputedLevels {
    #[must_use]
    pub fn n_rows(&self) -> usize {
        match self {
            Self::Uncovered(c) => c.n_rows(),
            Self::Covered(c) => c.n_rows(),
        }
    }

    #[must_use]
    pub fn n_cols(&self) -> usize {
        match self {
            Self::Uncovered(c) => c.n_cols(),
            Self::Covered(c) => c.n_cols(),
        }
    }

    #[must_use]
    pub fn n_bytes(&self) -> u32 {
        match self {
            Self::Uncovered(c) => c.n_bytes(LevelElement::WIRE_SIZE),
            Self::Covered(c) => c.n_bytes(CoveredLevelElement::WIRE_SIZE),
        }
    }

    pub fn write_wire<W: std::io::Write>(&self, w: &mut W) -> std::io::Result<()> {
        match self {
            Self::Uncovered(c) => c.write_wire(w),
            Self::Covered(c) => c.write_wire(w),
        }
    }
}

pub struct RequestHandler {
    pub genome_index_set: GenomeIndexSet,
    pub methylome_set: MethylomeSet,
}

impl RequestHandler {
    #[must_use]
    pub fn new(index_dir: impl Into<PathBuf>, methylome_dir: impl Into<PathBuf>, max_live_indexes: u32, max_live_methylomes: u32) -> Self {
        Self {
            genome_index_set: GenomeIndexSet::new(index_dir, max_live_indexes),
            methylome_set: MethylomeSet::new(methylome_dir, max_live_methylomes),
        }
    }

    /// §4.5 `compute` for bins/windows requests: validate, resolve index and
    /// methylomes, aggregate. Must not be called with an intervals request;
    /// use [`Self::handle_intervals`] for those, since their row count comes
    /// from a query payload rather than from `bin_size`/`window_size`.
    pub async fn handle(&self, request: &Request) -> Result<ComputedLevels, ServerError> {
        debug_assert!(!request.request_type.is_intervals());
        let (index, methylomes) = self.validate_and_resolve(request).await?;
        let refs: Vec<&Methylome> = methylomes.iter().map(Arc::as_ref).collect();

        let n_rows = if request.request_type.is_bins() {
            index.n_bins(request.bin_size()) as usize
        } else {
            index.n_windows(request.window_size(), request.window_step()) as usize
        };

        Ok(compute_levels(request, &index, &refs, n_rows))
    }

    /// Full compute path for intervals requests, where the query payload has
    /// already been read and parsed by the connection state machine (§4.5
    /// states 3-4).
    pub async fn handle_intervals(&self, request: &Request, query: &QueryContainer) -> Result<ComputedLevels, ServerError> {
        debug_assert!(request.request_type.is_intervals());
        let (_index, methylomes) = self.validate_and_resolve(request).await?;
        let refs: Vec<&Methylome> = methylomes.iter().map(Arc::as_ref).collect();

        Ok(compute_levels_from_query(request, &refs, query))
    }

    /// §4.5 `handle_request`: validate the request (including
    /// `too_many_intervals`) and resolve the genome index and every named
    /// methylome *before* any query payload is read off the wire. The
    /// connection state machine calls this ahead of its `read_query` state
    /// precisely so that an oversized, not-yet-validated `n_intervals`
    /// never drives an allocation — mirroring the original, which runs the
    /// equivalent of this resolution inside `read_request` and only then
    /// decides whether to read the query payload at all.
    pub async fn validate_and_resolve(&self, request: &Request) -> Result<(Arc<GenomeIndex>, Vec<Arc<Methylome>>), ServerError> {
        request.validate()?;
        let index = self.resolve_index(request).await?;
        let methylomes = self.resolve_methylomes(request).await?;
        Ok((index, methylomes))
    }

    async fn resolve_index(&self, request: &Request) -> Result<Arc<GenomeIndex>, ServerError> {
        self.genome_index_set
            .get_by_hash(request.index_hash)
            .await
            .map_err(|_| ServerError::IndexNotFound)
    }

    async fn resolve_methylomes(&self, request: &Request) -> Result<Vec<Arc<Methylome>>, ServerError> {
        let mut methylomes = Vec::with_capacity(request.methylome_names.len());
        for name in &request.methylome_names {
            let m = self
                .methylome_set
                .get(name)
                .await
                .map_err(|_| ServerError::MethylomeNotFound)?;
            if m.metadata.index_hash != request.index_hash {
                return Err(ServerError::InconsistentGenomes);
            }
            methylomes.push(m);
        }
        Ok(methylomes)
    }
}

pub(crate) fn compute_levels(request: &Request, index: &GenomeIndex, methylomes: &[&Methylome], n_rows: usize) -> ComputedLevels {
    let covered = request.request_type.is_covered();

    if request.request_type.is_bins() {
        let bin_size = request.bin_size();
        if covered {
            ComputedLevels::Covered(parallel::fill_columns(n_rows, methylomes, |m| {
                m.data.get_levels_bins_covered(index, bin_size)
            }))
        } else {
            ComputedLevels::Uncovered(parallel::fill_columns(n_rows, methylomes, |m| m.data.get_levels_bins(index, bin_size)))
        }
    } else {
        let (window_size, window_step) = (request.window_size(), request.window_step());
        if covered {
            ComputedLevels::Covered(parallel::fill_columns(n_rows, methylomes, |m| {
                m.data.get_levels_windows_covered(index, window_size, window_step)
            }))
        } else {
            ComputedLevels::Uncovered(parallel::fill_columns(n_rows, methylomes, |m| {
                m.data.get_levels_windows(index, window_size, window_step)
            }))
        }
    }
}

/// Intervals/intervals_covered requests carry a [`QueryContainer`] read off
/// the wire rather than derived from `bin_size`/`window_size`.
pub(crate) fn compute_levels_from_query(request: &Request, methylomes: &[&Methylome], query: &QueryContainer) -> ComputedLevels {
    if request.request_type.is_covered() {
        ComputedLevels::Covered(parallel::fill_columns(query.len(), methylomes, |m| m.data.get_levels_covered(query)))
    } else {
        ComputedLevels::Uncovered(parallel::fill_columns(query.len(), methylomes, |m| m.data.get_levels(query)))
    }
}
