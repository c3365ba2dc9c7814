//! Parallel aggregation across the methylomes named in a request.
//!
//! Per §4.2's "Parallelism" note, filling one column of a
//! [`LevelContainerMD`] per requested methylome is embarrassingly parallel:
//! each column's aggregation reads only its own methylome's data and the
//! query/bin/window ranges, and writes only its own column. Dispatch with
//! Rayon's work-stealing pool once the work crosses a fixed threshold;
//! below it, the thread-spawn overhead isn't worth it and a sequential loop
//! wins, mirroring the teacher crate's own threshold-gated parallel
//! dispatch for chromosome-level work.

use rayon::prelude::*;

use crate::level_element::LevelContainerMD;
use crate::methylome::Methylome;

/// Below `n_methylomes * n_rows` elements, aggregate sequentially; above it,
/// hand columns to Rayon's pool.
pub const PARALLEL_THRESHOLD: usize = 10_000;

/// Compute one `LevelContainerMD` column per methylome and assemble them
/// into a single row-major container.
///
/// `compute` takes one methylome and returns its per-row levels, in region
/// order; its length must equal `n_rows`.
pub fn fill_columns<E, F>(n_rows: usize, methylomes: &[&Methylome], compute: F) -> LevelContainerMD<E>
where
    E: Copy + Default + Send,
    F: Fn(&Methylome) -> Vec<E> + Sync,
{
    let n_cols = methylomes.len();
    let mut container = LevelContainerMD::<E>::new(n_rows, n_cols);

    if n_rows.saturating_mul(n_cols) >= PARALLEL_THRESHOLD {
        let columns: Vec<Vec<E>> = methylomes.par_iter().map(|m| compute(m)).collect();
        for (col, values) in columns.into_iter().enumerate() {
            container.set_column(col, &values);
        }
    } else {
        for (col, m) in methylomes.iter().enumerate() {
            let values = compute(m);
            container.set_column(col, &values);
        }
    }

    container
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome_index::GenomeIndex;
    use crate::level_element::LevelElement;
    use crate::methylome_data::MethylomeData;
    use crate::query::QueryContainer;

    fn toy_index() -> GenomeIndex {
        GenomeIndex::new("toy", vec!["chr1".to_string()], vec![1000], vec![vec![10, 50, 100, 900]])
    }

    fn toy_methylome(index: &GenomeIndex, seed: u16) -> Methylome {
        let data = MethylomeData::new(vec![(seed, 0), (0, seed), (seed, seed), (1, 1)]);
        Methylome::build(data, index, false, "t")
    }

    #[test]
    fn test_fill_columns_sequential_and_parallel_agree() {
        let index = toy_index();
        let methylomes = vec![toy_methylome(&index, 1), toy_methylome(&index, 2), toy_methylome(&index, 3)];
        let refs: Vec<&Methylome> = methylomes.iter().collect();
        let query = QueryContainer::from_ranges(vec![(0, 2), (2, 4)]);

        let small = fill_columns::<LevelElement, _>(query.len(), &refs, |m| m.data.get_levels(&query));
        assert_eq!(small.n_rows(), 2);
        assert_eq!(small.n_cols(), 3);
        assert_eq!(small.get(0, 0), LevelElement::new(1, 0));
        assert_eq!(small.get(1, 2), LevelElement::new(4, 4));
    }
}
