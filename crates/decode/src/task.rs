use serde::{Deserialize, Serialize};
use spider::{Dataset, Example, PreprocessedExample, PreprocessedStore};
use std::ops::Range;

/// One unit of decode work: an example paired with its preprocessed form.
///
/// Tasks are self-contained so they can cross a process boundary as a single
/// JSON line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodeTask {
    pub beam_size: usize,
    pub include_history: bool,
    /// Dataset index; never renumbered for sub-range runs.
    pub index: usize,
    pub example: Example,
    pub preprocessed: PreprocessedExample,
}

/// Clamp `start .. start + limit` to a section of `len` examples.
pub fn task_range(len: usize, start_offset: usize, limit: Option<usize>) -> Range<usize> {
    let start = start_offset.min(len);
    let end = match limit {
        Some(limit) => start.saturating_add(limit).min(len),
        None => len,
    };
    start..end
}

/// Build the tasks for `range`, pairing each example with its preprocessed
/// form by index. The store must already be paired with the dataset.
pub fn build_tasks(
    dataset: &Dataset,
    preprocessed: &PreprocessedStore,
    range: Range<usize>,
    beam_size: usize,
    include_history: bool,
) -> Vec<DecodeTask> {
    range
        .filter_map(|index| {
            let example = dataset.get(index)?;
            let preprocessed = preprocessed.get(index)?;
            Some(DecodeTask {
                beam_size,
                include_history,
                index,
                example: example.clone(),
                preprocessed: preprocessed.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_range() {
        assert_eq!(task_range(20, 0, None), 0..20);
        assert_eq!(task_range(20, 5, Some(3)), 5..8);
        assert_eq!(task_range(20, 18, Some(10)), 18..20);
        assert_eq!(task_range(20, 25, Some(3)), 20..20);
        assert_eq!(task_range(20, 0, Some(0)), 0..0);
        assert_eq!(task_range(20, 3, Some(usize::MAX)), 3..20);
    }
}
