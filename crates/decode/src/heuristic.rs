//! FROM-clause correction for wildcard-only predictions.
//!
//! Models often predict a plausible but wrong table for queries such as
//! `SELECT count(*) FROM t`, where no column pins down the table. When the
//! wildcard is the only column referenced outside sub-queries, the predicted
//! FROM is set aside in `p_from` and the unparser derives one from the schema.

use spider::SqlTree;

/// Relocate `from` to `p_from` when the tree references only `*`.
///
/// Returns whether the tree was changed. Trees that reference any other
/// column, or no column at all, are left untouched.
pub fn apply_from_heuristic(tree: &mut SqlTree) -> bool {
    if !tree.references_only_wildcard() {
        return false;
    }
    match tree.from.take() {
        Some(from) => {
            tree.p_from = Some(from);
            true
        }
        None => false,
    }
}
