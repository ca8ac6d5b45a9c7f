use std::collections::{BTreeMap, BTreeSet};

use super::{
    error::{AnalysisError, Result},
    model::{ClusterId, Partition},
};

/// A predicted partition relabelled into the ground-truth label space.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelAlignment<L> {
    /// Identifiers are indices into `categories`; noise stays noise.
    pub partition: Partition,
    /// Distinct true labels, ascending.
    pub categories: Vec<L>,
}

impl<L> LabelAlignment<L> {
    /// The true label assigned to `row`, or `None` for noise.
    pub fn label_of(&self, row: usize) -> Option<&L> {
        let id = self.partition.get(row)?;
        if id.is_noise() {
            return None;
        }
        self.categories.get(id.value() as usize)
    }
}

/// Relabel each predicted cluster with its majority true label.
///
/// Presentation only: several clusters may land on the same label, and the
/// external metrics are computed on the raw partition instead.
///
/// The returned identifiers are positions in the sorted distinct true
/// labels, not the labels themselves: truth `[5, 5, 7, 7]` aligns to
/// `[0, 0, 1, 1]`. Use [`align_labels_with_categories`] and
/// [`LabelAlignment::label_of`] to get the label values back.
pub fn align_labels<L: Ord + Clone>(true_labels: &[L], partition: &Partition) -> Result<Partition> {
    align_labels_with_categories(true_labels, partition).map(|a| a.partition)
}

/// Like [`align_labels`], also returning the category list the new
/// identifiers index into. Ties in the majority vote go to the smaller label.
pub fn align_labels_with_categories<L: Ord + Clone>(
    true_labels: &[L],
    partition: &Partition,
) -> Result<LabelAlignment<L>> {
    if true_labels.len() != partition.len() {
        return Err(AnalysisError::LengthMismatch {
            expected: true_labels.len(),
            found: partition.len(),
        });
    }

    let categories: Vec<L> = true_labels
        .iter()
        .cloned()
        .collect::<BTreeSet<L>>()
        .into_iter()
        .collect();

    let mut votes: BTreeMap<ClusterId, BTreeMap<&L, usize>> = BTreeMap::new();
    for (label, id) in true_labels.iter().zip(partition.iter()) {
        if id.is_signal() {
            *votes.entry(*id).or_default().entry(label).or_default() += 1;
        }
    }

    let mapping: BTreeMap<ClusterId, ClusterId> = votes
        .into_iter()
        .filter_map(|(id, tally)| {
            // BTreeMap iterates labels ascending, so a strict comparison keeps
            // the smallest label among equal counts.
            let winner = tally
                .into_iter()
                .fold(None, |best: Option<(&L, usize)>, (label, count)| match best {
                    Some((_, best_count)) if best_count >= count => best,
                    _ => Some((label, count)),
                })?
                .0;
            let index = categories.binary_search(winner).ok()?;
            Some((id, ClusterId::from(index as i64)))
        })
        .collect();

    let aligned = partition
        .iter()
        .map(|id| mapping.get(id).copied().unwrap_or(*id))
        .collect();

    Ok(LabelAlignment {
        partition: aligned,
        categories,
    })
}
