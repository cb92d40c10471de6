use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

/// Closed set of garment size labels.
///
/// Distributions and pack ratios are keyed by this enum rather than open
/// strings, so an unknown label is rejected at deserialization time instead
/// of silently creating a new bucket.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum SizeLabel {
    Xs,
    S,
    M,
    L,
    Xl,
    Xxl,
    Xxxl,
    Free,
}

impl SizeLabel {
    /// All labels in their fixed display order.
    pub fn all() -> impl Iterator<Item = SizeLabel> {
        SizeLabel::iter()
    }
}

/// Per-size piece counts for one processing step.
///
/// Missing labels count as zero; negative counts are unrepresentable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SizeDistribution(BTreeMap<SizeLabel, u32>);

impl SizeDistribution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (SizeLabel, u32)>) -> Self {
        Self(pairs.into_iter().collect())
    }

    pub fn get(&self, label: SizeLabel) -> u32 {
        self.0.get(&label).copied().unwrap_or(0)
    }

    pub fn set(&mut self, label: SizeLabel, count: u32) {
        if count == 0 {
            self.0.remove(&label);
        } else {
            self.0.insert(label, count);
        }
    }

    pub fn total(&self) -> u32 {
        self.0.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Entries with a non-zero count, in label order.
    pub fn iter(&self) -> impl Iterator<Item = (SizeLabel, u32)> + '_ {
        self.0.iter().map(|(label, count)| (*label, *count))
    }

    /// Labels appearing in either distribution, in order.
    pub fn labels_with(&self, other: &SizeDistribution) -> Vec<SizeLabel> {
        let mut labels: Vec<SizeLabel> = self.0.keys().copied().collect();
        for label in other.0.keys() {
            if !labels.contains(label) {
                labels.push(*label);
            }
        }
        labels.sort();
        labels
    }
}

impl FromIterator<(SizeLabel, u32)> for SizeDistribution {
    fn from_iter<I: IntoIterator<Item = (SizeLabel, u32)>>(iter: I) -> Self {
        Self::from_pairs(iter)
    }
}

/// Pieces-per-pack requirement per size.
///
/// A ratio of zero means the size never participates in pack formation and
/// its full quantity stays loose.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackRatio(BTreeMap<SizeLabel, u32>);

impl PackRatio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (SizeLabel, u32)>) -> Self {
        Self(pairs.into_iter().collect())
    }

    pub fn get(&self, label: SizeLabel) -> u32 {
        self.0.get(&label).copied().unwrap_or(0)
    }

    /// Sizes with a positive ratio, in label order.
    pub fn constrained(&self) -> impl Iterator<Item = (SizeLabel, u32)> + '_ {
        self.0
            .iter()
            .filter(|(_, ratio)| **ratio > 0)
            .map(|(label, ratio)| (*label, *ratio))
    }

    /// Total pieces that one whole master pack contains.
    pub fn pieces_per_pack(&self) -> u32 {
        self.0.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|ratio| *ratio == 0)
    }
}

impl FromIterator<(SizeLabel, u32)> for PackRatio {
    fn from_iter<I: IntoIterator<Item = (SizeLabel, u32)>>(iter: I) -> Self {
        Self::from_pairs(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_label_reads_as_zero() {
        let dist = SizeDistribution::from_pairs([(SizeLabel::M, 10)]);
        assert_eq!(dist.get(SizeLabel::M), 10);
        assert_eq!(dist.get(SizeLabel::Xl), 0);
        assert_eq!(dist.total(), 10);
    }

    #[test]
    fn serializes_as_uppercase_object() {
        let dist = SizeDistribution::from_pairs([(SizeLabel::M, 4), (SizeLabel::Xxl, 2)]);
        let json = serde_json::to_value(&dist).unwrap();
        assert_eq!(json, serde_json::json!({"M": 4, "XXL": 2}));
    }

    #[test]
    fn unknown_label_is_rejected() {
        let result: Result<SizeDistribution, _> =
            serde_json::from_value(serde_json::json!({"MEDIUM": 3}));
        assert!(result.is_err());
    }

    #[test]
    fn negative_count_is_rejected() {
        let result: Result<SizeDistribution, _> =
            serde_json::from_value(serde_json::json!({"M": -1}));
        assert!(result.is_err());
    }

    #[test]
    fn pieces_per_pack_sums_ratios() {
        let ratio = PackRatio::from_pairs([
            (SizeLabel::S, 2),
            (SizeLabel::M, 2),
            (SizeLabel::L, 2),
            (SizeLabel::Free, 0),
        ]);
        assert_eq!(ratio.pieces_per_pack(), 6);
        assert_eq!(ratio.constrained().count(), 3);
    }
}
