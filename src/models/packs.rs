use serde::{Deserialize, Serialize};

use super::size::{PackRatio, SizeDistribution};

/// Result of splitting a size distribution into whole master packs plus a
/// loose remainder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackBreakdown {
    pub packs: u32,
    pub loose_total: u32,
    pub loose_by_size: SizeDistribution,
}

/// Decomposes per-size quantities into whole master packs and loose pieces.
///
/// The pack count is the minimum of `floor(qty / ratio)` over every size with
/// a positive ratio; sizes with ratio zero never limit pack formation and
/// keep their full quantity loose. With no constrained size at all, everything
/// is loose.
///
/// Pure and deterministic; it is re-run on every display of a stage or stock
/// record rather than stored.
pub fn decompose(qty: &SizeDistribution, ratio: &PackRatio) -> PackBreakdown {
    let packs = ratio
        .constrained()
        .map(|(label, per_pack)| qty.get(label) / per_pack)
        .min()
        .unwrap_or(0);

    if packs == 0 {
        return PackBreakdown {
            packs: 0,
            loose_total: qty.total(),
            loose_by_size: qty.clone(),
        };
    }

    let mut loose_by_size = SizeDistribution::new();
    for (label, count) in qty.iter() {
        loose_by_size.set(label, count - packs * ratio.get(label));
    }

    PackBreakdown {
        packs,
        loose_total: loose_by_size.total(),
        loose_by_size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::size::SizeLabel;

    #[test]
    fn smallest_size_governs_pack_count() {
        let qty = SizeDistribution::from_pairs([
            (SizeLabel::M, 10),
            (SizeLabel::L, 8),
            (SizeLabel::Xl, 4),
        ]);
        let ratio = PackRatio::from_pairs([
            (SizeLabel::M, 2),
            (SizeLabel::L, 2),
            (SizeLabel::Xl, 2),
        ]);

        let breakdown = decompose(&qty, &ratio);
        assert_eq!(breakdown.packs, 2);
        assert_eq!(breakdown.loose_by_size.get(SizeLabel::M), 6);
        assert_eq!(breakdown.loose_by_size.get(SizeLabel::L), 4);
        assert_eq!(breakdown.loose_by_size.get(SizeLabel::Xl), 0);
        assert_eq!(breakdown.loose_total, 10);
    }

    #[test]
    fn empty_ratio_leaves_everything_loose() {
        let qty = SizeDistribution::from_pairs([(SizeLabel::S, 7), (SizeLabel::M, 3)]);
        let breakdown = decompose(&qty, &PackRatio::new());
        assert_eq!(breakdown.packs, 0);
        assert_eq!(breakdown.loose_total, 10);
        assert_eq!(breakdown.loose_by_size, qty);
    }

    #[test]
    fn size_below_requirement_forces_zero_packs() {
        let qty = SizeDistribution::from_pairs([(SizeLabel::M, 9), (SizeLabel::L, 1)]);
        let ratio = PackRatio::from_pairs([(SizeLabel::M, 3), (SizeLabel::L, 2)]);

        let breakdown = decompose(&qty, &ratio);
        assert_eq!(breakdown.packs, 0);
        assert_eq!(breakdown.loose_total, 10);
    }

    #[test]
    fn unconstrained_size_stays_loose() {
        let qty = SizeDistribution::from_pairs([(SizeLabel::M, 6), (SizeLabel::Free, 5)]);
        let ratio = PackRatio::from_pairs([(SizeLabel::M, 3), (SizeLabel::Free, 0)]);

        let breakdown = decompose(&qty, &ratio);
        assert_eq!(breakdown.packs, 2);
        assert_eq!(breakdown.loose_by_size.get(SizeLabel::M), 0);
        assert_eq!(breakdown.loose_by_size.get(SizeLabel::Free), 5);
        assert_eq!(breakdown.loose_total, 5);
    }

    #[test]
    fn empty_distribution_decomposes_to_nothing() {
        let ratio = PackRatio::from_pairs([(SizeLabel::M, 2)]);
        let breakdown = decompose(&SizeDistribution::new(), &ratio);
        assert_eq!(breakdown.packs, 0);
        assert_eq!(breakdown.loose_total, 0);
    }

    #[test]
    fn decompose_is_deterministic() {
        let qty = SizeDistribution::from_pairs([(SizeLabel::S, 13), (SizeLabel::M, 27)]);
        let ratio = PackRatio::from_pairs([(SizeLabel::S, 4), (SizeLabel::M, 5)]);
        assert_eq!(decompose(&qty, &ratio), decompose(&qty, &ratio));
    }
}
