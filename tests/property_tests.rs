//! Property-based tests for the decomposition and reconciliation core.
//!
//! These use proptest to verify conservation invariants across a wide range
//! of inputs, catching edge cases that unit tests might miss.

use proptest::prelude::*;
use rust_decimal::Decimal;
use stitchflow_api::models::{decompose, reconcile, PackRatio, SizeDistribution, SizeLabel};

const LABELS: [SizeLabel; 5] = [
    SizeLabel::S,
    SizeLabel::M,
    SizeLabel::L,
    SizeLabel::Xl,
    SizeLabel::Xxl,
];

fn distribution_strategy(max: u32) -> impl Strategy<Value = SizeDistribution> {
    proptest::collection::vec(0..=max, LABELS.len())
        .prop_map(|counts| LABELS.iter().copied().zip(counts).collect())
}

fn ratio_strategy() -> impl Strategy<Value = PackRatio> {
    proptest::collection::vec(0..8u32, LABELS.len())
        .prop_map(|ratios| LABELS.iter().copied().zip(ratios).collect())
}

// Generates sent with per-size received <= sent and mistake <= received.
fn receipt_strategy(
) -> impl Strategy<Value = (SizeDistribution, SizeDistribution, SizeDistribution)> {
    proptest::collection::vec(0..500u32, LABELS.len())
        .prop_flat_map(|sent| {
            let received: Vec<_> = sent.iter().map(|s| 0..=*s).collect();
            (Just(sent), received)
        })
        .prop_flat_map(|(sent, received)| {
            let mistake: Vec<_> = received.iter().map(|r| 0..=*r).collect();
            (Just(sent), Just(received), mistake)
        })
        .prop_map(|(sent, received, mistake)| {
            (
                LABELS.iter().copied().zip(sent).collect(),
                LABELS.iter().copied().zip(received).collect(),
                LABELS.iter().copied().zip(mistake).collect(),
            )
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    // Every piece ends up either inside a whole pack or loose.
    #[test]
    fn decomposition_conserves_every_size(
        qty in distribution_strategy(1_000),
        ratio in ratio_strategy(),
    ) {
        let breakdown = decompose(&qty, &ratio);
        for label in LABELS {
            prop_assert_eq!(
                breakdown.packs * ratio.get(label) + breakdown.loose_by_size.get(label),
                qty.get(label),
                "size {} not conserved", label
            );
        }
        prop_assert_eq!(breakdown.loose_by_size.total(), breakdown.loose_total);
        prop_assert_eq!(
            breakdown.packs * ratio.pieces_per_pack() + breakdown.loose_total,
            qty.total()
        );
    }

    #[test]
    fn decomposition_is_idempotent(
        qty in distribution_strategy(1_000),
        ratio in ratio_strategy(),
    ) {
        prop_assert_eq!(decompose(&qty, &ratio), decompose(&qty, &ratio));
    }

    #[test]
    fn loose_never_exceeds_input(
        qty in distribution_strategy(1_000),
        ratio in ratio_strategy(),
    ) {
        let breakdown = decompose(&qty, &ratio);
        prop_assert!(breakdown.loose_total <= qty.total());
        for label in LABELS {
            prop_assert!(breakdown.loose_by_size.get(label) <= qty.get(label));
        }
    }

    // received + shortage == sent, for every size, always.
    #[test]
    fn reconciliation_conserves_sent_pieces(
        (sent, received, mistake) in receipt_strategy(),
    ) {
        let result = reconcile(&sent, &received, &mistake, Decimal::new(125, 1)).unwrap();
        for label in LABELS {
            prop_assert_eq!(
                received.get(label) + result.shortage.get(label),
                sent.get(label)
            );
        }
        prop_assert_eq!(result.shortage.total(), result.shortage_total);
    }

    // Growing the mistake pile can never shrink the debit.
    #[test]
    fn debit_is_monotone_in_mistakes(
        (sent, received, mistake) in receipt_strategy(),
    ) {
        let rate = Decimal::new(75, 1);
        let with_mistakes = reconcile(&sent, &received, &mistake, rate).unwrap();
        let without = reconcile(&sent, &received, &SizeDistribution::new(), rate).unwrap();
        prop_assert!(with_mistakes.debit_amount >= without.debit_amount);
    }

    // Receiving less can only raise the shortage debit.
    #[test]
    fn debit_is_monotone_in_shortage(
        (sent, received, _mistake) in receipt_strategy(),
    ) {
        let rate = Decimal::new(10, 0);
        let actual = reconcile(&sent, &received, &SizeDistribution::new(), rate).unwrap();
        let nothing = reconcile(
            &sent,
            &SizeDistribution::new(),
            &SizeDistribution::new(),
            rate,
        )
        .unwrap();
        prop_assert!(nothing.debit_amount >= actual.debit_amount);
    }
}
