use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use super::size::SizeDistribution;
use super::stage::StageStatus;
use crate::errors::ServiceError;

/// Outcome of reconciling a receipt against what was sent to an external
/// unit. Derived on every receipt create or edit, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    /// Pieces sent but never received, per size.
    pub shortage: SizeDistribution,
    pub shortage_total: u32,
    pub received_total: u32,
    /// Pieces received but reported defective.
    pub mistake_total: u32,
    /// (shortage + mistake) x rate per piece, rounded to currency precision.
    pub debit_amount: Decimal,
    pub status: StageStatus,
}

/// Reconciles a received distribution (and explicitly reported defective
/// pieces) against the sent distribution.
///
/// A receipt can never exceed what was sent, and a piece cannot be marked
/// defective unless it was received; either violation is a validation error
/// naming the offending size, and nothing may be persisted.
pub fn reconcile(
    sent: &SizeDistribution,
    received: &SizeDistribution,
    mistake: &SizeDistribution,
    rate_per_piece: Decimal,
) -> Result<ReconciliationResult, ServiceError> {
    for label in sent.labels_with(received) {
        if received.get(label) > sent.get(label) {
            return Err(ServiceError::ValidationError(format!(
                "received {} pieces of size {} but only {} were sent",
                received.get(label),
                label,
                sent.get(label)
            )));
        }
    }
    for label in received.labels_with(mistake) {
        if mistake.get(label) > received.get(label) {
            return Err(ServiceError::ValidationError(format!(
                "{} defective pieces reported for size {} but only {} were received",
                mistake.get(label),
                label,
                received.get(label)
            )));
        }
    }

    let mut shortage = SizeDistribution::new();
    for label in sent.labels_with(received) {
        shortage.set(label, sent.get(label) - received.get(label));
    }

    let shortage_total = shortage.total();
    let received_total = received.total();
    let mistake_total = mistake.total();

    let debit_amount = (Decimal::from(shortage_total + mistake_total) * rate_per_piece)
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);

    let status = if shortage_total == 0 {
        StageStatus::Received
    } else if received_total > 0 {
        StageStatus::Partial
    } else {
        StageStatus::Sent
    };

    Ok(ReconciliationResult {
        shortage,
        shortage_total,
        received_total,
        mistake_total,
        debit_amount,
        status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::size::SizeLabel;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    #[test]
    fn partial_receipt_debits_shortage_and_mistakes() {
        let sent = SizeDistribution::from_pairs([(SizeLabel::S, 20), (SizeLabel::M, 20)]);
        let received = SizeDistribution::from_pairs([(SizeLabel::S, 18), (SizeLabel::M, 20)]);
        let mistake = SizeDistribution::from_pairs([(SizeLabel::S, 1)]);

        let result = reconcile(&sent, &received, &mistake, dec!(10)).unwrap();
        assert_eq!(result.shortage.get(SizeLabel::S), 2);
        assert_eq!(result.shortage.get(SizeLabel::M), 0);
        assert_eq!(result.shortage_total, 2);
        assert_eq!(result.mistake_total, 1);
        assert_eq!(result.debit_amount, dec!(30.00));
        assert_eq!(result.status, StageStatus::Partial);
    }

    #[test]
    fn full_receipt_is_received_with_zero_debit() {
        let sent = SizeDistribution::from_pairs([(SizeLabel::M, 12)]);
        let result =
            reconcile(&sent, &sent.clone(), &SizeDistribution::new(), dec!(8.5)).unwrap();
        assert_eq!(result.shortage_total, 0);
        assert_eq!(result.debit_amount, dec!(0.00));
        assert_eq!(result.status, StageStatus::Received);
    }

    #[test]
    fn received_more_than_sent_is_rejected() {
        let sent = SizeDistribution::from_pairs([(SizeLabel::M, 5)]);
        let received = SizeDistribution::from_pairs([(SizeLabel::M, 6)]);
        let result = reconcile(&sent, &received, &SizeDistribution::new(), dec!(1));
        assert_matches!(result, Err(ServiceError::ValidationError(msg)) if msg.contains('M'));
    }

    #[test]
    fn mistake_beyond_received_is_rejected() {
        let sent = SizeDistribution::from_pairs([(SizeLabel::L, 10)]);
        let received = SizeDistribution::from_pairs([(SizeLabel::L, 4)]);
        let mistake = SizeDistribution::from_pairs([(SizeLabel::L, 5)]);
        let result = reconcile(&sent, &received, &mistake, dec!(1));
        assert_matches!(result, Err(ServiceError::ValidationError(_)));
    }

    #[test]
    fn nothing_received_leaves_stage_sent() {
        let sent = SizeDistribution::from_pairs([(SizeLabel::M, 10)]);
        let result = reconcile(
            &sent,
            &SizeDistribution::new(),
            &SizeDistribution::new(),
            dec!(2),
        )
        .unwrap();
        assert_eq!(result.status, StageStatus::Sent);
        assert_eq!(result.shortage_total, 10);
        assert_eq!(result.debit_amount, dec!(20.00));
    }

    #[test]
    fn debit_rounds_half_up_to_currency_precision() {
        let sent = SizeDistribution::from_pairs([(SizeLabel::M, 3)]);
        let result = reconcile(
            &sent,
            &SizeDistribution::new(),
            &SizeDistribution::new(),
            dec!(1.115),
        )
        .unwrap();
        // 3 * 1.115 = 3.345 -> 3.35
        assert_eq!(result.debit_amount, dec!(3.35));
    }

    #[test]
    fn conservation_holds_per_size() {
        let sent = SizeDistribution::from_pairs([(SizeLabel::S, 9), (SizeLabel::Xl, 4)]);
        let received = SizeDistribution::from_pairs([(SizeLabel::S, 5), (SizeLabel::Xl, 4)]);
        let result = reconcile(&sent, &received, &SizeDistribution::new(), dec!(0)).unwrap();
        for label in [SizeLabel::S, SizeLabel::Xl] {
            assert_eq!(
                received.get(label) + result.shortage.get(label),
                sent.get(label)
            );
        }
    }
}
