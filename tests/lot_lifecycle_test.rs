//! End-to-end exercises of the lot lifecycle engine against an in-memory
//! SQLite database.

use assert_matches::assert_matches;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tokio::sync::mpsc;

use stitchflow_api::db::{self, DbConfig};
use stitchflow_api::errors::ServiceError;
use stitchflow_api::events::{process_events, EventSender};
use stitchflow_api::migrator;
use stitchflow_api::models::{PackRatio, SizeDistribution, SizeLabel, StageKind, StageStatus};
use stitchflow_api::services::lots::CreateLot;
use stitchflow_api::services::stages::{EditReceipt, RecordReceipt, RecordSent};
use stitchflow_api::services::stock::{CreateStock, DispatchRequest, ReturnRequest};
use stitchflow_api::services::AppServices;

async fn setup() -> AppServices {
    // A single connection keeps the whole test on one in-memory database.
    let cfg = DbConfig {
        url: "sqlite::memory:".into(),
        max_connections: 1,
        min_connections: 1,
        ..Default::default()
    };
    let pool = db::establish_connection_with_config(&cfg)
        .await
        .expect("db connect");
    migrator::create_tables(&pool).await.expect("schema");

    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(process_events(rx));
    AppServices::new(Arc::new(pool), EventSender::new(tx))
}

fn dist(pairs: &[(SizeLabel, u32)]) -> SizeDistribution {
    SizeDistribution::from_pairs(pairs.iter().copied())
}

fn ratio(pairs: &[(SizeLabel, u32)]) -> PackRatio {
    PackRatio::from_pairs(pairs.iter().copied())
}

fn standard_lot(number: &str) -> CreateLot {
    CreateLot {
        lot_number: number.into(),
        style: "crew-neck tee".into(),
        color: "navy".into(),
        pack_ratio: ratio(&[(SizeLabel::M, 2), (SizeLabel::L, 2), (SizeLabel::Xl, 2)]),
        cutting: dist(&[(SizeLabel::M, 10), (SizeLabel::L, 8), (SizeLabel::Xl, 4)]),
        rate: Some(dec!(1.50)),
    }
}

#[tokio::test]
async fn cutting_only_lot_has_single_entry_journey() {
    let services = setup().await;
    let (lot, _) = services.lots.create_lot(standard_lot("LOT-100")).await.unwrap();

    let journey = services.journey.journey(&lot.id).await.unwrap();
    assert_eq!(journey.stages.len(), 1);
    assert_eq!(journey.current_stage, StageKind::Cutting);
    assert_eq!(journey.total_produced, 22);
    assert_eq!(journey.total_dispatched, 0);
}

#[tokio::test]
async fn duplicate_lot_number_is_rejected() {
    let services = setup().await;
    services.lots.create_lot(standard_lot("LOT-101")).await.unwrap();
    let result = services.lots.create_lot(standard_lot("LOT-101")).await;
    assert_matches!(result, Err(ServiceError::Conflict(_)));
}

#[tokio::test]
async fn lots_are_found_by_number() {
    let services = setup().await;
    let (lot, _) = services.lots.create_lot(standard_lot("LOT-113")).await.unwrap();

    let found = services.lots.get_lot_by_number("LOT-113").await.unwrap();
    assert_eq!(found.map(|l| l.id), Some(lot.id));
    assert!(services
        .lots
        .get_lot_by_number("LOT-999")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn receipt_reconciles_shortage_and_mistakes() {
    let services = setup().await;
    let (lot, _) = services
        .lots
        .create_lot(CreateLot {
            cutting: dist(&[(SizeLabel::S, 20), (SizeLabel::M, 20)]),
            pack_ratio: ratio(&[(SizeLabel::S, 2), (SizeLabel::M, 2)]),
            ..standard_lot("LOT-102")
        })
        .await
        .unwrap();

    services
        .stages
        .record_sent(RecordSent {
            lot_id: lot.id,
            kind: StageKind::Outsourcing,
            unit_name: "Kumar Stitching".into(),
            distribution: dist(&[(SizeLabel::S, 20), (SizeLabel::M, 20)]),
            rate: dec!(10),
        })
        .await
        .unwrap();

    let outcome = services
        .stages
        .record_receipt(RecordReceipt {
            lot_id: lot.id,
            kind: StageKind::OutsourcingReceipt,
            received: dist(&[(SizeLabel::S, 18), (SizeLabel::M, 20)]),
            mistake: dist(&[(SizeLabel::S, 1)]),
        })
        .await
        .unwrap();

    let recon = &outcome.reconciliation;
    assert_eq!(recon.shortage.get(SizeLabel::S), 2);
    assert_eq!(recon.shortage.get(SizeLabel::M), 0);
    assert_eq!(recon.shortage_total, 2);
    assert_eq!(recon.mistake_total, 1);
    assert_eq!(recon.debit_amount, dec!(30.00));
    assert_eq!(recon.status, StageStatus::Partial);
    assert_eq!(outcome.stage.status, "partial");
}

#[tokio::test]
async fn receipt_exceeding_sent_is_rejected_before_persisting() {
    let services = setup().await;
    let (lot, _) = services.lots.create_lot(standard_lot("LOT-103")).await.unwrap();

    services
        .stages
        .record_sent(RecordSent {
            lot_id: lot.id,
            kind: StageKind::Outsourcing,
            unit_name: "Kumar Stitching".into(),
            distribution: dist(&[(SizeLabel::M, 10)]),
            rate: dec!(5),
        })
        .await
        .unwrap();

    let result = services
        .stages
        .record_receipt(RecordReceipt {
            lot_id: lot.id,
            kind: StageKind::OutsourcingReceipt,
            received: dist(&[(SizeLabel::M, 11)]),
            mistake: SizeDistribution::new(),
        })
        .await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));

    // No receipt record was appended.
    let stages = services.stages.list_stages(&lot.id).await.unwrap();
    assert_eq!(stages.len(), 2);
}

#[tokio::test]
async fn ironing_is_blocked_until_outsourcing_fully_received() {
    let services = setup().await;
    let (lot, _) = services.lots.create_lot(standard_lot("LOT-104")).await.unwrap();

    services
        .stages
        .record_sent(RecordSent {
            lot_id: lot.id,
            kind: StageKind::Outsourcing,
            unit_name: "Kumar Stitching".into(),
            distribution: dist(&[(SizeLabel::M, 10)]),
            rate: dec!(5),
        })
        .await
        .unwrap();

    let ironing = RecordSent {
        lot_id: lot.id,
        kind: StageKind::Ironing,
        unit_name: "Press Works".into(),
        distribution: dist(&[(SizeLabel::M, 10)]),
        rate: dec!(2),
    };

    // Outsourcing is still Sent.
    let result = services.stages.record_sent(ironing.clone()).await;
    assert_matches!(result, Err(ServiceError::PreconditionFailed(_)));

    // A partial receipt is still not enough.
    let outcome = services
        .stages
        .record_receipt(RecordReceipt {
            lot_id: lot.id,
            kind: StageKind::OutsourcingReceipt,
            received: dist(&[(SizeLabel::M, 8)]),
            mistake: SizeDistribution::new(),
        })
        .await
        .unwrap();
    assert_eq!(outcome.reconciliation.status, StageStatus::Partial);
    let result = services.stages.record_sent(ironing.clone()).await;
    assert_matches!(result, Err(ServiceError::PreconditionFailed(_)));

    // The one-time edit brings the receipt to fully received.
    services
        .stages
        .edit_receipt(
            &outcome.stage.id,
            EditReceipt {
                received: dist(&[(SizeLabel::M, 10)]),
                mistake: SizeDistribution::new(),
                recorded_at: None,
            },
        )
        .await
        .unwrap();
    services.stages.record_sent(ironing).await.unwrap();
}

#[tokio::test]
async fn receipt_can_only_be_edited_once() {
    let services = setup().await;
    let (lot, _) = services.lots.create_lot(standard_lot("LOT-105")).await.unwrap();

    services
        .stages
        .record_sent(RecordSent {
            lot_id: lot.id,
            kind: StageKind::Outsourcing,
            unit_name: "Kumar Stitching".into(),
            distribution: dist(&[(SizeLabel::M, 10)]),
            rate: dec!(5),
        })
        .await
        .unwrap();
    let outcome = services
        .stages
        .record_receipt(RecordReceipt {
            lot_id: lot.id,
            kind: StageKind::OutsourcingReceipt,
            received: dist(&[(SizeLabel::M, 8)]),
            mistake: SizeDistribution::new(),
        })
        .await
        .unwrap();

    let edit = EditReceipt {
        received: dist(&[(SizeLabel::M, 9)]),
        mistake: SizeDistribution::new(),
        recorded_at: None,
    };
    services.stages.edit_receipt(&outcome.stage.id, edit.clone()).await.unwrap();
    let second = services.stages.edit_receipt(&outcome.stage.id, edit).await;
    assert_matches!(second, Err(ServiceError::Conflict(_)));
}

#[tokio::test]
async fn receipt_cannot_drop_below_received_once_ironing_started() {
    let services = setup().await;
    let (lot, _) = services.lots.create_lot(standard_lot("LOT-115")).await.unwrap();

    services
        .stages
        .record_sent(RecordSent {
            lot_id: lot.id,
            kind: StageKind::Outsourcing,
            unit_name: "Kumar Stitching".into(),
            distribution: dist(&[(SizeLabel::M, 10)]),
            rate: dec!(5),
        })
        .await
        .unwrap();
    let outcome = services
        .stages
        .record_receipt(RecordReceipt {
            lot_id: lot.id,
            kind: StageKind::OutsourcingReceipt,
            received: dist(&[(SizeLabel::M, 10)]),
            mistake: SizeDistribution::new(),
        })
        .await
        .unwrap();
    services
        .stages
        .record_sent(RecordSent {
            lot_id: lot.id,
            kind: StageKind::Ironing,
            unit_name: "Press Works".into(),
            distribution: dist(&[(SizeLabel::M, 10)]),
            rate: dec!(2),
        })
        .await
        .unwrap();

    // Ironing is in flight; the correction may not undo its precondition.
    let result = services
        .stages
        .edit_receipt(
            &outcome.stage.id,
            EditReceipt {
                received: dist(&[(SizeLabel::M, 6)]),
                mistake: SizeDistribution::new(),
                recorded_at: None,
            },
        )
        .await;
    assert_matches!(result, Err(ServiceError::PreconditionFailed(_)));

    // A correction that stays fully received is still allowed once.
    services
        .stages
        .edit_receipt(
            &outcome.stage.id,
            EditReceipt {
                received: dist(&[(SizeLabel::M, 10)]),
                mistake: dist(&[(SizeLabel::M, 1)]),
                recorded_at: None,
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn payments_accumulate_up_to_the_billed_amount() {
    let services = setup().await;
    let (lot, _) = services.lots.create_lot(standard_lot("LOT-116")).await.unwrap();

    // 10 pieces at 5.00 bills 50.00.
    let sent = services
        .stages
        .record_sent(RecordSent {
            lot_id: lot.id,
            kind: StageKind::Outsourcing,
            unit_name: "Kumar Stitching".into(),
            distribution: dist(&[(SizeLabel::M, 10)]),
            rate: dec!(5),
        })
        .await
        .unwrap();
    assert_eq!(sent.amount, Some(dec!(50)));

    let result = services.stages.record_payment(&sent.id, dec!(0)).await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));

    let paid = services.stages.record_payment(&sent.id, dec!(30)).await.unwrap();
    assert_eq!(paid.paid_amount, dec!(30));

    // 30 already paid; 25 more would exceed the 50 billed.
    let result = services.stages.record_payment(&sent.id, dec!(25)).await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));

    let paid = services.stages.record_payment(&sent.id, dec!(20)).await.unwrap();
    assert_eq!(paid.paid_amount, dec!(50));
}

#[tokio::test]
async fn payment_against_unbilled_stage_is_rejected() {
    let services = setup().await;
    let (_, cutting) = services
        .lots
        .create_lot(CreateLot {
            rate: None,
            ..standard_lot("LOT-117")
        })
        .await
        .unwrap();

    let result = services.stages.record_payment(&cutting.id, dec!(10)).await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));
}

/// Runs a lot through ironing so that a stock entity exists.
async fn lot_with_stock(services: &AppServices, number: &str) -> (uuid::Uuid, uuid::Uuid) {
    let (lot, _) = services.lots.create_lot(standard_lot(number)).await.unwrap();

    services
        .stages
        .record_sent(RecordSent {
            lot_id: lot.id,
            kind: StageKind::Ironing,
            unit_name: "Press Works".into(),
            distribution: dist(&[
                (SizeLabel::M, 10),
                (SizeLabel::L, 6),
                (SizeLabel::Xl, 4),
            ]),
            rate: dec!(2),
        })
        .await
        .unwrap();

    let outcome = services
        .stages
        .record_receipt(RecordReceipt {
            lot_id: lot.id,
            kind: StageKind::IroningReceipt,
            received: dist(&[
                (SizeLabel::M, 10),
                (SizeLabel::L, 6),
                (SizeLabel::Xl, 4),
            ]),
            mistake: SizeDistribution::new(),
        })
        .await
        .unwrap();

    (lot.id, outcome.stock_id.expect("full ironing receipt creates stock"))
}

#[tokio::test]
async fn overdrawing_dispatch_is_rejected_without_mutation() {
    let services = setup().await;
    let (_lot_id, stock_id) = lot_with_stock(&services, "LOT-106").await;

    // 3 packs x 6 pieces + 5 loose = 23 pieces against 20 available.
    let result = services
        .stock
        .dispatch(
            &stock_id,
            DispatchRequest {
                master_packs: 3,
                loose: dist(&[(SizeLabel::M, 5)]),
                customer: Some("Verma Traders".into()),
            },
        )
        .await;
    assert_matches!(result, Err(ServiceError::InsufficientStock(_)));

    let view = services.stock.get_stock(&stock_id).await.unwrap();
    assert_eq!(view.stock.available_quantity, 20);
    assert_eq!(view.stock.version, 0);
}

#[tokio::test]
async fn absurd_pack_counts_are_rejected_without_panicking() {
    let services = setup().await;
    let (_lot_id, stock_id) = lot_with_stock(&services, "LOT-114").await;

    // 2^31 + 1 packs of 6 pieces overflows a u32 piece count.
    let result = services
        .stock
        .dispatch(
            &stock_id,
            DispatchRequest {
                master_packs: 2_147_483_649,
                loose: SizeDistribution::new(),
                customer: None,
            },
        )
        .await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));

    // A piece count that fits u32 but not i32 is an ordinary shortfall.
    let result = services
        .stock
        .dispatch(
            &stock_id,
            DispatchRequest {
                master_packs: 400_000_000,
                loose: SizeDistribution::new(),
                customer: None,
            },
        )
        .await;
    assert_matches!(result, Err(ServiceError::InsufficientStock(_)));

    let view = services.stock.get_stock(&stock_id).await.unwrap();
    assert_eq!(view.stock.available_quantity, 20);
    assert_eq!(view.stock.version, 0);
}

#[tokio::test]
async fn dispatch_and_return_project_stock_availability() {
    let services = setup().await;
    let (lot_id, stock_id) = lot_with_stock(&services, "LOT-107").await;

    services
        .stock
        .dispatch(
            &stock_id,
            DispatchRequest {
                master_packs: 2,
                loose: dist(&[(SizeLabel::M, 1)]),
                customer: Some("Verma Traders".into()),
            },
        )
        .await
        .unwrap();

    let view = services.stock.get_stock(&stock_id).await.unwrap();
    assert_eq!(view.stock.available_quantity, 7);
    assert_eq!(view.available_by_size.get(SizeLabel::M), 5);
    assert_eq!(view.available_by_size.get(SizeLabel::L), 2);
    assert_eq!(view.available_by_size.get(SizeLabel::Xl), 0);

    // A return larger than what is out on dispatch is rejected.
    let result = services
        .stock
        .apply_return(
            &stock_id,
            ReturnRequest {
                quantity: 14,
                size_breakdown: None,
            },
        )
        .await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));

    services
        .stock
        .apply_return(
            &stock_id,
            ReturnRequest {
                quantity: 5,
                size_breakdown: Some(dist(&[(SizeLabel::M, 3), (SizeLabel::L, 2)])),
            },
        )
        .await
        .unwrap();

    let view = services.stock.get_stock(&stock_id).await.unwrap();
    assert_eq!(view.stock.available_quantity, 12);

    let journey = services.journey.journey(&lot_id).await.unwrap();
    assert_eq!(journey.current_stage, StageKind::Stock);
    assert_eq!(journey.total_produced, 20);
    assert_eq!(journey.total_dispatched, 13);
}

#[tokio::test]
async fn return_against_undispatched_stock_is_rejected() {
    let services = setup().await;
    let created = services
        .stock
        .create_manual(CreateStock {
            lot_number: None,
            distribution: dist(&[(SizeLabel::M, 30)]),
            pack_ratio: ratio(&[(SizeLabel::M, 5)]),
        })
        .await
        .unwrap();

    let result = services
        .stock
        .apply_return(
            &created.id,
            ReturnRequest {
                quantity: 5,
                size_breakdown: None,
            },
        )
        .await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn deleting_a_dispatch_restores_availability() {
    let services = setup().await;
    let (_lot_id, stock_id) = lot_with_stock(&services, "LOT-108").await;

    let record = services
        .stock
        .dispatch(
            &stock_id,
            DispatchRequest {
                master_packs: 1,
                loose: SizeDistribution::new(),
                customer: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(
        services.stock.get_stock(&stock_id).await.unwrap().stock.available_quantity,
        14
    );

    services.stages.delete_stage(&record.id).await.unwrap();
    assert_eq!(
        services.stock.get_stock(&stock_id).await.unwrap().stock.available_quantity,
        20
    );
}

#[tokio::test]
async fn cascade_checks_protect_dependent_records() {
    let services = setup().await;
    let (lot, cutting) = services.lots.create_lot(standard_lot("LOT-109")).await.unwrap();

    let sent = services
        .stages
        .record_sent(RecordSent {
            lot_id: lot.id,
            kind: StageKind::Outsourcing,
            unit_name: "Kumar Stitching".into(),
            distribution: dist(&[(SizeLabel::M, 10)]),
            rate: dec!(5),
        })
        .await
        .unwrap();
    services
        .stages
        .record_receipt(RecordReceipt {
            lot_id: lot.id,
            kind: StageKind::OutsourcingReceipt,
            received: dist(&[(SizeLabel::M, 10)]),
            mistake: SizeDistribution::new(),
        })
        .await
        .unwrap();

    // The sent stage is pinned by its receipt, cutting by everything.
    assert_matches!(
        services.stages.delete_stage(&sent.id).await,
        Err(ServiceError::Conflict(_))
    );
    assert_matches!(
        services.stages.delete_stage(&cutting.id).await,
        Err(ServiceError::Conflict(_))
    );
    assert_matches!(
        services.lots.delete_lot(&lot.id).await,
        Err(ServiceError::Conflict(_))
    );
}

#[tokio::test]
async fn stock_referenced_by_dispatch_cannot_be_deleted() {
    let services = setup().await;
    let (_lot_id, stock_id) = lot_with_stock(&services, "LOT-110").await;

    services
        .stock
        .dispatch(
            &stock_id,
            DispatchRequest {
                master_packs: 1,
                loose: SizeDistribution::new(),
                customer: None,
            },
        )
        .await
        .unwrap();

    assert_matches!(
        services.stock.delete_stock(&stock_id).await,
        Err(ServiceError::Conflict(_))
    );
}

#[tokio::test]
async fn availability_never_goes_negative_under_repeated_dispatch() {
    let services = setup().await;
    let (_lot_id, stock_id) = lot_with_stock(&services, "LOT-111").await;

    let mut dispatched = 0;
    loop {
        let result = services
            .stock
            .dispatch(
                &stock_id,
                DispatchRequest {
                    master_packs: 0,
                    loose: dist(&[(SizeLabel::M, 1)]),
                    customer: None,
                },
            )
            .await;
        match result {
            Ok(_) => dispatched += 1,
            Err(ServiceError::InsufficientStock(_)) => break,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    // Only the 10 M pieces were ever available loose.
    assert_eq!(dispatched, 10);
    let view = services.stock.get_stock(&stock_id).await.unwrap();
    assert_eq!(view.stock.available_quantity, 10);
    assert_eq!(view.available_by_size.get(SizeLabel::M), 0);
}

// Requires real parallelism against one shared database; run explicitly:
// cargo test -- --ignored concurrent_dispatches
#[tokio::test]
#[ignore]
async fn concurrent_dispatches_never_overdraw() {
    let services = setup().await;
    let (_lot_id, stock_id) = lot_with_stock(&services, "LOT-112").await;

    let mut tasks = Vec::new();
    for _ in 0..30 {
        let services = services.clone();
        tasks.push(tokio::spawn(async move {
            services
                .stock
                .dispatch(
                    &stock_id,
                    DispatchRequest {
                        master_packs: 0,
                        loose: dist(&[(SizeLabel::M, 1)]),
                        customer: None,
                    },
                )
                .await
                .is_ok()
        }));
    }

    let mut successes = 0;
    for task in tasks {
        if task.await.unwrap_or(false) {
            successes += 1;
        }
    }
    assert!(successes <= 10, "overdraw: {} dispatches succeeded", successes);

    let view = services.stock.get_stock(&stock_id).await.unwrap();
    assert!(view.stock.available_quantity >= 10);
}
