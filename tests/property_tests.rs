//! Property-based tests for the ledger read rule, the delivery state machine and low-stock
//! classification.

mod common;

use chrono::Utc;
use common::TestContext;
use proptest::prelude::*;
use rstest::rstest;
use sitestock::{
    entities::{AdjustmentType, DeliveryStatus, OrderModel, StockKey, StorePartition},
    provenance::Reference,
    services::{
        order_policy::{self, Actor, OrderAction, PolicyViolation},
        stock_ledger::AppendStockEntry,
        stock_projector::{classify_stock_level, StockLevel},
    },
};

const ALL_STATUSES: [DeliveryStatus; 5] = [
    DeliveryStatus::Pending,
    DeliveryStatus::Approved,
    DeliveryStatus::InTransit,
    DeliveryStatus::OutForDelivery,
    DeliveryStatus::Delivered,
];

fn delivery_status_strategy() -> impl Strategy<Value = DeliveryStatus> {
    prop::sample::select(ALL_STATUSES.to_vec())
}

fn order_in(delivery_status: DeliveryStatus) -> OrderModel {
    OrderModel {
        id: 1,
        order_number: "ORD-1".into(),
        site_id: Some(10),
        created_by: 1,
        status: delivery_status.coarse_status(),
        delivery_status,
        store_manager_role: StorePartition::Store,
        is_lpo: false,
        mixed_group: None,
        driver_name: None,
        vehicle_number: None,
        transport_manager_id: None,
        approved_by: None,
        approved_at: None,
        rejection_reason: None,
        is_completed: false,
        completed_at: None,
        completed_by: None,
        mixed_completed_at: None,
        version: 1,
        created_at: Utc::now(),
        updated_at: None,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn transitions_only_move_forward(from in delivery_status_strategy(), to in delivery_status_strategy()) {
        if order_policy::is_legal_transition(from, to) {
            prop_assert!(to.stage() > from.stage());
            prop_assert!(to.is_transport_target());
            prop_assert!(from.stage() >= DeliveryStatus::Approved.stage());
        }
    }

    #[test]
    fn non_transport_targets_are_never_permitted(from in delivery_status_strategy(), to in delivery_status_strategy()) {
        let order = order_in(from);
        let result = order_policy::check(&Actor::admin(1), &order, OrderAction::Advance(to));
        if !to.is_transport_target() {
            prop_assert_eq!(result, Err(PolicyViolation::NotATransportTarget(to)));
        } else {
            prop_assert_eq!(result.is_ok(), order_policy::is_legal_transition(from, to));
        }
    }

    #[test]
    fn untracked_products_are_never_classified(quantity in -1_000i32..100_000, threshold in prop::option::of(-50i32..=0)) {
        prop_assert_eq!(classify_stock_level(quantity, threshold), StockLevel::NotApplicable);
    }

    #[test]
    fn tracked_levels_partition_quantities(quantity in -1_000i32..100_000, threshold in 1i32..1_000) {
        let expected = if quantity <= 0 {
            StockLevel::Out
        } else if quantity <= threshold {
            StockLevel::Low
        } else {
            StockLevel::Ok
        };
        prop_assert_eq!(classify_stock_level(quantity, Some(threshold)), expected);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn current_quantity_is_the_last_append(
        quantities in prop::collection::vec(0i32..10_000, 1..8),
        voided in prop::collection::vec(0i32..10_000, 0..4),
        site_id in prop::option::of(1i32..4),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        let current = runtime.block_on(async {
            let ctx = TestContext::new().await;
            let product = ctx.product("Cement", Some(10)).await;
            let key = StockKey::new(product.id, site_id);
            let ledger = &ctx.services.ledger;

            for quantity in &voided {
                ledger
                    .append(
                        AppendStockEntry::new(key, *quantity, AdjustmentType::In)
                            .with_reference(Reference::Purchase(99)),
                    )
                    .await
                    .expect("append voided");
            }
            ledger
                .void_entries_by_reference(Reference::Purchase(99))
                .await
                .expect("void");

            for quantity in &quantities {
                ledger
                    .append(AppendStockEntry::new(key, *quantity, AdjustmentType::Adjustment))
                    .await
                    .expect("append");
            }
            ctx.quantity(product.id, site_id).await
        });
        prop_assert_eq!(current, *quantities.last().expect("non-empty"));
    }
}

#[rstest]
#[case(10, Some(10), StockLevel::Low)]
#[case(11, Some(10), StockLevel::Ok)]
#[case(0, Some(10), StockLevel::Out)]
#[case(1, Some(10), StockLevel::Low)]
#[case(0, Some(0), StockLevel::NotApplicable)]
#[case(5, None, StockLevel::NotApplicable)]
fn low_stock_boundaries(#[case] quantity: i32, #[case] threshold: Option<i32>, #[case] expected: StockLevel) {
    assert_eq!(classify_stock_level(quantity, threshold), expected);
}

#[test]
fn stock_levels_render_in_screaming_case() {
    assert_eq!(StockLevel::NotApplicable.to_string(), "NOT_APPLICABLE");
    assert_eq!(StockLevel::Low.to_string(), "LOW");
}
