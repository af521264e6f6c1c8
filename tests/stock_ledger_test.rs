mod common;

use assert_matches::assert_matches;
use chrono::Utc;
use common::{TestContext, MANAGER, SITE};
use sea_orm::{ActiveModelTrait, Set};
use sitestock::{
    entities::{stock_entry, AdjustmentType, StockKey, StockPool},
    errors::ServiceError,
    events::Event,
    provenance::Reference,
    services::{
        stock_ledger::{AppendStockEntry, SiteScope, StockEntryFilter},
        stock_projector::StockLevel,
    },
};

#[tokio::test]
async fn absolute_quantity_and_display_delta() {
    let ctx = TestContext::new().await;
    let cement = ctx.product("Cement", Some(10)).await;
    let key = StockKey::new(cement.id, None);
    let ledger = &ctx.services.ledger;

    ledger
        .append(AppendStockEntry::new(key, 100, AdjustmentType::In))
        .await
        .expect("append 100");
    let second = ledger
        .append(AppendStockEntry::new(key, 70, AdjustmentType::Out))
        .await
        .expect("append 70");

    assert_eq!(ctx.quantity(cement.id, None).await, 70);
    assert_eq!(second.previous_quantity, 100);
    assert_eq!(second.pool, StockPool::Product);

    let change = ctx
        .services
        .projector
        .change_since_previous(second.id)
        .await
        .expect("change");
    assert_eq!(change.delta, -30);
    assert_eq!(change.label, "\u{2212}30");
}

#[tokio::test]
async fn latest_entry_breaks_timestamp_ties_by_id() {
    let ctx = TestContext::new().await;
    let sand = ctx.material("Sand").await;
    let created_at = Utc::now();

    let mut ids = Vec::new();
    for quantity in [40, 25] {
        let entry = stock_entry::ActiveModel {
            pool: Set(StockPool::Material),
            product_id: Set(sand.id),
            site_id: Set(Some(SITE)),
            quantity: Set(quantity),
            previous_quantity: Set(0),
            adjustment_type: Set(AdjustmentType::Adjustment),
            reference_type: Set(None),
            reference_id: Set(None),
            name: Set(None),
            notes: Set(None),
            status: Set(true),
            created_by: Set(None),
            created_at: Set(created_at),
            ..Default::default()
        }
        .insert(&*ctx.db)
        .await
        .expect("insert entry");
        ids.push(entry.id);
    }

    let latest = ctx
        .services
        .ledger
        .latest_entry(StockKey::new(sand.id, Some(SITE)))
        .await
        .expect("latest")
        .expect("an entry");
    assert_eq!(latest.id, ids[1]);
    assert_eq!(latest.quantity, 25);
}

#[tokio::test]
async fn voided_rows_are_ignored_by_current_quantity() {
    let ctx = TestContext::new().await;
    let rebar = ctx.product("Rebar", None).await;
    let key = StockKey::new(rebar.id, Some(SITE));
    let ledger = &ctx.services.ledger;

    ledger
        .append(AppendStockEntry::new(key, 12, AdjustmentType::In).with_reference(Reference::Purchase(7)))
        .await
        .expect("append purchase");
    let voided = ledger
        .void_entries_by_reference(Reference::Purchase(7))
        .await
        .expect("void");
    assert_eq!(voided.len(), 1);
    assert_eq!(ctx.quantity(rebar.id, Some(SITE)).await, 0);

    ledger
        .append(AppendStockEntry::new(key, 5, AdjustmentType::In))
        .await
        .expect("append 5");
    assert_eq!(ctx.quantity(rebar.id, Some(SITE)).await, 5);

    let history = ledger
        .entries_for(rebar.id, StockEntryFilter::default().include_voided())
        .await
        .expect("history");
    assert_eq!(history.total, 2);
    assert!(history.items.iter().any(|e| !e.status));
}

#[tokio::test]
async fn site_and_general_pools_are_separate_keys() {
    let ctx = TestContext::new().await;
    let tiles = ctx.product("Tiles", Some(5)).await;

    ctx.stock(tiles.id, None, 50).await;
    ctx.stock(tiles.id, Some(SITE), 8).await;

    assert_eq!(ctx.quantity(tiles.id, None).await, 50);
    assert_eq!(ctx.quantity(tiles.id, Some(SITE)).await, 8);
    assert_eq!(ctx.quantity(tiles.id, Some(SITE + 1)).await, 0);

    let site_only = ctx
        .services
        .ledger
        .entries_for(tiles.id, StockEntryFilter::default().site(SiteScope::Site(SITE)))
        .await
        .expect("site history");
    assert_eq!(site_only.total, 1);

    let levels = ctx
        .services
        .projector
        .levels_for_product(tiles.id)
        .await
        .expect("levels");
    assert_eq!(levels.len(), 2);
}

#[tokio::test]
async fn issue_refuses_to_go_negative() {
    let ctx = TestContext::new().await;
    let paint = ctx.product("Paint", None).await;
    let key = StockKey::new(paint.id, None);
    ctx.stock(paint.id, None, 4).await;

    let result = ctx
        .services
        .ledger
        .issue(key, 5, Reference::None, Some(MANAGER))
        .await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));
    assert_eq!(ctx.quantity(paint.id, None).await, 4);

    let entry = ctx
        .services
        .ledger
        .issue(key, 4, Reference::None, Some(MANAGER))
        .await
        .expect("issue 4");
    assert_eq!(entry.quantity, 0);
    assert_eq!(entry.adjustment_type, AdjustmentType::Out);
}

#[tokio::test]
async fn negative_absolute_quantity_is_rejected() {
    let ctx = TestContext::new().await;
    let pipe = ctx.product("Pipe", None).await;
    let result = ctx
        .services
        .ledger
        .append(AppendStockEntry::new(StockKey::new(pipe.id, None), -1, AdjustmentType::Adjustment))
        .await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn unknown_product_is_not_found() {
    let ctx = TestContext::new().await;
    let result = ctx
        .services
        .ledger
        .append(AppendStockEntry::new(StockKey::new(404, None), 1, AdjustmentType::In))
        .await;
    assert_matches!(result, Err(ServiceError::NotFound(_)));

    let level = ctx.services.projector.low_stock_classification(404, None).await;
    assert_matches!(level, Err(ServiceError::NotFound(_)));
}

#[tokio::test]
async fn history_is_paginated_newest_first() {
    let ctx = TestContext::new().await;
    let bricks = ctx.product("Bricks", None).await;
    for _ in 0..5 {
        ctx.stock(bricks.id, None, 1).await;
    }

    let ledger = &ctx.services.ledger;
    let first = ledger
        .entries_for(bricks.id, StockEntryFilter::default().page(1, 2))
        .await
        .expect("page 1");
    assert_eq!(first.total, 5);
    assert_eq!(first.total_pages, 3);
    assert_eq!(first.items.len(), 2);
    assert_eq!(first.items[0].quantity, 5);

    let last = ledger
        .entries_for(bricks.id, StockEntryFilter::default().page(3, 2))
        .await
        .expect("page 3");
    assert_eq!(last.items.len(), 1);
    assert_eq!(last.items[0].quantity, 1);
}

#[tokio::test]
async fn stock_count_sets_absolute_quantity_and_classifies() {
    let ctx = TestContext::new().await;
    let cement = ctx.product("Cement", Some(10)).await;
    ctx.stock(cement.id, Some(SITE), 40).await;

    let entry = ctx
        .services
        .ledger
        .set_quantity(StockKey::new(cement.id, Some(SITE)), 9, Some(MANAGER), Some("cycle count".into()))
        .await
        .expect("count");
    assert_eq!(entry.previous_quantity, 40);
    assert_eq!(entry.adjustment_type, AdjustmentType::Adjustment);

    let report = ctx
        .services
        .projector
        .low_stock_classification(cement.id, Some(SITE))
        .await
        .expect("classify");
    assert_eq!(report.quantity, 9);
    assert_eq!(report.level, StockLevel::Low);

    let change = ctx
        .services
        .projector
        .change_since_previous(entry.id)
        .await
        .expect("change");
    assert_eq!(change.label, "\u{2212}31");
}

#[tokio::test]
async fn appends_publish_events() {
    let ctx = TestContext::new().await;
    let cement = ctx.product("Cement", None).await;
    let entry = ctx.stock(cement.id, None, 3).await;

    let events = ctx.events().await;
    assert!(events.iter().any(|event| matches!(
        event,
        Event::StockEntryAppended { entry_id, quantity: 3, previous_quantity: 0, .. } if *entry_id == entry.id
    )));
}

#[tokio::test]
async fn concurrent_receives_on_one_key_all_count() {
    let ctx = TestContext::new().await;
    let cement = ctx.product("Cement", None).await;
    let key = StockKey::new(cement.id, Some(SITE));

    let receives = (0..20).map(|_| {
        let ledger = ctx.services.ledger.clone();
        async move { ledger.receive(key, 1, Reference::Purchase(2), Some(MANAGER)).await }
    });
    let results = futures::future::join_all(receives).await;
    assert!(results.iter().all(Result::is_ok));

    assert_eq!(ctx.quantity(cement.id, Some(SITE)).await, 20);
    let history = ctx
        .services
        .ledger
        .entries_for(cement.id, StockEntryFilter::default().page(1, 100))
        .await
        .expect("history");
    let mut chain: Vec<(i32, i32)> = history
        .items
        .iter()
        .map(|e| (e.previous_quantity, e.quantity))
        .collect();
    chain.sort();
    assert_eq!(chain, (0..20).map(|q| (q, q + 1)).collect::<Vec<_>>());
}
