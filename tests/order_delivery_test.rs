mod common;

use assert_matches::assert_matches;
use common::{TestContext, SITE};
use rstest::rstest;
use sitestock::{
    entities::{DeliveryStatus, OrderStatus, StorePartition},
    errors::ServiceError,
    events::Event,
    services::{
        order_delivery::{AdvanceDeliveryCommand, CreateOrderInput, MixedCompletion},
        order_policy::Actor,
    },
};

const TRANSPORT: i32 = 7;

fn transport() -> Actor {
    Actor::transport_manager(TRANSPORT)
}

#[tokio::test]
async fn supervisor_creates_pending_order_for_own_site() {
    let ctx = TestContext::new().await;
    let order = ctx
        .services
        .orders
        .create_order(
            &Actor::site_supervisor(1, SITE),
            CreateOrderInput {
                order_number: "ORD-100".into(),
                site_id: Some(SITE + 5),
                store_manager_role: StorePartition::Workshop,
                is_lpo: false,
                mixed_group: None,
            },
        )
        .await
        .expect("create");

    assert_eq!(order.site_id, Some(SITE));
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.delivery_status, DeliveryStatus::Pending);
    assert_eq!(order.version, 1);
    assert!(!order.is_completed);
}

#[tokio::test]
async fn only_supervisors_and_admins_create_orders() {
    let ctx = TestContext::new().await;
    let result = ctx
        .services
        .orders
        .create_order(
            &transport(),
            CreateOrderInput {
                order_number: "ORD-101".into(),
                site_id: Some(SITE),
                store_manager_role: StorePartition::Store,
                is_lpo: false,
                mixed_group: None,
            },
        )
        .await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn approval_is_routed_by_store_partition() {
    let ctx = TestContext::new().await;
    let order = ctx.order(StorePartition::Store, None).await;

    let denied = ctx
        .services
        .orders
        .approve(order.id, &Actor::workshop_manager(3))
        .await;
    assert_matches!(denied, Err(ServiceError::ValidationError(_)));
    assert_eq!(ctx.services.orders.get_order(order.id).await.expect("get"), order);

    let approved = ctx
        .services
        .orders
        .approve(order.id, &Actor::store_manager(2))
        .await
        .expect("approve");
    assert_eq!(approved.status, OrderStatus::Approved);
    assert_eq!(approved.delivery_status, DeliveryStatus::Approved);
    assert_eq!(approved.approved_by, Some(2));
    assert!(approved.approved_at.is_some());
    assert_eq!(approved.version, 2);

    let twice = ctx
        .services
        .orders
        .approve(order.id, &Actor::store_manager(2))
        .await;
    assert_matches!(twice, Err(ServiceError::ValidationError(_)));
}

#[rstest]
#[case(DeliveryStatus::InTransit, OrderStatus::InTransit)]
#[case(DeliveryStatus::OutForDelivery, OrderStatus::OutOfDelivery)]
#[case(DeliveryStatus::Delivered, OrderStatus::Delivery)]
#[tokio::test]
async fn transport_targets_are_reachable_from_approved(
    #[case] target: DeliveryStatus,
    #[case] coarse: OrderStatus,
) {
    let ctx = TestContext::new().await;
    let order = ctx.approved_order(StorePartition::Store, None).await;

    let advanced = ctx
        .services
        .orders
        .advance(
            &transport(),
            AdvanceDeliveryCommand::new(order.id, target).with_driver("R. Okafor", "KA-01-4411"),
        )
        .await
        .expect("advance");
    assert_eq!(advanced.delivery_status, target);
    assert_eq!(advanced.status, coarse);
    assert_eq!(advanced.transport_manager_id, Some(TRANSPORT));
    assert_eq!(advanced.driver_name.as_deref(), Some("R. Okafor"));
    assert_eq!(advanced.vehicle_number.as_deref(), Some("KA-01-4411"));

    let stored = ctx.services.orders.get_order(order.id).await.expect("get");
    assert_eq!(stored, advanced);
}

#[rstest]
#[case(DeliveryStatus::Pending)]
#[case(DeliveryStatus::Approved)]
#[tokio::test]
async fn non_transport_targets_are_rejected(#[case] target: DeliveryStatus) {
    let ctx = TestContext::new().await;
    let order = ctx.approved_order(StorePartition::Store, None).await;

    let result = ctx
        .services
        .orders
        .advance(&transport(), AdvanceDeliveryCommand::new(order.id, target))
        .await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));

    let missing = ctx
        .services
        .orders
        .advance(&transport(), AdvanceDeliveryCommand::new(404, target))
        .await;
    assert_matches!(missing, Err(ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn pending_order_cannot_skip_approval() {
    let ctx = TestContext::new().await;
    let order = ctx.order(StorePartition::Store, None).await;

    let result = ctx
        .services
        .orders
        .advance(
            &transport(),
            AdvanceDeliveryCommand::new(order.id, DeliveryStatus::Delivered)
                .with_driver("R. Okafor", "KA-01-4411"),
        )
        .await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));
    assert_eq!(ctx.services.orders.get_order(order.id).await.expect("get"), order);
}

#[rstest]
#[case(DeliveryStatus::InTransit)]
#[case(DeliveryStatus::OutForDelivery)]
#[tokio::test]
async fn delivery_completes_the_order(#[case] via: DeliveryStatus) {
    let ctx = TestContext::new().await;
    let order = ctx.approved_order(StorePartition::Workshop, None).await;
    let orders = &ctx.services.orders;

    orders
        .advance(&transport(), AdvanceDeliveryCommand::new(order.id, via))
        .await
        .expect("intermediate");
    let delivered = orders
        .advance(&transport(), AdvanceDeliveryCommand::new(order.id, DeliveryStatus::Delivered))
        .await
        .expect("deliver");

    assert!(delivered.is_completed);
    assert!(delivered.completed_at.is_some());
    assert_eq!(delivered.completed_by, Some(TRANSPORT));
    assert_eq!(delivered.status, OrderStatus::Delivery);
    assert_eq!(delivered.delivery_status, DeliveryStatus::Delivered);

    let again = orders
        .advance(&transport(), AdvanceDeliveryCommand::new(order.id, DeliveryStatus::InTransit))
        .await;
    assert_matches!(again, Err(ServiceError::ValidationError(_)));

    let events = ctx.events().await;
    assert!(events.contains(&Event::OrderCompleted {
        order_id: order.id,
        completed_by: TRANSPORT,
    }));
}

#[tokio::test]
async fn unknown_order_is_not_found() {
    let ctx = TestContext::new().await;
    let result = ctx
        .services
        .orders
        .advance(&transport(), AdvanceDeliveryCommand::new(404, DeliveryStatus::InTransit))
        .await;
    assert_matches!(result, Err(ServiceError::NotFound(_)));
    assert_matches!(
        ctx.services.orders.get_order(404).await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn mixed_order_completes_when_every_partition_is_delivered() {
    let ctx = TestContext::new().await;
    let store = ctx.approved_order(StorePartition::Store, Some("M-1")).await;
    let workshop = ctx.approved_order(StorePartition::Workshop, Some("M-1")).await;
    let orders = &ctx.services.orders;

    orders
        .advance(&transport(), AdvanceDeliveryCommand::new(store.id, DeliveryStatus::Delivered))
        .await
        .expect("deliver store");
    assert_eq!(
        orders.mixed_completion_for(workshop.id).await.expect("completion"),
        MixedCompletion::Partial {
            delivered: 1,
            total: 2
        }
    );
    assert!(orders.get_order(store.id).await.expect("get").mixed_completed_at.is_none());

    orders
        .advance(&transport(), AdvanceDeliveryCommand::new(workshop.id, DeliveryStatus::Delivered))
        .await
        .expect("deliver workshop");
    assert_eq!(
        orders.mixed_completion_for(store.id).await.expect("completion"),
        MixedCompletion::Complete
    );
    for id in [store.id, workshop.id] {
        assert!(orders.get_order(id).await.expect("get").mixed_completed_at.is_some());
    }

    let events = ctx.events().await;
    assert!(events.contains(&Event::MixedOrderCompleted {
        group: "M-1".into(),
        order_ids: vec![store.id, workshop.id],
    }));
}

#[tokio::test]
async fn rejected_partition_does_not_hold_back_a_mixed_order() {
    let ctx = TestContext::new().await;
    let store = ctx.approved_order(StorePartition::Store, Some("M-2")).await;
    let workshop = ctx.order(StorePartition::Workshop, Some("M-2")).await;
    let orders = &ctx.services.orders;

    let blank = orders.reject(workshop.id, &Actor::workshop_manager(3), "  ").await;
    assert_matches!(blank, Err(ServiceError::ValidationError(_)));

    let rejected = orders
        .reject(workshop.id, &Actor::workshop_manager(3), "out of stock")
        .await
        .expect("reject");
    assert_eq!(rejected.status, OrderStatus::Rejected);
    assert_eq!(rejected.delivery_status, DeliveryStatus::Pending);
    assert_eq!(rejected.rejection_reason.as_deref(), Some("out of stock"));

    let blocked = orders
        .advance(&transport(), AdvanceDeliveryCommand::new(workshop.id, DeliveryStatus::InTransit))
        .await;
    assert_matches!(blocked, Err(ServiceError::ValidationError(_)));

    orders
        .advance(&transport(), AdvanceDeliveryCommand::new(store.id, DeliveryStatus::Delivered))
        .await
        .expect("deliver store");
    assert_eq!(
        orders.mixed_completion_for(store.id).await.expect("completion"),
        MixedCompletion::Complete
    );
}

#[tokio::test]
async fn claimed_orders_belong_to_their_transport_manager() {
    let ctx = TestContext::new().await;
    let order = ctx.approved_order(StorePartition::Store, None).await;
    let orders = &ctx.services.orders;

    orders
        .advance(&transport(), AdvanceDeliveryCommand::new(order.id, DeliveryStatus::InTransit))
        .await
        .expect("claim");

    let other = Actor::transport_manager(TRANSPORT + 1);
    let result = orders
        .advance(&other, AdvanceDeliveryCommand::new(order.id, DeliveryStatus::Delivered))
        .await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));
    assert!(orders.visible_orders(&other).await.expect("visible").is_empty());
    assert_eq!(orders.visible_orders(&transport()).await.expect("visible").len(), 1);
}

#[tokio::test]
async fn visibility_follows_role() {
    let ctx = TestContext::new().await;
    let pending = ctx.order(StorePartition::Store, None).await;
    let approved = ctx.approved_order(StorePartition::Workshop, None).await;
    let orders = &ctx.services.orders;

    let own_site = orders
        .visible_orders(&Actor::site_supervisor(1, SITE))
        .await
        .expect("visible");
    assert_eq!(own_site.len(), 2);
    assert!(orders
        .visible_orders(&Actor::site_supervisor(1, SITE + 1))
        .await
        .expect("visible")
        .is_empty());

    let store_side: Vec<i32> = orders
        .visible_orders(&Actor::store_manager(2))
        .await
        .expect("visible")
        .iter()
        .map(|o| o.id)
        .collect();
    assert_eq!(store_side, vec![pending.id]);

    let transport_side: Vec<i32> = orders
        .visible_orders(&transport())
        .await
        .expect("visible")
        .iter()
        .map(|o| o.id)
        .collect();
    assert_eq!(transport_side, vec![approved.id]);
}

#[tokio::test]
async fn concurrent_deliveries_apply_once() {
    let ctx = TestContext::new().await;
    let order = ctx.approved_order(StorePartition::Store, None).await;
    let first = ctx.services.orders.clone();
    let second = ctx.services.orders.clone();
    let actor = transport();

    let (a, b) = tokio::join!(
        first.advance(&actor, AdvanceDeliveryCommand::new(order.id, DeliveryStatus::Delivered)),
        second.advance(&actor, AdvanceDeliveryCommand::new(order.id, DeliveryStatus::Delivered)),
    );
    assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);

    let stored = ctx.services.orders.get_order(order.id).await.expect("get");
    assert_eq!(stored.version, 3);
}
