#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use sea_orm::{ActiveModelTrait, Set};
use sitestock::{
    config::AppConfig,
    db::{self, DbConfig, DbPool},
    entities::{product, OrderModel, ProductModel, StockEntryModel, StockKey, StorePartition},
    events::{Event, EventSender},
    logging,
    provenance::Reference,
    services::{
        order_delivery::CreateOrderInput,
        order_policy::Actor,
        returns::{ReturnInput, ReturnLineInput},
        wastages::{WastageInput, WastageLineInput},
    },
    StockServices,
};

pub const SITE: i32 = 10;
pub const MANAGER: i32 = 3;

/// Services over a fresh in-memory SQLite database with events captured for assertions.
pub struct TestContext {
    pub db: Arc<DbPool>,
    pub services: StockServices,
    events: Arc<Mutex<Vec<Event>>>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestContext {
    pub async fn new() -> Self {
        let pool = db::establish_connection_with_config(&DbConfig::in_memory())
            .await
            .expect("failed to open in-memory database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations");
        let db = Arc::new(pool);

        let (event_sender, mut event_rx) = EventSender::channel(1024);
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let event_task = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                sink.lock().expect("event sink poisoned").push(event);
            }
        });

        let config = AppConfig::new("sqlite::memory:".to_string(), "test".to_string());
        let services = StockServices::new(
            db.clone(),
            Arc::new(event_sender),
            logging::discard(),
            &config,
        );

        Self {
            db,
            services,
            events,
            _event_task: event_task,
        }
    }

    pub async fn product(&self, name: &str, threshold: Option<i32>) -> ProductModel {
        product::ActiveModel {
            name: Set(name.to_string()),
            is_product: Set(true),
            low_stock_threshold: Set(threshold),
            unit_type: Set(Some("bag".to_string())),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&*self.db)
        .await
        .expect("failed to insert product")
    }

    pub async fn material(&self, name: &str) -> ProductModel {
        product::ActiveModel {
            name: Set(name.to_string()),
            is_product: Set(false),
            low_stock_threshold: Set(None),
            unit_type: Set(Some("kg".to_string())),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&*self.db)
        .await
        .expect("failed to insert material")
    }

    /// Receives `quantity` into `(product_id, site_id)` as a purchase.
    pub async fn stock(&self, product_id: i32, site_id: Option<i32>, quantity: i32) -> StockEntryModel {
        self.services
            .ledger
            .receive(
                StockKey::new(product_id, site_id),
                quantity,
                Reference::Purchase(1),
                Some(MANAGER),
            )
            .await
            .expect("failed to receive stock")
    }

    pub async fn quantity(&self, product_id: i32, site_id: Option<i32>) -> i32 {
        self.services
            .ledger
            .current_quantity(product_id, site_id)
            .await
            .expect("failed to read quantity")
    }

    pub async fn order(&self, partition: StorePartition, group: Option<&str>) -> OrderModel {
        self.services
            .orders
            .create_order(
                &Actor::site_supervisor(1, SITE),
                CreateOrderInput {
                    order_number: format!("ORD-{}", uuid::Uuid::new_v4().simple()),
                    site_id: None,
                    store_manager_role: partition,
                    is_lpo: false,
                    mixed_group: group.map(str::to_string),
                },
            )
            .await
            .expect("failed to create order")
    }

    pub async fn approved_order(&self, partition: StorePartition, group: Option<&str>) -> OrderModel {
        let order = self.order(partition, group).await;
        self.services
            .orders
            .approve(order.id, &Actor::admin(99))
            .await
            .expect("failed to approve order")
    }

    /// Events published so far.
    pub async fn events(&self) -> Vec<Event> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.events.lock().expect("event sink poisoned").clone()
    }
}

pub fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 1).expect("valid date")
}

/// Return of `(product_id, quantity)` lines at `site_id`.
pub fn return_input(site_id: Option<i32>, lines: &[(i32, i32)]) -> ReturnInput {
    ReturnInput {
        return_type: "site_return".to_string(),
        site_id,
        manager_id: MANAGER,
        order_id: None,
        date: date(),
        status: None,
        reason: Some("surplus".to_string()),
        items: lines
            .iter()
            .map(|&(product_id, quantity)| ReturnLineInput {
                product_id,
                ordered_quantity: None,
                return_quantity: quantity,
                unit_type: None,
                adjust_stock: true,
            })
            .collect(),
    }
}

/// Wastage of `(product_id, quantity)` lines at `site_id`.
pub fn wastage_input(site_id: Option<i32>, lines: &[(i32, i32)]) -> WastageInput {
    WastageInput {
        wastage_type: "breakage".to_string(),
        site_id,
        manager_id: MANAGER,
        order_id: None,
        date: date(),
        status: None,
        reason: Some("dropped pallet".to_string()),
        items: lines
            .iter()
            .map(|&(product_id, quantity)| WastageLineInput {
                product_id,
                ordered_quantity: None,
                wastage_qty: quantity,
                unit_type: None,
                adjust_stock: true,
            })
            .collect(),
    }
}
