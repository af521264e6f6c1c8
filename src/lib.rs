//! Sitestock Library
//!
//! Stock ledger, return/wastage stock synchronization and order delivery workflow for
//! construction sites, stores and transport.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod locks;
pub mod logging;
pub mod migrator;
pub mod provenance;
pub mod services;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    services::{
        order_delivery::OrderDeliveryService, returns::ReturnService,
        stock_ledger::StockLedgerService, stock_projector::StockProjector,
        stock_sync::StockSyncService, wastages::WastageService,
    },
};

/// One page of a listing. `page` is 1-based.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

/// All services wired over one pool and one event channel.
///
/// The ledger's key locks are shared by the projector, the synchronizer and both
/// aggregate services, so every writer of a `(product, site)` key serializes on the same lock.
#[derive(Clone)]
pub struct StockServices {
    pub ledger: StockLedgerService,
    pub projector: StockProjector,
    pub sync: StockSyncService,
    pub returns: ReturnService,
    pub wastages: WastageService,
    pub orders: OrderDeliveryService,
}

impl StockServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        logger: slog::Logger,
        config: &AppConfig,
    ) -> Self {
        let ledger = StockLedgerService::new(db_pool.clone(), event_sender.clone())
            .with_page_limits(config.default_page_size, config.max_page_size);
        let sync = StockSyncService::new(ledger.clone(), logger);
        Self {
            projector: StockProjector::new(ledger.clone()),
            returns: ReturnService::new(db_pool.clone(), event_sender.clone(), sync.clone()),
            wastages: WastageService::new(db_pool.clone(), event_sender.clone(), sync.clone()),
            orders: OrderDeliveryService::new(db_pool, event_sender),
            ledger,
            sync,
        }
    }
}
