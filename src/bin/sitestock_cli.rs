use std::{str::FromStr, sync::Arc};

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use serde::Serialize;
use sitestock::{
    config::{self, AppConfig},
    db::{self, DbPool},
    entities::{DeliveryStatus, OrderModel, StockEntryModel, StockKey, StorePartition},
    events::{self, EventSender},
    logging::{self, LoggerConfig},
    provenance::{Reference, ReferenceResolver},
    services::{
        order_delivery::{AdvanceDeliveryCommand, CreateOrderInput},
        order_policy::{Actor, ActorRole},
        stock_ledger::{SiteScope, StockEntryFilter},
        stock_projector::describe_change,
    },
    StockServices,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let context = CliContext::initialize().await?;

    match cli.command {
        Commands::Migrate => {
            db::run_migrations(&context.db)
                .await
                .context("failed to run migrations")?;
            println!("Migrations applied");
        }
        Commands::Stock(command) => handle_stock_command(&context, command, cli.json).await?,
        Commands::Order(command) => handle_order_command(&context, command, cli.json).await?,
        Commands::Return(command) => handle_return_command(&context, command, cli.json).await?,
        Commands::Wastage(command) => handle_wastage_command(&context, command, cli.json).await?,
    }

    Ok(())
}

#[derive(Parser)]
#[command(name = "sitestock", about = "Stock ledger and order delivery tooling", version)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON when available"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending schema migrations
    Migrate,
    #[command(subcommand)]
    Stock(StockCommands),
    #[command(subcommand)]
    Order(OrderCommands),
    #[command(subcommand)]
    Return(AggregateCommands),
    #[command(subcommand)]
    Wastage(AggregateCommands),
}

#[derive(Subcommand)]
enum StockCommands {
    Current(StockKeyArgs),
    History(StockHistoryArgs),
    Classify(StockKeyArgs),
    Levels(ProductArgs),
    Receive(StockMoveArgs),
    Issue(StockMoveArgs),
    Count(StockCountArgs),
}

#[derive(Subcommand)]
enum OrderCommands {
    Create(CreateOrderArgs),
    Get(OrderIdArgs),
    List(ActorArgs),
    Approve(OrderActionArgs),
    Reject(RejectOrderArgs),
    Advance(AdvanceOrderArgs),
}

#[derive(Subcommand)]
enum AggregateCommands {
    Get(IdArgs),
    /// Delete the record and restore the stock it moved
    Delete(IdArgs),
    /// Re-derive the ledger rows of the record from its current line items
    Resync(IdArgs),
}

#[derive(Args)]
struct ProductArgs {
    #[arg(long, help = "Product identifier")]
    product: i32,
}

#[derive(Args)]
struct StockKeyArgs {
    #[arg(long, help = "Product identifier")]
    product: i32,
    #[arg(long, help = "Site identifier; omit for the general pool")]
    site: Option<i32>,
}

#[derive(Args)]
struct StockHistoryArgs {
    #[command(flatten)]
    key: StockKeyArgs,
    #[arg(long, action = ArgAction::SetTrue, help = "Include every site, not just --site")]
    all_sites: bool,
    #[arg(long, action = ArgAction::SetTrue, help = "Include voided rows")]
    voided: bool,
    #[arg(long, default_value_t = 1)]
    page: u64,
    #[arg(long)]
    per_page: Option<u64>,
}

#[derive(Args)]
struct StockMoveArgs {
    #[command(flatten)]
    key: StockKeyArgs,
    #[arg(long)]
    quantity: i32,
    #[arg(long, help = "Purchase identifier the movement belongs to")]
    purchase: Option<i32>,
    #[arg(long, help = "Acting user identifier")]
    actor_id: Option<i32>,
}

#[derive(Args)]
struct StockCountArgs {
    #[command(flatten)]
    key: StockKeyArgs,
    #[arg(long, help = "Counted absolute quantity")]
    quantity: i32,
    #[arg(long)]
    notes: Option<String>,
    #[arg(long, help = "Acting user identifier")]
    actor_id: Option<i32>,
}

#[derive(Args)]
struct IdArgs {
    #[arg(long)]
    id: i32,
}

#[derive(Args)]
struct ActorArgs {
    #[arg(long, help = "Acting user identifier")]
    actor_id: i32,
    #[arg(long, value_parser = parse_role, help = "site_supervisor, store_manager, workshop_manager, transport_manager or admin")]
    role: ActorRole,
    #[arg(long, help = "Site of a site supervisor")]
    actor_site: Option<i32>,
}

impl ActorArgs {
    fn actor(&self) -> Actor {
        Actor {
            site_id: self.actor_site,
            ..Actor::new(self.actor_id, self.role)
        }
    }
}

#[derive(Args)]
struct OrderIdArgs {
    #[arg(long)]
    order: i32,
}

#[derive(Args)]
struct OrderActionArgs {
    #[arg(long)]
    order: i32,
    #[command(flatten)]
    actor: ActorArgs,
}

#[derive(Args)]
struct RejectOrderArgs {
    #[arg(long)]
    order: i32,
    #[arg(long)]
    reason: String,
    #[command(flatten)]
    actor: ActorArgs,
}

#[derive(Args)]
struct AdvanceOrderArgs {
    #[arg(long)]
    order: i32,
    #[arg(long = "to", value_parser = parse_delivery_status, help = "in_transit, outfordelivery or delivered")]
    target: DeliveryStatus,
    #[arg(long)]
    driver: Option<String>,
    #[arg(long)]
    vehicle: Option<String>,
    #[command(flatten)]
    actor: ActorArgs,
}

#[derive(Args)]
struct CreateOrderArgs {
    #[arg(long)]
    number: String,
    #[arg(long, help = "Site identifier (admins only; supervisors use their own site)")]
    site: Option<i32>,
    #[arg(long, value_parser = parse_partition, default_value = "store", help = "store or workshop")]
    partition: StorePartition,
    #[arg(long, action = ArgAction::SetTrue)]
    lpo: bool,
    #[arg(long, help = "Mixed order group key shared by the partitions of one order")]
    group: Option<String>,
    #[command(flatten)]
    actor: ActorArgs,
}

async fn handle_stock_command(context: &CliContext, command: StockCommands, json: bool) -> Result<()> {
    let services = &context.services;
    match command {
        StockCommands::Current(args) => {
            let quantity = services
                .projector
                .current_quantity(args.product, args.site)
                .await
                .with_context(|| format!("failed to read stock of product {}", args.product))?;
            if json {
                print_json(&serde_json::json!({
                    "product_id": args.product,
                    "site_id": args.site,
                    "quantity": quantity,
                }))?;
            } else {
                println!("{}: {}", StockKey::new(args.product, args.site), quantity);
            }
        }
        StockCommands::History(args) => {
            let site = if args.all_sites {
                SiteScope::Any
            } else {
                SiteScope::from(args.key.site)
            };
            let mut filter = StockEntryFilter::default().site(site);
            if args.voided {
                filter = filter.include_voided();
            }
            filter.page = Some(args.page);
            filter.per_page = args.per_page;

            let page = services
                .ledger
                .entries_for(args.key.product, filter)
                .await
                .context("failed to read ledger history")?;
            if json {
                print_json(&page)?;
            } else {
                println!(
                    "Ledger page {} of {} ({} entries total)",
                    page.page, page.total_pages, page.total
                );
                let resolver = ReferenceResolver;
                for entry in &page.items {
                    render_entry(entry, &describe_change(entry).label);
                    if let Ok(reference) = entry.reference() {
                        if reference.is_aggregate() {
                            let source = resolver.describe(&*context.db, &reference).await?;
                            println!("    from {}", source);
                        }
                    }
                }
            }
        }
        StockCommands::Classify(args) => {
            let report = services
                .projector
                .low_stock_classification(args.product, args.site)
                .await
                .context("failed to classify stock level")?;
            if json {
                print_json(&report)?;
            } else {
                println!(
                    "{} quantity {} threshold {} => {}",
                    StockKey::new(report.product_id, report.site_id),
                    report.quantity,
                    report
                        .threshold
                        .map(|t| t.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    report.level
                );
            }
        }
        StockCommands::Levels(args) => {
            let reports = services
                .projector
                .levels_for_product(args.product)
                .await
                .context("failed to read stock levels")?;
            if json {
                print_json(&reports)?;
            } else {
                for report in reports {
                    println!(
                        "{} quantity {} => {}",
                        StockKey::new(report.product_id, report.site_id),
                        report.quantity,
                        report.level
                    );
                }
            }
        }
        StockCommands::Receive(args) => {
            let key = StockKey::new(args.key.product, args.key.site);
            let reference = args.purchase.map(Reference::Purchase).unwrap_or(Reference::None);
            let entry = services
                .ledger
                .receive(key, args.quantity, reference, args.actor_id)
                .await
                .context("failed to receive stock")?;
            output_entry(&entry, json)?;
        }
        StockCommands::Issue(args) => {
            let key = StockKey::new(args.key.product, args.key.site);
            let reference = args.purchase.map(Reference::Purchase).unwrap_or(Reference::None);
            let entry = services
                .ledger
                .issue(key, args.quantity, reference, args.actor_id)
                .await
                .context("failed to issue stock")?;
            output_entry(&entry, json)?;
        }
        StockCommands::Count(args) => {
            let key = StockKey::new(args.key.product, args.key.site);
            let entry = services
                .ledger
                .set_quantity(key, args.quantity, args.actor_id, args.notes)
                .await
                .context("failed to record stock count")?;
            output_entry(&entry, json)?;
        }
    }
    Ok(())
}

async fn handle_order_command(context: &CliContext, command: OrderCommands, json: bool) -> Result<()> {
    let orders = &context.services.orders;
    let order = match command {
        OrderCommands::Create(args) => orders
            .create_order(
                &args.actor.actor(),
                CreateOrderInput {
                    order_number: args.number,
                    site_id: args.site,
                    store_manager_role: args.partition,
                    is_lpo: args.lpo,
                    mixed_group: args.group,
                },
            )
            .await
            .context("failed to create order")?,
        OrderCommands::Get(args) => orders
            .get_order(args.order)
            .await
            .with_context(|| format!("failed to fetch order {}", args.order))?,
        OrderCommands::List(args) => {
            let visible = orders
                .visible_orders(&args.actor())
                .await
                .context("failed to list orders")?;
            if json {
                print_json(&visible)?;
            } else {
                println!("{} visible orders", visible.len());
                for order in &visible {
                    render_order(order);
                }
            }
            return Ok(());
        }
        OrderCommands::Approve(args) => orders
            .approve(args.order, &args.actor.actor())
            .await
            .with_context(|| format!("failed to approve order {}", args.order))?,
        OrderCommands::Reject(args) => orders
            .reject(args.order, &args.actor.actor(), &args.reason)
            .await
            .with_context(|| format!("failed to reject order {}", args.order))?,
        OrderCommands::Advance(args) => {
            let mut command = AdvanceDeliveryCommand::new(args.order, args.target);
            command.driver_name = args.driver;
            command.vehicle_number = args.vehicle;
            orders
                .advance(&args.actor.actor(), command)
                .await
                .with_context(|| format!("failed to advance order {}", args.order))?
        }
    };

    if json {
        print_json(&order)?;
    } else {
        render_order(&order);
        if order.mixed_group.is_some() {
            let completion = orders.mixed_completion_for(order.id).await?;
            println!("  mixed group: {:?}", completion);
        }
    }
    Ok(())
}

async fn handle_return_command(
    context: &CliContext,
    command: AggregateCommands,
    json: bool,
) -> Result<()> {
    let services = &context.services;
    match command {
        AggregateCommands::Get(args) => {
            let aggregate = services
                .returns
                .get(args.id)
                .await
                .with_context(|| format!("failed to fetch return {}", args.id))?;
            print_json(&aggregate)?;
        }
        AggregateCommands::Delete(args) => {
            let outcome = services
                .returns
                .delete(args.id)
                .await
                .with_context(|| format!("failed to delete return {}", args.id))?;
            output_outcome(&Reference::Return(args.id), &outcome, json)?;
        }
        AggregateCommands::Resync(args) => {
            let aggregate = services
                .returns
                .get(args.id)
                .await
                .with_context(|| format!("failed to fetch return {}", args.id))?;
            let outcome = services
                .sync
                .sync_stock(&aggregate.header)
                .await
                .with_context(|| format!("failed to resync return {}", args.id))?;
            output_outcome(&Reference::Return(args.id), &outcome, json)?;
        }
    }
    Ok(())
}

async fn handle_wastage_command(
    context: &CliContext,
    command: AggregateCommands,
    json: bool,
) -> Result<()> {
    let services = &context.services;
    match command {
        AggregateCommands::Get(args) => {
            let aggregate = services
                .wastages
                .get(args.id)
                .await
                .with_context(|| format!("failed to fetch wastage {}", args.id))?;
            print_json(&aggregate)?;
        }
        AggregateCommands::Delete(args) => {
            let outcome = services
                .wastages
                .delete(args.id)
                .await
                .with_context(|| format!("failed to delete wastage {}", args.id))?;
            output_outcome(&Reference::Wastage(args.id), &outcome, json)?;
        }
        AggregateCommands::Resync(args) => {
            let aggregate = services
                .wastages
                .get(args.id)
                .await
                .with_context(|| format!("failed to fetch wastage {}", args.id))?;
            let outcome = services
                .sync
                .sync_stock(&aggregate.header)
                .await
                .with_context(|| format!("failed to resync wastage {}", args.id))?;
            output_outcome(&Reference::Wastage(args.id), &outcome, json)?;
        }
    }
    Ok(())
}

struct CliContext {
    db: Arc<DbPool>,
    services: StockServices,
}

impl CliContext {
    async fn initialize() -> Result<Self> {
        let config: AppConfig = config::load_config().context("failed to load application config")?;
        config::init_tracing(&config.log_level, config.log_json || config.is_production());

        let db_pool = db::establish_connection_from_app_config(&config)
            .await
            .context("failed to connect to database")?;
        db::check_connection(&db_pool)
            .await
            .context("database is not reachable")?;
        let db = Arc::new(db_pool);
        if config.auto_migrate {
            db::run_migrations(&db)
                .await
                .context("failed to run migrations")?;
        }

        let (event_sender, event_rx) = EventSender::channel(config.event_channel_capacity);
        tokio::spawn(events::process_events(event_rx));

        let logger_config = if config.is_production() {
            LoggerConfig::default().plain()
        } else {
            LoggerConfig::default()
        };
        let logger = logging::setup_logger(logger_config);
        let services = StockServices::new(db.clone(), Arc::new(event_sender), logger, &config);

        Ok(Self { db, services })
    }
}

fn parse_role(value: &str) -> Result<ActorRole, String> {
    ActorRole::from_str(value).map_err(|_| format!("unknown role '{}'", value))
}

fn parse_delivery_status(value: &str) -> Result<DeliveryStatus, String> {
    DeliveryStatus::from_str(value).map_err(|_| format!("unknown delivery status '{}'", value))
}

fn parse_partition(value: &str) -> Result<StorePartition, String> {
    StorePartition::from_str(value).map_err(|_| format!("unknown store partition '{}'", value))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn output_entry(entry: &StockEntryModel, json: bool) -> Result<()> {
    if json {
        print_json(entry)
    } else {
        let label = format!("{:+}", entry.contribution());
        render_entry(entry, &label);
        Ok(())
    }
}

fn output_outcome(
    reference: &Reference,
    outcome: &sitestock::services::stock_sync::SyncOutcome,
    json: bool,
) -> Result<()> {
    if json {
        return print_json(outcome);
    }
    println!(
        "{}: voided {} appended {} compensated {}",
        reference,
        outcome.voided.len(),
        outcome.appended.len(),
        outcome.compensations.len()
    );
    for entry in outcome.appended.iter().chain(&outcome.compensations) {
        render_entry(entry, &format!("{:+}", entry.contribution()));
    }
    Ok(())
}

fn render_entry(entry: &StockEntryModel, label: &str) {
    println!(
        "- #{} {} • {} {} => {} • {} • {}{}",
        entry.id,
        entry.created_at.format("%Y-%m-%d %H:%M:%S"),
        entry.adjustment_type,
        label,
        entry.quantity,
        entry.name.as_deref().unwrap_or("-"),
        entry.notes.as_deref().unwrap_or(""),
        if entry.status { "" } else { " (voided)" }
    );
}

fn render_order(order: &OrderModel) {
    println!(
        "- Order {} ({}) • site {} • {} • status {} • delivery {}{}",
        order.id,
        order.order_number,
        order
            .site_id
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string()),
        order.store_manager_role,
        order.status,
        order.delivery_status,
        if order.is_lpo { " • LPO" } else { "" }
    );
}
