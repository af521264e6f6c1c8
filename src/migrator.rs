use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_products_table::Migration),
            Box::new(m20240301_000002_create_stock_entries_table::Migration),
            Box::new(m20240301_000003_create_orders_table::Migration),
            Box::new(m20240301_000004_create_returns_tables::Migration),
            Box::new(m20240301_000005_create_wastage_tables::Migration),
        ]
    }
}

// Migration implementations

mod m20240301_000001_create_products_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000001_create_products_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Minimal catalog projection aligned with entities::product Model
            manager
                .create_table(
                    Table::create()
                        .table(Products::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Products::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Products::Name).string().not_null())
                        .col(
                            ColumnDef::new(Products::IsProduct)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(ColumnDef::new(Products::LowStockThreshold).integer().null())
                        .col(ColumnDef::new(Products::UnitType).string().null())
                        .col(
                            ColumnDef::new(Products::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Products {
        Table,
        Id,
        Name,
        IsProduct,
        LowStockThreshold,
        UnitType,
        CreatedAt,
    }
}

mod m20240301_000002_create_stock_entries_table {

    use super::m20240301_000001_create_products_table::Products;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000002_create_stock_entries_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(StockEntries::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockEntries::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(StockEntries::Pool).string_len(16).not_null())
                        .col(ColumnDef::new(StockEntries::ProductId).integer().not_null())
                        .col(ColumnDef::new(StockEntries::SiteId).integer().null())
                        .col(ColumnDef::new(StockEntries::Quantity).integer().not_null())
                        .col(
                            ColumnDef::new(StockEntries::PreviousQuantity)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(StockEntries::AdjustmentType)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockEntries::ReferenceType).string_len(32).null())
                        .col(ColumnDef::new(StockEntries::ReferenceId).integer().null())
                        .col(ColumnDef::new(StockEntries::Name).string().null())
                        .col(ColumnDef::new(StockEntries::Notes).text().null())
                        .col(
                            ColumnDef::new(StockEntries::Status)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(ColumnDef::new(StockEntries::CreatedBy).integer().null())
                        .col(
                            ColumnDef::new(StockEntries::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_stock_entries_product_id")
                                .from(StockEntries::Table, StockEntries::ProductId)
                                .to(Products::Table, Products::Id)
                                .on_delete(ForeignKeyAction::Restrict)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            // Latest-by-key lookup
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_entries_key_latest")
                        .table(StockEntries::Table)
                        .col(StockEntries::ProductId)
                        .col(StockEntries::SiteId)
                        .col(StockEntries::Status)
                        .col(StockEntries::CreatedAt)
                        .col(StockEntries::Id)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_entries_reference")
                        .table(StockEntries::Table)
                        .col(StockEntries::ReferenceType)
                        .col(StockEntries::ReferenceId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(StockEntries::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum StockEntries {
        Table,
        Id,
        Pool,
        ProductId,
        SiteId,
        Quantity,
        PreviousQuantity,
        AdjustmentType,
        ReferenceType,
        ReferenceId,
        Name,
        Notes,
        Status,
        CreatedBy,
        CreatedAt,
    }
}

mod m20240301_000003_create_orders_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000003_create_orders_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Create orders table aligned with entities::order Model
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Orders::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Orders::OrderNumber).string().not_null())
                        .col(ColumnDef::new(Orders::SiteId).integer().null())
                        .col(ColumnDef::new(Orders::CreatedBy).integer().not_null())
                        .col(ColumnDef::new(Orders::Status).string_len(32).not_null())
                        .col(ColumnDef::new(Orders::DeliveryStatus).string_len(32).not_null())
                        .col(
                            ColumnDef::new(Orders::StoreManagerRole)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::IsLpo)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(Orders::MixedGroup).string().null())
                        .col(ColumnDef::new(Orders::DriverName).string().null())
                        .col(ColumnDef::new(Orders::VehicleNumber).string().null())
                        .col(ColumnDef::new(Orders::TransportManagerId).integer().null())
                        .col(ColumnDef::new(Orders::ApprovedBy).integer().null())
                        .col(
                            ColumnDef::new(Orders::ApprovedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(Orders::RejectionReason).text().null())
                        .col(
                            ColumnDef::new(Orders::IsCompleted)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Orders::CompletedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(Orders::CompletedBy).integer().null())
                        .col(
                            ColumnDef::new(Orders::MixedCompletedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Orders::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(Orders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;

            // Useful indexes
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_mixed_group")
                        .table(Orders::Table)
                        .col(Orders::MixedGroup)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_site_id")
                        .table(Orders::Table)
                        .col(Orders::SiteId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_delivery_status")
                        .table(Orders::Table)
                        .col(Orders::DeliveryStatus)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Drop orders table
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Orders {
        Table,
        Id,
        OrderNumber,
        SiteId,
        CreatedBy,
        Status,
        DeliveryStatus,
        StoreManagerRole,
        IsLpo,
        MixedGroup,
        DriverName,
        VehicleNumber,
        TransportManagerId,
        ApprovedBy,
        ApprovedAt,
        RejectionReason,
        IsCompleted,
        CompletedAt,
        CompletedBy,
        MixedCompletedAt,
        Version,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000004_create_returns_tables {

    use super::m20240301_000001_create_products_table::Products;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000004_create_returns_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(OrderReturns::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderReturns::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(OrderReturns::ReturnType).string().not_null())
                        .col(ColumnDef::new(OrderReturns::SiteId).integer().null())
                        .col(ColumnDef::new(OrderReturns::ManagerId).integer().not_null())
                        .col(ColumnDef::new(OrderReturns::OrderId).integer().null())
                        .col(ColumnDef::new(OrderReturns::Date).date().not_null())
                        .col(ColumnDef::new(OrderReturns::Status).string_len(16).not_null())
                        .col(ColumnDef::new(OrderReturns::Reason).text().null())
                        .col(
                            ColumnDef::new(OrderReturns::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OrderReturns::UpdatedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(ReturnItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ReturnItems::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(ReturnItems::ReturnId).integer().not_null())
                        .col(ColumnDef::new(ReturnItems::ProductId).integer().not_null())
                        .col(ColumnDef::new(ReturnItems::OrderedQuantity).integer().null())
                        .col(ColumnDef::new(ReturnItems::ReturnQuantity).integer().not_null())
                        .col(ColumnDef::new(ReturnItems::UnitType).string().null())
                        .col(
                            ColumnDef::new(ReturnItems::AdjustStock)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_return_items_return_id")
                                .from(ReturnItems::Table, ReturnItems::ReturnId)
                                .to(OrderReturns::Table, OrderReturns::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_return_items_product_id")
                                .from(ReturnItems::Table, ReturnItems::ProductId)
                                .to(Products::Table, Products::Id)
                                .on_delete(ForeignKeyAction::Restrict)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_return_items_return_id")
                        .table(ReturnItems::Table)
                        .col(ReturnItems::ReturnId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ReturnItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(OrderReturns::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum OrderReturns {
        Table,
        Id,
        ReturnType,
        SiteId,
        ManagerId,
        OrderId,
        Date,
        Status,
        Reason,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum ReturnItems {
        Table,
        Id,
        ReturnId,
        ProductId,
        OrderedQuantity,
        ReturnQuantity,
        UnitType,
        AdjustStock,
    }
}

mod m20240301_000005_create_wastage_tables {

    use super::m20240301_000001_create_products_table::Products;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000005_create_wastage_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Wastages::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Wastages::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Wastages::WastageType).string().not_null())
                        .col(ColumnDef::new(Wastages::SiteId).integer().null())
                        .col(ColumnDef::new(Wastages::ManagerId).integer().not_null())
                        .col(ColumnDef::new(Wastages::OrderId).integer().null())
                        .col(ColumnDef::new(Wastages::Date).date().not_null())
                        .col(ColumnDef::new(Wastages::Status).string().not_null())
                        .col(ColumnDef::new(Wastages::Reason).text().null())
                        .col(
                            ColumnDef::new(Wastages::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Wastages::UpdatedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(WastageItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(WastageItems::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(WastageItems::WastageId).integer().not_null())
                        .col(ColumnDef::new(WastageItems::ProductId).integer().not_null())
                        .col(ColumnDef::new(WastageItems::OrderedQuantity).integer().null())
                        .col(ColumnDef::new(WastageItems::WastageQty).integer().not_null())
                        .col(ColumnDef::new(WastageItems::UnitType).string().null())
                        .col(
                            ColumnDef::new(WastageItems::AdjustStock)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_wastage_items_wastage_id")
                                .from(WastageItems::Table, WastageItems::WastageId)
                                .to(Wastages::Table, Wastages::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_wastage_items_product_id")
                                .from(WastageItems::Table, WastageItems::ProductId)
                                .to(Products::Table, Products::Id)
                                .on_delete(ForeignKeyAction::Restrict)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_wastage_items_wastage_id")
                        .table(WastageItems::Table)
                        .col(WastageItems::WastageId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(WastageItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Wastages::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Wastages {
        Table,
        Id,
        WastageType,
        SiteId,
        ManagerId,
        OrderId,
        Date,
        Status,
        Reason,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum WastageItems {
        Table,
        Id,
        WastageId,
        ProductId,
        OrderedQuantity,
        WastageQty,
        UnitType,
        AdjustStock,
    }
}
