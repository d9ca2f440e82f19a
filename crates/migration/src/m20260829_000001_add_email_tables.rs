use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

/// Create the four tables the delivery subsystem touches: the durable job
/// queue, the template store, the per-attempt delivery log, and the
/// suppression (unsubscribe) list.
///
/// Everything is `if_not_exists` so the worker can apply this idempotently
/// at startup.
#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(EmailJobs::Table)
                    .if_not_exists()
                    .col(pk_auto(EmailJobs::Id))
                    .col(string(EmailJobs::Queue))
                    .col(json(EmailJobs::Payload))
                    .col(
                        ColumnDef::new(EmailJobs::Status)
                            .string()
                            .not_null()
                            .comment("'pending', 'in_flight', 'completed' or 'dead'"),
                    )
                    .col(integer(EmailJobs::AttemptsMade).default(0))
                    .col(integer(EmailJobs::MaxAttempts))
                    .col(timestamp_with_time_zone(EmailJobs::AvailableAt))
                    .col(text_null(EmailJobs::LastError))
                    .col(
                        timestamp_with_time_zone(EmailJobs::CreatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        timestamp_with_time_zone(EmailJobs::UpdatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_email_jobs_claimable")
                    .table(EmailJobs::Table)
                    .col(EmailJobs::Queue)
                    .col(EmailJobs::Status)
                    .col(EmailJobs::AvailableAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(EmailTemplates::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(EmailTemplates::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(string(EmailTemplates::Subject))
                    .col(text(EmailTemplates::Body))
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(EmailLogs::Table)
                    .if_not_exists()
                    .col(pk_auto(EmailLogs::Id))
                    .col(string(EmailLogs::ToEmail))
                    .col(string_null(EmailLogs::TemplateId))
                    .col(
                        ColumnDef::new(EmailLogs::Status)
                            .string()
                            .not_null()
                            .comment("'sent', 'suppressed', 'logged' or 'error'"),
                    )
                    .col(text_null(EmailLogs::ProviderResponse))
                    .col(
                        timestamp_with_time_zone(EmailLogs::CreatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_email_logs_to_email")
                    .table(EmailLogs::Table)
                    .col(EmailLogs::ToEmail)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_email_logs_created_at")
                    .table(EmailLogs::Table)
                    .col(EmailLogs::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(EmailUnsubscribes::Table)
                    .if_not_exists()
                    .col(pk_auto(EmailUnsubscribes::Id))
                    .col(string(EmailUnsubscribes::Email))
                    .col(string(EmailUnsubscribes::Token))
                    .col(string_null(EmailUnsubscribes::Reason))
                    .col(
                        timestamp_with_time_zone(EmailUnsubscribes::CreatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_email_unsubscribes_email")
                    .table(EmailUnsubscribes::Table)
                    .col(EmailUnsubscribes::Email)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(EmailUnsubscribes::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(EmailLogs::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(EmailTemplates::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(EmailJobs::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum EmailJobs {
    Table,
    Id,
    Queue,
    Payload,
    Status,
    AttemptsMade,
    MaxAttempts,
    AvailableAt,
    LastError,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum EmailTemplates {
    Table,
    Id,
    Subject,
    Body,
}

#[derive(Iden)]
enum EmailLogs {
    Table,
    Id,
    ToEmail,
    TemplateId,
    Status,
    ProviderResponse,
    CreatedAt,
}

#[derive(Iden)]
enum EmailUnsubscribes {
    Table,
    Id,
    Email,
    Token,
    Reason,
    CreatedAt,
}
