use crate::entities::{materials, short_link_rules, short_links, submissions, ticket_files};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sea_orm::{ConnectionTrait, Schema};
use std::time::Duration;
use tracing::info;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://courseware.db?mode=rwc";

pub async fn setup_database(db_url: &str) -> anyhow::Result<DatabaseConnection> {
    info!("📂 Database: {}", db_url);

    let mut opt = ConnectOptions::new(db_url);
    opt.max_connections(100)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);

    let db = Database::connect(opt).await?;

    info!("✅ Database connected successfully");

    run_migrations(&db).await?;

    Ok(db)
}

pub async fn run_migrations(db: &DatabaseConnection) -> anyhow::Result<()> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    info!("🔄 Running auto-migrations...");

    // Referenced tables first: materials -> submissions, short_links -> short_link_rules
    let stmts = vec![
        (
            "materials",
            schema
                .create_table_from_entity(materials::Entity)
                .if_not_exists()
                .to_owned(),
        ),
        (
            "submissions",
            schema
                .create_table_from_entity(submissions::Entity)
                .if_not_exists()
                .to_owned(),
        ),
        (
            "ticket_files",
            schema
                .create_table_from_entity(ticket_files::Entity)
                .if_not_exists()
                .to_owned(),
        ),
        (
            "short_links",
            schema
                .create_table_from_entity(short_links::Entity)
                .if_not_exists()
                .to_owned(),
        ),
        (
            "short_link_rules",
            schema
                .create_table_from_entity(short_link_rules::Entity)
                .if_not_exists()
                .to_owned(),
        ),
    ];

    for (name, stmt) in stmts {
        let stmt = builder.build(&stmt);
        match db.execute(stmt).await {
            Ok(_) => info!("   - Table '{}' checked/created", name),
            Err(e) => {
                tracing::error!("   - Failed to create table '{}': {}", name, e);
                return Err(e.into());
            }
        }
    }

    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_materials_subject_id ON materials(subject_id)",
        "CREATE INDEX IF NOT EXISTS idx_submissions_user_id ON submissions(user_id)",
        "CREATE INDEX IF NOT EXISTS idx_submissions_material_id ON submissions(material_id)",
        "CREATE INDEX IF NOT EXISTS idx_ticket_files_ticket_id ON ticket_files(ticket_id)",
        "CREATE INDEX IF NOT EXISTS idx_short_links_original_url ON short_links(original_url)",
    ];

    for query in indexes {
        match db
            .execute(sea_orm::Statement::from_string(builder, query.to_owned()))
            .await
        {
            Ok(_) => tracing::debug!("   - Executed schema update: {}", query),
            Err(e) => tracing::warn!("   - Schema update warning: {} -> {}", query, e),
        }
    }

    Ok(())
}
