//! roster-sync - reconcile a JSON file into a PostgreSQL collection.
//!
//! Reads an array of JSON objects from `SYNC_INPUT` and makes the
//! `SYNC_COLLECTION` collection match it under `SYNC_POLICY`. See
//! [`Config`] and [`SyncJob`] for every variable.

use roster_engine::{CancellationToken, Context, Entity, ReconcileRequest};
use roster_postgres::{db, load_documents, Config, Document, PgStore, SyncJob};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "roster_postgres=debug,roster_engine=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    let job = SyncJob::from_env()?;

    tracing::info!(
        collection = %job.collection,
        input = %job.input.display(),
        policy = ?job.policy,
        "Starting roster-sync"
    );

    let raw = tokio::fs::read_to_string(&job.input).await?;
    let desired = load_documents(&raw, &job.key_field)?;

    let pool = db::create_pool(&config.database_url, config.max_connections).await?;
    tracing::info!("Running database migrations...");
    db::run_migrations(&pool).await?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, cancelling");
                cancel.cancel();
            }
        }
    });

    let store = PgStore::<Document>::new(pool).with_collection(job.collection.as_str());
    let ctx = Context::new(store)
        .with_retry(config.retry.clone())
        .with_cancellation(cancel);

    let mut request = ReconcileRequest::new(desired)
        .key_of(|doc: &Document| doc.id())
        .policy(job.policy);
    if let Some(expr) = job.filter {
        request = request.filter(expr);
    }

    let summary = ctx.reconcile(&request).await?;
    tracing::info!(
        added = summary.added.len(),
        updated = summary.updated.len(),
        removed = summary.removed.len(),
        "Sync complete"
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
