//! Integration tests for the Postgres writer and registry loaders.
//! Requires a Postgres instance. Set DATABASE_TEST_URL or these tests are skipped.

use gridmark_pipeline::{
    run_migrations, CanonicalRegistry, EntityId, Fields, NaturalKey, PgUpsertWriter, Resolver,
    UpsertTarget, UpsertWriter, WriteError,
};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;

const PRICING: UpsertTarget =
    UpsertTarget::new("gpu_platform_pricing", &["gpu_id", "provider", "pricing_tier"]);

/// Get a migrated test database pool, or skip if no test DB is available.
async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("DATABASE_TEST_URL").ok()?;
    let pool = PgPool::connect(&url).await.ok()?;
    run_migrations(&pool).await.ok()?;

    // Clean slate for each test
    sqlx::query("TRUNCATE gpu, eia_power_plants RESTART IDENTITY CASCADE")
        .execute(&pool)
        .await
        .ok()?;

    Some(pool)
}

async fn seed_gpu(pool: &PgPool, name: &str, aliases: &[&str]) -> i64 {
    sqlx::query_scalar::<_, i64>("INSERT INTO gpu (name, aliases) VALUES ($1, $2) RETURNING id")
        .bind(name)
        .bind(aliases.iter().map(|a| a.to_string()).collect::<Vec<_>>())
        .fetch_one(pool)
        .await
        .unwrap()
}

fn key(gpu_id: i64, tier: &str) -> NaturalKey {
    NaturalKey::new()
        .with("gpu_id", gpu_id)
        .with("provider", "runpod")
        .with("pricing_tier", tier)
}

#[tokio::test]
async fn upsert_converges_to_one_row() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let gpu_id = seed_gpu(&pool, "H100 SXM", &[]).await;
    let writer = PgUpsertWriter::new(pool.clone());

    let first = writer
        .upsert(
            &PRICING,
            &key(gpu_id, "on_demand"),
            &Fields::new().with("hourly_price", 2.49).with("currency", "USD"),
            &json!({"price": "$2.49/hr"}),
        )
        .await
        .unwrap();
    let second = writer
        .upsert(
            &PRICING,
            &key(gpu_id, "on_demand"),
            &Fields::new().with("hourly_price", 1.99).with("currency", None::<String>),
            &json!({"price": "$1.99/hr"}),
        )
        .await
        .unwrap();

    assert_eq!(first, second);

    let (count, price, currency, payload): (i64, f64, Option<String>, serde_json::Value) =
        sqlx::query_as(
            "SELECT COUNT(*) OVER (), hourly_price, currency, source_payload FROM gpu_platform_pricing",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
    assert_eq!(price, 1.99);
    assert_eq!(currency, None);
    assert_eq!(payload, json!({"price": "$1.99/hr"}));
}

#[tokio::test]
async fn distinct_keys_get_distinct_rows() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let gpu_id = seed_gpu(&pool, "A100", &[]).await;
    let writer = PgUpsertWriter::new(pool.clone());

    let spot = writer
        .upsert(&PRICING, &key(gpu_id, "spot"), &Fields::new(), &json!({}))
        .await
        .unwrap();
    let on_demand = writer
        .upsert(&PRICING, &key(gpu_id, "on_demand"), &Fields::new(), &json!({}))
        .await
        .unwrap();

    assert_ne!(spot, on_demand);
}

#[tokio::test]
async fn constraint_violation_is_write_failed() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let writer = PgUpsertWriter::new(pool);

    // No gpu row with this id.
    let err = writer
        .upsert(&PRICING, &key(424_242, "spot"), &Fields::new(), &json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, WriteError::WriteFailed { .. }));
}

#[tokio::test]
async fn null_key_is_rejected_before_the_database() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let writer = PgUpsertWriter::new(pool.clone());
    let key = NaturalKey::new()
        .with("gpu_id", 1)
        .with("provider", None::<String>)
        .with("pricing_tier", "spot");

    let err = writer
        .upsert(&PRICING, &key, &Fields::new(), &json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, WriteError::InvalidKey { .. }));

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM gpu_platform_pricing")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rows, 0);
}

#[tokio::test]
async fn closed_pool_is_store_unavailable() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let gpu_id = seed_gpu(&pool, "L40S", &[]).await;
    let writer = PgUpsertWriter::new(pool.clone());
    pool.close().await;

    let err = writer
        .upsert(&PRICING, &key(gpu_id, "spot"), &Fields::new(), &json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, WriteError::StoreUnavailable(_)));
}

#[tokio::test]
async fn gpu_registry_loads_names_and_aliases() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let h100 = seed_gpu(&pool, "H100 SXM", &["H100-SXM80"]).await;
    seed_gpu(&pool, "A100", &[]).await;

    let registry = CanonicalRegistry::load_gpus(&pool).await.unwrap();
    assert_eq!(registry.len(), 2);

    let resolver = Resolver::new(Arc::new(registry));
    assert_eq!(resolver.resolve("h100-sxm80"), Some(EntityId(h100)));
}

#[tokio::test]
async fn power_plants_resolve_by_code_or_name_and_state() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let barry: i64 = sqlx::query_scalar(
        "INSERT INTO eia_power_plants (api_plant_id, name, state) VALUES ('3', 'Barry', 'AL') RETURNING id",
    )
    .fetch_one(&pool)
    .await
    .unwrap();

    let registry = CanonicalRegistry::load_power_plants(&pool).await.unwrap();
    let resolver = Resolver::new(Arc::new(registry)).without_partial();

    assert_eq!(resolver.resolve("3"), Some(EntityId(barry)));
    assert_eq!(resolver.resolve("Barry (AL)"), Some(EntityId(barry)));
    assert_eq!(resolver.resolve("Barry (GA)"), None);
}
