//! Derived-count and status-progression triggers on a provisioned schema.

mod common;

use apex_provisioner::schema::{
    CorrelationStatus, CrossMonitorThreat, HandoffStatus, ThreatCorrelation, ThreatHandoffLog,
};
use apex_provisioner::{apex_catalog, Provisioner};
use common::TestDb;
use sqlx::PgPool;

async fn provisioned() -> Option<TestDb> {
    let db = TestDb::new().await?;
    let report = Provisioner::new(db.config.clone(), apex_catalog().without_seeds(), db.pool.clone())
        .run()
        .await
        .unwrap();
    assert!(report.succeeded(), "{:?}", report.failures().collect::<Vec<_>>());
    Some(db)
}

async fn new_client(pool: &PgPool, email: &str) -> i32 {
    sqlx::query_scalar("INSERT INTO clients (name, email) VALUES ($1, $1) RETURNING id")
        .bind(email)
        .fetch_one(pool)
        .await
        .unwrap()
}

async fn new_property(pool: &PgPool, client_id: i32) -> i32 {
    sqlx::query_scalar("INSERT INTO properties (client_id, name) VALUES ($1, 'site') RETURNING id")
        .bind(client_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

async fn property_count(pool: &PgPool, client_id: i32) -> i32 {
    sqlx::query_scalar("SELECT property_count FROM clients WHERE id = $1")
        .bind(client_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

async fn new_threat(pool: &PgPool, threat_id: &str) {
    sqlx::query(
        "INSERT INTO cross_monitor_threats \
         (threat_id, monitor_id, threat_type, threat_level, confidence, bbox_x, bbox_y, bbox_width, bbox_height) \
         VALUES ($1, '0', 'weapon', 'high', 0.91, 10, 20, 64, 128)",
    )
    .bind(threat_id)
    .execute(pool)
    .await
    .unwrap();
}

async fn new_correlation(pool: &PgPool, correlation_id: &str, threat_id: &str) {
    sqlx::query(
        "INSERT INTO threat_correlations (correlation_id, primary_threat_id, confidence_score) VALUES ($1, $2, 0.8)",
    )
    .bind(correlation_id)
    .bind(threat_id)
    .execute(pool)
    .await
    .unwrap();
}

async fn set_status(pool: &PgPool, correlation_id: &str, status: CorrelationStatus) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE threat_correlations SET status = $1 WHERE correlation_id = $2")
        .bind(status.as_str())
        .bind(correlation_id)
        .execute(pool)
        .await
        .map(|_| ())
}

#[tokio::test]
async fn property_count_follows_inserts_and_deletes() {
    let Some(db) = provisioned().await else { return };
    let client = new_client(&db.pool, "a@example.com").await;

    let first = new_property(&db.pool, client).await;
    new_property(&db.pool, client).await;
    assert_eq!(property_count(&db.pool, client).await, 2);

    sqlx::query("DELETE FROM properties WHERE id = $1")
        .bind(first)
        .execute(&db.pool)
        .await
        .unwrap();
    assert_eq!(property_count(&db.pool, client).await, 1);

    let stamped: Option<chrono::DateTime<chrono::Utc>> =
        sqlx::query_scalar("SELECT properties_updated_at FROM clients WHERE id = $1")
            .bind(client)
            .fetch_one(&db.pool)
            .await
            .unwrap();
    assert!(stamped.is_some());

    db.teardown().await;
}

#[tokio::test]
async fn moving_a_property_recounts_both_clients() {
    let Some(db) = provisioned().await else { return };
    let from = new_client(&db.pool, "from@example.com").await;
    let to = new_client(&db.pool, "to@example.com").await;
    let property = new_property(&db.pool, from).await;
    new_property(&db.pool, from).await;

    sqlx::query("UPDATE properties SET client_id = $1 WHERE id = $2")
        .bind(to)
        .bind(property)
        .execute(&db.pool)
        .await
        .unwrap();

    assert_eq!(property_count(&db.pool, from).await, 1);
    assert_eq!(property_count(&db.pool, to).await, 1);

    db.teardown().await;
}

#[tokio::test]
async fn handoff_count_tracks_log_rows() {
    let Some(db) = provisioned().await else { return };
    new_threat(&db.pool, "t-1").await;
    new_correlation(&db.pool, "c-1", "t-1").await;

    for to in ["1", "2"] {
        sqlx::query(
            "INSERT INTO threat_handoff_log (correlation_id, threat_id, from_monitor, to_monitor) \
             VALUES ('c-1', 't-1', '0', $1)",
        )
        .bind(to)
        .execute(&db.pool)
        .await
        .unwrap();
    }

    let correlations: Vec<ThreatCorrelation> = sqlx::query_as(ThreatCorrelation::SELECT)
        .fetch_all(&db.pool)
        .await
        .unwrap();
    assert_eq!(correlations.len(), 1);
    let correlation = &correlations[0];
    assert_eq!(correlation.handoff_count, 2);
    assert!(correlation.last_handoff_at.is_some());
    assert_eq!(correlation.status, CorrelationStatus::Pending);
    assert!(correlation.correlated_threat_ids.is_empty());
    assert!(!correlation.is_expired_at(chrono::Utc::now()));

    let log: Vec<ThreatHandoffLog> = sqlx::query_as(ThreatHandoffLog::SELECT)
        .fetch_all(&db.pool)
        .await
        .unwrap();
    assert_eq!(log.len(), 2);
    assert!(log.iter().all(|h| h.status == HandoffStatus::Initiated && h.from_monitor == "0"));
    assert_eq!(log[1].to_monitor, "2");

    let threats: Vec<CrossMonitorThreat> = sqlx::query_as(CrossMonitorThreat::SELECT)
        .fetch_all(&db.pool)
        .await
        .unwrap();
    assert_eq!(threats.len(), 1);
    assert_eq!(threats[0].threat_id, "t-1");
    assert_eq!(threats[0].bbox_height, 128);
    assert!(threats[0].zone_id.is_none());

    db.teardown().await;
}

#[tokio::test]
async fn correlation_status_only_moves_forward() {
    let Some(db) = provisioned().await else { return };
    new_threat(&db.pool, "t-1").await;
    new_correlation(&db.pool, "c-1", "t-1").await;

    set_status(&db.pool, "c-1", CorrelationStatus::Active).await.unwrap();
    set_status(&db.pool, "c-1", CorrelationStatus::HandoffInProgress).await.unwrap();

    let err = set_status(&db.pool, "c-1", CorrelationStatus::Pending).await.unwrap_err();
    let code = err.as_database_error().and_then(|e| e.code()).map(|c| c.into_owned());
    assert_eq!(code.as_deref(), Some("23514"));

    set_status(&db.pool, "c-1", CorrelationStatus::Completed).await.unwrap();
    assert!(set_status(&db.pool, "c-1", CorrelationStatus::Failed).await.is_err());

    let status: String = sqlx::query_scalar("SELECT status FROM threat_correlations WHERE correlation_id = 'c-1'")
        .fetch_one(&db.pool)
        .await
        .unwrap();
    assert_eq!(status, "completed");

    db.teardown().await;
}
