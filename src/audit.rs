//! Append-only log of administrative and security-relevant actions. Never
//! mutated or deleted by normal flow.

use {
    chrono::prelude::*,
    serde::Serialize,
    sqlx::{
        Postgres,
        Transaction,
    },
};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AuditLog {
    pub(crate) id: i32,
    pub(crate) user_id: Option<i32>,
    pub(crate) username: Option<String>,
    pub(crate) action: String,
    pub(crate) details: Option<String>,
    pub(crate) created_at: DateTime<Utc>,
}

pub(crate) async fn record(transaction: &mut Transaction<'_, Postgres>, user_id: Option<i32>, action: &str, details: &str) -> sqlx::Result<()> {
    sqlx::query("INSERT INTO audit_logs (user_id, action, details) VALUES ($1, $2, $3)")
        .bind(user_id)
        .bind(action)
        .bind(details)
        .execute(&mut **transaction)
        .await?;
    Ok(())
}

pub(crate) async fn latest(transaction: &mut Transaction<'_, Postgres>, limit: i64) -> sqlx::Result<Vec<AuditLog>> {
    sqlx::query_as::<_, AuditLog>("SELECT l.id, l.user_id, u.username, l.action, l.details, l.created_at FROM audit_logs l LEFT JOIN users u ON u.id = l.user_id ORDER BY l.created_at DESC LIMIT $1")
        .bind(limit)
        .fetch_all(&mut **transaction)
        .await
}
