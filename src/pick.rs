use {
    chrono::prelude::*,
    serde::Serialize,
    sqlx::{
        Postgres,
        Transaction,
    },
    crate::matchup::Matchup,
};

#[derive(Debug, thiserror::Error)]
pub(crate) enum PickError {
    #[error("pick deadline has passed")]
    DeadlinePassed,
    #[error("selected team is not part of this matchup")]
    InvalidSelection,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Pick {
    pub(crate) id: i32,
    pub(crate) user_id: i32,
    pub(crate) matchup_id: i32,
    pub(crate) selected_team_id: i32,
    pub(crate) is_correct: Option<bool>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

const PICK_COLUMNS: &str = "id, user_id, matchup_id, selected_team_id, is_correct, created_at, updated_at";

/// Checks a pick against its matchup. Picks lock exactly at kickoff, with no
/// grace period.
pub(crate) fn validate(matchup: &Matchup, selected_team_id: i32, now: DateTime<Utc>) -> Result<(), PickError> {
    if now >= matchup.start_time {
        return Err(PickError::DeadlinePassed)
    }
    if selected_team_id != matchup.home_team_id && selected_team_id != matchup.away_team_id {
        return Err(PickError::InvalidSelection)
    }
    Ok(())
}

impl Pick {
    /// Creates or replaces the caller's pick for a matchup. `is_correct` is
    /// never written here; only settlement touches it.
    pub(crate) async fn upsert(transaction: &mut Transaction<'_, Postgres>, user_id: i32, matchup_id: i32, selected_team_id: i32) -> sqlx::Result<Self> {
        sqlx::query_as::<_, Self>(&format!("INSERT INTO picks (user_id, matchup_id, selected_team_id) VALUES ($1, $2, $3) ON CONFLICT (user_id, matchup_id) DO UPDATE SET selected_team_id = EXCLUDED.selected_team_id, updated_at = now() RETURNING {PICK_COLUMNS}"))
            .bind(user_id)
            .bind(matchup_id)
            .bind(selected_team_id)
            .fetch_one(&mut **transaction)
            .await
    }

    pub(crate) async fn for_user(transaction: &mut Transaction<'_, Postgres>, user_id: i32) -> sqlx::Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(&format!("SELECT {PICK_COLUMNS} FROM picks WHERE user_id = $1 ORDER BY id"))
            .bind(user_id)
            .fetch_all(&mut **transaction)
            .await
    }

    pub(crate) async fn for_matchup(transaction: &mut Transaction<'_, Postgres>, matchup_id: i32) -> sqlx::Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(&format!("SELECT {PICK_COLUMNS} FROM picks WHERE matchup_id = $1 ORDER BY id"))
            .bind(matchup_id)
            .fetch_all(&mut **transaction)
            .await
    }
}
