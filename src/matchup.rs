use {
    chrono::prelude::*,
    rocket::FromFormField,
    serde::{
        Deserialize,
        Serialize,
    },
    sqlx::{
        Postgres,
        Transaction,
    },
};

/// Season phase; determines the point value of a correct pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, FromFormField)]
#[sqlx(type_name = "season_stage", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub(crate) enum Stage {
    #[field(value = "REGULAR")]
    Regular,
    #[field(value = "WILDCARD")]
    Wildcard,
    #[field(value = "DIVISIONAL")]
    Divisional,
    #[field(value = "CONFERENCE")]
    Conference,
    #[field(value = "SUPERBOWL")]
    Superbowl,
}

impl Stage {
    pub(crate) fn point_value(&self) -> i32 {
        match self {
            Self::Regular => 1,
            Self::Wildcard | Self::Divisional | Self::Conference => 2,
            Self::Superbowl => 3,
        }
    }
}

impl Default for Stage {
    fn default() -> Self {
        Self::Regular
    }
}

pub(crate) const WEEK_LIMIT: usize = 18;

#[derive(Debug, thiserror::Error)]
pub(crate) enum ScheduleError {
    #[error("a matchup cannot pair a team with itself")]
    SameTeam,
    #[error("week must be between 1 and 18")]
    InvalidWeek,
    #[error("week already has the maximum number of matchups")]
    WeekLimit,
    #[error("team already scheduled in this week and stage")]
    TeamAlreadyScheduled,
    #[error("finished matchups can only be re-scored or deleted")]
    Finished,
    #[error(transparent)] Sql(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Matchup {
    pub(crate) id: i32,
    pub(crate) week: i32,
    pub(crate) stage: Stage,
    pub(crate) home_team_id: i32,
    pub(crate) away_team_id: i32,
    pub(crate) start_time: DateTime<Utc>,
    pub(crate) home_score: Option<i32>,
    pub(crate) away_score: Option<i32>,
    pub(crate) winner_id: Option<i32>,
    pub(crate) is_finished: bool,
}

const MATCHUP_COLUMNS: &str = "id, week, stage, home_team_id, away_team_id, start_time, home_score, away_score, winner_id, is_finished";

/// Scheduling invariants: no self-matchup, week within the season, at most
/// [`WEEK_LIMIT`] matchups per (week, stage), and no team in more than one
/// matchup per (week, stage). `slate` is the existing schedule for that
/// (week, stage); `exclude_id` skips the matchup being edited.
pub(crate) fn check_schedule(slate: &[Matchup], week: i32, home_team_id: i32, away_team_id: i32, exclude_id: Option<i32>) -> Result<(), ScheduleError> {
    if home_team_id == away_team_id {
        return Err(ScheduleError::SameTeam)
    }
    if !(1..=18).contains(&week) {
        return Err(ScheduleError::InvalidWeek)
    }
    let slate = slate.iter().filter(|matchup| exclude_id != Some(matchup.id)).collect::<Vec<_>>();
    if slate.len() >= WEEK_LIMIT {
        return Err(ScheduleError::WeekLimit)
    }
    if slate.iter().any(|matchup| [matchup.home_team_id, matchup.away_team_id].iter().any(|team| *team == home_team_id || *team == away_team_id)) {
        return Err(ScheduleError::TeamAlreadyScheduled)
    }
    Ok(())
}

impl Matchup {
    pub(crate) async fn from_id(transaction: &mut Transaction<'_, Postgres>, id: i32) -> sqlx::Result<Option<Self>> {
        sqlx::query_as::<_, Self>(&format!("SELECT {MATCHUP_COLUMNS} FROM matchups WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut **transaction)
            .await
    }

    /// Loads a matchup with its row locked for the remainder of the
    /// transaction. Settlement and deletion go through this so that
    /// concurrent re-settlements of the same matchup serialize.
    pub(crate) async fn lock_for_update(transaction: &mut Transaction<'_, Postgres>, id: i32) -> sqlx::Result<Option<Self>> {
        sqlx::query_as::<_, Self>(&format!("SELECT {MATCHUP_COLUMNS} FROM matchups WHERE id = $1 FOR UPDATE"))
            .bind(id)
            .fetch_optional(&mut **transaction)
            .await
    }

    pub(crate) async fn filtered(transaction: &mut Transaction<'_, Postgres>, week: Option<i32>, stage: Option<Stage>) -> sqlx::Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(&format!("SELECT {MATCHUP_COLUMNS} FROM matchups WHERE ($1::int IS NULL OR week = $1) AND ($2::season_stage IS NULL OR stage = $2) ORDER BY start_time"))
            .bind(week)
            .bind(stage)
            .fetch_all(&mut **transaction)
            .await
    }

    pub(crate) async fn finished(transaction: &mut Transaction<'_, Postgres>) -> sqlx::Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(&format!("SELECT {MATCHUP_COLUMNS} FROM matchups WHERE is_finished"))
            .fetch_all(&mut **transaction)
            .await
    }

    /// Enforces the scheduling invariants against the slate already in place
    /// for the (week, stage). `exclude_id` skips the matchup being edited.
    pub(crate) async fn validate_schedule(transaction: &mut Transaction<'_, Postgres>, week: i32, stage: Stage, home_team_id: i32, away_team_id: i32, exclude_id: Option<i32>) -> Result<(), ScheduleError> {
        let slate = sqlx::query_as::<_, Self>(&format!("SELECT {MATCHUP_COLUMNS} FROM matchups WHERE week = $1 AND stage = $2"))
            .bind(week)
            .bind(stage)
            .fetch_all(&mut **transaction)
            .await?;
        check_schedule(&slate, week, home_team_id, away_team_id, exclude_id)
    }

    pub(crate) async fn create(transaction: &mut Transaction<'_, Postgres>, week: i32, stage: Stage, home_team_id: i32, away_team_id: i32, start_time: DateTime<Utc>) -> Result<Self, ScheduleError> {
        Self::validate_schedule(transaction, week, stage, home_team_id, away_team_id, None).await?;
        Ok(
            sqlx::query_as::<_, Self>(&format!("INSERT INTO matchups (week, stage, home_team_id, away_team_id, start_time) VALUES ($1, $2, $3, $4, $5) RETURNING {MATCHUP_COLUMNS}"))
                .bind(week)
                .bind(stage)
                .bind(home_team_id)
                .bind(away_team_id)
                .bind(start_time)
                .fetch_one(&mut **transaction)
                .await?
        )
    }

    pub(crate) async fn update(transaction: &mut Transaction<'_, Postgres>, id: i32, week: i32, stage: Stage, home_team_id: i32, away_team_id: i32, start_time: DateTime<Utc>) -> Result<Option<Self>, ScheduleError> {
        if let Some(existing) = Self::from_id(transaction, id).await? {
            // Finished matchups only change through re-settlement or deletion,
            // otherwise awarded points would detach from the recorded outcome.
            if existing.is_finished {
                return Err(ScheduleError::Finished)
            }
        } else {
            return Ok(None)
        }
        Self::validate_schedule(transaction, week, stage, home_team_id, away_team_id, Some(id)).await?;
        Ok(
            sqlx::query_as::<_, Self>(&format!("UPDATE matchups SET week = $2, stage = $3, home_team_id = $4, away_team_id = $5, start_time = $6, updated_at = now() WHERE id = $1 RETURNING {MATCHUP_COLUMNS}"))
                .bind(id)
                .bind(week)
                .bind(stage)
                .bind(home_team_id)
                .bind(away_team_id)
                .bind(start_time)
                .fetch_optional(&mut **transaction)
                .await?
        )
    }
}
