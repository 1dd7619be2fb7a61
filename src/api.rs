//! User-facing JSON API: schedule data, pick submission, and the
//! leaderboards.

use {
    std::collections::HashMap,
    chrono::prelude::*,
    rocket::{
        State,
        serde::json::Json,
    },
    serde::{
        Deserialize,
        Serialize,
    },
    sqlx::PgPool,
    crate::{
        http::ApiError,
        matchup::{
            Matchup,
            Stage,
        },
        pick::{
            self,
            Pick,
            PickError,
        },
        scoring::{
            self,
            WeeklyPick,
            WeeklyRanking,
        },
        team::Team,
        user::User,
    },
};

#[rocket::get("/teams")]
pub(crate) async fn teams(pool: &State<PgPool>, _me: User) -> Result<Json<Vec<Team>>, ApiError> {
    let mut transaction = pool.begin().await?;
    let teams = Team::all(&mut transaction).await?;
    transaction.commit().await?;
    Ok(Json(teams))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MatchupWithTeams {
    #[serde(flatten)]
    matchup: Matchup,
    home_team: Team,
    away_team: Team,
}

/// Pairs each matchup with its team rows; `None` when a matchup references a
/// team missing from the map.
fn with_teams(matchups: Vec<Matchup>, teams: &HashMap<i32, Team>) -> Option<Vec<MatchupWithTeams>> {
    matchups.into_iter().map(|matchup| Some(MatchupWithTeams {
        home_team: teams.get(&matchup.home_team_id).cloned()?,
        away_team: teams.get(&matchup.away_team_id).cloned()?,
        matchup,
    })).collect()
}

#[rocket::get("/matchups?<week>&<stage>")]
pub(crate) async fn matchups(pool: &State<PgPool>, _me: User, week: Option<i32>, stage: Option<Stage>) -> Result<Json<Vec<MatchupWithTeams>>, ApiError> {
    let mut transaction = pool.begin().await?;
    let matchups = Matchup::filtered(&mut transaction, week, stage).await?;
    let teams = Team::all(&mut transaction).await?.into_iter().map(|team| (team.id, team)).collect::<HashMap<_, _>>();
    transaction.commit().await?;
    with_teams(matchups, &teams).map(Json).ok_or(ApiError::Sql(sqlx::Error::RowNotFound))
}

#[rocket::get("/theme")]
pub(crate) async fn theme(pool: &State<PgPool>) -> Result<Json<serde_json::Value>, ApiError> {
    let theme = sqlx::query_scalar::<_, String>("SELECT value FROM app_settings WHERE key = 'theme'")
        .fetch_optional(&**pool)
        .await?
        .unwrap_or_else(|| "lara-dark-blue".to_owned());
    Ok(Json(serde_json::json!({ "theme": theme })))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PickWithMatchup {
    #[serde(flatten)]
    pick: Pick,
    matchup: Matchup,
}

#[rocket::get("/picks")]
pub(crate) async fn my_picks(pool: &State<PgPool>, me: User) -> Result<Json<Vec<PickWithMatchup>>, ApiError> {
    let mut transaction = pool.begin().await?;
    let picks = Pick::for_user(&mut transaction, me.id).await?;
    let mut matchups = HashMap::new();
    for pick in &picks {
        if !matchups.contains_key(&pick.matchup_id) {
            let matchup = Matchup::from_id(&mut transaction, pick.matchup_id).await?.ok_or(ApiError::Sql(sqlx::Error::RowNotFound))?;
            matchups.insert(pick.matchup_id, matchup);
        }
    }
    transaction.commit().await?;
    picks.into_iter()
        .map(|pick| Ok(PickWithMatchup {
            matchup: matchups.get(&pick.matchup_id).cloned().ok_or(ApiError::Sql(sqlx::Error::RowNotFound))?,
            pick,
        }))
        .collect::<Result<Vec<_>, ApiError>>()
        .map(Json)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PickForm {
    matchup_id: i32,
    selected_team_id: i32,
}

#[rocket::post("/picks", data = "<form>")]
pub(crate) async fn submit_pick(pool: &State<PgPool>, me: User, form: Json<PickForm>) -> Result<Json<Pick>, ApiError> {
    let mut transaction = pool.begin().await?;
    let matchup = Matchup::from_id(&mut transaction, form.matchup_id).await?.ok_or(ApiError::NotFound("MATCHUP_NOT_FOUND"))?;
    pick::validate(&matchup, form.selected_team_id, Utc::now()).map_err(|e| match e {
        PickError::DeadlinePassed => ApiError::BadRequest("DEADLINE_PASSED"),
        PickError::InvalidSelection => ApiError::BadRequest("INVALID_TEAM_SELECTION"),
    })?;
    let pick = Pick::upsert(&mut transaction, me.id, form.matchup_id, form.selected_team_id).await?;
    transaction.commit().await?;
    Ok(Json(pick))
}

#[derive(Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LeaderboardEntry {
    id: i32,
    username: String,
    score: i32,
}

/// Season leaderboard: active, non-deleted users by score. Ties share a score
/// and are ordered by user id for a deterministic listing.
#[rocket::get("/picks/leaderboard")]
pub(crate) async fn leaderboard(pool: &State<PgPool>, _me: User) -> Result<Json<Vec<LeaderboardEntry>>, ApiError> {
    let entries = sqlx::query_as::<_, LeaderboardEntry>("SELECT id, username, score FROM users WHERE is_active AND deleted_at IS NULL ORDER BY score DESC, id")
        .fetch_all(&**pool)
        .await?;
    Ok(Json(entries))
}

#[derive(sqlx::FromRow)]
struct WeeklyPickRow {
    user_id: i32,
    username: String,
    is_correct: Option<bool>,
    updated_at: DateTime<Utc>,
}

#[rocket::get("/picks/weekly?<week>&<stage>")]
pub(crate) async fn weekly_leaderboard(pool: &State<PgPool>, _me: User, week: Option<i32>, stage: Option<Stage>) -> Result<Json<Vec<WeeklyRanking>>, ApiError> {
    let week = week.ok_or(ApiError::BadRequest("WEEK_REQUIRED"))?;
    let stage = stage.unwrap_or_default();
    let rows = sqlx::query_as::<_, WeeklyPickRow>("SELECT p.user_id, u.username, p.is_correct, p.updated_at FROM picks p JOIN users u ON u.id = p.user_id JOIN matchups m ON m.id = p.matchup_id WHERE m.week = $1 AND m.stage = $2 AND u.is_active AND u.deleted_at IS NULL")
        .bind(week)
        .bind(stage)
        .fetch_all(&**pool)
        .await?;
    Ok(Json(scoring::rank_weekly(rows.into_iter().map(|row| WeeklyPick {
        user_id: row.user_id,
        username: row.username,
        is_correct: row.is_correct,
        updated_at: row.updated_at,
    }).collect())))
}

#[cfg(test)]
mod tests {
    use {
        crate::team::{
            Conference,
            Division,
        },
        super::*,
    };

    fn team(id: i32) -> Team {
        Team {
            id,
            name: format!("Team {id}"),
            city: format!("City {id}"),
            abbreviation: format!("T{id}"),
            logo_url: None,
            conference: Conference::Afc,
            division: Division::East,
        }
    }

    fn matchup(id: i32, home_team_id: i32, away_team_id: i32) -> Matchup {
        Matchup {
            id,
            week: 1,
            stage: Stage::Regular,
            home_team_id,
            away_team_id,
            start_time: Utc::now(),
            home_score: None,
            away_score: None,
            winner_id: None,
            is_finished: false,
        }
    }

    #[test]
    fn matchup_listing_requires_both_team_rows() {
        let teams = [team(1), team(2)].into_iter().map(|team| (team.id, team)).collect::<HashMap<_, _>>();
        let joined = with_teams(vec![matchup(1, 1, 2)], &teams).expect("both teams present");
        assert_eq!(joined[0].home_team.id, 1);
        assert_eq!(joined[0].away_team.id, 2);
        // a dangling team reference is an error for the caller, not a panic
        assert!(with_teams(vec![matchup(2, 1, 3)], &teams).is_none());
    }
}
