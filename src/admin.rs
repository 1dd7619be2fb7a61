//! Administrative surface: game simulation, schedule management, app
//! settings, user management, and the audit trail.

use {
    chrono::prelude::*,
    rocket::{
        State,
        serde::json::Json,
    },
    serde::Deserialize,
    sqlx::PgPool,
    crate::{
        audit::{
            self,
            AuditLog,
        },
        http::ApiError,
        matchup::{
            Matchup,
            Stage,
        },
        settle::{
            self,
            MatchupLocks,
            ScoreDrift,
        },
        team::{
            Conference,
            Division,
            Team,
        },
        user::{
            Admin,
            User,
        },
    },
};

fn message(code: &'static str) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": code }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SimulateForm {
    matchup_id: i32,
    home_score: i32,
    away_score: i32,
}

#[rocket::post("/simulate", data = "<form>")]
pub(crate) async fn simulate(pool: &State<PgPool>, locks: &State<MatchupLocks>, admin: Admin, form: Json<SimulateForm>) -> Result<Json<serde_json::Value>, ApiError> {
    settle::settle(pool, locks, &admin.0, form.matchup_id, form.home_score, form.away_score).await?;
    Ok(message("GAME_SIMULATED"))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateMatchupForm {
    week: i32,
    #[serde(default)]
    stage: Stage,
    home_team_id: i32,
    away_team_id: i32,
    start_time: DateTime<Utc>,
}

#[rocket::post("/matchups", data = "<form>")]
pub(crate) async fn create_matchup(pool: &State<PgPool>, _admin: Admin, form: Json<CreateMatchupForm>) -> Result<Json<Matchup>, ApiError> {
    let mut transaction = pool.begin().await?;
    let matchup = Matchup::create(&mut transaction, form.week, form.stage, form.home_team_id, form.away_team_id, form.start_time).await?;
    transaction.commit().await?;
    Ok(Json(matchup))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UpdateMatchupForm {
    id: i32,
    week: i32,
    #[serde(default)]
    stage: Stage,
    home_team_id: i32,
    away_team_id: i32,
    start_time: DateTime<Utc>,
}

#[rocket::put("/matchups", data = "<form>")]
pub(crate) async fn update_matchup(pool: &State<PgPool>, _admin: Admin, form: Json<UpdateMatchupForm>) -> Result<Json<Matchup>, ApiError> {
    let mut transaction = pool.begin().await?;
    let matchup = Matchup::update(&mut transaction, form.id, form.week, form.stage, form.home_team_id, form.away_team_id, form.start_time).await?
        .ok_or(ApiError::NotFound("MATCHUP_NOT_FOUND"))?;
    transaction.commit().await?;
    Ok(Json(matchup))
}

#[rocket::delete("/matchups/<id>")]
pub(crate) async fn delete_matchup(pool: &State<PgPool>, locks: &State<MatchupLocks>, admin: Admin, id: i32) -> Result<Json<serde_json::Value>, ApiError> {
    settle::delete_matchup(pool, locks, &admin.0, id).await?;
    Ok(message("DELETED"))
}

#[rocket::post("/clear-schedule")]
pub(crate) async fn clear_schedule(pool: &State<PgPool>, _admin: Admin) -> Result<Json<serde_json::Value>, ApiError> {
    settle::clear_schedule(pool).await?;
    Ok(message("CLEARED"))
}

#[rocket::get("/settings")]
pub(crate) async fn get_settings(pool: &State<PgPool>, _admin: Admin) -> Result<Json<serde_json::Value>, ApiError> {
    let rows = sqlx::query_as::<_, (String, String)>("SELECT key, value FROM app_settings")
        .fetch_all(&**pool)
        .await?;
    Ok(Json(serde_json::Value::Object(rows.into_iter().map(|(key, value)| (key, serde_json::Value::String(value))).collect())))
}

#[derive(Deserialize)]
pub(crate) struct SettingForm {
    key: String,
    value: String,
}

#[rocket::post("/settings", data = "<form>")]
pub(crate) async fn update_setting(pool: &State<PgPool>, _admin: Admin, form: Json<SettingForm>) -> Result<Json<serde_json::Value>, ApiError> {
    sqlx::query("INSERT INTO app_settings (key, value) VALUES ($1, $2) ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value")
        .bind(&form.key)
        .bind(&form.value)
        .execute(&**pool)
        .await?;
    Ok(Json(serde_json::json!({ "key": form.key, "value": form.value })))
}

#[rocket::get("/users")]
pub(crate) async fn users(pool: &State<PgPool>, _admin: Admin) -> Result<Json<Vec<User>>, ApiError> {
    let mut transaction = pool.begin().await?;
    let users = User::all(&mut transaction).await?;
    transaction.commit().await?;
    Ok(Json(users))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ToggleStatusForm {
    id: i32,
    is_active: bool,
}

#[rocket::post("/users/toggle-status", data = "<form>")]
pub(crate) async fn toggle_user_status(pool: &State<PgPool>, admin: Admin, form: Json<ToggleStatusForm>) -> Result<Json<User>, ApiError> {
    let mut transaction = pool.begin().await?;
    let user = sqlx::query_as::<_, User>("UPDATE users SET is_active = $2 WHERE id = $1 RETURNING id, username, email, password_hash, role, score, is_active, deleted_at, created_at")
        .bind(form.id)
        .bind(form.is_active)
        .fetch_optional(&mut *transaction)
        .await?
        .ok_or(ApiError::NotFound("USER_NOT_FOUND"))?;
    audit::record(&mut transaction, Some(admin.0.id), "USER_STATUS_TOGGLED", &format!("User ID: {}, New Status: {}", form.id, form.is_active)).await?;
    transaction.commit().await?;
    Ok(Json(user))
}

#[derive(rocket::FromForm)]
pub(crate) struct DeleteUserQuery<'r> {
    #[field(name = "type")]
    kind: Option<&'r str>,
}

#[rocket::delete("/users/<id>?<query..>")]
pub(crate) async fn delete_user(pool: &State<PgPool>, admin: Admin, id: i32, query: DeleteUserQuery<'_>) -> Result<Json<serde_json::Value>, ApiError> {
    let mut transaction = pool.begin().await?;
    let user = User::from_id(&mut transaction, id).await?.ok_or(ApiError::NotFound("USER_NOT_FOUND"))?;
    if query.kind == Some("hard") {
        sqlx::query("DELETE FROM picks WHERE user_id = $1").bind(id).execute(&mut *transaction).await?;
        sqlx::query("DELETE FROM api_tokens WHERE user_id = $1").bind(id).execute(&mut *transaction).await?;
        sqlx::query("DELETE FROM audit_logs WHERE user_id = $1").bind(id).execute(&mut *transaction).await?;
        sqlx::query("DELETE FROM users WHERE id = $1").bind(id).execute(&mut *transaction).await?;
        transaction.commit().await?;
        log::info!("user {id} hard-deleted");
        Ok(message("USER_HARD_DELETED"))
    } else {
        // rename the unique fields so a new account can reuse them
        let timestamp = Utc::now().timestamp_millis();
        sqlx::query("UPDATE users SET deleted_at = now(), is_active = FALSE, username = $2, email = $3 WHERE id = $1")
            .bind(id)
            .bind(format!("{}_del_{timestamp}", user.username))
            .bind(format!("{}_del_{timestamp}", user.email))
            .execute(&mut *transaction)
            .await?;
        audit::record(&mut transaction, Some(admin.0.id), "USER_SOFT_DELETED", &format!("User ID: {id}, Old Username: {}", user.username)).await?;
        transaction.commit().await?;
        Ok(message("USER_SOFT_DELETED"))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UpdateTeamForm {
    id: i32,
    name: String,
    city: String,
    conference: Conference,
    division: Division,
}

#[rocket::post("/teams/update", data = "<form>")]
pub(crate) async fn update_team(pool: &State<PgPool>, _admin: Admin, form: Json<UpdateTeamForm>) -> Result<Json<Team>, ApiError> {
    let mut transaction = pool.begin().await?;
    let team = Team::update(&mut transaction, form.id, &form.name, &form.city, form.conference, form.division).await?
        .ok_or(ApiError::NotFound("TEAM_NOT_FOUND"))?;
    transaction.commit().await?;
    Ok(Json(team))
}

#[rocket::get("/logs")]
pub(crate) async fn logs(pool: &State<PgPool>, _admin: Admin) -> Result<Json<Vec<AuditLog>>, ApiError> {
    let mut transaction = pool.begin().await?;
    let logs = audit::latest(&mut transaction, 100).await?;
    transaction.commit().await?;
    Ok(Json(logs))
}

/// Verifies the score invariant by replaying all picks over the finished
/// matchups; an empty list means no user's score has drifted.
#[rocket::get("/reconcile")]
pub(crate) async fn reconcile(pool: &State<PgPool>, _admin: Admin) -> Result<Json<Vec<ScoreDrift>>, ApiError> {
    let mut transaction = pool.begin().await?;
    let drift = settle::reconcile(&mut transaction).await?;
    transaction.commit().await?;
    Ok(Json(drift))
}
