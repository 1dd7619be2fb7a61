use {
    rocket::{
        State,
        serde::json::Json,
    },
    sqlx::{
        PgPool,
        Postgres,
        Transaction,
    },
    crate::{
        http::ApiError,
        matchup::Matchup,
        scoring::{
            self,
            TeamStanding,
        },
        team::Team,
        user::User,
    },
};

/// Live recomputation from the finished-matchup set; nothing is cached or
/// stored, so team edits (division moves, renames) apply retroactively.
pub(crate) async fn compute(transaction: &mut Transaction<'_, Postgres>) -> sqlx::Result<Vec<TeamStanding>> {
    let teams = Team::all(transaction).await?;
    let finished = Matchup::finished(transaction).await?;
    Ok(scoring::compute_standings(teams, &finished))
}

#[rocket::get("/standings")]
pub(crate) async fn get(pool: &State<PgPool>, _me: User) -> Result<Json<Vec<TeamStanding>>, ApiError> {
    let mut transaction = pool.begin().await?;
    let standings = compute(&mut transaction).await?;
    transaction.commit().await?;
    Ok(Json(standings))
}
