use {
    rocket::{
        Request,
        Rocket,
        http::Status,
        response::{
            self,
            Responder,
        },
        serde::json::Json,
    },
    serde::Serialize,
    sqlx::PgPool,
    crate::{
        admin,
        api,
        auth,
        matchup::ScheduleError,
        settle::{
            self,
            MatchupLocks,
        },
        standings,
    },
};

/// Stable machine-readable error body, localized by the presentation layer.
#[derive(Serialize)]
pub(crate) struct ErrorBody {
    pub(crate) message: &'static str,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum ApiError {
    #[error("{0}")]
    BadRequest(&'static str),
    #[error("{0}")]
    NotFound(&'static str),
    #[error("{0}")]
    Forbidden(&'static str),
    #[error("unauthorized")]
    Unauthorized,
    #[error(transparent)] Sql(#[from] sqlx::Error),
}

impl ApiError {
    fn status(&self) -> Status {
        match self {
            Self::BadRequest(_) => Status::BadRequest,
            Self::NotFound(_) => Status::NotFound,
            Self::Forbidden(_) => Status::Forbidden,
            Self::Unauthorized => Status::Unauthorized,
            Self::Sql(_) => Status::InternalServerError,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(code) | Self::NotFound(code) | Self::Forbidden(code) => code,
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Sql(_) => "SERVER_ERROR",
        }
    }
}

impl From<ScheduleError> for ApiError {
    fn from(e: ScheduleError) -> Self {
        match e {
            ScheduleError::SameTeam => Self::BadRequest("SAME_TEAM_CONFLICT"),
            ScheduleError::InvalidWeek => Self::BadRequest("INVALID_WEEK"),
            ScheduleError::WeekLimit => Self::BadRequest("WEEK_LIMIT_EXCEEDED"),
            ScheduleError::TeamAlreadyScheduled => Self::BadRequest("TEAM_ALREADY_SCHEDULED"),
            ScheduleError::Finished => Self::BadRequest("MATCHUP_FINISHED"),
            ScheduleError::Sql(e) => Self::Sql(e),
        }
    }
}

impl From<settle::Error> for ApiError {
    fn from(e: settle::Error) -> Self {
        match e {
            settle::Error::MatchupNotFound => Self::NotFound("MATCHUP_NOT_FOUND"),
            settle::Error::Sql(e) => Self::Sql(e),
        }
    }
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, request: &'r Request<'_>) -> response::Result<'static> {
        if let Self::Sql(ref e) = self {
            log::error!("database error responding to {}: {e}", request.uri());
        }
        let status = self.status();
        let mut response = Json(ErrorBody { message: self.code() }).respond_to(request)?;
        response.set_status(status);
        Ok(response)
    }
}

#[rocket::get("/health")]
fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[rocket::catch(400)]
fn bad_request() -> Json<ErrorBody> {
    Json(ErrorBody { message: "BAD_REQUEST" })
}

#[rocket::catch(401)]
fn unauthorized() -> Json<ErrorBody> {
    Json(ErrorBody { message: "UNAUTHORIZED" })
}

#[rocket::catch(403)]
fn forbidden() -> Json<ErrorBody> {
    Json(ErrorBody { message: "FORBIDDEN" })
}

#[rocket::catch(404)]
fn not_found() -> Json<ErrorBody> {
    Json(ErrorBody { message: "NOT_FOUND" })
}

#[rocket::catch(422)]
fn unprocessable_content() -> Json<ErrorBody> {
    Json(ErrorBody { message: "INVALID_BODY" })
}

#[rocket::catch(default)]
fn fallback_catcher(status: Status, request: &Request<'_>) -> Json<ErrorBody> {
    log::error!("responding with HTTP status code {} to request {}", status.code, request.uri());
    Json(ErrorBody { message: "SERVER_ERROR" })
}

pub(crate) async fn rocket(pool: PgPool, port: u16) -> Result<Rocket<rocket::Ignite>, rocket::Error> {
    rocket::custom(rocket::Config::figment()
        .merge(("port", port))
        .merge(("log_level", "critical"))
    )
    .mount("/", rocket::routes![
        health,
    ])
    .mount("/api/auth", rocket::routes![
        auth::register,
        auth::login,
        auth::me,
    ])
    .mount("/api", rocket::routes![
        api::teams,
        api::matchups,
        api::theme,
        api::my_picks,
        api::submit_pick,
        api::leaderboard,
        api::weekly_leaderboard,
        standings::get,
    ])
    .mount("/api/admin", rocket::routes![
        admin::simulate,
        admin::create_matchup,
        admin::update_matchup,
        admin::delete_matchup,
        admin::clear_schedule,
        admin::get_settings,
        admin::update_setting,
        admin::users,
        admin::toggle_user_status,
        admin::delete_user,
        admin::update_team,
        admin::logs,
        admin::reconcile,
    ])
    .register("/", rocket::catchers![
        bad_request,
        unauthorized,
        forbidden,
        not_found,
        unprocessable_content,
        fallback_catcher,
    ])
    .manage(pool)
    .manage(MatchupLocks::default())
    .ignite().await
}
