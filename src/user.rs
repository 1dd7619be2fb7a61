use {
    chrono::prelude::*,
    rocket::{
        State,
        http::Status,
        outcome::Outcome,
        request::{
            self,
            FromRequest,
            Request,
        },
    },
    serde::Serialize,
    sqlx::{
        PgPool,
        Postgres,
        Transaction,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub(crate) enum Role {
    User,
    Admin,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub(crate) struct User {
    pub(crate) id: i32,
    pub(crate) username: String,
    pub(crate) email: String,
    #[serde(skip)]
    pub(crate) password_hash: String,
    pub(crate) role: Role,
    pub(crate) score: i32,
    pub(crate) is_active: bool,
    pub(crate) deleted_at: Option<DateTime<Utc>>,
    pub(crate) created_at: DateTime<Utc>,
}

const USER_COLUMNS: &str = "id, username, email, password_hash, role, score, is_active, deleted_at, created_at";

impl User {
    pub(crate) async fn from_id(transaction: &mut Transaction<'_, Postgres>, id: i32) -> sqlx::Result<Option<Self>> {
        sqlx::query_as::<_, Self>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut **transaction)
            .await
    }

    pub(crate) async fn from_username(transaction: &mut Transaction<'_, Postgres>, username: &str) -> sqlx::Result<Option<Self>> {
        sqlx::query_as::<_, Self>(&format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1"))
            .bind(username)
            .fetch_optional(&mut **transaction)
            .await
    }

    async fn from_token(pool: &PgPool, token: &str) -> sqlx::Result<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT u.id, u.username, u.email, u.password_hash, u.role, u.score, u.is_active, u.deleted_at, u.created_at FROM users u JOIN api_tokens t ON t.user_id = u.id WHERE t.token = $1")
            .bind(token)
            .fetch_optional(pool)
            .await
    }

    pub(crate) async fn all(transaction: &mut Transaction<'_, Postgres>) -> sqlx::Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY id"))
            .fetch_all(&mut **transaction)
            .await
    }

    pub(crate) fn is_admin(&self) -> bool {
        matches!(self.role, Role::Admin)
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for User {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> request::Outcome<Self, ()> {
        let Some(token) = request.headers().get_one("Authorization").and_then(|header| header.strip_prefix("Bearer ")) else {
            return Outcome::Error((Status::Unauthorized, ()))
        };
        let Outcome::Success(pool) = request.guard::<&State<PgPool>>().await else {
            return Outcome::Error((Status::InternalServerError, ()))
        };
        match Self::from_token(pool, token).await {
            Ok(Some(user)) if user.is_active && user.deleted_at.is_none() => Outcome::Success(user),
            Ok(_) => Outcome::Error((Status::Unauthorized, ())),
            Err(e) => {
                log::error!("failed to resolve bearer token: {e}");
                Outcome::Error((Status::InternalServerError, ()))
            }
        }
    }
}

/// Request guard for routes restricted to administrators.
pub(crate) struct Admin(pub(crate) User);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Admin {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> request::Outcome<Self, ()> {
        match request.guard::<User>().await {
            Outcome::Success(user) if user.is_admin() => Outcome::Success(Self(user)),
            Outcome::Success(_) => Outcome::Error((Status::Forbidden, ())),
            Outcome::Error(e) => Outcome::Error(e),
            Outcome::Forward(status) => Outcome::Forward(status),
        }
    }
}
