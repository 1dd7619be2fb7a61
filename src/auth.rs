use {
    base64::engine::{
        Engine as _,
        general_purpose::{
            STANDARD as BASE64,
            URL_SAFE_NO_PAD as BASE64_URL,
        },
    },
    pbkdf2::pbkdf2_hmac,
    rocket::{
        State,
        http::Status,
        serde::json::Json,
    },
    serde::{
        Deserialize,
        Serialize,
    },
    sha2::Sha256,
    sqlx::{
        PgPool,
        Postgres,
        Transaction,
    },
    crate::{
        http::ApiError,
        user::User,
    },
};

const PBKDF2_ROUNDS: u32 = 100_000;

pub(crate) fn hash_password(password: &str) -> String {
    let salt: [u8; 16] = rand::random();
    let mut derived = [0; 32];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, PBKDF2_ROUNDS, &mut derived);
    format!("{}${}", BASE64.encode(salt), BASE64.encode(derived))
}

pub(crate) fn verify_password(password: &str, stored: &str) -> bool {
    let Some((salt, expected)) = stored.split_once('$') else { return false };
    let (Ok(salt), Ok(expected)) = (BASE64.decode(salt), BASE64.decode(expected)) else { return false };
    let mut derived = [0; 32];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, PBKDF2_ROUNDS, &mut derived);
    derived.as_slice() == expected.as_slice()
}

/// Issues a fresh opaque bearer token for the user. Tokens stay valid until
/// the account is disabled or deleted.
async fn issue_token(transaction: &mut Transaction<'_, Postgres>, user_id: i32) -> sqlx::Result<String> {
    let token = BASE64_URL.encode(rand::random::<[u8; 32]>());
    sqlx::query("INSERT INTO api_tokens (token, user_id) VALUES ($1, $2)")
        .bind(&token)
        .bind(user_id)
        .execute(&mut **transaction)
        .await?;
    Ok(token)
}

#[derive(Serialize)]
pub(crate) struct AuthResponse {
    token: String,
    user: User,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RegisterForm {
    username: String,
    email: String,
    password: String,
}

#[rocket::post("/register", data = "<form>")]
pub(crate) async fn register(pool: &State<PgPool>, form: Json<RegisterForm>) -> Result<(Status, Json<AuthResponse>), ApiError> {
    let form = form.into_inner();
    let username = form.username.trim().to_owned();
    if username.is_empty() || form.email.is_empty() || form.password.is_empty() {
        return Err(ApiError::BadRequest("MISSING_FIELDS"))
    }
    let mut transaction = pool.begin().await?;
    let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM users WHERE username = $1 OR email = $2)")
        .bind(&username)
        .bind(&form.email)
        .fetch_one(&mut *transaction)
        .await?;
    if exists {
        return Err(ApiError::BadRequest("USER_EXISTS"))
    }
    let user = sqlx::query_as::<_, User>("INSERT INTO users (username, email, password_hash) VALUES ($1, $2, $3) RETURNING id, username, email, password_hash, role, score, is_active, deleted_at, created_at")
        .bind(&username)
        .bind(&form.email)
        .bind(hash_password(&form.password))
        .fetch_one(&mut *transaction)
        .await?;
    let token = issue_token(&mut transaction, user.id).await?;
    transaction.commit().await?;
    log::info!("user {} registered", user.id);
    Ok((Status::Created, Json(AuthResponse { token, user })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LoginForm {
    username: String,
    password: String,
}

#[rocket::post("/login", data = "<form>")]
pub(crate) async fn login(pool: &State<PgPool>, form: Json<LoginForm>) -> Result<Json<AuthResponse>, ApiError> {
    let mut transaction = pool.begin().await?;
    let Some(user) = User::from_username(&mut transaction, form.username.trim()).await? else {
        return Err(ApiError::BadRequest("INVALID_CREDENTIALS"))
    };
    if !user.is_active || user.deleted_at.is_some() {
        return Err(ApiError::Forbidden("ACCOUNT_DISABLED"))
    }
    if !verify_password(&form.password, &user.password_hash) {
        return Err(ApiError::BadRequest("INVALID_CREDENTIALS"))
    }
    let token = issue_token(&mut transaction, user.id).await?;
    transaction.commit().await?;
    Ok(Json(AuthResponse { token, user }))
}

#[rocket::get("/me")]
pub(crate) async fn me(me: User) -> Json<User> {
    Json(me)
}
