use {
    serde::{
        Deserialize,
        Serialize,
    },
    sqlx::{
        Postgres,
        Transaction,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "conference", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub(crate) enum Conference {
    Afc,
    Nfc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "division")]
pub(crate) enum Division {
    East,
    North,
    South,
    West,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Team {
    pub(crate) id: i32,
    pub(crate) name: String,
    pub(crate) city: String,
    pub(crate) abbreviation: String,
    pub(crate) logo_url: Option<String>,
    pub(crate) conference: Conference,
    pub(crate) division: Division,
}

const TEAM_COLUMNS: &str = "id, name, city, abbreviation, logo_url, conference, division";

impl Team {
    pub(crate) async fn all(transaction: &mut Transaction<'_, Postgres>) -> sqlx::Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(&format!("SELECT {TEAM_COLUMNS} FROM teams ORDER BY id"))
            .fetch_all(&mut **transaction)
            .await
    }

    /// Division/conference changes apply retroactively: standings are always
    /// derived fresh from finished matchups, never snapshotted.
    pub(crate) async fn update(transaction: &mut Transaction<'_, Postgres>, id: i32, name: &str, city: &str, conference: Conference, division: Division) -> sqlx::Result<Option<Self>> {
        sqlx::query_as::<_, Self>(&format!("UPDATE teams SET name = $2, city = $3, conference = $4, division = $5, updated_at = now() WHERE id = $1 RETURNING {TEAM_COLUMNS}"))
            .bind(id)
            .bind(name)
            .bind(city)
            .bind(conference)
            .bind(division)
            .fetch_optional(&mut **transaction)
            .await
    }
}
