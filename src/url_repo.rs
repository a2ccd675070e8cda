use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use rearch::CapsuleHandle;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DbConn, DbErr, EntityTrait,
    QueryFilter, QueryOrder, SqlErr,
    sea_query::{Expr, ExprTrait},
};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::instrument;

use crate::{
    alias::{Alias, TargetUrl},
    config::{StorageBackend, db_conn_capsule, storage_backend_capsule},
    memory_repo::InMemoryUrlRepository,
    orm::short_url,
};

const CREATE_URLS_TABLE: &str = "\
CREATE TABLE IF NOT EXISTS urls (
    alias TEXT PRIMARY KEY,
    original_url TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    visits BIGINT NOT NULL DEFAULT 0 CHECK (visits >= 0)
)";

pub fn url_repository_capsule(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> Arc<dyn UrlRepository> {
    match *get.as_ref(storage_backend_capsule) {
        StorageBackend::Postgres => {
            let db = get.as_ref(db_conn_capsule).clone();
            Arc::new(UrlRepositoryImpl { db })
        }
        StorageBackend::Memory => Arc::new(InMemoryUrlRepository::new()),
    }
}

/// Creates the `urls` table if it does not exist yet.
/// The primary key on `alias` is what makes concurrent inserts of one alias safe.
///
/// # Errors
/// Will return [`Err`] if the DDL statement fails.
#[instrument(skip(db))]
pub async fn create_schema(db: &DbConn) -> Result<(), DbErr> {
    db.execute_unprepared(CREATE_URLS_TABLE).await?;
    Ok(())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShortUrl {
    pub alias: Alias,
    pub url: TargetUrl,
    pub created_at: OffsetDateTime,
    pub visits: u64,
}

#[derive(Debug, Error)]
pub enum InsertUrlError {
    #[error("alias {0} is already taken")]
    AliasTaken(Alias),
    #[error("internal/database error: {0}")]
    Internal(anyhow::Error), // NOTE: no #[from] so we have to be explicit
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UrlRepository: Send + Sync {
    async fn retrieve_url(&self, alias: &Alias) -> anyhow::Result<Option<ShortUrl>>;

    /// Inserts a new [`ShortUrl`] with zero visits, failing with
    /// [`InsertUrlError::AliasTaken`] when the alias already exists.
    /// Must be a single atomic operation; callers do not check beforehand.
    async fn insert_url(&self, alias: Alias, url: TargetUrl) -> Result<ShortUrl, InsertUrlError>;

    /// Adds one to the visit counter of `alias`; a no-op for unknown aliases.
    async fn increment_visits(&self, alias: &Alias) -> anyhow::Result<()>;

    async fn list_urls(&self) -> anyhow::Result<Vec<ShortUrl>>;
}

struct UrlRepositoryImpl {
    db: DbConn,
}

#[async_trait]
impl UrlRepository for UrlRepositoryImpl {
    #[instrument(skip(self))]
    async fn retrieve_url(&self, alias: &Alias) -> anyhow::Result<Option<ShortUrl>> {
        short_url::Entity::find_by_id(alias.as_str())
            .one(&self.db)
            .await?
            .map(ShortUrl::try_from)
            .transpose()
    }

    #[instrument(skip(self))]
    async fn insert_url(&self, alias: Alias, url: TargetUrl) -> Result<ShortUrl, InsertUrlError> {
        let to_insert = short_url::ActiveModel {
            alias: Set(alias.as_str().to_owned()),
            original_url: Set(url.into_inner()),
            created_at: Set(OffsetDateTime::now_utc()),
            visits: Set(0),
        };

        match to_insert.insert(&self.db).await {
            Ok(model) => ShortUrl::try_from(model).map_err(InsertUrlError::Internal),
            Err(err) => Err(insert_error(alias, err.sql_err(), err)),
        }
    }

    #[instrument(skip(self))]
    async fn increment_visits(&self, alias: &Alias) -> anyhow::Result<()> {
        short_url::Entity::update_many()
            .col_expr(
                short_url::Column::Visits,
                Expr::col(short_url::Column::Visits).add(1),
            )
            .filter(short_url::Column::Alias.eq(alias.as_str()))
            .exec(&self.db)
            .await
            .context("Failed to increment visits")?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_urls(&self) -> anyhow::Result<Vec<ShortUrl>> {
        short_url::Entity::find()
            .order_by_asc(short_url::Column::CreatedAt)
            .order_by_asc(short_url::Column::Alias)
            .all(&self.db)
            .await?
            .into_iter()
            .map(ShortUrl::try_from)
            .collect()
    }
}

/// Maps a failed insert to [`InsertUrlError`]; `sql_err` is the driver-level
/// classification of `err` (Postgres code 23505 becomes a unique violation).
fn insert_error(alias: Alias, sql_err: Option<SqlErr>, err: DbErr) -> InsertUrlError {
    match sql_err {
        Some(SqlErr::UniqueConstraintViolation(_)) => InsertUrlError::AliasTaken(alias),
        _ => InsertUrlError::Internal(
            anyhow::Error::new(err).context("Failed to insert short URL"),
        ),
    }
}

impl TryFrom<short_url::Model> for ShortUrl {
    type Error = anyhow::Error;

    fn try_from(
        short_url::Model {
            alias,
            original_url,
            created_at,
            visits,
        }: short_url::Model,
    ) -> Result<Self, Self::Error> {
        Ok(Self {
            alias: Alias::new(&alias).with_context(|| format!("Stored alias {alias:?} is invalid"))?,
            url: TargetUrl::new(&original_url)
                .with_context(|| format!("Stored URL {original_url:?} is invalid"))?,
            created_at,
            visits: visits
                .try_into()
                .with_context(|| format!("Stored visit count {visits} is negative"))?,
        })
    }
}
