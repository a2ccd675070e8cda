use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use rearch::CapsuleHandle;
use serde::Serialize;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use tracing::{info, instrument, warn};

use crate::{
    alias::{Alias, AliasValidationError, TargetUrl, UrlValidationError},
    config::{base_url_capsule, visit_sender_capsule},
    url_repo::{InsertUrlError, ShortUrl, UrlRepository, url_repository_capsule},
    visit_worker::VisitSender,
};

#[derive(Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShortenedUrl {
    pub short_url: String,
    pub alias: String,
    pub original_url: String,
    /// Timestamp in RFC 3339 format
    pub created_at: String,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlListing {
    pub alias: String,
    pub original_url: String,
    /// Timestamp in RFC 3339 format
    pub created_at: String,
    pub visits: u64,
}

#[derive(Debug, PartialEq, Eq)]
pub enum RedirectTarget {
    Original(String),
    /// The alias is unknown; send the visitor to the landing page.
    Home,
}

pub fn url_service_capsule(CapsuleHandle { mut get, .. }: CapsuleHandle) -> Arc<dyn UrlService> {
    let url_repo = Arc::clone(get.as_ref(url_repository_capsule));
    let visits = get.as_ref(visit_sender_capsule).clone();
    let base_url = get.as_ref(base_url_capsule).clone();
    new_url_service(url_repo, visits, base_url)
}

/// Builds a [`UrlService`] over an explicit repository, e.g. an in-memory one.
#[must_use]
pub fn new_url_service(
    url_repo: Arc<dyn UrlRepository>,
    visits: VisitSender,
    base_url: String,
) -> Arc<dyn UrlService> {
    Arc::new(UrlServiceImpl {
        url_repo,
        visits,
        base_url,
    })
}

#[async_trait]
pub trait UrlService: Send + Sync {
    async fn create_short_url(&self, url: &str, alias: &str)
    -> Result<ShortenedUrl, CreateUrlError>;
    async fn resolve_alias(&self, alias: &str) -> Result<RedirectTarget, ResolveAliasError>;
    async fn list_urls(&self) -> anyhow::Result<Vec<UrlListing>>;
}

#[derive(Debug, Error)]
pub enum CreateUrlError {
    #[error(transparent)]
    InvalidAlias(#[from] AliasValidationError),
    #[error(transparent)]
    InvalidUrl(#[from] UrlValidationError),
    #[error("This alias is already taken. Please choose another one.")]
    AliasTaken,
    #[error("internal/database error: {0}")]
    Internal(anyhow::Error), // NOTE: no #[from] so we have to be explicit
}

impl CreateUrlError {
    /// The request field the error is about, if any.
    #[must_use]
    pub const fn field(&self) -> Option<&'static str> {
        match self {
            Self::InvalidAlias(_) | Self::AliasTaken => Some("alias"),
            Self::InvalidUrl(_) => Some("url"),
            Self::Internal(_) => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ResolveAliasError {
    #[error("internal/database error: {0}")]
    Db(anyhow::Error),
}

struct UrlServiceImpl {
    url_repo: Arc<dyn UrlRepository>,
    visits: VisitSender,
    base_url: String,
}

impl UrlServiceImpl {
    /// Queues a visit without waiting for it to be stored.
    fn record_visit(&self, alias: Alias) {
        if let Err(err) = self.visits.try_send(alias) {
            warn!(?err, "Dropped visit; visit queue is unavailable");
        }
    }

    fn shortened_url(&self, short_url: ShortUrl) -> anyhow::Result<ShortenedUrl> {
        let ShortUrl {
            alias,
            url,
            created_at,
            ..
        } = short_url;
        Ok(ShortenedUrl {
            short_url: format!("{}/{alias}", self.base_url),
            alias: alias.into_inner(),
            original_url: url.into_inner(),
            created_at: created_at
                .format(&Rfc3339)
                .context("Failed to format creation timestamp")?,
        })
    }
}

#[async_trait]
impl UrlService for UrlServiceImpl {
    #[instrument(skip(self))]
    async fn create_short_url(
        &self,
        url: &str,
        alias: &str,
    ) -> Result<ShortenedUrl, CreateUrlError> {
        let url = TargetUrl::new(url)?;
        let alias = Alias::new(alias)?;

        match self.url_repo.insert_url(alias, url).await {
            Ok(short_url) => {
                info!(alias = %short_url.alias, "Created short URL");
                self.shortened_url(short_url)
                    .context("Failed to convert new ShortUrl into external format")
                    .map_err(CreateUrlError::Internal)
            }
            Err(InsertUrlError::AliasTaken(alias)) => {
                info!(%alias, "Alias is already taken");
                Err(CreateUrlError::AliasTaken)
            }
            Err(InsertUrlError::Internal(err)) => Err(CreateUrlError::Internal(err)),
        }
    }

    #[instrument(skip(self))]
    async fn resolve_alias(&self, alias: &str) -> Result<RedirectTarget, ResolveAliasError> {
        let Ok(alias) = Alias::new(alias) else {
            info!("Requested alias is malformed; redirecting home");
            return Ok(RedirectTarget::Home);
        };

        match self.url_repo.retrieve_url(&alias).await {
            Ok(Some(short_url)) => {
                self.record_visit(short_url.alias);
                Ok(RedirectTarget::Original(short_url.url.into_inner()))
            }
            Ok(None) => {
                info!(%alias, "Alias not found; redirecting home");
                Ok(RedirectTarget::Home)
            }
            Err(err) => Err(ResolveAliasError::Db(err)),
        }
    }

    #[instrument(skip(self))]
    async fn list_urls(&self) -> anyhow::Result<Vec<UrlListing>> {
        self.url_repo
            .list_urls()
            .await?
            .into_iter()
            .map(UrlListing::try_from)
            .collect()
    }
}

impl TryFrom<ShortUrl> for UrlListing {
    type Error = anyhow::Error;

    fn try_from(
        ShortUrl {
            alias,
            url,
            created_at,
            visits,
        }: ShortUrl,
    ) -> Result<Self, Self::Error> {
        Ok(Self {
            alias: alias.into_inner(),
            original_url: url.into_inner(),
            created_at: created_at
                .format(&Rfc3339)
                .context("Failed to format creation timestamp")?,
            visits,
        })
    }
}
