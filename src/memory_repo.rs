use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use time::OffsetDateTime;
use tracing::instrument;

use crate::{
    alias::{Alias, TargetUrl},
    url_repo::{InsertUrlError, ShortUrl, UrlRepository},
};

#[derive(Debug, Clone)]
struct Record {
    url: TargetUrl,
    created_at: OffsetDateTime,
    visits: u64,
}

/// In-memory [`UrlRepository`] keyed by alias.
///
/// Inserts go through [`DashMap::entry`] and increments through
/// [`DashMap::get_mut`], so both hold the shard lock for the whole operation.
/// Nothing survives a restart.
#[derive(Debug, Default)]
pub struct InMemoryUrlRepository {
    storage: DashMap<String, Record>,
}

impl InMemoryUrlRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Record {
    fn to_short_url(&self, alias: Alias) -> ShortUrl {
        ShortUrl {
            alias,
            url: self.url.clone(),
            created_at: self.created_at,
            visits: self.visits,
        }
    }
}

#[async_trait]
impl UrlRepository for InMemoryUrlRepository {
    #[instrument(skip(self))]
    async fn retrieve_url(&self, alias: &Alias) -> anyhow::Result<Option<ShortUrl>> {
        Ok(self
            .storage
            .get(alias.as_str())
            .map(|record| record.to_short_url(alias.clone())))
    }

    #[instrument(skip(self))]
    async fn insert_url(&self, alias: Alias, url: TargetUrl) -> Result<ShortUrl, InsertUrlError> {
        match self.storage.entry(alias.as_str().to_owned()) {
            Entry::Occupied(_) => Err(InsertUrlError::AliasTaken(alias)),
            Entry::Vacant(vacant) => {
                let record = Record {
                    url,
                    created_at: OffsetDateTime::now_utc(),
                    visits: 0,
                };
                let short_url = record.to_short_url(alias);
                vacant.insert(record);
                Ok(short_url)
            }
        }
    }

    #[instrument(skip(self))]
    async fn increment_visits(&self, alias: &Alias) -> anyhow::Result<()> {
        if let Some(mut record) = self.storage.get_mut(alias.as_str()) {
            record.visits += 1;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_urls(&self) -> anyhow::Result<Vec<ShortUrl>> {
        let mut urls = self
            .storage
            .iter()
            .map(|entry| -> anyhow::Result<ShortUrl> {
                let alias = Alias::new(entry.key())?;
                Ok(entry.value().to_short_url(alias))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        urls.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.alias.as_str().cmp(b.alias.as_str()))
        });
        Ok(urls)
    }
}
