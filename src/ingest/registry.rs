// src/ingest/registry.rs
//! `SourceKind` → adapter factory. Adding a provider means registering one
//! factory; the coordinator never branches on kind.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::FetchError;
use crate::ingest::providers::{
    gnews::GNewsAdapter, mediastack::MediastackAdapter, rss::RssAdapter, x_recent::XRecentAdapter,
    youtube::YouTubeAdapter,
};
use crate::ingest::types::{SourceAdapter, SourceConfig, SourceKind};

pub type AdapterFactory =
    Arc<dyn Fn(&SourceConfig) -> Result<Arc<dyn SourceAdapter>, FetchError> + Send + Sync>;

#[derive(Clone, Default)]
pub struct AdapterRegistry {
    factories: HashMap<SourceKind, AdapterFactory>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Real HTTP adapters for every kind, sharing one client.
    pub fn with_defaults(client: reqwest::Client) -> Self {
        let mut reg = Self::new();

        let c = client.clone();
        reg.register(SourceKind::NewsApi, move |cfg: &SourceConfig| {
            let adapter: Arc<dyn SourceAdapter> = match cfg.setting_str("provider").unwrap_or("gnews") {
                "gnews" => Arc::new(GNewsAdapter::from_config(cfg, c.clone())?),
                "mediastack" => Arc::new(MediastackAdapter::from_config(cfg, c.clone())?),
                other => {
                    return Err(FetchError::permanent(format!(
                        "source {}: unknown news provider {other:?}",
                        cfg.id
                    )))
                }
            };
            Ok(adapter)
        });

        let c = client.clone();
        reg.register(SourceKind::VideoApi, move |cfg: &SourceConfig| {
            Ok(Arc::new(YouTubeAdapter::from_config(cfg, c.clone())?) as Arc<dyn SourceAdapter>)
        });

        let c = client.clone();
        reg.register(SourceKind::SocialApi, move |cfg: &SourceConfig| {
            Ok(Arc::new(XRecentAdapter::from_config(cfg, c.clone())?) as Arc<dyn SourceAdapter>)
        });

        reg.register(SourceKind::Rss, move |cfg: &SourceConfig| {
            Ok(Arc::new(RssAdapter::from_config(cfg, client.clone())?) as Arc<dyn SourceAdapter>)
        });

        reg
    }

    pub fn register<F>(&mut self, kind: SourceKind, factory: F) -> &mut Self
    where
        F: Fn(&SourceConfig) -> Result<Arc<dyn SourceAdapter>, FetchError> + Send + Sync + 'static,
    {
        self.factories.insert(kind, Arc::new(factory));
        self
    }

    pub fn build(&self, cfg: &SourceConfig) -> Result<Arc<dyn SourceAdapter>, FetchError> {
        let factory = self.factories.get(&cfg.kind).ok_or_else(|| {
            FetchError::permanent(format!(
                "source {}: no adapter registered for kind {}",
                cfg.id,
                cfg.kind.as_str()
            ))
        })?;
        factory(cfg)
    }
}
