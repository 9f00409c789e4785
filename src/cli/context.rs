//! Command execution context
//!
//! Loads the configuration once, applies the global overrides and builds the
//! layer's components on demand so each command only opens what it uses.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use url::Url;

use crate::cache::CacheStorage;
use crate::cli::{GlobalOptions, OutputFormat};
use crate::config::Config;
use crate::error::{ConfigError, Result};
use crate::interceptor::RequestInterceptor;
use crate::network::HttpNetwork;
use crate::queue::{SyncNotifier, SyncQueue};
use crate::store::KvStore;
use crate::vault::{HostFingerprint, TokenVault};

pub struct CommandContext {
    /// Configuration with CLI overrides applied
    pub config: Config,
    pub format: OutputFormat,
    config_path: PathBuf,
    data_dir: PathBuf,
}

impl CommandContext {
    pub fn new(opts: &GlobalOptions) -> Result<Self> {
        let config_path = Config::resolve_path(opts.config_ref())?;
        let mut config = Config::load_from(&config_path)?;

        if let Some(host) = opts.api_host_ref() {
            config.api_base_url = host.to_string();
        }
        if let Some(environment) = opts.environment {
            config.environment = environment;
        }

        let data_dir = config.data_dir()?;
        log::debug!(
            "Environment {} against {} (data in {})",
            config.environment.as_str(),
            config.api_base_url,
            data_dir.display()
        );

        Ok(Self {
            config,
            format: opts.format,
            config_path,
            data_dir,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Record a new generation tag in the config file, leaving CLI overrides out
    pub fn persist_cache_version(&self, version: &str) -> Result<()> {
        let mut on_disk = Config::load_from(&self.config_path)?;
        on_disk.cache_version = version.to_string();
        on_disk.save_to(&self.config_path)
    }

    pub fn base_url(&self) -> Result<Url> {
        Url::parse(&self.config.api_base_url).map_err(|e| {
            ConfigError::Invalid(format!("api_base_url {}: {}", self.config.api_base_url, e))
                .into()
        })
    }

    /// Open the cache with the configured generation active
    pub fn open_cache(&self) -> Result<CacheStorage> {
        Ok(CacheStorage::open_at(
            &self.data_dir,
            &self.config.cache_version,
        )?)
    }

    pub fn open_store(&self) -> Result<Arc<KvStore>> {
        Ok(Arc::new(KvStore::open_at(&self.data_dir)?))
    }

    /// Queue whose endpoints resolve against the configured origin
    pub fn queue(
        &self,
        store: Arc<KvStore>,
        notifier: Arc<dyn SyncNotifier>,
    ) -> Result<SyncQueue> {
        Ok(SyncQueue::new(store, &self.config.queue)
            .with_notifier(notifier)
            .with_base_url(self.base_url()?))
    }

    pub fn network(&self) -> Result<Arc<HttpNetwork>> {
        Ok(Arc::new(HttpNetwork::new(&self.config.api_base_url)?))
    }

    pub fn interceptor(
        &self,
        queue: Arc<SyncQueue>,
        identity: Option<&str>,
    ) -> Result<RequestInterceptor<HttpNetwork>> {
        let cache = Arc::new(Mutex::new(self.open_cache()?));

        Ok(
            RequestInterceptor::new(self.network()?, cache, queue, self.base_url()?)
                .with_timeout(self.config.network_timeout())
                .with_offline_page(self.config.offline_page.clone())
                .with_identity(identity),
        )
    }

    pub fn vault(&self, store: Arc<KvStore>, email: &str) -> TokenVault<HostFingerprint> {
        TokenVault::new(store, HostFingerprint::new(self.data_dir.clone()), email)
    }
}
