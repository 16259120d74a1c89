//! Lazy, memoized access to the optional remote backend.

use std::sync::{Arc, Mutex, PoisonError};

use super::{BackendClient, BackendResult};
use crate::config::{AppConfig, BackendConfig};
use crate::storage::PersistentStore;

/// Builds a client from configuration. Errors mean "stay offline".
pub type BackendFactory =
    dyn Fn(&BackendConfig) -> BackendResult<Arc<dyn BackendClient>> + Send + Sync;

struct AccessorInner {
    config: Option<BackendConfig>,
    factory: Option<Box<BackendFactory>>,
    client: Mutex<Option<Arc<dyn BackendClient>>>,
}

/// Single seam through which the stores ask "is there a backend?".
///
/// `get_client` never fails: missing configuration, a build without backend
/// support, and construction errors all yield `None`.
#[derive(Clone)]
pub struct BackendAccessor {
    inner: Arc<AccessorInner>,
}

impl BackendAccessor {
    /// Accessor that is always offline.
    pub fn offline() -> Self {
        Self::from_parts(None, None, None)
    }

    /// Accessor around an already constructed client.
    pub fn with_client(client: Arc<dyn BackendClient>) -> Self {
        Self::from_parts(None, None, Some(client))
    }

    /// Accessor that builds its client lazily with `factory`.
    pub fn with_factory(
        config: Option<BackendConfig>,
        factory: impl Fn(&BackendConfig) -> BackendResult<Arc<dyn BackendClient>>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self::from_parts(config, Some(Box::new(factory)), None)
    }

    /// Accessor for the application configuration. Backend tokens are
    /// persisted through `storage`.
    #[cfg(feature = "supabase")]
    pub fn from_config(config: &AppConfig, storage: PersistentStore) -> Self {
        use super::{StoredSession, SupabaseBackend};

        Self::with_factory(config.backend(), move |backend_config| {
            let client =
                SupabaseBackend::from_config(backend_config, StoredSession::new(storage.clone()))?;
            Ok(Arc::new(client) as Arc<dyn BackendClient>)
        })
    }

    /// Accessor for the application configuration. This build has no backend
    /// support, so the accessor is offline whatever the configuration says.
    #[cfg(not(feature = "supabase"))]
    pub fn from_config(config: &AppConfig, _storage: PersistentStore) -> Self {
        Self::from_parts(config.backend(), None, None)
    }

    fn from_parts(
        config: Option<BackendConfig>,
        factory: Option<Box<BackendFactory>>,
        client: Option<Arc<dyn BackendClient>>,
    ) -> Self {
        Self {
            inner: Arc::new(AccessorInner {
                config,
                factory,
                client: Mutex::new(client),
            }),
        }
    }

    /// Whether a backend is configured, whether or not it can be built.
    pub fn is_configured(&self) -> bool {
        self.inner.config.is_some() || self.cached().is_some()
    }

    /// The backend client, or `None` in offline mode.
    pub fn get_client(&self) -> Option<Arc<dyn BackendClient>> {
        let mut cached = self
            .inner
            .client
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = cached.as_ref() {
            return Some(Arc::clone(client));
        }

        let Some(config) = self.inner.config.as_ref() else {
            tracing::debug!("Remote backend not configured; offline mode");
            return None;
        };

        let Some(factory) = self.inner.factory.as_ref() else {
            tracing::info!("Built without remote backend support; offline mode");
            return None;
        };

        match factory(config) {
            Ok(client) => {
                tracing::info!("Remote backend enabled: {}", config.url);
                *cached = Some(Arc::clone(&client));
                Some(client)
            }
            Err(error) => {
                tracing::warn!("Failed to initialize remote backend, using offline mode: {}", error);
                None
            }
        }
    }

    fn cached(&self) -> Option<Arc<dyn BackendClient>> {
        self.inner
            .client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl std::fmt::Debug for BackendAccessor {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("BackendAccessor")
            .field("config", &self.inner.config)
            .field("initialized", &self.cached().is_some())
            .finish()
    }
}
