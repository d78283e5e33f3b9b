#[cfg(feature = "transfer-local")]
use crate::LocalTransfer;
#[cfg(feature = "transfer-scp")]
use crate::ScpTransfer;
use crate::{TransferError, TransferProvider, TransferResult};
use exparc_core::config::LocationConfig;
use exparc_core::ProviderKind;
use std::collections::HashMap;
use std::sync::Arc;

/// Create a transfer provider based on a location definition
pub async fn create_provider(location: &LocationConfig) -> TransferResult<Arc<dyn TransferProvider>> {
    match location.provider {
        #[cfg(feature = "transfer-scp")]
        ProviderKind::Scp => {
            let provider = ScpTransfer::new(&location.name, &location.url, &location.params)?;
            Ok(Arc::new(provider))
        }

        #[cfg(not(feature = "transfer-scp"))]
        ProviderKind::Scp => Err(TransferError::Config(
            "scp transfer provider not available (transfer-scp feature not enabled)".to_string(),
        )),

        #[cfg(feature = "transfer-local")]
        ProviderKind::Local => {
            let provider = LocalTransfer::new(
                &location.name,
                &location.url,
                location.params.trust_length,
            )
            .await?;
            Ok(Arc::new(provider))
        }

        #[cfg(not(feature = "transfer-local"))]
        ProviderKind::Local => Err(TransferError::Config(
            "Local transfer provider not available (transfer-local feature not enabled)".to_string(),
        )),
    }
}

/// Location name → provider lookup, resolved once from static configuration.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn TransferProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a provider for every location. Fails on the first location
    /// whose provider cannot be constructed.
    pub async fn from_configs(locations: &[LocationConfig]) -> TransferResult<Self> {
        let mut registry = Self::new();
        for location in locations {
            let provider = create_provider(location).await?;
            tracing::debug!(
                location = %location.name,
                provider = %location.provider,
                url = %location.url,
                "Transfer provider created"
            );
            registry.insert(provider);
        }
        Ok(registry)
    }

    /// Register `provider` under its own location name, replacing any
    /// provider previously registered for that name.
    pub fn insert(&mut self, provider: Arc<dyn TransferProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, location: &str) -> TransferResult<Arc<dyn TransferProvider>> {
        self.providers.get(location).cloned().ok_or_else(|| {
            TransferError::Config(format!("No transfer provider for location '{}'", location))
        })
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("locations", &self.names())
            .finish()
    }
}
