use crate::config::FleetConfig;
use crate::error::{MachineError, MachineResult};
use sandfleet_providers::CloudProvider;
use std::env;
use std::sync::Arc;

pub struct ProviderManager;

impl ProviderManager {
    pub fn current_provider_name() -> String {
        env::var("PROVIDER").unwrap_or_else(|_| "mock".to_string())
    }

    pub fn get_provider(
        provider_name: &str,
        config: &FleetConfig,
    ) -> MachineResult<Arc<dyn CloudProvider>> {
        match provider_name.trim().to_lowercase().as_str() {
            #[cfg(feature = "provider-scaleway")]
            "scaleway" => {
                let project_id = env::var("SCALEWAY_PROJECT_ID")
                    .ok()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| {
                        MachineError::Configuration("SCALEWAY_PROJECT_ID is not set".to_string())
                    })?;
                // Prefer *_FILE for secrets (Docker/K8s friendly), fallback to env var.
                let secret_key_file = env::var("SCALEWAY_SECRET_KEY_FILE")
                    .unwrap_or_else(|_| "/run/secrets/scaleway_secret_key".to_string());
                let secret_key = std::fs::read_to_string(&secret_key_file)
                    .ok()
                    .or_else(|| env::var("SCALEWAY_SECRET_KEY").ok())
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| {
                        MachineError::Configuration(
                            "no Scaleway secret key (SCALEWAY_SECRET_KEY_FILE or SCALEWAY_SECRET_KEY)"
                                .to_string(),
                        )
                    })?;
                let provider = sandfleet_providers::scaleway::ScalewayProvider::new(
                    config.region.clone(),
                    project_id,
                    secret_key,
                )
                .map_err(|e| MachineError::Configuration(format!("scaleway client: {:#}", e)))?;
                Ok(Arc::new(provider))
            }
            #[cfg(feature = "provider-mock")]
            "mock" => Ok(Arc::new(sandfleet_providers::mock::MockProvider::new(
                &config.region,
            ))),
            other => Err(MachineError::Configuration(format!(
                "unknown or disabled provider '{}'",
                other
            ))),
        }
    }
}
