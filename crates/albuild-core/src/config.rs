//! Run configuration.
//!
//! Everything the pipeline needs from the environment is read once into a
//! `BuildConfig` at process start and passed by reference to the components
//! that need it. Nothing below this module reads environment variables.

use std::path::PathBuf;

use albuild_blob::BlobConfig;
use tracing::warn;

use crate::error::{PipelineError, Result};

/// Default location of the compiler binary, relative to the process directory.
pub const DEFAULT_COMPILER_PATH: &str = "./alc/extension/bin/linux/alc";

/// Timestamp authority passed to the signing tool.
pub const DEFAULT_TIMESTAMP_URL: &str = "http://timestamp.digicert.com";

/// Blob containers used by the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageConfig {
    /// Platform symbols, keyed `"{major}..."` (`AZ_CONTAINER_NAME_MSSYMBOLS`).
    pub platform_symbols: Option<String>,
    /// Dependency symbols, keyed `"{major}.{name}..."` (`AZ_CONTAINER_NAME_DEPENDENCIES`).
    pub dependency_symbols: Option<String>,
    /// Signed artifacts (`AZ_CONTAINER_NAME_ARTIFACTS`, falls back to the dependency container).
    pub artifacts: Option<String>,
}

impl StorageConfig {
    pub fn platform_symbols(&self) -> Result<&str> {
        required(&self.platform_symbols, "AZ_CONTAINER_NAME_MSSYMBOLS")
    }

    pub fn dependency_symbols(&self) -> Result<&str> {
        required(&self.dependency_symbols, "AZ_CONTAINER_NAME_DEPENDENCIES")
    }

    pub fn artifacts(&self) -> Result<&str> {
        match &self.artifacts {
            Some(container) => Ok(container),
            None => self.dependency_symbols(),
        }
    }
}

/// How the external compiler is invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerConfig {
    /// Compiler binary (`ALC_PATH`).
    pub program: PathBuf,
    /// Ruleset file name, resolved inside the project directory.
    pub ruleset_file: String,
    pub error_log: String,
    pub log_level: String,
    pub report_layout: String,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_COMPILER_PATH),
            ruleset_file: "LincRuleSet.json".to_string(),
            error_log: "errorLog.json".to_string(),
            log_level: "Verbose".to_string(),
            report_layout: "-".to_string(),
        }
    }
}

/// Key-vault backed code signing.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningConfig {
    /// Signing tool executable (`SIGN_TOOL`).
    pub tool: String,
    pub vault_uri: Option<String>,
    pub certificate_name: Option<String>,
    pub application_id: Option<String>,
    pub application_secret: Option<String>,
    pub tenant_id: Option<String>,
    pub timestamp_url: String,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            tool: "azuresigntool".to_string(),
            vault_uri: None,
            certificate_name: None,
            application_id: None,
            application_secret: None,
            tenant_id: None,
            timestamp_url: DEFAULT_TIMESTAMP_URL.to_string(),
        }
    }
}

impl std::fmt::Debug for SigningConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningConfig")
            .field("tool", &self.tool)
            .field("vault_uri", &self.vault_uri)
            .field("certificate_name", &self.certificate_name)
            .field("application_id", &self.application_id)
            .field(
                "application_secret",
                &self.application_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("tenant_id", &self.tenant_id)
            .field("timestamp_url", &self.timestamp_url)
            .finish()
    }
}

/// Signing settings with every credential present.
#[derive(Clone, Copy)]
pub struct SigningCredentials<'a> {
    pub vault_uri: &'a str,
    pub certificate_name: &'a str,
    pub application_id: &'a str,
    pub application_secret: &'a str,
    pub tenant_id: &'a str,
}

impl SigningConfig {
    /// Borrow all credentials, failing on the first one that is unset.
    pub fn credentials(&self) -> Result<SigningCredentials<'_>> {
        Ok(SigningCredentials {
            vault_uri: required(&self.vault_uri, "AZURE_KEY_VAULT_URI")?,
            certificate_name: required(
                &self.certificate_name,
                "AZURE_KEY_VAULT_CERTIFICATE_NAME",
            )?,
            application_id: required(&self.application_id, "AZURE_KEY_VAULT_APPLICATION_ID")?,
            application_secret: required(
                &self.application_secret,
                "AZURE_KEY_VAULT_APPLICATION_SECRET",
            )?,
            tenant_id: required(&self.tenant_id, "AZURE_KEY_VAULT_TENANT_ID")?,
        })
    }
}

/// Where the compiler package is published.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolchainConfig {
    /// `AZ_CONTAINER_NAME_TOOLS`
    pub container: Option<String>,
    /// `AZ_ALC_FILENAME`
    pub package: Option<String>,
}

impl ToolchainConfig {
    pub fn container(&self) -> Result<&str> {
        required(&self.container, "AZ_CONTAINER_NAME_TOOLS")
    }

    pub fn package(&self) -> Result<&str> {
        required(&self.package, "AZ_ALC_FILENAME")
    }
}

/// Partner marketplace credentials and endpoints.
#[derive(Clone, PartialEq, Eq)]
pub struct MarketplaceConfig {
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Removed from manifest names when deriving the product name.
    pub product_prefix: Option<String>,
    /// Dependency whose `.app` is submitted as the library app (`MARKET_LIBRARY_DEPENDENCY`).
    pub library_dependency: Option<String>,
    pub authority_url: String,
    pub api_url: String,
    pub scope: String,
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            tenant_id: None,
            client_id: None,
            client_secret: None,
            product_prefix: None,
            library_dependency: None,
            authority_url: "https://login.microsoftonline.com".to_string(),
            api_url: "https://api.partner.microsoft.com/v1.0".to_string(),
            scope: "https://api.partner.microsoft.com/.default".to_string(),
        }
    }
}

impl std::fmt::Debug for MarketplaceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketplaceConfig")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("product_prefix", &self.product_prefix)
            .field("library_dependency", &self.library_dependency)
            .field("authority_url", &self.authority_url)
            .field("api_url", &self.api_url)
            .finish()
    }
}

impl MarketplaceConfig {
    pub fn tenant_id(&self) -> Result<&str> {
        required(&self.tenant_id, "MARKET_TENANT_ID")
    }

    pub fn client_id(&self) -> Result<&str> {
        required(&self.client_id, "MARKET_CLIENT_ID")
    }

    pub fn client_secret(&self) -> Result<&str> {
        required(&self.client_secret, "MARKET_CLIENT_SECRET")
    }
}

/// Complete configuration for one process.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Blob service connection (`AZ_CONNECTION_STRING`); `None` when unset.
    pub blob: Option<BlobConfig>,
    pub storage: StorageConfig,
    pub compiler: CompilerConfig,
    pub signing: SigningConfig,
    pub toolchain: ToolchainConfig,
    pub marketplace: MarketplaceConfig,
    /// Parallel symbol downloads per pass (`SYMBOL_DOWNLOAD_CONCURRENCY`).
    pub symbol_concurrency: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            blob: None,
            storage: StorageConfig::default(),
            compiler: CompilerConfig::default(),
            signing: SigningConfig::default(),
            toolchain: ToolchainConfig::default(),
            marketplace: MarketplaceConfig::default(),
            symbol_concurrency: 1,
        }
    }
}

impl BuildConfig {
    /// Read configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = BuildConfig::default();

        let blob = match get("AZ_CONNECTION_STRING") {
            Some(raw) => Some(
                BlobConfig::from_connection_string(&raw)
                    .map_err(|e| PipelineError::Config(e.to_string()))?,
            ),
            None => None,
        };

        let symbol_concurrency = match get("SYMBOL_DOWNLOAD_CONCURRENCY") {
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    warn!(value = %raw, "Ignoring invalid SYMBOL_DOWNLOAD_CONCURRENCY");
                    defaults.symbol_concurrency
                }
            },
            None => defaults.symbol_concurrency,
        };

        Ok(BuildConfig {
            blob,
            storage: StorageConfig {
                platform_symbols: get("AZ_CONTAINER_NAME_MSSYMBOLS"),
                dependency_symbols: get("AZ_CONTAINER_NAME_DEPENDENCIES"),
                artifacts: get("AZ_CONTAINER_NAME_ARTIFACTS"),
            },
            compiler: CompilerConfig {
                program: get("ALC_PATH")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.compiler.program),
                ..defaults.compiler
            },
            signing: SigningConfig {
                tool: get("SIGN_TOOL").unwrap_or(defaults.signing.tool),
                vault_uri: get("AZURE_KEY_VAULT_URI"),
                certificate_name: get("AZURE_KEY_VAULT_CERTIFICATE_NAME"),
                application_id: get("AZURE_KEY_VAULT_APPLICATION_ID"),
                application_secret: get("AZURE_KEY_VAULT_APPLICATION_SECRET"),
                tenant_id: get("AZURE_KEY_VAULT_TENANT_ID"),
                timestamp_url: defaults.signing.timestamp_url,
            },
            toolchain: ToolchainConfig {
                container: get("AZ_CONTAINER_NAME_TOOLS"),
                package: get("AZ_ALC_FILENAME"),
            },
            marketplace: MarketplaceConfig {
                tenant_id: get("MARKET_TENANT_ID"),
                client_id: get("MARKET_CLIENT_ID"),
                client_secret: get("MARKET_CLIENT_SECRET"),
                product_prefix: get("MARKET_PRODUCT_PREFIX"),
                library_dependency: get("MARKET_LIBRARY_DEPENDENCY"),
                ..defaults.marketplace
            },
            symbol_concurrency,
        })
    }

    /// The blob connection, or a configuration error when it is unset.
    pub fn blob(&self) -> Result<&BlobConfig> {
        self.blob
            .as_ref()
            .ok_or_else(|| PipelineError::Config("AZ_CONNECTION_STRING is not set".to_string()))
    }
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
    value
        .as_deref()
        .ok_or_else(|| PipelineError::Config(format!("{name} is not set")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_when_environment_empty() {
        let config = BuildConfig::from_lookup(lookup(&[])).unwrap();
        assert!(config.blob.is_none());
        assert_eq!(config.compiler.program, PathBuf::from(DEFAULT_COMPILER_PATH));
        assert_eq!(config.signing.tool, "azuresigntool");
        assert_eq!(config.symbol_concurrency, 1);
        assert!(config.storage.platform_symbols().is_err());
    }

    #[test]
    fn test_reads_containers_and_overrides() {
        let config = BuildConfig::from_lookup(lookup(&[
            ("AZ_CONTAINER_NAME_MSSYMBOLS", "mssymbols"),
            ("AZ_CONTAINER_NAME_DEPENDENCIES", "dependencies"),
            ("ALC_PATH", "/opt/alc/alc"),
            ("SYMBOL_DOWNLOAD_CONCURRENCY", "4"),
        ]))
        .unwrap();
        assert_eq!(config.storage.platform_symbols().unwrap(), "mssymbols");
        assert_eq!(config.storage.dependency_symbols().unwrap(), "dependencies");
        assert_eq!(config.storage.artifacts().unwrap(), "dependencies");
        assert_eq!(config.compiler.program, PathBuf::from("/opt/alc/alc"));
        assert_eq!(config.symbol_concurrency, 4);
    }

    #[test]
    fn test_artifacts_container_override() {
        let config = BuildConfig::from_lookup(lookup(&[
            ("AZ_CONTAINER_NAME_DEPENDENCIES", "dependencies"),
            ("AZ_CONTAINER_NAME_ARTIFACTS", "apps"),
        ]))
        .unwrap();
        assert_eq!(config.storage.artifacts().unwrap(), "apps");
    }

    #[test]
    fn test_reads_marketplace_settings() {
        let config = BuildConfig::from_lookup(lookup(&[
            ("MARKET_PRODUCT_PREFIX", "Acme "),
            ("MARKET_LIBRARY_DEPENDENCY", "Acme Extension Access"),
        ]))
        .unwrap();
        assert_eq!(config.marketplace.product_prefix.as_deref(), Some("Acme "));
        assert_eq!(
            config.marketplace.library_dependency.as_deref(),
            Some("Acme Extension Access")
        );
    }

    #[test]
    fn test_invalid_concurrency_falls_back() {
        let config =
            BuildConfig::from_lookup(lookup(&[("SYMBOL_DOWNLOAD_CONCURRENCY", "zero")])).unwrap();
        assert_eq!(config.symbol_concurrency, 1);
    }

    #[test]
    fn test_bad_connection_string_is_an_error() {
        let err = BuildConfig::from_lookup(lookup(&[("AZ_CONNECTION_STRING", "garbage")]))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_signing_credentials_require_every_field() {
        let mut signing = SigningConfig {
            vault_uri: Some("https://vault.example".to_string()),
            certificate_name: Some("cert".to_string()),
            application_id: Some("app".to_string()),
            application_secret: Some("secret".to_string()),
            tenant_id: None,
            ..SigningConfig::default()
        };
        let err = signing.credentials().err().unwrap();
        assert!(err.to_string().contains("AZURE_KEY_VAULT_TENANT_ID"));

        signing.tenant_id = Some("tenant".to_string());
        assert_eq!(signing.credentials().unwrap().tenant_id, "tenant");
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let signing = SigningConfig {
            application_secret: Some("hunter2".to_string()),
            ..SigningConfig::default()
        };
        assert!(!format!("{signing:?}").contains("hunter2"));

        let market = MarketplaceConfig {
            client_secret: Some("hunter3".to_string()),
            ..MarketplaceConfig::default()
        };
        assert!(!format!("{market:?}").contains("hunter3"));
    }
}
