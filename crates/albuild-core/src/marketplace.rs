//! Partner marketplace submission of production artifacts.

use std::fmt;
use std::path::{Path, PathBuf};

use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::MarketplaceConfig;
use crate::error::{PipelineError, Result};
use crate::manifest::Dependency;
use crate::symbols::symbol_name;

/// Bearer token from the client-credentials flow.
#[derive(Clone)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ProductList {
    Wrapped { value: Vec<Product> },
    Bare(Vec<Product>),
}

impl ProductList {
    fn into_vec(self) -> Vec<Product> {
        match self {
            ProductList::Wrapped { value } => value,
            ProductList::Bare(products) => products,
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Marketplace product name for an app: `-` becomes a space and the
/// configured prefix is removed.
pub fn product_name_for(app_name: &str, prefix: Option<&str>) -> String {
    let spaced = app_name.replace('-', " ");
    match prefix {
        Some(prefix) if !prefix.is_empty() => spaced.replace(prefix, ""),
        _ => spaced,
    }
}

/// First `.app` file in `dir`, by name.
pub fn find_app_file(dir: &Path) -> Result<PathBuf> {
    let mut apps: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "app"))
        .collect();
    apps.sort();
    apps.into_iter().next().ok_or_else(|| {
        PipelineError::Marketplace(format!("no .app files found in {}", dir.display()))
    })
}

/// Library app to submit alongside the main app.
///
/// Returns `None` when no library dependency is configured or the manifest
/// does not declare it. When it is declared, the first `.app` in `search_dir`
/// whose normalized name starts with the dependency's normalized name is
/// required.
pub fn find_library_app(
    dependencies: &[Dependency],
    library_dependency: Option<&str>,
    search_dir: &Path,
) -> Result<Option<PathBuf>> {
    let Some(wanted) = library_dependency.map(symbol_name) else {
        return Ok(None);
    };
    let Some(dependency) = dependencies.iter().find(|d| symbol_name(&d.name) == wanted) else {
        return Ok(None);
    };

    let mut apps: Vec<PathBuf> = std::fs::read_dir(search_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "app"))
        .filter(|p| {
            p.file_stem()
                .map(|stem| symbol_name(&stem.to_string_lossy()).starts_with(&wanted))
                .unwrap_or(false)
        })
        .collect();
    apps.sort();
    match apps.into_iter().next() {
        Some(app) => {
            debug!(dependency = %dependency.name, app = %app.display(), "Found library app");
            Ok(Some(app))
        }
        None => Err(PipelineError::Marketplace(format!(
            "no library .app for dependency {:?} found in {}",
            dependency.name,
            search_dir.display()
        ))),
    }
}

pub struct MarketplaceClient<'a> {
    config: &'a MarketplaceConfig,
    http: reqwest::Client,
}

impl<'a> MarketplaceClient<'a> {
    pub fn new(config: &'a MarketplaceConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("albuild/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { config, http })
    }

    pub async fn authenticate(&self) -> Result<AccessToken> {
        let url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.config.authority_url.trim_end_matches('/'),
            self.config.tenant_id()?
        );
        let form = [
            ("client_id", self.config.client_id()?),
            ("client_secret", self.config.client_secret()?),
            ("scope", self.config.scope.as_str()),
            ("grant_type", "client_credentials"),
        ];

        let response = self.http.post(&url).form(&form).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Marketplace(format!(
                "authentication failed ({status}): {body}"
            )));
        }
        let token: TokenResponse = response.json().await?;
        debug!("Authenticated against marketplace");
        Ok(AccessToken(token.access_token))
    }

    /// The product whose name equals `name` exactly.
    pub async fn find_product(&self, token: &AccessToken, name: &str) -> Result<Product> {
        let url = format!("{}/products", self.config.api_url.trim_end_matches('/'));
        let response = self
            .http
            .get(&url)
            .bearer_auth(token.secret())
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Marketplace(format!(
                "listing products failed ({status}): {body}"
            )));
        }
        let products: ProductList = response.json().await?;
        select_product(products.into_vec(), name)
    }

    /// Submit `app_file` (and an optional library app) for `product_id`.
    pub async fn submit(
        &self,
        token: &AccessToken,
        product_id: &str,
        app_file: &Path,
        library_file: Option<&Path>,
    ) -> Result<serde_json::Value> {
        let url = format!(
            "{}/products/{}/submissions",
            self.config.api_url.trim_end_matches('/'),
            product_id
        );
        let mut form = Form::new()
            .text("autoPromote", "true")
            .text("doNotWait", "true")
            .part("appFile", file_part(app_file).await?);
        if let Some(library) = library_file {
            form = form.part("libraryAppFiles", file_part(library).await?);
        }

        info!(product_id, app = %app_file.display(), "Submitting to marketplace");
        let response = self
            .http
            .post(&url)
            .bearer_auth(token.secret())
            .multipart(form)
            .send()
            .await?;
        let status = response.status().as_u16();
        if !matches!(status, 200 | 201 | 202) {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Marketplace(format!(
                "submission failed ({status}): {body}"
            )));
        }
        let body = response.text().await?;
        info!(product_id, "Marketplace submission initiated");
        Ok(serde_json::from_str(&body).unwrap_or(serde_json::Value::Null))
    }
}

fn select_product(products: Vec<Product>, name: &str) -> Result<Product> {
    products
        .into_iter()
        .find(|p| p.name == name)
        .ok_or_else(|| PipelineError::Marketplace(format!("no existing product named {name:?}")))
}

async fn file_part(path: &Path) -> Result<Part> {
    let data = tokio::fs::read(path).await?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "app.app".to_string());
    Ok(Part::bytes(data).file_name(name))
}
