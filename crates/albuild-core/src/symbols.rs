//! Symbol archive resolution.
//!
//! Platform symbols for a major version are always downloaded. Dependency
//! symbols are matched to manifest dependencies by normalized-name
//! containment, a deliberately loose heuristic: `Base App` matches
//! `22.base-app-symbols.zip`, and a short dependency name can match archives
//! meant for a longer one.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use albuild_blob::{file_name_of, BlobError, BlobFetcher};
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, info, warn};

use crate::config::StorageConfig;
use crate::error::Result;
use crate::manifest::Dependency;

/// Normalize a name for matching: lower-case, without spaces, `_` or `-`.
pub fn symbol_name(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, ' ' | '_' | '-'))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Whether `archive_key` looks like it belongs to dependency `dependency_name`.
pub fn matches_dependency(dependency_name: &str, archive_key: &str) -> bool {
    symbol_name(archive_key).contains(&symbol_name(dependency_name))
}

/// Downloads the symbol archives a build needs into a cache directory.
pub struct SymbolResolver<'a> {
    fetcher: &'a BlobFetcher,
    storage: &'a StorageConfig,
    concurrency: usize,
}

impl<'a> SymbolResolver<'a> {
    pub fn new(fetcher: &'a BlobFetcher, storage: &'a StorageConfig, concurrency: usize) -> Self {
        Self {
            fetcher,
            storage,
            concurrency: concurrency.max(1),
        }
    }

    /// Materialize symbols for `major` and `dependencies` in `cache_dir`.
    ///
    /// The directory is created when missing and never cleared.
    pub async fn resolve(
        &self,
        major: u32,
        dependencies: &[Dependency],
        cache_dir: &Path,
    ) -> Result<PathBuf> {
        tokio::fs::create_dir_all(cache_dir).await?;

        let platform = self.storage.platform_symbols()?;
        info!(major, container = platform, "Downloading platform symbols");
        let platform_keys: Vec<String> = self
            .fetcher
            .store()
            .list(platform, &major.to_string())
            .await?
            .into_iter()
            .map(|item| item.name)
            .collect();
        self.fetch_all(platform, platform_keys, cache_dir).await?;

        let deps_container = self.storage.dependency_symbols()?;
        info!(major, container = deps_container, "Downloading dependency symbols");
        let wanted: Vec<String> = dependencies.iter().map(|d| symbol_name(&d.name)).collect();
        let mut seen = BTreeSet::new();
        let dependency_keys: Vec<String> = self
            .fetcher
            .store()
            .list(deps_container, &format!("{major}."))
            .await?
            .into_iter()
            .filter(|item| {
                let key = symbol_name(&item.name);
                let hit = wanted.iter().any(|w| key.contains(w.as_str()));
                if !hit {
                    debug!(key = %item.name, "No dependency matches archive");
                }
                hit
            })
            .map(|item| item.name)
            .filter(|name| seen.insert(name.clone()))
            .collect();
        self.fetch_all(deps_container, dependency_keys, cache_dir)
            .await?;

        Ok(cache_dir.to_path_buf())
    }

    /// Keys sharing a local file name are fetched one after another in
    /// listing order, so the last one wins; distinct files run concurrently.
    async fn fetch_all(
        &self,
        container: &str,
        keys: Vec<String>,
        cache_dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        let count = keys.len();
        let paths: Vec<PathBuf> = stream::iter(group_by_file_name(keys))
            .map(|group| async move {
                let mut local = None;
                for key in &group {
                    local = Some(self.fetcher.fetch(container, key, cache_dir).await?);
                }
                Ok::<_, BlobError>(local)
            })
            .buffer_unordered(self.concurrency)
            .try_filter_map(|local| async move { Ok(local) })
            .try_collect()
            .await?;
        info!(container, count, files = paths.len(), "Symbols downloaded");
        Ok(paths)
    }
}

/// Group keys by the file name they are written to, keeping listing order.
fn group_by_file_name(keys: Vec<String>) -> Vec<Vec<String>> {
    let mut groups: Vec<Vec<String>> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for key in keys {
        let file = file_name_of(&key).to_string();
        match index.get(&file) {
            Some(&i) => {
                warn!(key = %key, file = %file, "Symbol archives share a file name; last listed wins");
                groups[i].push(key);
            }
            None => {
                index.insert(file, groups.len());
                groups.push(vec![key]);
            }
        }
    }
    groups
}
