//! Project manifest (`app.json`) handling.
//!
//! [`AppManifest`] is a typed view over the JSON document that keeps every
//! other field, and its order, intact when the version is written back.
//! [`ManifestGuard`] makes a variant manifest the active `app.json` for the
//! duration of one build and puts the working tree back afterwards.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::ManifestError;
use crate::version::VersionTag;

/// File name of the manifest the compiler reads.
pub const CANONICAL_MANIFEST: &str = "app.json";

/// Snapshot of the canonical manifest taken while a guard is held.
pub const MANIFEST_BACKUP: &str = "app.json.bak";

/// Suffix shared by the canonical manifest and its variants.
pub const MANIFEST_SUFFIX: &str = "app.json";

/// One entry of the manifest's `dependencies` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub publisher: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

/// A loaded project manifest.
#[derive(Debug, Clone)]
pub struct AppManifest {
    path: PathBuf,
    document: Map<String, Value>,
    pub name: String,
    pub platform: String,
    pub application: String,
    pub target: String,
    pub runtime: String,
    pub dependencies: Vec<Dependency>,
}

impl AppManifest {
    /// Read and validate the manifest at `path`.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let text = fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &text)
    }

    /// Parse manifest text; `path` is used for error reporting and `save`.
    pub fn parse(path: &Path, text: &str) -> Result<Self, ManifestError> {
        let value: Value = serde_json::from_str(text).map_err(|source| ManifestError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let document = match value {
            Value::Object(map) => map,
            other => {
                return Err(ManifestError::InvalidField {
                    field: "<root>".to_string(),
                    value: other.to_string(),
                    reason: "manifest must be a JSON object".to_string(),
                })
            }
        };

        let text_field = |field: &str| -> Result<String, ManifestError> {
            match document.get(field) {
                Some(Value::String(s)) => Ok(s.clone()),
                Some(other) => Err(ManifestError::InvalidField {
                    field: field.to_string(),
                    value: other.to_string(),
                    reason: "expected a string".to_string(),
                }),
                None => Err(ManifestError::MissingField {
                    path: path.to_path_buf(),
                    field: field.to_string(),
                }),
            }
        };

        let name = text_field("name")?;
        let platform = text_field("platform")?;
        let application = text_field("application")?;
        let target = text_field("target")?;
        // Runtime is sometimes written as a bare number.
        let runtime = match document.get("runtime") {
            Some(Value::Number(n)) => n.to_string(),
            _ => text_field("runtime")?,
        };

        let dependencies = match document.get("dependencies") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    serde_json::from_value::<Dependency>(item.clone()).map_err(|e| {
                        ManifestError::InvalidField {
                            field: "dependencies".to_string(),
                            value: item.to_string(),
                            reason: e.to_string(),
                        }
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(other) => {
                return Err(ManifestError::InvalidField {
                    field: "dependencies".to_string(),
                    value: other.to_string(),
                    reason: "expected an array".to_string(),
                })
            }
            None => {
                return Err(ManifestError::MissingField {
                    path: path.to_path_buf(),
                    field: "dependencies".to_string(),
                })
            }
        };

        Ok(Self {
            path: path.to_path_buf(),
            document,
            name,
            platform,
            application,
            target,
            runtime,
            dependencies,
        })
    }

    /// Current `version` field, if any.
    pub fn version(&self) -> Option<&str> {
        self.document.get("version").and_then(Value::as_str)
    }

    /// Major component of the declared platform version.
    pub fn platform_major(&self) -> Result<u32, ManifestError> {
        leading_major("platform", &self.platform)
    }

    /// Major component of the declared application version.
    pub fn application_major(&self) -> Result<u32, ManifestError> {
        leading_major("application", &self.application)
    }

    /// Declared runtime as a number, e.g. `12.0`.
    pub fn runtime_version(&self) -> Result<f64, ManifestError> {
        self.runtime
            .trim()
            .parse::<f64>()
            .map_err(|e| ManifestError::InvalidField {
                field: "runtime".to_string(),
                value: self.runtime.clone(),
                reason: e.to_string(),
            })
    }

    /// Set `version`, keeping its position when the field already exists.
    pub fn set_version(&mut self, version: &VersionTag) {
        self.document
            .insert("version".to_string(), Value::String(version.to_string()));
    }

    /// Write the document back with two-space indentation.
    pub fn save(&self) -> Result<(), ManifestError> {
        let write_err = |source| ManifestError::Write {
            path: self.path.clone(),
            source,
        };
        let text = serde_json::to_string_pretty(&self.document)
            .map_err(|e| write_err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        fs::write(&self.path, text).map_err(write_err)
    }
}

fn leading_major(field: &str, value: &str) -> Result<u32, ManifestError> {
    let head = value.split('.').next().unwrap_or_default().trim();
    head.parse::<u32>().map_err(|e| ManifestError::InvalidField {
        field: field.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

/// Every `*app.json` file directly inside `work_dir`, sorted by file name.
pub fn discover_manifests(work_dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(work_dir)? {
        let entry = entry?;
        let path = entry.path();
        let is_manifest = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.ends_with(MANIFEST_SUFFIX))
            .unwrap_or(false);
        if is_manifest && path.is_file() {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

/// Scoped substitution of the canonical manifest.
///
/// Acquiring snapshots `app.json` and, for a variant, copies the variant over
/// it. Releasing (explicitly or on drop) restores the snapshot, or removes the
/// substituted file when no canonical manifest existed. A guard over the
/// canonical manifest itself can be [`persist`](Self::persist)ed so the
/// injected version stays on disk.
#[derive(Debug)]
pub struct ManifestGuard {
    canonical: PathBuf,
    backup: PathBuf,
    had_original: bool,
    substituted: bool,
    persist: bool,
    released: bool,
}

impl ManifestGuard {
    pub fn acquire(work_dir: &Path, manifest: &Path) -> Result<Self, ManifestError> {
        let canonical = work_dir.join(CANONICAL_MANIFEST);
        let backup = work_dir.join(MANIFEST_BACKUP);
        let had_original = canonical.is_file();
        let substituted = manifest.file_name().and_then(|n| n.to_str()) != Some(CANONICAL_MANIFEST);

        if had_original {
            fs::copy(&canonical, &backup).map_err(|source| ManifestError::Write {
                path: backup.clone(),
                source,
            })?;
        }

        let mut guard = Self {
            canonical,
            backup,
            had_original,
            substituted: false,
            persist: false,
            released: false,
        };

        if substituted {
            // Flag first so a failed copy still triggers cleanup on drop.
            guard.substituted = true;
            fs::copy(manifest, &guard.canonical).map_err(|source| ManifestError::Read {
                path: manifest.to_path_buf(),
                source,
            })?;
            debug!(variant = %manifest.display(), "Substituted variant manifest");
        }

        Ok(guard)
    }

    /// Path of the manifest to operate on for this build.
    pub fn active_path(&self) -> &Path {
        &self.canonical
    }

    /// Whether a variant was copied over the canonical manifest.
    pub fn is_substituted(&self) -> bool {
        self.substituted
    }

    /// Keep the canonical manifest's current content on release.
    ///
    /// Has no effect for substituted variants, which are always restored.
    pub fn persist(&mut self) {
        self.persist = true;
    }

    /// Restore the working tree now, reporting failures.
    pub fn release(mut self) -> Result<(), ManifestError> {
        self.restore()
    }

    fn restore(&mut self) -> Result<(), ManifestError> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        if self.persist && !self.substituted {
            if self.had_original {
                fs::remove_file(&self.backup).map_err(|source| ManifestError::Write {
                    path: self.backup.clone(),
                    source,
                })?;
            }
            return Ok(());
        }

        if self.had_original {
            fs::rename(&self.backup, &self.canonical).map_err(|source| ManifestError::Write {
                path: self.canonical.clone(),
                source,
            })?;
        } else if self.canonical.exists() {
            fs::remove_file(&self.canonical).map_err(|source| ManifestError::Write {
                path: self.canonical.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

impl Drop for ManifestGuard {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            warn!(error = %e, "Failed to restore manifest");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"{
  "id": "3f1a",
  "name": "Contoso App",
  "publisher": "Contoso",
  "version": "1.0.0.0",
  "platform": "22.0.0.0",
  "application": "22.0.0.0",
  "target": "Cloud",
  "runtime": "11.0",
  "dependencies": [
    { "id": "b1", "name": "Base App", "publisher": "Contoso", "version": "22.0.0.0" }
  ]
}"#;

    fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn test_parse_fields() {
        let m = AppManifest::parse(Path::new("app.json"), MANIFEST).unwrap();
        assert_eq!(m.name, "Contoso App");
        assert_eq!(m.platform_major().unwrap(), 22);
        assert_eq!(m.application_major().unwrap(), 22);
        assert_eq!(m.runtime_version().unwrap(), 11.0);
        assert_eq!(m.dependencies.len(), 1);
        assert_eq!(m.dependencies[0].name, "Base App");
        assert_eq!(m.version(), Some("1.0.0.0"));
    }

    #[test]
    fn test_missing_field() {
        let err = AppManifest::parse(Path::new("app.json"), r#"{"name": "x"}"#).unwrap_err();
        assert!(matches!(err, ManifestError::MissingField { ref field, .. } if field == "platform"));
    }

    #[test]
    fn test_dependency_without_name_rejected() {
        let text = r#"{"name":"x","platform":"22.0","application":"22.0","target":"Cloud",
            "runtime":"11.0","dependencies":[{"id":"1"}]}"#;
        let err = AppManifest::parse(Path::new("app.json"), text).unwrap_err();
        assert!(matches!(err, ManifestError::InvalidField { ref field, .. } if field == "dependencies"));
    }

    #[test]
    fn test_numeric_runtime_accepted() {
        let text = r#"{"name":"x","platform":"22.0","application":"22.0","target":"Cloud",
            "runtime":8.1,"dependencies":[]}"#;
        let m = AppManifest::parse(Path::new("app.json"), text).unwrap();
        assert_eq!(m.runtime_version().unwrap(), 8.1);
    }

    #[test]
    fn test_malformed_platform() {
        let text = r#"{"name":"x","platform":"next","application":"22.0","target":"Cloud",
            "runtime":"11.0","dependencies":[]}"#;
        let m = AppManifest::parse(Path::new("app.json"), text).unwrap();
        assert!(m.platform_major().is_err());
    }

    #[test]
    fn test_set_version_preserves_field_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "app.json", MANIFEST);
        let mut m = AppManifest::load(&path).unwrap();
        m.set_version(&VersionTag::new(22, 25, 1978, 623));
        m.save().unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let name_at = text.find("\"name\"").unwrap();
        let version_at = text.find("\"version\": \"22.25.1978.623\"").unwrap();
        let platform_at = text.find("\"platform\"").unwrap();
        assert!(name_at < version_at && version_at < platform_at);
        assert_eq!(AppManifest::load(&path).unwrap().version(), Some("22.25.1978.623"));
    }

    #[test]
    fn test_discover_manifests_sorted() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "app.json", "{}");
        write(dir.path(), "cloud.app.json", "{}");
        write(dir.path(), "onpremapp.json", "{}");
        write(dir.path(), "app.json.bak", "{}");
        write(dir.path(), "settings.json", "{}");

        let found = discover_manifests(dir.path()).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["app.json", "cloud.app.json", "onpremapp.json"]);
    }

    #[test]
    fn test_guard_restores_canonical_after_variant() {
        let dir = tempfile::tempdir().unwrap();
        let canonical = write(dir.path(), "app.json", "canonical");
        let variant = write(dir.path(), "cloud.app.json", "variant");

        {
            let guard = ManifestGuard::acquire(dir.path(), &variant).unwrap();
            assert!(guard.is_substituted());
            assert_eq!(fs::read_to_string(guard.active_path()).unwrap(), "variant");
            fs::write(guard.active_path(), "variant with version").unwrap();
        }

        assert_eq!(fs::read_to_string(&canonical).unwrap(), "canonical");
        assert_eq!(fs::read_to_string(&variant).unwrap(), "variant");
        assert!(!dir.path().join(MANIFEST_BACKUP).exists());
    }

    #[test]
    fn test_guard_removes_substitute_when_no_canonical_existed() {
        let dir = tempfile::tempdir().unwrap();
        let variant = write(dir.path(), "cloudapp.json", "variant");

        let guard = ManifestGuard::acquire(dir.path(), &variant).unwrap();
        assert!(dir.path().join("app.json").exists());
        guard.release().unwrap();

        assert!(!dir.path().join("app.json").exists());
        assert!(!dir.path().join(MANIFEST_BACKUP).exists());
    }

    #[test]
    fn test_guard_restores_canonical_unless_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let canonical = write(dir.path(), "app.json", "before");

        let guard = ManifestGuard::acquire(dir.path(), &canonical).unwrap();
        assert!(!guard.is_substituted());
        fs::write(guard.active_path(), "after").unwrap();
        guard.release().unwrap();
        assert_eq!(fs::read_to_string(&canonical).unwrap(), "before");

        let mut guard = ManifestGuard::acquire(dir.path(), &canonical).unwrap();
        fs::write(guard.active_path(), "after").unwrap();
        guard.persist();
        guard.release().unwrap();
        assert_eq!(fs::read_to_string(&canonical).unwrap(), "after");
        assert!(!dir.path().join(MANIFEST_BACKUP).exists());
    }

    #[test]
    fn test_persist_ignored_for_variant() {
        let dir = tempfile::tempdir().unwrap();
        let canonical = write(dir.path(), "app.json", "canonical");
        let variant = write(dir.path(), "cloud.app.json", "variant");

        let mut guard = ManifestGuard::acquire(dir.path(), &variant).unwrap();
        guard.persist();
        drop(guard);

        assert_eq!(fs::read_to_string(&canonical).unwrap(), "canonical");
    }
}
