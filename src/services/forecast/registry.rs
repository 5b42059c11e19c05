use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
struct RegistryEntry {
    target: String,
    features: Vec<String>,
    lookback: usize,
    model: String,
}

/// How to forecast one target field.
#[derive(Debug, Clone, PartialEq, serde::Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ForecastModelSpec {
    pub target: String,
    /// Ordered model inputs; the flattened window is row-major over these.
    pub features: Vec<String>,
    pub lookback: usize,
    #[serde(skip)]
    pub model_path: PathBuf,
}

impl ForecastModelSpec {
    pub fn input_width(&self) -> usize {
        self.lookback * self.features.len()
    }

    /// Features followed by the target, each field once.
    pub fn query_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = Vec::with_capacity(self.features.len() + 1);
        for field in self.features.iter().chain(std::iter::once(&self.target)) {
            if !fields.contains(field) {
                fields.push(field.clone());
            }
        }
        fields
    }
}

#[derive(Debug, Clone, Default)]
pub struct ForecastRegistry {
    specs: Vec<ForecastModelSpec>,
}

impl ForecastRegistry {
    pub fn new(specs: Vec<ForecastModelSpec>) -> Self {
        Self { specs }
    }

    /// Parses a registry document; relative `model` paths resolve against `base_dir`.
    pub fn parse(raw: &str, base_dir: &Path) -> Result<Self> {
        let entries: Vec<RegistryEntry> =
            serde_json::from_str(raw).context("forecast registry is not a JSON array of models")?;
        let mut specs = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.lookback == 0 {
                bail!("model for {} has lookback 0", entry.target);
            }
            if entry.features.is_empty() {
                bail!("model for {} lists no features", entry.target);
            }
            let model_path = PathBuf::from(entry.model.trim());
            let model_path = if model_path.is_absolute() {
                model_path
            } else {
                base_dir.join(model_path)
            };
            specs.push(ForecastModelSpec {
                target: entry.target.trim().to_string(),
                features: entry.features,
                lookback: entry.lookback,
                model_path,
            });
        }
        Ok(Self { specs })
    }

    /// Reads the registry at `path`. A missing or unreadable registry disables forecasting
    /// rather than failing startup.
    pub fn load_or_empty(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "forecast registry unavailable");
                return Self::default();
            }
        };
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        match Self::parse(&raw, base_dir) {
            Ok(registry) => {
                tracing::info!(
                    path = %path.display(),
                    models = registry.specs.len(),
                    "forecast registry loaded"
                );
                registry
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %format!("{err:#}"), "forecast registry ignored");
                Self::default()
            }
        }
    }

    pub fn lookup(&self, target: &str) -> Option<&ForecastModelSpec> {
        self.specs
            .iter()
            .find(|spec| spec.target.eq_ignore_ascii_case(target))
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGISTRY: &str = r#"[
        {"target": "cwshdr", "features": ["cwrhdr", "chwsfhdr"], "lookback": 3, "model": "cwshdr.json"},
        {"target": "kw", "features": ["kw"], "lookback": 1, "model": "/opt/models/kw.json"}
    ]"#;

    #[test]
    fn lookup_ignores_case_and_resolves_paths() {
        let registry = ForecastRegistry::parse(REGISTRY, Path::new("/srv/models")).unwrap();
        let spec = registry.lookup("CWSHDR").unwrap();
        assert_eq!(spec.model_path, PathBuf::from("/srv/models/cwshdr.json"));
        assert_eq!(spec.input_width(), 6);
        assert_eq!(
            registry.lookup("KW").unwrap().model_path,
            PathBuf::from("/opt/models/kw.json")
        );
        assert!(registry.lookup("cwrhdr").is_none());
    }

    #[test]
    fn query_fields_append_target_once() {
        let registry = ForecastRegistry::parse(REGISTRY, Path::new(".")).unwrap();
        assert_eq!(registry.lookup("kw").unwrap().query_fields(), vec!["kw"]);
        assert_eq!(
            registry.lookup("cwshdr").unwrap().query_fields(),
            vec!["cwrhdr", "chwsfhdr", "cwshdr"]
        );
    }

    #[test]
    fn rejects_zero_lookback() {
        let raw = r#"[{"target": "kw", "features": ["kw"], "lookback": 0, "model": "kw.json"}]"#;
        assert!(ForecastRegistry::parse(raw, Path::new(".")).is_err());
    }

    #[test]
    fn missing_file_gives_empty_registry() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ForecastRegistry::load_or_empty(&dir.path().join("absent.json"));
        assert!(registry.is_empty());
    }

    #[test]
    fn loads_from_disk_relative_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forecast_models.json");
        std::fs::write(&path, REGISTRY).unwrap();
        let registry = ForecastRegistry::load_or_empty(&path);
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.lookup("cwshdr").unwrap().model_path,
            dir.path().join("cwshdr.json")
        );
    }
}
