use crate::error::EngineError;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use visage_types::ModelInfo;

/// What to do about models that are not on disk. The transfer itself lives
/// in an external downloader; the repository only reports presence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DownloadStrategy {
    #[default]
    Auto,
    Skip,
    Force,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    models_info: Vec<ModelInfo>,
}

/// Name-indexed model catalog resolving logical model names to on-disk
/// paths under a configurable base directory.
pub struct ModelRepository {
    base_path: PathBuf,
    download_strategy: DownloadStrategy,
    catalog: Mutex<HashMap<String, ModelInfo>>,
}

impl ModelRepository {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            download_strategy: DownloadStrategy::default(),
            catalog: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_download_strategy(mut self, strategy: DownloadStrategy) -> Self {
        self.download_strategy = strategy;
        self
    }

    /// Load (or reload) the catalog from a `models_info` JSON file.
    #[tracing::instrument(skip(self))]
    pub fn load_catalog(&self, catalog_path: &Path) -> Result<usize, EngineError> {
        let file = File::open(catalog_path).map_err(|_| EngineError::ConfigInvalid {
            yaml_path: catalog_path.display().to_string(),
            expected: "readable model catalog file".to_string(),
            code: visage_types::ErrorCode::ConfigFileNotFound,
        })?;
        let parsed: CatalogFile = serde_json::from_reader(BufReader::new(file))?;

        let mut catalog = self
            .catalog
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        catalog.clear();
        for info in parsed.models_info {
            if !info.name.is_empty() {
                catalog.insert(info.name.clone(), info);
            }
        }
        tracing::info!(models = catalog.len(), "model catalog loaded");
        Ok(catalog.len())
    }

    pub fn has_model(&self, name: &str) -> bool {
        self.catalog
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(name)
    }

    pub fn info(&self, name: &str) -> Option<ModelInfo> {
        self.catalog
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }

    /// Resolve a model name to its on-disk path without checking presence.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, EngineError> {
        let catalog = self
            .catalog
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let info = catalog
            .get(name)
            .ok_or_else(|| EngineError::ModelNotInCatalog(name.to_string()))?;
        // Catalog entries may carry legacy full paths; only the file name
        // component joins the base directory.
        let file_name = Path::new(&info.file_name)
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(&info.file_name));
        Ok(self.base_path.join(file_name))
    }

    pub fn is_present(&self, name: &str) -> bool {
        self.resolve(name).map(|path| path.exists()).unwrap_or(false)
    }

    /// Resolve a model and require it on disk. With `DownloadStrategy::Skip`
    /// a missing file is an error; `Auto`/`Force` defer to the external
    /// downloader, so a missing file is still an error here.
    pub fn ensure(&self, name: &str) -> Result<PathBuf, EngineError> {
        let path = self.resolve(name)?;
        if path.exists() && self.download_strategy != DownloadStrategy::Force {
            return Ok(path);
        }
        if path.exists() {
            return Ok(path);
        }
        tracing::warn!(model = name, path = %path.display(), "model file missing");
        Err(EngineError::ModelFileMissing(path))
    }

    pub fn model_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .catalog
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn write_catalog(dir: &Path) -> PathBuf {
        let path = dir.join("models_info.json");
        let mut file = File::create(&path).unwrap();
        write!(
            file,
            r#"{{"models_info": [
                {{"name": "inswapper_128", "type": "face_swapper", "file_name": "inswapper_128.onnx", "url": "https://example.invalid/inswapper_128.onnx"}},
                {{"name": "gfpgan_1_4", "type": "face_enhancer", "path": "weights/gfpgan_1.4.onnx", "url": ""}}
            ]}}"#
        )
        .unwrap();
        path
    }

    #[test]
    fn resolves_names_against_the_base_directory() {
        let dir = tempfile::tempdir().unwrap();
        let catalog_path = write_catalog(dir.path());

        let repo = ModelRepository::new(dir.path().join("models"));
        assert_eq!(repo.load_catalog(&catalog_path).unwrap(), 2);

        let resolved = repo.resolve("inswapper_128").unwrap();
        assert_eq!(resolved, dir.path().join("models").join("inswapper_128.onnx"));

        // Legacy `path` values lose their directory component.
        let legacy = repo.resolve("gfpgan_1_4").unwrap();
        assert_eq!(legacy, dir.path().join("models").join("gfpgan_1.4.onnx"));
    }

    #[test]
    fn unknown_names_are_catalog_errors() {
        let repo = ModelRepository::new("/tmp/models");
        assert!(matches!(
            repo.resolve("missing"),
            Err(EngineError::ModelNotInCatalog(_))
        ));
        assert!(!repo.has_model("missing"));
    }

    #[test]
    fn ensure_requires_the_file_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let catalog_path = write_catalog(dir.path());
        let repo = ModelRepository::new(dir.path());
        repo.load_catalog(&catalog_path).unwrap();

        assert!(matches!(
            repo.ensure("inswapper_128"),
            Err(EngineError::ModelFileMissing(_))
        ));

        File::create(dir.path().join("inswapper_128.onnx")).unwrap();
        assert!(repo.ensure("inswapper_128").is_ok());
        assert!(repo.is_present("inswapper_128"));
    }
}
