use super::model::{LstmRegressor, ModelError, SequenceModel};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, OnceCell};

pub type ModelLoader =
    Arc<dyn Fn(&Path) -> Result<Arc<dyn SequenceModel>, ModelError> + Send + Sync>;

type Slot = Arc<OnceCell<Arc<dyn SequenceModel>>>;

/// Process-wide read-through cache of loaded forecast models.
///
/// Each key owns one cell, so concurrent first requests for the same model wait on a single
/// load while loads of different models proceed independently. A failed load leaves the cell
/// empty and the next request retries it.
pub struct ModelCache {
    loader: ModelLoader,
    slots: Mutex<HashMap<PathBuf, Slot>>,
}

impl ModelCache {
    pub fn new(loader: ModelLoader) -> Self {
        Self {
            loader,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn lstm() -> Self {
        Self::new(Arc::new(|path: &Path| {
            LstmRegressor::load(path).map(|model| Arc::new(model) as Arc<dyn SequenceModel>)
        }))
    }

    pub async fn get(&self, path: &Path) -> Result<Arc<dyn SequenceModel>, ModelError> {
        let slot = {
            let mut slots = self.slots.lock().await;
            slots.entry(path.to_path_buf()).or_default().clone()
        };

        let model = slot
            .get_or_try_init(|| {
                let loader = self.loader.clone();
                let path = path.to_path_buf();
                async move {
                    let started = Instant::now();
                    let model_id = path.display().to_string();
                    let model = tokio::task::spawn_blocking(move || loader(&path))
                        .await
                        .map_err(|err| ModelError::Task(err.to_string()))??;
                    tracing::info!(
                        model_id = %model_id,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "forecast model loaded"
                    );
                    Ok::<_, ModelError>(model)
                }
            })
            .await?;
        Ok(model.clone())
    }

    /// Number of models currently resident.
    pub async fn loaded(&self) -> usize {
        let slots = self.slots.lock().await;
        slots.values().filter(|slot| slot.initialized()).count()
    }
}
