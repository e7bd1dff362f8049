//! Model library and training center

use crate::error::PersistenceError;
use crate::persistence::ModelStateStore;
use crate::types::{ModelKey, ModelStatus, StepId};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// One entry of the model library
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LibraryEntry {
    /// Tool id
    pub id: StepId,
    /// Display name
    pub name: &'static str,
    /// Icon
    pub icon: &'static str,
    /// Short description
    pub description: &'static str,
}

/// Library split into public and private tools
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LibraryCatalog {
    /// Tools running the shared public model
    pub public: Vec<LibraryEntry>,
    /// Tools backed by the user's private model
    pub private: Vec<LibraryEntry>,
}

/// Read-only view over every tool and the user's model states
pub struct ModelLibrary {
    store: Arc<dyn ModelStateStore>,
}

impl ModelLibrary {
    /// Create a library over a model store
    #[must_use]
    pub fn new(store: Arc<dyn ModelStateStore>) -> Self {
        Self { store }
    }

    /// List the tools of `user`, optionally filtered by a name fragment
    ///
    /// # Errors
    /// Fails when the model store cannot be read.
    pub fn catalog(&self, user: &str, search: Option<&str>) -> Result<LibraryCatalog, PersistenceError> {
        let query = search
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());
        let mut catalog = LibraryCatalog::default();

        for step in StepId::ALL {
            let name = step.display_name();
            if let Some(query) = &query {
                if !name.to_lowercase().contains(query.as_str()) {
                    continue;
                }
            }
            let status = match step.model_key() {
                Some(key) => self.store.model_status(user, key)?,
                None => ModelStatus::Untrained,
            };
            let private = status == ModelStatus::Private;
            let entry = LibraryEntry {
                id: step,
                name,
                icon: step.icon(),
                description: if private { "已针对您的数据微调" } else { "标准算法" },
            };
            if private {
                catalog.private.push(entry);
            } else {
                catalog.public.push(entry);
            }
        }
        Ok(catalog)
    }
}

/// Stages printed while fine-tuning in the training center
pub const TUNING_STAGES: [&str; 7] = [
    "正在读取 CSV 数据...",
    "数据清洗与归一化...",
    "加载私有权重...",
    "启动反向传播 (Epoch 1/5)...",
    "启动反向传播 (Epoch 5/5)...",
    "验证集评估...",
    "参数序列化与热部署...",
];

/// Outcome of a stand-alone fine-tune
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TuneReport {
    /// Tuned model
    pub model: ModelKey,
    /// Dataset used
    pub dataset: String,
    /// New version number
    pub version: u32,
}

/// Stand-alone parameter update of one model
pub struct TrainingCenter {
    store: Arc<dyn ModelStateStore>,
    stage_delay: Duration,
}

impl TrainingCenter {
    /// Create a training center with a half-second pause per stage
    #[must_use]
    pub fn new(store: Arc<dyn ModelStateStore>) -> Self {
        Self {
            store,
            stage_delay: Duration::from_millis(500),
        }
    }

    /// With per-stage delay
    #[must_use]
    pub fn with_stage_delay(mut self, delay: Duration) -> Self {
        self.stage_delay = delay;
        self
    }

    /// Fine-tune `model` for `user`, reporting each stage to `progress`
    ///
    /// # Errors
    /// Fails when the new version cannot be recorded.
    pub async fn tune(
        &self,
        user: &str,
        model: ModelKey,
        dataset: &str,
        mut progress: impl FnMut(usize, &str) + Send,
    ) -> Result<TuneReport, PersistenceError> {
        for (i, stage) in TUNING_STAGES.iter().enumerate() {
            progress(i, stage);
            tokio::time::sleep(self.stage_delay).await;
        }
        let version = self.store.bump_version(user, model)?;
        tracing::info!(user, model = %model, dataset, version, "model parameters updated");
        Ok(TuneReport {
            model,
            dataset: dataset.to_string(),
            version,
        })
    }
}
