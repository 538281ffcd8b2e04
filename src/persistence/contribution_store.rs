//! 贡献记录持久化
//!
//! 单文件 JSON Lines，只追加；文件 IO 通过 spawn_blocking 放到阻塞线程池，避免阻塞 runtime。

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::contracts::{ContributionRecord, ContributionSink};
use crate::core::StoreError;

/// 追加写入的贡献记录文件
#[derive(Debug, Clone)]
pub struct JsonlContributionStore {
    path: PathBuf,
}

impl JsonlContributionStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// 位于数据目录下的默认文件 contributions.jsonl
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join("contributions.jsonl"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取全部记录；文件不存在时返回空 Vec，空行跳过
    pub async fn load_all(&self) -> Result<Vec<ContributionRecord>, StoreError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<ContributionRecord>, StoreError> {
            if !path.exists() {
                return Ok(Vec::new());
            }
            let reader = std::io::BufReader::new(std::fs::File::open(&path)?);
            let mut records = Vec::new();
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                records.push(serde_json::from_str(&line)?);
            }
            Ok(records)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }
}

#[async_trait]
impl ContributionSink for JsonlContributionStore {
    async fn record(&self, record: &ContributionRecord) -> Result<(), StoreError> {
        let line = serde_json::to_string(record)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            writeln!(file, "{line}")?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))??;

        tracing::debug!(batch = %record.batch_id, path = %self.path.display(), "Contribution recorded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn record(batch: &str, settled: i64) -> ContributionRecord {
        ContributionRecord {
            batch_id: batch.into(),
            payer: "payer".into(),
            asset: "USDC".into(),
            domain: "base".into(),
            requested_total: Decimal::from(100),
            settled_total: Decimal::from(settled),
            succeeded: 1,
            failed: 1,
            receipt_ids: vec!["rcpt_1".into()],
            recorded_at: 1_700_000_000,
        }
    }

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let store = JsonlContributionStore::in_dir(dir.path());
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_records_appended_in_order() {
        let dir = TempDir::new().unwrap();
        let store = JsonlContributionStore::new(dir.path().join("nested/contributions.jsonl"));

        store.record(&record("batch_1", 40)).await.unwrap();
        store.record(&record("batch_2", 60)).await.unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded, vec![record("batch_1", 40), record("batch_2", 60)]);
    }

    #[tokio::test]
    async fn test_corrupt_line_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = JsonlContributionStore::in_dir(dir.path());
        std::fs::write(store.path(), "{not json}\n").unwrap();
        assert!(matches!(store.load_all().await, Err(StoreError::Serde(_))));
    }
}
