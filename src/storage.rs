use crate::error::{Error, Result};
use crate::policy::types::TrustSubject;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// トラスト対象の永続化境界
///
/// `update` は読み込み時のバージョンを受け取り、失われた更新を
/// `Conflict` として検出する（楽観的並行性制御）。
#[async_trait]
pub trait TrustStore: Send + Sync + std::fmt::Debug {
    async fn create(&self, subject: TrustSubject) -> Result<TrustSubject>;
    async fn get(&self, id: &str) -> Result<Option<TrustSubject>>;
    async fn update(&self, subject: TrustSubject, expected_version: u64)
        -> Result<TrustSubject>;
    async fn list(&self) -> Result<Vec<TrustSubject>>;
}

#[derive(Debug)]
pub struct MemoryTrustStore {
    subjects: Arc<RwLock<HashMap<String, TrustSubject>>>,
}

impl MemoryTrustStore {
    pub fn new() -> Self {
        Self {
            subjects: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for MemoryTrustStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TrustStore for MemoryTrustStore {
    async fn create(&self, subject: TrustSubject) -> Result<TrustSubject> {
        let mut subjects = self.subjects.write().await;
        if subjects.contains_key(&subject.id) {
            return Err(Error::Conflict(format!(
                "subject {} already exists",
                subject.id
            )));
        }
        subjects.insert(subject.id.clone(), subject.clone());
        Ok(subject)
    }

    async fn get(&self, id: &str) -> Result<Option<TrustSubject>> {
        let subjects = self.subjects.read().await;
        Ok(subjects.get(id).cloned())
    }

    async fn update(
        &self,
        subject: TrustSubject,
        expected_version: u64,
    ) -> Result<TrustSubject> {
        let mut subjects = self.subjects.write().await;
        let current = subjects
            .get(&subject.id)
            .ok_or_else(|| Error::NotFound(format!("subject {}", subject.id)))?;

        // 読み込み時点のバージョンと一致しなければ更新は失われている
        if current.version != expected_version {
            return Err(Error::Conflict(format!(
                "subject {} was modified concurrently (expected version {}, found {})",
                subject.id, expected_version, current.version
            )));
        }

        subjects.insert(subject.id.clone(), subject.clone());
        Ok(subject)
    }

    async fn list(&self) -> Result<Vec<TrustSubject>> {
        let subjects = self.subjects.read().await;
        Ok(subjects.values().cloned().collect())
    }
}
