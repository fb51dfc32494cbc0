//! 行動プロファイル照合エンジン
//!
//! 対象ごとのプロファイルを保持し、登録・検証の操作を直列化します。

use super::profile::{BehavioralProfile, VerificationOutcome};
use super::sample::{KeystrokeEvent, MotionEvent, SampleOrigin};
use crate::config::BehaviorConfig;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// 行動プロファイル照合エンジン
///
/// プロファイルごとに個別のロックを持ち、同一対象への操作のみを
/// 直列化する。異なる対象への操作は並行に進む。
#[derive(Debug)]
pub struct BehaviorMatcher {
    /// 対象ID → プロファイル
    profiles: Arc<RwLock<HashMap<String, Arc<RwLock<BehavioralProfile>>>>>,
    /// 設定
    config: BehaviorConfig,
}

impl BehaviorMatcher {
    /// 新しい照合エンジンを作成
    pub fn new(config: BehaviorConfig) -> Self {
        Self {
            profiles: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// デフォルト設定で作成
    pub fn with_defaults() -> Self {
        Self::new(BehaviorConfig::default())
    }

    /// デバイス登録イベントからプロファイルを作成
    ///
    /// フィンガープリントは外部の本人確認が供給する。統計ベースラインは
    /// ここでは作られず、実際の操作サンプルからのみ構築される。
    pub async fn enroll_device(
        &self,
        subject_id: impl Into<String>,
        device_fingerprint: Option<String>,
    ) -> Result<()> {
        let subject_id = subject_id.into();
        let mut profiles = self.profiles.write().await;
        if profiles.contains_key(&subject_id) {
            return Err(Error::Conflict(format!(
                "behavioral profile for {} already exists",
                subject_id
            )));
        }
        info!(subject_id = %subject_id, "behavioral profile created");
        profiles.insert(
            subject_id.clone(),
            Arc::new(RwLock::new(BehavioralProfile::new(
                subject_id,
                device_fingerprint,
            ))),
        );
        Ok(())
    }

    /// プロファイル集約のハンドルを取得
    async fn handle(&self, subject_id: &str) -> Result<Arc<RwLock<BehavioralProfile>>> {
        let profiles = self.profiles.read().await;
        profiles
            .get(subject_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("behavioral profile {}", subject_id)))
    }

    /// プロファイルのスナップショットを取得
    pub async fn get_profile(&self, subject_id: &str) -> Result<BehavioralProfile> {
        let handle = self.handle(subject_id).await?;
        let profile = handle.read().await;
        Ok(profile.clone())
    }

    /// 登録セッションを開始
    pub async fn start_enrollment_session(&self, subject_id: &str) -> Result<()> {
        self.with_profile(subject_id, |profile| profile.start_enrollment_session())
            .await
    }

    /// キーストロークサンプルを記録
    pub async fn record_keystroke_sample(
        &self,
        subject_id: &str,
        events: &[KeystrokeEvent],
        origin: SampleOrigin,
    ) -> Result<()> {
        self.with_profile(subject_id, |profile| {
            profile.record_keystroke_sample(events, origin)
        })
        .await
    }

    /// モーションサンプルを記録
    pub async fn record_motion_sample(
        &self,
        subject_id: &str,
        events: &[MotionEvent],
        origin: SampleOrigin,
    ) -> Result<()> {
        self.with_profile(subject_id, |profile| {
            profile.record_motion_sample(events, origin)
        })
        .await
    }

    /// 登録セッションを完了し、ベースラインを再計算
    pub async fn complete_enrollment_session(&self, subject_id: &str) -> Result<()> {
        let result = self
            .with_profile(subject_id, |profile| profile.complete_enrollment_session())
            .await;
        if result.is_ok() {
            debug!(subject_id, "enrollment session completed");
        }
        result
    }

    /// 新しいサンプルをベースラインと照合
    pub async fn verify(
        &self,
        subject_id: &str,
        keystroke_sample: Option<&[KeystrokeEvent]>,
        motion_sample: Option<&[MotionEvent]>,
    ) -> Result<VerificationOutcome> {
        let config = self.config.clone();
        let outcome = self
            .with_profile(subject_id, |profile| {
                profile.verify(keystroke_sample, motion_sample, &config)
            })
            .await?;

        if outcome.is_match {
            debug!(subject_id, score = outcome.overall_score, "behavior verified");
        } else {
            warn!(
                subject_id,
                score = outcome.overall_score,
                "behavior verification mismatch"
            );
        }
        Ok(outcome)
    }

    /// プロファイルを一時停止
    pub async fn suspend_profile(&self, subject_id: &str) -> Result<()> {
        self.with_profile(subject_id, |profile| profile.suspend())
            .await
    }

    /// 一時停止中のプロファイルを復帰
    pub async fn reinstate_profile(&self, subject_id: &str) -> Result<()> {
        self.with_profile(subject_id, |profile| profile.reinstate())
            .await
    }

    /// プロファイルを無効化
    pub async fn disable_profile(&self, subject_id: &str) -> Result<()> {
        self.with_profile(subject_id, |profile| {
            profile.disable();
            Ok(())
        })
        .await
    }

    async fn with_profile<T>(
        &self,
        subject_id: &str,
        operate: impl FnOnce(&mut BehavioralProfile) -> Result<T>,
    ) -> Result<T> {
        let handle = self.handle(subject_id).await?;
        let mut profile = handle.write().await;
        operate(&mut profile)
    }
}
