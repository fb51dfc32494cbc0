//! セッショントラスト監視
//!
//! 認証済みセッションごとのリアルタイムな信頼度を追跡します。
//! スコアは対象の長期トラストレベルから独立しており、
//! 接続メタデータと行動信号で増減します。

use super::types::{MonitoredSession, SessionId, SessionStatus};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// セッショントラスト監視エンジン
///
/// 集約ごとに個別のロックを持ち、同一セッションへの操作のみを
/// 直列化する。異なるセッションへの操作は並行に進む。
#[derive(Debug)]
pub struct SessionTrustMonitor {
    /// アクティブセッション
    sessions: Arc<RwLock<HashMap<SessionId, Arc<RwLock<MonitoredSession>>>>>,
    /// 設定
    config: SessionConfig,
}

impl SessionTrustMonitor {
    /// 新しい監視エンジンを作成
    pub fn new(config: SessionConfig) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// デフォルト設定で作成
    pub fn with_defaults() -> Self {
        Self::new(SessionConfig::default())
    }

    /// セッションを作成し、算出された初期スコアで監視を開始
    pub async fn create_session(
        &self,
        subject_id: impl Into<String>,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: DateTime<Utc>,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<MonitoredSession> {
        let session = MonitoredSession::new(
            subject_id,
            access_token,
            refresh_token,
            expires_at,
            ip_address,
            user_agent,
        );
        info!(
            session_id = %session.id,
            subject_id = %session.subject_id,
            initial_score = session.trust_score,
            "session created"
        );

        let mut sessions = self.sessions.write().await;
        sessions.insert(session.id.clone(), Arc::new(RwLock::new(session.clone())));
        Ok(session)
    }

    /// セッション集約のハンドルを取得
    ///
    /// マップのロックは取得後すぐ手放すため、同一セッションへの
    /// 操作だけが集約ロックで直列化される。
    async fn handle(&self, session_id: &SessionId) -> Result<Arc<RwLock<MonitoredSession>>> {
        let sessions = self.sessions.read().await;
        sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("session {}", session_id)))
    }

    /// セッションのスナップショットを取得
    pub async fn get_session(&self, session_id: &SessionId) -> Result<MonitoredSession> {
        let handle = self.handle(session_id).await?;
        let session = handle.read().await;
        Ok(session.clone())
    }

    /// トラストスコアを更新
    pub async fn update_trust_score(
        &self,
        session_id: &SessionId,
        new_score: u8,
        reason: &str,
    ) -> Result<()> {
        let handle = self.handle(session_id).await?;
        let mut session = handle.write().await;
        session.update_trust_score(new_score, reason)?;
        debug!(session_id = %session_id, new_score, reason, "trust score updated");
        Ok(())
    }

    /// 疑わしい活動を記録し、スコアを減算
    pub async fn record_suspicious_activity(
        &self,
        session_id: &SessionId,
        activity: &str,
        severity: u8,
    ) -> Result<u8> {
        let handle = self.handle(session_id).await?;
        let mut session = handle.write().await;
        session.record_suspicious_activity(activity, severity)?;
        warn!(
            session_id = %session_id,
            activity,
            severity,
            score = session.trust_score,
            "suspicious activity recorded"
        );
        Ok(session.trust_score)
    }

    /// 位置を更新（位置の変化は軽度の疑わしい活動として扱う）
    pub async fn update_location(
        &self,
        session_id: &SessionId,
        new_location: &str,
    ) -> Result<()> {
        let handle = self.handle(session_id).await?;
        let mut session = handle.write().await;
        session.update_location(new_location)
    }

    /// アクセスを記録（最終アクセス時刻の更新）
    pub async fn record_access(&self, session_id: &SessionId) -> Result<()> {
        let handle = self.handle(session_id).await?;
        let mut session = handle.write().await;
        session.record_access();
        Ok(())
    }

    /// セッションが有効か
    pub async fn is_valid(&self, session_id: &SessionId) -> Result<bool> {
        let handle = self.handle(session_id).await?;
        let session = handle.read().await;
        Ok(session.is_valid(self.config.min_valid_score))
    }

    /// 追加検証が必要か
    pub async fn needs_additional_verification(&self, session_id: &SessionId) -> Result<bool> {
        let handle = self.handle(session_id).await?;
        let session = handle.read().await;
        Ok(session.needs_additional_verification(
            self.config.step_up_threshold,
            self.config.max_risk_factors,
            self.config.max_session_age_days,
        ))
    }

    /// セッションを失効させる（冪等）
    pub async fn revoke(&self, session_id: &SessionId) -> Result<()> {
        let handle = self.handle(session_id).await?;
        let mut session = handle.write().await;
        session.revoke();
        info!(session_id = %session_id, "session revoked");
        Ok(())
    }

    /// セッションを期限切れにする（冪等）
    pub async fn expire(&self, session_id: &SessionId) -> Result<()> {
        let handle = self.handle(session_id).await?;
        let mut session = handle.write().await;
        session.expire();
        Ok(())
    }

    /// 対象に紐づく全セッションを失効させ、失効数を返す
    ///
    /// 対象の無効化に追随するためのもの。
    pub async fn revoke_for_subject(&self, subject_id: &str) -> usize {
        let handles: Vec<Arc<RwLock<MonitoredSession>>> = {
            let sessions = self.sessions.read().await;
            sessions.values().cloned().collect()
        };

        let mut revoked = 0;
        for handle in handles {
            let mut session = handle.write().await;
            if session.subject_id == subject_id && session.status == SessionStatus::Active {
                session.revoke();
                revoked += 1;
            }
        }
        if revoked > 0 {
            info!(subject_id, revoked, "sessions revoked for subject");
        }
        revoked
    }

    /// 期限の切れた Active セッションを Expired へ遷移させ、件数を返す
    pub async fn cleanup_expired_sessions(&self) -> usize {
        let now = Utc::now();
        let handles: Vec<Arc<RwLock<MonitoredSession>>> = {
            let sessions = self.sessions.read().await;
            sessions.values().cloned().collect()
        };

        let mut expired = 0;
        for handle in handles {
            let mut session = handle.write().await;
            if session.status == SessionStatus::Active && session.expires_at <= now {
                session.expire();
                expired += 1;
            }
        }
        expired
    }
}
