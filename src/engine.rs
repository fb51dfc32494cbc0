//! 適応型トラストエンジン
//!
//! 3つのコンポーネント（行動プロファイル照合・セッショントラスト監視・
//! ポリシー決定ポイント）を束ね、外部向けAPI面を提供します。
//! 検証結果・疑わしい活動は対象へ還流し、決定の閉ループを構成します。
//!
//! ## 使用例
//!
//! ```rust,no_run
//! use trustgate_rs::config::EngineConfig;
//! use trustgate_rs::engine::AdaptiveTrustEngine;
//! use trustgate_rs::policy::{Decision, PolicyRule};
//! use std::collections::{HashMap, HashSet};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = AdaptiveTrustEngine::new(EngineConfig::default());
//!
//! let mut resources = HashSet::new();
//! resources.insert("/api/data".to_string());
//! let mut allowed_users = HashSet::new();
//! allowed_users.insert("alice".to_string());
//!
//! engine
//!     .add_policy("device-7", "allow-readers", PolicyRule::AllowList { resources, allowed_users }, 10)
//!     .await?;
//!
//! let decision = engine
//!     .evaluate_access_request("device-7", "alice", "/api/data", "read", HashMap::new())
//!     .await?;
//! assert_eq!(decision.decision, Decision::Allowed);
//! # Ok(())
//! # }
//! ```

use crate::behavior::{BehaviorMatcher, KeystrokeEvent, MotionEvent, SampleOrigin, VerificationOutcome};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::policy::{
    AccessDecision, Decision, EventSeverity, PolicyDecisionPoint, PolicyRule, SecurityEventType,
    SignalType,
};
use crate::session::{MonitoredSession, SessionId, SessionTrustMonitor};
use crate::storage::{MemoryTrustStore, TrustStore};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// 適応型トラストエンジン
#[derive(Debug)]
pub struct AdaptiveTrustEngine {
    pdp: PolicyDecisionPoint,
    sessions: SessionTrustMonitor,
    behavior: BehaviorMatcher,
}

impl AdaptiveTrustEngine {
    /// インメモリストアでエンジンを構築
    pub fn new(config: EngineConfig) -> Self {
        Self::with_store(Arc::new(MemoryTrustStore::new()), config)
    }

    /// 永続化境界を指定してエンジンを構築
    pub fn with_store(store: Arc<dyn TrustStore>, config: EngineConfig) -> Self {
        Self {
            pdp: PolicyDecisionPoint::new(store, config.policy),
            sessions: SessionTrustMonitor::new(config.session),
            behavior: BehaviorMatcher::new(config.behavior),
        }
    }

    /// ポリシー決定ポイントへの参照
    pub fn policy(&self) -> &PolicyDecisionPoint {
        &self.pdp
    }

    /// セッション監視への参照
    pub fn sessions(&self) -> &SessionTrustMonitor {
        &self.sessions
    }

    /// 行動照合エンジンへの参照
    pub fn behavior(&self) -> &BehaviorMatcher {
        &self.behavior
    }

    /// ポリシーを追加
    pub async fn add_policy(
        &self,
        subject_id: &str,
        policy_id: impl Into<String>,
        rule: PolicyRule,
        priority: i32,
    ) -> Result<()> {
        self.pdp.add_policy(subject_id, policy_id, rule, priority).await
    }

    /// アクセスリクエストを評価
    pub async fn evaluate_access_request(
        &self,
        subject_id: &str,
        user_id: &str,
        resource: &str,
        action: &str,
        context: HashMap<String, String>,
    ) -> Result<AccessDecision> {
        self.pdp
            .evaluate_access_request(subject_id, user_id, resource, action, context)
            .await
    }

    /// セッションを通じたアクセスリクエストを評価
    ///
    /// 無効なセッションはポリシー評価に進まず拒否（フェイルクローズ）。
    /// ポリシーが許可しても、セッションが追加検証を必要とする場合は
    /// `RequiresApproval` へ格上げされる（ステップアップ認証）。
    pub async fn evaluate_session_request(
        &self,
        session_id: &SessionId,
        user_id: &str,
        resource: &str,
        action: &str,
        context: HashMap<String, String>,
    ) -> Result<AccessDecision> {
        let session = self.sessions.get_session(session_id).await?;

        if !self.sessions.is_valid(session_id).await? {
            warn!(session_id = %session_id, "access attempted on invalid session");
            self.pdp
                .record_security_event(
                    &session.subject_id,
                    SecurityEventType::AccessDenied,
                    format!("invalid session {} attempted {} on {}", session_id, action, resource),
                    EventSeverity::Medium,
                )
                .await?;
            return Ok(AccessDecision {
                request_id: Uuid::new_v4(),
                decision: Decision::Denied,
                reason: "session is not valid".to_string(),
                evaluated_at: Utc::now(),
            });
        }

        self.sessions.record_access(session_id).await?;
        let decision = self
            .pdp
            .evaluate_access_request(&session.subject_id, user_id, resource, action, context)
            .await?;

        if decision.decision == Decision::Allowed
            && self.sessions.needs_additional_verification(session_id).await?
        {
            info!(session_id = %session_id, "allowed decision upgraded to step-up verification");
            return Ok(AccessDecision {
                decision: Decision::RequiresApproval,
                reason: format!("{}; session requires additional verification", decision.reason),
                ..decision
            });
        }
        Ok(decision)
    }

    /// トラスト信号を記録
    pub async fn record_trust_signal(
        &self,
        subject_id: &str,
        signal_type: SignalType,
        value: impl Into<String>,
        confidence: u8,
        source: impl Into<String>,
    ) -> Result<()> {
        self.pdp
            .record_trust_signal(subject_id, signal_type, value, confidence, source)
            .await
    }

    /// リスクスコアを更新
    pub async fn update_risk_score(&self, subject_id: &str, score: u8, reason: &str) -> Result<()> {
        self.pdp.update_risk_score(subject_id, score, reason).await
    }

    /// セッションを作成
    pub async fn create_session(
        &self,
        subject_id: &str,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: DateTime<Utc>,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<MonitoredSession> {
        self.sessions
            .create_session(
                subject_id,
                access_token,
                refresh_token,
                expires_at,
                ip_address,
                user_agent,
            )
            .await
    }

    /// セッションのトラストスコアを更新
    pub async fn update_session_trust_score(
        &self,
        session_id: &SessionId,
        score: u8,
        reason: &str,
    ) -> Result<()> {
        self.sessions.update_trust_score(session_id, score, reason).await
    }

    /// 疑わしい活動を記録
    ///
    /// セッションのスコアを減算した上で、所有対象のセキュリティイベント
    /// として還流させる（重大度 1-10 → Low/Medium/High/Critical）。
    pub async fn record_suspicious_activity(
        &self,
        session_id: &SessionId,
        activity: &str,
        severity: u8,
    ) -> Result<()> {
        let session = self.sessions.get_session(session_id).await?;
        self.sessions
            .record_suspicious_activity(session_id, activity, severity)
            .await?;

        self.pdp
            .record_security_event(
                &session.subject_id,
                SecurityEventType::SuspiciousActivity,
                format!("session {}: {}", session_id, activity),
                Self::map_severity(severity),
            )
            .await
    }

    /// セッションの位置を更新
    pub async fn update_session_location(
        &self,
        session_id: &SessionId,
        location: &str,
    ) -> Result<()> {
        self.sessions.update_location(session_id, location).await
    }

    /// セッションを失効させる
    pub async fn revoke_session(&self, session_id: &SessionId) -> Result<()> {
        self.sessions.revoke(session_id).await
    }

    /// デバイス登録イベントから行動プロファイルを作成
    pub async fn enroll_device(
        &self,
        subject_id: &str,
        device_fingerprint: Option<String>,
    ) -> Result<()> {
        self.behavior.enroll_device(subject_id, device_fingerprint).await
    }

    /// 行動登録セッションを開始
    pub async fn start_enrollment_session(&self, subject_id: &str) -> Result<()> {
        self.behavior.start_enrollment_session(subject_id).await
    }

    /// キーストロークサンプルを記録
    pub async fn record_keystroke_sample(
        &self,
        subject_id: &str,
        events: &[KeystrokeEvent],
        origin: SampleOrigin,
    ) -> Result<()> {
        self.behavior
            .record_keystroke_sample(subject_id, events, origin)
            .await
    }

    /// モーションサンプルを記録
    pub async fn record_motion_sample(
        &self,
        subject_id: &str,
        events: &[MotionEvent],
        origin: SampleOrigin,
    ) -> Result<()> {
        self.behavior
            .record_motion_sample(subject_id, events, origin)
            .await
    }

    /// 行動登録セッションを完了
    pub async fn complete_enrollment_session(&self, subject_id: &str) -> Result<()> {
        self.behavior.complete_enrollment_session(subject_id).await
    }

    /// 行動サンプルをベースラインと照合
    ///
    /// 結果は行動パターン信号として対象へ還流し、トラストレベルの
    /// 再導出に寄与する。
    pub async fn verify_behavior(
        &self,
        subject_id: &str,
        keystroke_sample: Option<&[KeystrokeEvent]>,
        motion_sample: Option<&[MotionEvent]>,
    ) -> Result<VerificationOutcome> {
        let outcome = self
            .behavior
            .verify(subject_id, keystroke_sample, motion_sample)
            .await?;

        let confidence = outcome.overall_score.round().clamp(0.0, 100.0) as u8;
        self.pdp
            .record_trust_signal(
                subject_id,
                SignalType::BehavioralPattern,
                format!("verification score {:.1}", outcome.overall_score),
                confidence,
                "behavior-matcher",
            )
            .await?;

        Ok(outcome)
    }

    /// 対象を一時停止
    pub async fn suspend_subject(&self, subject_id: &str) -> Result<()> {
        self.pdp.suspend_subject(subject_id).await
    }

    /// 一時停止中の対象を再有効化
    pub async fn reactivate_subject(&self, subject_id: &str) -> Result<()> {
        self.pdp.reactivate_subject(subject_id).await
    }

    /// 対象を無効化し、その全セッションを失効させる
    pub async fn deactivate_subject(&self, subject_id: &str) -> Result<()> {
        self.pdp.deactivate_subject(subject_id).await?;
        self.sessions.revoke_for_subject(subject_id).await;
        Ok(())
    }

    fn map_severity(severity: u8) -> EventSeverity {
        match severity {
            0..=3 => EventSeverity::Low,
            4..=6 => EventSeverity::Medium,
            7..=8 => EventSeverity::High,
            _ => EventSeverity::Critical,
        }
    }
}
