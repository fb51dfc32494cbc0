//! 監視対象セッションの型定義

use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// セッションID
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// セッションステータス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    /// 有効
    Active,
    /// 失効済み（明示的な取り消し）
    Revoked,
    /// 期限切れ
    Expired,
}

/// リスク要因（追記専用ログの1エントリ）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskFactor {
    /// 説明
    pub description: String,
    /// 重大度（1-10）
    pub severity: u8,
    /// 記録時刻
    pub recorded_at: DateTime<Utc>,
}

/// 監視対象セッション
///
/// トラストスコアは対象の長期トラストレベルとは独立した 0-100 の
/// 実行時値で、セッション作成時に算出されアクセスのたびに変動する。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoredSession {
    /// セッションID
    pub id: SessionId,
    /// 対象ID
    pub subject_id: String,
    /// アクセストークン（不透明値）
    pub access_token: String,
    /// リフレッシュトークン（不透明値）
    pub refresh_token: String,
    /// 有効期限
    pub expires_at: DateTime<Utc>,
    /// ステータス
    pub status: SessionStatus,
    /// トラストスコア（0-100）
    pub trust_score: u8,
    /// デバイスフィンガープリント
    pub device_fingerprint: Option<String>,
    /// 地理的位置
    pub location: Option<String>,
    /// リスク要因ログ（時系列順）
    pub risk_factors: Vec<RiskFactor>,
    /// 作成時刻
    pub created_at: DateTime<Utc>,
    /// 最終アクセス時刻
    pub last_accessed: DateTime<Utc>,
}

/// トラストスコア更新時にリスク要因へ付与する既定の重大度
const LOW_SCORE_SEVERITY: u8 = 5;

impl MonitoredSession {
    /// 新しいセッションを作成
    ///
    /// 初期スコアは 60 を起点に、トークン長 > 100 で +10、IPあり +5、
    /// User-Agent あり +5、自動化シグネチャ（bot / crawler）で -20。
    pub fn new(
        subject_id: impl Into<String>,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: DateTime<Utc>,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> Self {
        let access_token = access_token.into();
        let trust_score = Self::initial_score(&access_token, ip_address, user_agent);
        let now = Utc::now();

        Self {
            id: SessionId::new(),
            subject_id: subject_id.into(),
            access_token,
            refresh_token: refresh_token.into(),
            expires_at,
            status: SessionStatus::Active,
            trust_score,
            device_fingerprint: None,
            location: None,
            risk_factors: Vec::new(),
            created_at: now,
            last_accessed: now,
        }
    }

    /// 初期トラストスコアを算出
    fn initial_score(
        access_token: &str,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> u8 {
        let mut score: i32 = 60;

        if access_token.len() > 100 {
            score += 10;
        }
        if ip_address.is_some() {
            score += 5;
        }
        if user_agent.is_some() {
            score += 5;
        }
        if let Some(agent) = user_agent {
            let lowered = agent.to_lowercase();
            if lowered.contains("bot") || lowered.contains("crawler") {
                score -= 20;
            }
        }

        score.clamp(0, 100) as u8
    }

    /// トラストスコアを更新
    ///
    /// 範囲外の値は拒否。50 未満への更新は理由を添えた
    /// リスク要因を追記する。
    pub fn update_trust_score(&mut self, new_score: u8, reason: &str) -> Result<()> {
        if new_score > 100 {
            return Err(Error::InvalidArgument(format!(
                "trust score must be in [0,100], got {}",
                new_score
            )));
        }

        self.trust_score = new_score;
        if new_score < 50 {
            self.risk_factors.push(RiskFactor {
                description: format!("low trust score {}: {}", new_score, reason),
                severity: LOW_SCORE_SEVERITY,
                recorded_at: Utc::now(),
            });
        }
        Ok(())
    }

    /// 疑わしい活動を記録
    ///
    /// リスク要因を追記し、スコアを min(5×severity, 現在値) だけ
    /// `update_trust_score` 経由で減算する。
    pub fn record_suspicious_activity(&mut self, activity: &str, severity: u8) -> Result<()> {
        if !(1..=10).contains(&severity) {
            return Err(Error::InvalidArgument(format!(
                "severity must be in [1,10], got {}",
                severity
            )));
        }

        self.risk_factors.push(RiskFactor {
            description: activity.to_string(),
            severity,
            recorded_at: Utc::now(),
        });

        let reduction = (5 * severity).min(self.trust_score);
        let new_score = self.trust_score - reduction;
        self.update_trust_score(new_score, activity)
    }

    /// 位置を更新
    ///
    /// 既知の位置からの変化は重大度3の疑わしい活動として扱う
    /// （既定では警戒のみで、ブロックはしない）。
    pub fn update_location(&mut self, new_location: impl Into<String>) -> Result<()> {
        let new_location = new_location.into();
        if let Some(previous) = self.location.clone() {
            if previous != new_location {
                self.record_suspicious_activity(
                    &format!("location changed from {} to {}", previous, new_location),
                    3,
                )?;
            }
        }
        self.location = Some(new_location);
        Ok(())
    }

    /// アクセスを記録
    pub fn record_access(&mut self) {
        self.last_accessed = Utc::now();
    }

    /// セッションが有効か
    pub fn is_valid(&self, min_score: u8) -> bool {
        self.status == SessionStatus::Active
            && self.expires_at > Utc::now()
            && self.trust_score >= min_score
    }

    /// 追加検証が必要か
    ///
    /// スコア低下・リスク要因の蓄積・長期生存のいずれかで真になる。
    pub fn needs_additional_verification(
        &self,
        step_up_threshold: u8,
        max_risk_factors: usize,
        max_age_days: i64,
    ) -> bool {
        self.trust_score < step_up_threshold
            || self.risk_factors.len() > max_risk_factors
            || Utc::now() - self.created_at > Duration::days(max_age_days)
    }

    /// セッションを失効させる（冪等）
    pub fn revoke(&mut self) {
        if self.status == SessionStatus::Active {
            self.status = SessionStatus::Revoked;
        }
    }

    /// セッションを期限切れにする（冪等）
    pub fn expire(&mut self) {
        if self.status == SessionStatus::Active {
            self.status = SessionStatus::Expired;
        }
    }
}
