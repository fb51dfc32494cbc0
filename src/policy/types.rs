//! トラスト対象の集約モデル
//!
//! ゼロトラストポリシーの適用単位（ユーザー・デバイス・サービス）と、
//! その信号履歴・アクセス履歴・監査イベントを保持します。

use super::rules::SecurityPolicy;
use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use uuid::Uuid;

/// トラストレベル（低い順）
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum TrustLevel {
    /// 低
    Low,
    /// 中
    Medium,
    /// 高
    High,
    /// クリティカル
    Critical,
}

impl fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrustLevel::Low => write!(f, "low"),
            TrustLevel::Medium => write!(f, "medium"),
            TrustLevel::High => write!(f, "high"),
            TrustLevel::Critical => write!(f, "critical"),
        }
    }
}

/// 対象タイプ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubjectType {
    /// ユーザー
    User,
    /// デバイス
    Device,
    /// サービス
    Service,
}

/// 対象ステータス
///
/// Active ⇄ Suspended → Inactive（終端）。Inactive からの復帰は
/// 監査継続性のため新しい対象レコードを作成する。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubjectStatus {
    /// 有効
    Active,
    /// 一時停止
    Suspended,
    /// 無効（終端）
    Inactive,
}

/// トラスト信号タイプ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalType {
    /// 認証成功
    AuthenticationSuccess,
    /// 認証失敗
    AuthenticationFailure,
    /// デバイスフィンガープリント
    DeviceFingerprint,
    /// 位置変更
    LocationChange,
    /// 行動パターン
    BehavioralPattern,
}

/// トラスト信号
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustSignal {
    /// 一意の識別子
    pub id: Uuid,
    /// 信号タイプ
    pub signal_type: SignalType,
    /// 信号値
    pub value: String,
    /// 確信度（0-100）
    pub confidence: u8,
    /// 信号源
    pub source: String,
    /// 記録時刻
    pub recorded_at: DateTime<Utc>,
}

/// セキュリティイベントタイプ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityEventType {
    /// アクセス許可
    AccessGranted,
    /// アクセス拒否
    AccessDenied,
    /// 疑わしい活動
    SuspiciousActivity,
    /// ポリシー変更
    PolicyUpdated,
    /// 隔離ゾーン割り当て
    ZoneAssigned,
    /// ステータス遷移
    StatusChanged,
}

/// イベント重要度
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    /// 低
    Low,
    /// 中
    Medium,
    /// 高
    High,
    /// クリティカル
    Critical,
}

impl fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventSeverity::Low => write!(f, "LOW"),
            EventSeverity::Medium => write!(f, "MEDIUM"),
            EventSeverity::High => write!(f, "HIGH"),
            EventSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// セキュリティイベント（追記専用監査ログの1エントリ）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    /// 一意の識別子
    pub id: Uuid,
    /// イベントタイプ
    pub event_type: SecurityEventType,
    /// イベントの説明
    pub description: String,
    /// 重要度
    pub severity: EventSeverity,
    /// 記録時刻
    pub recorded_at: DateTime<Utc>,
}

impl SecurityEvent {
    /// 新しいイベントを作成
    pub fn new(
        event_type: SecurityEventType,
        description: impl Into<String>,
        severity: EventSeverity,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            description: description.into(),
            severity,
            recorded_at: Utc::now(),
        }
    }
}

/// アクセス決定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    /// 許可
    Allowed,
    /// 拒否
    Denied,
    /// 判断保留
    Undecided,
    /// 追加承認が必要
    RequiresApproval,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Allowed => write!(f, "allowed"),
            Decision::Denied => write!(f, "denied"),
            Decision::Undecided => write!(f, "undecided"),
            Decision::RequiresApproval => write!(f, "requires_approval"),
        }
    }
}

/// アクセスリクエスト
///
/// 評価時に作成され、決定確定後は不変（追記専用履歴）。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRequest {
    /// リクエストID
    pub id: Uuid,
    /// 対象ID
    pub subject_id: String,
    /// ユーザーID
    pub user_id: String,
    /// リソース
    pub resource: String,
    /// アクション
    pub action: String,
    /// コンテキスト属性
    pub context: HashMap<String, String>,
    /// リクエスト時刻
    pub requested_at: DateTime<Utc>,
    /// 決定（評価前はNone）
    pub decision: Option<Decision>,
    /// 決定理由
    pub decision_reason: Option<String>,
    /// 評価時刻
    pub evaluated_at: Option<DateTime<Utc>>,
}

impl AccessRequest {
    /// 新しいアクセスリクエストを作成
    pub fn new(
        subject_id: impl Into<String>,
        user_id: impl Into<String>,
        resource: impl Into<String>,
        action: impl Into<String>,
        context: HashMap<String, String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject_id: subject_id.into(),
            user_id: user_id.into(),
            resource: resource.into(),
            action: action.into(),
            context,
            requested_at: Utc::now(),
            decision: None,
            decision_reason: None,
            evaluated_at: None,
        }
    }

    /// 決定を確定
    pub fn decide(&mut self, decision: Decision, reason: impl Into<String>) {
        self.decision = Some(decision);
        self.decision_reason = Some(reason.into());
        self.evaluated_at = Some(Utc::now());
    }
}

/// 隔離ゾーン
///
/// 下流のネットワーク制御が消費するタグ。このエンジン自体は
/// ゾーンによるアクセス制御を行わない。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationZone {
    /// ゾーン名
    pub name: String,
    /// セキュリティレベル
    pub security_level: u8,
    /// ネットワークセグメント
    pub network_segment: String,
    /// 割り当て時刻
    pub assigned_at: DateTime<Utc>,
}

/// トラスト対象の集約
///
/// トラストレベルは信号・リスクスコアから導出されるキャッシュ値で、
/// 信号またはリスクスコアを変更するすべての操作が再導出を行う。
/// 信号由来（確信度平均）とリスクスコア由来（逆向き閾値）の2経路が存在し、
/// 後から実行された評価が優先される（last assessment wins）。
/// `version` は永続化境界での楽観的並行性トークン。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustSubject {
    /// 対象ID
    pub id: String,
    /// 対象タイプ
    pub subject_type: SubjectType,
    /// トラストレベル（導出値）
    pub trust_level: TrustLevel,
    /// リスクスコア（0-100）
    pub risk_score: u8,
    /// ステータス
    pub status: SubjectStatus,
    /// 割り当て済み隔離ゾーン
    pub isolation_zone: Option<IsolationZone>,
    /// 作成時刻
    pub created_at: DateTime<Utc>,
    /// 最終評価時刻
    pub last_assessment: DateTime<Utc>,
    /// セキュリティポリシー（優先度順に評価）
    pub policies: Vec<SecurityPolicy>,
    /// トラスト信号（ホットウィンドウ）
    pub signals: VecDeque<TrustSignal>,
    /// アクセスリクエスト履歴（ホットウィンドウ）
    pub access_requests: VecDeque<AccessRequest>,
    /// セキュリティイベント（ホットウィンドウ）
    pub events: VecDeque<SecurityEvent>,
    /// 楽観的並行性トークン
    pub version: u64,
    /// ポリシー挿入順カウンタ
    policy_seq: u64,
}

impl TrustSubject {
    /// 新しいトラスト対象を作成
    ///
    /// 初期値はリスクスコア50・トラストレベルMedium（閾値写像で整合する組）。
    pub fn new(id: impl Into<String>, subject_type: SubjectType) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            subject_type,
            trust_level: TrustLevel::Medium,
            risk_score: 50,
            status: SubjectStatus::Active,
            isolation_zone: None,
            created_at: now,
            last_assessment: now,
            policies: Vec::new(),
            signals: VecDeque::new(),
            access_requests: VecDeque::new(),
            events: VecDeque::new(),
            version: 0,
            policy_seq: 0,
        }
    }

    /// ポリシーを追加（既存ポリシーは置き換えない）
    pub fn add_policy(&mut self, mut policy: SecurityPolicy) {
        policy.seq = self.policy_seq;
        self.policy_seq += 1;
        self.policies.push(policy);
        self.version += 1;
    }

    /// リソースに適用されるポリシーを優先度降順で返す
    ///
    /// 同一優先度は挿入順（先に追加されたものが先）で安定。
    pub fn applicable_policies(&self, resource: &str) -> Vec<&SecurityPolicy> {
        let mut applicable: Vec<&SecurityPolicy> = self
            .policies
            .iter()
            .filter(|p| p.rule.matches_resource(resource))
            .collect();
        applicable.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
        applicable
    }

    /// トラスト信号を記録し、トラストレベルを再導出
    ///
    /// 直近 `window_days` 日の信号の確信度平均で写像する:
    /// >80 → High, >60 → Medium, それ以外 → Low。
    /// ウィンドウ外の信号は計算から除外されるだけで削除はされない
    /// （ホットウィンドウの上限超過分は永続層に委ねて切り詰める）。
    pub fn record_signal(
        &mut self,
        signal: TrustSignal,
        window_days: i64,
        max_hot_entries: usize,
    ) -> Result<()> {
        if signal.confidence > 100 {
            return Err(Error::InvalidArgument(format!(
                "signal confidence must be in [0,100], got {}",
                signal.confidence
            )));
        }

        self.signals.push_back(signal);
        while self.signals.len() > max_hot_entries {
            self.signals.pop_front();
        }

        let cutoff = Utc::now() - Duration::days(window_days);
        let recent: Vec<&TrustSignal> = self
            .signals
            .iter()
            .filter(|s| s.recorded_at >= cutoff)
            .collect();

        if !recent.is_empty() {
            let avg = recent.iter().map(|s| s.confidence as f64).sum::<f64>()
                / recent.len() as f64;
            self.trust_level = if avg > 80.0 {
                TrustLevel::High
            } else if avg > 60.0 {
                TrustLevel::Medium
            } else {
                TrustLevel::Low
            };
        }

        self.last_assessment = Utc::now();
        self.version += 1;
        Ok(())
    }

    /// リスクスコアを更新し、トラストレベルを再導出
    ///
    /// 写像は信号経路の逆向き: >70 → Low, >30 → Medium, それ以外 → High。
    /// 範囲外の値はクランプせず拒否する。
    pub fn apply_risk_score(&mut self, score: u8) -> Result<()> {
        if score > 100 {
            return Err(Error::InvalidArgument(format!(
                "risk score must be in [0,100], got {}",
                score
            )));
        }

        self.risk_score = score;
        self.trust_level = if score > 70 {
            TrustLevel::Low
        } else if score > 30 {
            TrustLevel::Medium
        } else {
            TrustLevel::High
        };
        self.last_assessment = Utc::now();
        self.version += 1;
        Ok(())
    }

    /// イベントを追記（重要度による副作用なし）
    pub fn push_event(&mut self, event: SecurityEvent, max_hot_entries: usize) {
        self.events.push_back(event);
        while self.events.len() > max_hot_entries {
            self.events.pop_front();
        }
        self.version += 1;
    }

    /// セキュリティイベントを記録し、重要度に応じてトラストレベルを調整
    ///
    /// Critical はトラストレベルを Low に強制、High は1段階降格
    /// （Low より下には下がらない）。
    pub fn apply_security_event(&mut self, event: SecurityEvent, max_hot_entries: usize) {
        match event.severity {
            EventSeverity::Critical => {
                self.trust_level = TrustLevel::Low;
                self.last_assessment = Utc::now();
            }
            EventSeverity::High => {
                self.trust_level = match self.trust_level {
                    TrustLevel::Critical => TrustLevel::High,
                    TrustLevel::High => TrustLevel::Medium,
                    _ => TrustLevel::Low,
                };
                self.last_assessment = Utc::now();
            }
            _ => {}
        }
        self.push_event(event, max_hot_entries);
    }

    /// アクセスリクエストを履歴に追記
    pub fn record_access_request(&mut self, request: AccessRequest, max_hot_entries: usize) {
        self.access_requests.push_back(request);
        while self.access_requests.len() > max_hot_entries {
            self.access_requests.pop_front();
        }
        self.version += 1;
    }

    /// 直近ウィンドウ内の拒否決定数
    pub fn recent_denials(&self, window: Duration) -> usize {
        let cutoff = Utc::now() - window;
        self.access_requests
            .iter()
            .filter(|r| {
                r.decision == Some(Decision::Denied)
                    && r.evaluated_at.map(|t| t >= cutoff).unwrap_or(false)
            })
            .count()
    }

    /// 一時停止（Active からのみ）
    pub fn suspend(&mut self) -> Result<()> {
        match self.status {
            SubjectStatus::Active => {
                self.status = SubjectStatus::Suspended;
                self.version += 1;
                Ok(())
            }
            other => Err(Error::InvalidState(format!(
                "cannot suspend subject {} in status {:?}",
                self.id, other
            ))),
        }
    }

    /// 再有効化（Suspended からのみ）
    pub fn reactivate(&mut self) -> Result<()> {
        match self.status {
            SubjectStatus::Suspended => {
                self.status = SubjectStatus::Active;
                self.version += 1;
                Ok(())
            }
            other => Err(Error::InvalidState(format!(
                "cannot reactivate subject {} in status {:?}",
                self.id, other
            ))),
        }
    }

    /// 無効化（終端遷移、監査証跡は保持される）
    pub fn deactivate(&mut self) -> Result<()> {
        match self.status {
            SubjectStatus::Inactive => Err(Error::InvalidState(format!(
                "subject {} is already inactive",
                self.id
            ))),
            _ => {
                self.status = SubjectStatus::Inactive;
                self.version += 1;
                Ok(())
            }
        }
    }
}
