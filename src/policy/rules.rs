//! セキュリティポリシールール
//!
//! ルールはポリシータイプごとの強く型付けされたタグ付き共用体。
//! 評価器は Allowed / Denied / Undecided のいずれかを返し、
//! 判断できないルールは Undecided として deny-by-default に委ねる。

use super::types::{Decision, TrustLevel, TrustSubject};
use chrono::{Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// ルール評価の結果
#[derive(Debug, Clone)]
pub struct RuleOutcome {
    /// 決定
    pub decision: Decision,
    /// 決定理由
    pub reason: String,
}

impl RuleOutcome {
    fn allowed(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Allowed,
            reason: reason.into(),
        }
    }

    fn denied(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Denied,
            reason: reason.into(),
        }
    }

    fn undecided(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Undecided,
            reason: reason.into(),
        }
    }
}

/// ポリシールール
///
/// 各バリアントが対象リソース集合と自身のパラメータを持つ。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PolicyRule {
    /// 許可リスト: 記載ユーザーを許可、それ以外は判断保留
    AllowList {
        /// 対象リソース
        resources: HashSet<String>,
        /// 許可ユーザー
        allowed_users: HashSet<String>,
    },
    /// 拒否リスト: 記載ユーザーを拒否、それ以外は判断保留
    DenyList {
        /// 対象リソース
        resources: HashSet<String>,
        /// 拒否ユーザー
        denied_users: HashSet<String>,
    },
    /// 属性ベース: トラストレベルとリスクスコアの下限・上限で判定
    AttributeBased {
        /// 対象リソース
        resources: HashSet<String>,
        /// 必要な最小トラストレベル
        min_trust_level: TrustLevel,
        /// 許容される最大リスクスコア
        max_risk_score: u8,
    },
    /// ロールベース: 外部ロールディレクトリ連携が前提のため常に判断保留
    RoleBased {
        /// 対象リソース
        resources: HashSet<String>,
        /// 必要ロール
        required_roles: HashSet<String>,
    },
    /// 時間ベース: 許可時間帯の外なら拒否（時間帯だけでは許可しない）
    TimeBased {
        /// 対象リソース
        resources: HashSet<String>,
        /// 許可開始時刻（UTC、時）
        start_hour: u32,
        /// 許可終了時刻（UTC、時、排他的）
        end_hour: u32,
    },
    /// 位置ベース: 許可位置の外なら拒否（位置だけでは許可しない）
    LocationBased {
        /// 対象リソース
        resources: HashSet<String>,
        /// 許可位置
        allowed_locations: HashSet<String>,
    },
}

impl PolicyRule {
    /// 対象リソース集合への参照
    pub fn resources(&self) -> &HashSet<String> {
        match self {
            PolicyRule::AllowList { resources, .. }
            | PolicyRule::DenyList { resources, .. }
            | PolicyRule::AttributeBased { resources, .. }
            | PolicyRule::RoleBased { resources, .. }
            | PolicyRule::TimeBased { resources, .. }
            | PolicyRule::LocationBased { resources, .. } => resources,
        }
    }

    /// リソースパターンにマッチするか判定
    ///
    /// 完全一致・`*`・末尾 `*` のプレフィックスマッチを受け付ける。
    pub fn matches_resource(&self, resource: &str) -> bool {
        self.resources().iter().any(|pattern| {
            if pattern == "*" {
                true
            } else if let Some(prefix) = pattern.strip_suffix('*') {
                resource.starts_with(prefix)
            } else {
                resource == pattern
            }
        })
    }

    /// ルールを評価
    pub fn evaluate(
        &self,
        subject: &TrustSubject,
        user_id: &str,
        context: &HashMap<String, String>,
    ) -> RuleOutcome {
        match self {
            PolicyRule::AllowList { allowed_users, .. } => {
                if allowed_users.contains(user_id) {
                    RuleOutcome::allowed(format!("user {} is on the allow list", user_id))
                } else {
                    RuleOutcome::undecided("user not on the allow list")
                }
            }
            PolicyRule::DenyList { denied_users, .. } => {
                if denied_users.contains(user_id) {
                    RuleOutcome::denied(format!("user {} is on the deny list", user_id))
                } else {
                    RuleOutcome::undecided("user not on the deny list")
                }
            }
            PolicyRule::AttributeBased {
                min_trust_level,
                max_risk_score,
                ..
            } => {
                if subject.trust_level < *min_trust_level {
                    RuleOutcome::denied(format!(
                        "trust level {} is below required {}",
                        subject.trust_level, min_trust_level
                    ))
                } else if subject.risk_score > *max_risk_score {
                    RuleOutcome::denied(format!(
                        "risk score {} exceeds maximum {}",
                        subject.risk_score, max_risk_score
                    ))
                } else {
                    RuleOutcome::allowed("trust level and risk score within policy bounds")
                }
            }
            PolicyRule::RoleBased { .. } => {
                // ロール解決は外部ディレクトリの責務
                RuleOutcome::undecided("role membership not resolved by this engine")
            }
            PolicyRule::TimeBased {
                start_hour,
                end_hour,
                ..
            } => {
                let hour = Utc::now().hour();
                let within = if start_hour <= end_hour {
                    hour >= *start_hour && hour < *end_hour
                } else {
                    // 日付をまたぐウィンドウ
                    hour >= *start_hour || hour < *end_hour
                };
                if within {
                    RuleOutcome::undecided("within permitted time window")
                } else {
                    RuleOutcome::denied(format!(
                        "access outside permitted time window {:02}:00-{:02}:00 UTC",
                        start_hour, end_hour
                    ))
                }
            }
            PolicyRule::LocationBased {
                allowed_locations, ..
            } => match context.get("location") {
                None => RuleOutcome::undecided("no location in request context"),
                Some(location) if allowed_locations.contains(location) => {
                    RuleOutcome::undecided("location is permitted")
                }
                Some(location) => RuleOutcome::denied(format!(
                    "location {} is not permitted for this resource",
                    location
                )),
            },
        }
    }
}

/// セキュリティポリシー
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityPolicy {
    /// ポリシーID
    pub id: String,
    /// ルール
    pub rule: PolicyRule,
    /// 優先度（大きいほど先に評価）
    pub priority: i32,
    /// 作成時刻
    pub created_at: chrono::DateTime<Utc>,
    /// 挿入順（同一優先度のタイブレーク）
    pub(crate) seq: u64,
}

impl SecurityPolicy {
    /// 新しいポリシーを作成
    pub fn new(id: impl Into<String>, rule: PolicyRule, priority: i32) -> Self {
        Self {
            id: id.into(),
            rule,
            priority,
            created_at: Utc::now(),
            seq: 0,
        }
    }
}
