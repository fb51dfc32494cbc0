//! ポリシー決定ポイント
//!
//! "決して信頼せず、常に検証する" 原則に基づいた
//! アクセス決定とトラストレベル管理
//!
//! - 優先度順・短絡評価・deny-by-default のポリシー評価
//! - トラスト信号とリスクスコアからのトラストレベル導出（2経路、後勝ち）
//! - 追記専用のアクセス履歴・セキュリティイベント監査証跡
//! - 拒否回数からトラストレベルへのフィードバックループ

pub mod pdp;
pub mod rules;
pub mod types;

pub use pdp::{AccessDecision, PolicyDecisionPoint};
pub use rules::{PolicyRule, RuleOutcome, SecurityPolicy};
pub use types::{
    AccessRequest, Decision, EventSeverity, IsolationZone, SecurityEvent, SecurityEventType,
    SignalType, SubjectStatus, SubjectType, TrustLevel, TrustSignal, TrustSubject,
};
