//! ポリシー決定ポイント
//!
//! リソース/アクション要求に対する権威あるゲート。優先度順の
//! ポリシー評価と対象の現在のトラストレベル・リスクスコアを組み合わせ、
//! 決定と監査証跡を永続化してから呼び出し元へ返す。

use super::rules::{PolicyRule, SecurityPolicy};
use super::types::{
    AccessRequest, Decision, EventSeverity, SecurityEvent, SecurityEventType, SignalType,
    SubjectStatus, SubjectType, TrustLevel, TrustSignal, TrustSubject,
};
use crate::config::PolicyConfig;
use crate::error::{Error, Result};
use crate::storage::{MemoryTrustStore, TrustStore};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 評価の結果として呼び出し元へ返す決定
#[derive(Debug, Clone)]
pub struct AccessDecision {
    /// リクエストID
    pub request_id: Uuid,
    /// 決定
    pub decision: Decision,
    /// 決定理由
    pub reason: String,
    /// 評価時刻
    pub evaluated_at: DateTime<Utc>,
}

/// ポリシー決定ポイント
///
/// すべての変更は 読み込み → 変更 → バージョン検査付き保存 で行われ、
/// 同一対象への並行書き込みは `Conflict` として検出される。
/// 決定と監査イベントは呼び出し元へ返す前に永続化される。
#[derive(Debug)]
pub struct PolicyDecisionPoint {
    store: Arc<dyn TrustStore>,
    config: PolicyConfig,
}

impl PolicyDecisionPoint {
    /// ストアと設定を指定して作成
    pub fn new(store: Arc<dyn TrustStore>, config: PolicyConfig) -> Self {
        Self { store, config }
    }

    /// インメモリストアとデフォルト設定で作成
    pub fn with_defaults() -> Self {
        Self::new(Arc::new(MemoryTrustStore::new()), PolicyConfig::default())
    }

    /// 対象を登録
    pub async fn register_subject(
        &self,
        subject_id: impl Into<String>,
        subject_type: SubjectType,
    ) -> Result<TrustSubject> {
        let subject = TrustSubject::new(subject_id, subject_type);
        info!(subject_id = %subject.id, ?subject_type, "registering trust subject");
        self.store.create(subject).await
    }

    /// 対象のスナップショットを取得
    pub async fn get_subject(&self, subject_id: &str) -> Result<TrustSubject> {
        self.store
            .get(subject_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("subject {}", subject_id)))
    }

    /// 対象を読み込み、なければゲーティング開始時点として作成
    async fn ensure_subject(&self, subject_id: &str) -> Result<(TrustSubject, u64)> {
        if let Some(subject) = self.store.get(subject_id).await? {
            let version = subject.version;
            return Ok((subject, version));
        }
        let created = self
            .store
            .create(TrustSubject::new(subject_id, SubjectType::User))
            .await?;
        let version = created.version;
        Ok((created, version))
    }

    /// ポリシーを追加（既存ポリシーの置き換えは行わない）
    pub async fn add_policy(
        &self,
        subject_id: &str,
        policy_id: impl Into<String>,
        rule: PolicyRule,
        priority: i32,
    ) -> Result<()> {
        let (mut subject, loaded) = self.ensure_subject(subject_id).await?;
        let policy = SecurityPolicy::new(policy_id, rule, priority);
        let description = format!("policy {} added with priority {}", policy.id, priority);
        subject.add_policy(policy);
        subject.push_event(
            SecurityEvent::new(
                SecurityEventType::PolicyUpdated,
                description,
                EventSeverity::Low,
            ),
            self.config.max_hot_entries,
        );
        self.store.update(subject, loaded).await?;
        Ok(())
    }

    /// アクセスリクエストを評価
    ///
    /// 適用ポリシーを優先度降順（同値は挿入順）で評価し、最初の
    /// Undecided 以外の結果を採用する。適用集合が空、または全件
    /// Undecided の場合の既定決定は拒否（deny-by-default）。
    /// 決定・監査イベントの永続化後にのみ結果を返す。
    pub async fn evaluate_access_request(
        &self,
        subject_id: &str,
        user_id: &str,
        resource: &str,
        action: &str,
        context: HashMap<String, String>,
    ) -> Result<AccessDecision> {
        let (mut subject, loaded) = self.ensure_subject(subject_id).await?;
        let mut request = AccessRequest::new(subject_id, user_id, resource, action, context);

        // 非Activeの対象は記録の上で即拒否（フェイルクローズ）
        if subject.status != SubjectStatus::Active {
            let reason = match subject.status {
                SubjectStatus::Suspended => "subject is suspended",
                _ => "subject is inactive",
            };
            request.decide(Decision::Denied, reason);
            let decision = Self::decision_of(&request);
            subject.push_event(
                SecurityEvent::new(
                    SecurityEventType::AccessDenied,
                    format!("{} denied {} on {}: {}", user_id, action, resource, reason),
                    EventSeverity::Medium,
                ),
                self.config.max_hot_entries,
            );
            subject.record_access_request(request, self.config.max_hot_entries);
            self.store.update(subject, loaded).await?;
            return Ok(decision);
        }

        // 適用ポリシーを順に評価、最初の非Undecidedで短絡
        let verdict = {
            let applicable = subject.applicable_policies(resource);
            debug!(
                subject_id,
                resource,
                applicable = applicable.len(),
                "evaluating access request"
            );
            let mut verdict = None;
            for policy in applicable {
                let outcome = policy.rule.evaluate(&subject, user_id, &request.context);
                if outcome.decision != Decision::Undecided {
                    verdict = Some((policy.id.clone(), outcome));
                    break;
                }
            }
            verdict
        };

        let (decision, reason) = match verdict {
            Some((policy_id, outcome)) => (
                outcome.decision,
                format!("policy {}: {}", policy_id, outcome.reason),
            ),
            None => (
                Decision::Denied,
                "no applicable policy produced a decision".to_string(),
            ),
        };
        request.decide(decision, reason);

        let (event_type, severity) = if decision == Decision::Allowed {
            (SecurityEventType::AccessGranted, EventSeverity::Low)
        } else {
            (SecurityEventType::AccessDenied, EventSeverity::Medium)
        };
        subject.push_event(
            SecurityEvent::new(
                event_type,
                format!("{} {} {} on {}", user_id, decision, action, resource),
                severity,
            ),
            self.config.max_hot_entries,
        );

        let result = Self::decision_of(&request);
        subject.record_access_request(request, self.config.max_hot_entries);

        // 拒否のフィードバックループ: ウィンドウ内の拒否数が閾値に
        // 達した瞬間のみトラストレベルを強制降格する（超過時は再発火しない）
        if decision == Decision::Denied {
            let denials =
                subject.recent_denials(Duration::minutes(self.config.denial_window_minutes));
            if denials == self.config.denial_threshold {
                warn!(
                    subject_id,
                    denials, "denial threshold reached, forcing trust level to low"
                );
                subject.trust_level = TrustLevel::Low;
                subject.last_assessment = Utc::now();
                subject.push_event(
                    SecurityEvent::new(
                        SecurityEventType::SuspiciousActivity,
                        format!(
                            "{} denials within {} minutes, trust level forced to low",
                            denials, self.config.denial_window_minutes
                        ),
                        EventSeverity::High,
                    ),
                    self.config.max_hot_entries,
                );
            }
        }

        self.store.update(subject, loaded).await?;

        info!(
            subject_id,
            user_id,
            resource,
            action,
            decision = %result.decision,
            "access request evaluated"
        );
        Ok(result)
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
        let (mut subject, loaded) = self.ensure_subject(subject_id).await?;
        let signal = TrustSignal {
            id: Uuid::new_v4(),
            signal_type,
            value: value.into(),
            confidence,
            source: source.into(),
            recorded_at: Utc::now(),
        };
        subject.record_signal(
            signal,
            self.config.signal_window_days,
            self.config.max_hot_entries,
        )?;
        debug!(subject_id, ?signal_type, confidence, trust_level = %subject.trust_level, "trust signal recorded");
        self.store.update(subject, loaded).await?;
        Ok(())
    }

    /// リスクスコアを更新
    pub async fn update_risk_score(
        &self,
        subject_id: &str,
        score: u8,
        reason: &str,
    ) -> Result<()> {
        let (mut subject, loaded) = self.ensure_subject(subject_id).await?;
        subject.apply_risk_score(score)?;
        info!(subject_id, score, reason, trust_level = %subject.trust_level, "risk score updated");
        self.store.update(subject, loaded).await?;
        Ok(())
    }

    /// セキュリティイベントを記録
    pub async fn record_security_event(
        &self,
        subject_id: &str,
        event_type: SecurityEventType,
        description: impl Into<String>,
        severity: EventSeverity,
    ) -> Result<()> {
        let (mut subject, loaded) = self.ensure_subject(subject_id).await?;
        let event = SecurityEvent::new(event_type, description, severity);
        if severity >= EventSeverity::High {
            warn!(subject_id, %severity, "high severity security event");
        }
        subject.apply_security_event(event, self.config.max_hot_entries);
        self.store.update(subject, loaded).await?;
        Ok(())
    }

    /// 隔離ゾーンを割り当て
    ///
    /// 純粋に付加的なタグ付けで、このエンジンのアクセス判定には影響しない。
    pub async fn assign_isolation_zone(
        &self,
        subject_id: &str,
        name: impl Into<String>,
        security_level: u8,
        network_segment: impl Into<String>,
    ) -> Result<()> {
        let (mut subject, loaded) = self.ensure_subject(subject_id).await?;
        let zone = super::types::IsolationZone {
            name: name.into(),
            security_level,
            network_segment: network_segment.into(),
            assigned_at: Utc::now(),
        };
        let description = format!(
            "isolation zone {} (level {}) assigned on segment {}",
            zone.name, zone.security_level, zone.network_segment
        );
        subject.isolation_zone = Some(zone);
        subject.push_event(
            SecurityEvent::new(
                SecurityEventType::ZoneAssigned,
                description,
                EventSeverity::Low,
            ),
            self.config.max_hot_entries,
        );
        self.store.update(subject, loaded).await?;
        Ok(())
    }

    /// 対象を一時停止
    pub async fn suspend_subject(&self, subject_id: &str) -> Result<()> {
        self.transition(subject_id, "suspended", TrustSubject::suspend)
            .await
    }

    /// 一時停止中の対象を再有効化
    pub async fn reactivate_subject(&self, subject_id: &str) -> Result<()> {
        self.transition(subject_id, "reactivated", TrustSubject::reactivate)
            .await
    }

    /// 対象を無効化（終端、監査証跡は保持）
    pub async fn deactivate_subject(&self, subject_id: &str) -> Result<()> {
        self.transition(subject_id, "deactivated", TrustSubject::deactivate)
            .await
    }

    async fn transition(
        &self,
        subject_id: &str,
        verb: &str,
        apply: fn(&mut TrustSubject) -> Result<()>,
    ) -> Result<()> {
        let subject = self.store.get(subject_id).await?;
        let mut subject =
            subject.ok_or_else(|| Error::NotFound(format!("subject {}", subject_id)))?;
        let loaded = subject.version;
        apply(&mut subject)?;
        subject.push_event(
            SecurityEvent::new(
                SecurityEventType::StatusChanged,
                format!("subject {}", verb),
                EventSeverity::Medium,
            ),
            self.config.max_hot_entries,
        );
        info!(subject_id, verb, "subject status changed");
        self.store.update(subject, loaded).await?;
        Ok(())
    }

    /// 決定履歴のスナップショット
    pub async fn decision_history(&self, subject_id: &str) -> Result<Vec<AccessRequest>> {
        let subject = self.get_subject(subject_id).await?;
        Ok(subject.access_requests.iter().cloned().collect())
    }

    /// 監査イベントのスナップショット
    pub async fn recent_events(&self, subject_id: &str) -> Result<Vec<SecurityEvent>> {
        let subject = self.get_subject(subject_id).await?;
        Ok(subject.events.iter().cloned().collect())
    }

    fn decision_of(request: &AccessRequest) -> AccessDecision {
        AccessDecision {
            request_id: request.id,
            decision: request.decision.unwrap_or(Decision::Denied),
            reason: request
                .decision_reason
                .clone()
                .unwrap_or_else(|| "undecided".to_string()),
            evaluated_at: request.evaluated_at.unwrap_or_else(Utc::now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn pdp() -> PolicyDecisionPoint {
        PolicyDecisionPoint::with_defaults()
    }

    fn set(values: &[&str]) -> HashSet<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    async fn evaluate(pdp: &PolicyDecisionPoint, user: &str, resource: &str) -> AccessDecision {
        pdp.evaluate_access_request("subject-1", user, resource, "read", HashMap::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_deny_by_default_without_policies() {
        let pdp = pdp();
        let decision = evaluate(&pdp, "alice", "/api/data").await;

        assert_eq!(decision.decision, Decision::Denied);
        assert!(decision.reason.contains("no applicable policy"));
    }

    #[tokio::test]
    async fn test_allow_list_grants_listed_user() {
        let pdp = pdp();
        pdp.add_policy(
            "subject-1",
            "allow-readers",
            PolicyRule::AllowList {
                resources: set(&["/api/data"]),
                allowed_users: set(&["alice"]),
            },
            10,
        )
        .await
        .unwrap();

        let decision = evaluate(&pdp, "alice", "/api/data").await;
        assert_eq!(decision.decision, Decision::Allowed);

        // 未記載ユーザーはUndecided → deny-by-default
        let decision = evaluate(&pdp, "bob", "/api/data").await;
        assert_eq!(decision.decision, Decision::Denied);
    }

    #[tokio::test]
    async fn test_allow_list_is_idempotent() {
        let pdp = pdp();
        pdp.add_policy(
            "subject-1",
            "allow-readers",
            PolicyRule::AllowList {
                resources: set(&["/api/data"]),
                allowed_users: set(&["alice"]),
            },
            10,
        )
        .await
        .unwrap();

        let first = evaluate(&pdp, "alice", "/api/data").await;
        let second = evaluate(&pdp, "alice", "/api/data").await;
        assert_eq!(first.decision, second.decision);
    }

    #[tokio::test]
    async fn test_priority_order_wins() {
        let pdp = pdp();
        pdp.add_policy(
            "subject-1",
            "allow-all-users",
            PolicyRule::AllowList {
                resources: set(&["/api/data"]),
                allowed_users: set(&["mallory"]),
            },
            1,
        )
        .await
        .unwrap();
        // 高優先度の拒否リストが先に評価されて勝つ
        pdp.add_policy(
            "subject-1",
            "deny-mallory",
            PolicyRule::DenyList {
                resources: set(&["/api/data"]),
                denied_users: set(&["mallory"]),
            },
            100,
        )
        .await
        .unwrap();

        let decision = evaluate(&pdp, "mallory", "/api/data").await;
        assert_eq!(decision.decision, Decision::Denied);
        assert!(decision.reason.contains("deny-mallory"));
    }

    #[tokio::test]
    async fn test_priority_tie_broken_by_insertion_order() {
        let pdp = pdp();
        pdp.add_policy(
            "subject-1",
            "first-added",
            PolicyRule::AllowList {
                resources: set(&["*"]),
                allowed_users: set(&["alice"]),
            },
            5,
        )
        .await
        .unwrap();
        pdp.add_policy(
            "subject-1",
            "second-added",
            PolicyRule::DenyList {
                resources: set(&["*"]),
                denied_users: set(&["alice"]),
            },
            5,
        )
        .await
        .unwrap();

        // 同一優先度では先に追加された許可リストが先に評価される
        let decision = evaluate(&pdp, "alice", "/api/data").await;
        assert_eq!(decision.decision, Decision::Allowed);
        assert!(decision.reason.contains("first-added"));
    }

    #[tokio::test]
    async fn test_attribute_policy_denies_on_trust_deficiency() {
        let pdp = pdp();
        pdp.add_policy(
            "subject-1",
            "high-trust-only",
            PolicyRule::AttributeBased {
                resources: set(&["/api/secrets"]),
                min_trust_level: TrustLevel::High,
                max_risk_score: 20,
            },
            10,
        )
        .await
        .unwrap();

        // デフォルトの対象は Medium → リスクスコアに関係なく拒否
        let decision = evaluate(&pdp, "alice", "/api/secrets").await;
        assert_eq!(decision.decision, Decision::Denied);
        assert!(decision.reason.contains("trust level"));
    }

    #[tokio::test]
    async fn test_denial_feedback_forces_low_exactly_once() {
        let pdp = pdp();
        pdp.register_subject("subject-1", SubjectType::User)
            .await
            .unwrap();

        for _ in 0..4 {
            evaluate(&pdp, "alice", "/api/data").await;
        }
        let subject = pdp.get_subject("subject-1").await.unwrap();
        assert_eq!(subject.trust_level, TrustLevel::Medium);

        // 5回目の拒否で強制降格とイベント追記
        evaluate(&pdp, "alice", "/api/data").await;
        let subject = pdp.get_subject("subject-1").await.unwrap();
        assert_eq!(subject.trust_level, TrustLevel::Low);
        let forcing_events = subject
            .events
            .iter()
            .filter(|e| e.event_type == SecurityEventType::SuspiciousActivity)
            .count();
        assert_eq!(forcing_events, 1);

        // 6回目では再発火しない
        evaluate(&pdp, "alice", "/api/data").await;
        let subject = pdp.get_subject("subject-1").await.unwrap();
        let forcing_events = subject
            .events
            .iter()
            .filter(|e| e.event_type == SecurityEventType::SuspiciousActivity)
            .count();
        assert_eq!(forcing_events, 1);
    }

    #[tokio::test]
    async fn test_suspended_subject_is_denied_and_audited() {
        let pdp = pdp();
        pdp.register_subject("subject-1", SubjectType::User)
            .await
            .unwrap();
        pdp.add_policy(
            "subject-1",
            "allow-alice",
            PolicyRule::AllowList {
                resources: set(&["*"]),
                allowed_users: set(&["alice"]),
            },
            10,
        )
        .await
        .unwrap();
        pdp.suspend_subject("subject-1").await.unwrap();

        let decision = evaluate(&pdp, "alice", "/api/data").await;
        assert_eq!(decision.decision, Decision::Denied);
        assert!(decision.reason.contains("suspended"));

        // 拒否はリクエスト履歴にも監査イベントにも残る
        let history = pdp.decision_history("subject-1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].decision, Some(Decision::Denied));
    }

    #[tokio::test]
    async fn test_risk_score_out_of_range_is_rejected() {
        let pdp = pdp();
        pdp.register_subject("subject-1", SubjectType::User)
            .await
            .unwrap();

        let result = pdp.update_risk_score("subject-1", 101, "test").await;
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_signal_confidence_out_of_range_is_rejected() {
        let pdp = pdp();
        let result = pdp
            .record_trust_signal(
                "subject-1",
                SignalType::DeviceFingerprint,
                "fp",
                101,
                "test",
            )
            .await;
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_isolation_zone_is_additive() {
        let pdp = pdp();
        pdp.register_subject("subject-1", SubjectType::Device)
            .await
            .unwrap();
        pdp.assign_isolation_zone("subject-1", "quarantine", 3, "segment-7")
            .await
            .unwrap();

        let subject = pdp.get_subject("subject-1").await.unwrap();
        let zone = subject.isolation_zone.unwrap();
        assert_eq!(zone.name, "quarantine");

        // ゾーン割り当てはアクセス判定に影響しない
        let decision = evaluate(&pdp, "alice", "/api/data").await;
        assert_eq!(decision.decision, Decision::Denied); // ポリシー無しの既定
    }

    #[tokio::test]
    async fn test_unknown_subject_is_created_on_first_gate() {
        let pdp = pdp();
        evaluate(&pdp, "alice", "/api/data").await;

        let subject = pdp.get_subject("subject-1").await.unwrap();
        assert_eq!(subject.status, SubjectStatus::Active);
        assert_eq!(subject.access_requests.len(), 1);
    }
}
