//! ポリシー評価の回帰シナリオ
//!
//! deny-by-default、優先度順評価、属性ベース判定、
//! リスクスコア検証の仕様上の性質を固定する。

use std::collections::{HashMap, HashSet};
use trustgate_rs::error::Error;
use trustgate_rs::policy::{
    Decision, PolicyDecisionPoint, PolicyRule, SubjectType, TrustLevel,
};

fn set(values: &[&str]) -> HashSet<String> {
    values.iter().map(|s| s.to_string()).collect()
}

async fn evaluate(pdp: &PolicyDecisionPoint, user: &str, resource: &str) -> Decision {
    pdp.evaluate_access_request("subject-1", user, resource, "read", HashMap::new())
        .await
        .unwrap()
        .decision
}

#[tokio::test]
async fn subject_with_zero_policies_is_denied_for_any_resource() {
    let pdp = PolicyDecisionPoint::with_defaults();
    pdp.register_subject("subject-1", SubjectType::User)
        .await
        .unwrap();

    for resource in ["/api/data", "/", "arbitrary", ""] {
        assert_eq!(evaluate(&pdp, "alice", resource).await, Decision::Denied);
    }
}

#[tokio::test]
async fn all_undecided_policies_fall_through_to_deny() {
    let pdp = PolicyDecisionPoint::with_defaults();
    // ロールベースは常にUndecided、許可リストも未記載ユーザーにはUndecided
    pdp.add_policy(
        "subject-1",
        "role-gate",
        PolicyRule::RoleBased {
            resources: set(&["*"]),
            required_roles: set(&["admin"]),
        },
        50,
    )
    .await
    .unwrap();
    pdp.add_policy(
        "subject-1",
        "allow-others",
        PolicyRule::AllowList {
            resources: set(&["*"]),
            allowed_users: set(&["bob"]),
        },
        10,
    )
    .await
    .unwrap();

    assert_eq!(evaluate(&pdp, "alice", "/api/data").await, Decision::Denied);
}

#[tokio::test]
async fn allow_list_decision_is_stable_across_evaluations() {
    let pdp = PolicyDecisionPoint::with_defaults();
    pdp.add_policy(
        "subject-1",
        "allow-alice",
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

    assert_eq!(first, Decision::Allowed);
    assert_eq!(first, second);
}

#[tokio::test]
async fn attribute_policy_cites_trust_deficiency_regardless_of_risk() {
    let pdp = PolicyDecisionPoint::with_defaults();
    pdp.register_subject("subject-1", SubjectType::User)
        .await
        .unwrap();
    // リスクスコアを完全に良好な値へ
    pdp.update_risk_score("subject-1", 0, "clean record")
        .await
        .unwrap();
    // リスク0の導出でHighになるため、その上のCriticalを要求する
    pdp.add_policy(
        "subject-1",
        "critical-only",
        PolicyRule::AttributeBased {
            resources: set(&["/api/secrets"]),
            min_trust_level: TrustLevel::Critical,
            max_risk_score: 100,
        },
        10,
    )
    .await
    .unwrap();

    let decision = pdp
        .evaluate_access_request("subject-1", "alice", "/api/secrets", "read", HashMap::new())
        .await
        .unwrap();

    assert_eq!(decision.decision, Decision::Denied);
    assert!(decision.reason.contains("trust level"));
}

#[tokio::test]
async fn higher_priority_deny_overrides_allow() {
    let pdp = PolicyDecisionPoint::with_defaults();
    pdp.add_policy(
        "subject-1",
        "allow-everyone-listed",
        PolicyRule::AllowList {
            resources: set(&["/api/data"]),
            allowed_users: set(&["alice", "mallory"]),
        },
        10,
    )
    .await
    .unwrap();
    pdp.add_policy(
        "subject-1",
        "deny-compromised",
        PolicyRule::DenyList {
            resources: set(&["/api/data"]),
            denied_users: set(&["mallory"]),
        },
        20,
    )
    .await
    .unwrap();

    assert_eq!(evaluate(&pdp, "mallory", "/api/data").await, Decision::Denied);
    assert_eq!(evaluate(&pdp, "alice", "/api/data").await, Decision::Allowed);
}

#[tokio::test]
async fn policies_only_apply_to_matching_resources() {
    let pdp = PolicyDecisionPoint::with_defaults();
    pdp.add_policy(
        "subject-1",
        "allow-data-readers",
        PolicyRule::AllowList {
            resources: set(&["/api/data/*"]),
            allowed_users: set(&["alice"]),
        },
        10,
    )
    .await
    .unwrap();

    assert_eq!(
        evaluate(&pdp, "alice", "/api/data/items").await,
        Decision::Allowed
    );
    // 適用集合が空 → 既定拒否
    assert_eq!(evaluate(&pdp, "alice", "/api/admin").await, Decision::Denied);
}

#[tokio::test]
async fn risk_score_updates_are_validated_not_clamped() {
    let pdp = PolicyDecisionPoint::with_defaults();
    pdp.register_subject("subject-1", SubjectType::Service)
        .await
        .unwrap();

    for score in [101, 200, 255] {
        let result = pdp.update_risk_score("subject-1", score, "probe").await;
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    // 失敗した更新は状態を変えない
    let subject = pdp.get_subject("subject-1").await.unwrap();
    assert_eq!(subject.risk_score, 50);
}

#[tokio::test]
async fn location_restriction_denies_foreign_context() {
    let pdp = PolicyDecisionPoint::with_defaults();
    pdp.add_policy(
        "subject-1",
        "office-only",
        PolicyRule::LocationBased {
            resources: set(&["/api/payroll"]),
            allowed_locations: set(&["Tokyo"]),
        },
        30,
    )
    .await
    .unwrap();
    pdp.add_policy(
        "subject-1",
        "allow-hr",
        PolicyRule::AllowList {
            resources: set(&["/api/payroll"]),
            allowed_users: set(&["alice"]),
        },
        10,
    )
    .await
    .unwrap();

    let mut context = HashMap::new();
    context.insert("location".to_string(), "Tokyo".to_string());
    let decision = pdp
        .evaluate_access_request("subject-1", "alice", "/api/payroll", "read", context)
        .await
        .unwrap();
    // 位置制限はUndecidedで通過し、許可リストが決定する
    assert_eq!(decision.decision, Decision::Allowed);

    let mut context = HashMap::new();
    context.insert("location".to_string(), "Reykjavik".to_string());
    let decision = pdp
        .evaluate_access_request("subject-1", "alice", "/api/payroll", "read", context)
        .await
        .unwrap();
    assert_eq!(decision.decision, Decision::Denied);
}

#[tokio::test]
async fn decision_history_is_append_only_and_decided() {
    let pdp = PolicyDecisionPoint::with_defaults();
    for _ in 0..3 {
        evaluate(&pdp, "alice", "/api/data").await;
    }

    let history = pdp.decision_history("subject-1").await.unwrap();
    assert_eq!(history.len(), 3);
    for request in &history {
        assert!(request.decision.is_some());
        assert!(request.decision_reason.is_some());
        assert!(request.evaluated_at.is_some());
    }
}
