//! 行動プロファイル
//!
//! 対象がキーボード・ポインタをどう物理的に操作するかの統計的
//! ベースラインを保持し、新しいサンプルとの一致度を採点します。

use super::sample::{
    KeystrokeEvent, KeystrokePattern, MotionEvent, MotionPattern, SampleOrigin,
};
use crate::config::BehaviorConfig;
use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// プロファイルステータス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProfileStatus {
    /// 登録待ち（初期状態）
    Enrollment,
    /// 登録セッション進行中
    Enrolling,
    /// 有効（検証可能）
    Active,
    /// 一時停止（ポリシー判断による）
    Suspended,
    /// 無効
    Disabled,
}

/// 検証1回の記録
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehavioralSession {
    /// 総合スコア
    pub overall_score: f64,
    /// 一致判定
    pub passed: bool,
    /// 記録時刻
    pub recorded_at: DateTime<Utc>,
}

/// 異常検知の記録
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyDetection {
    /// 検知時の総合スコア
    pub score: f64,
    /// 説明
    pub description: String,
    /// 記録時刻
    pub recorded_at: DateTime<Utc>,
}

/// 検証結果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationOutcome {
    /// 一致判定
    pub is_match: bool,
    /// 総合スコア（提供モダリティの平均）
    pub overall_score: f64,
    /// キーストロークスコア（サンプル提供時のみ）
    pub keystroke_score: Option<f64>,
    /// モーションスコア（サンプル提供時のみ）
    pub motion_score: Option<f64>,
}

/// ベースラインが無いモダリティに与える中立スコア
const NEUTRAL_SCORE: f64 = 50.0;

/// 行動プロファイル
///
/// ベースラインは登録フェーズのサンプルのみから構築され、
/// デバイスフィンガープリントは外部の本人確認イベントが供給する。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehavioralProfile {
    /// 対象ID
    pub subject_id: String,
    /// デバイスフィンガープリント
    pub device_fingerprint: Option<String>,
    /// ステータス
    pub status: ProfileStatus,
    /// 確信度スコア（0-100）
    pub confidence_score: u8,
    /// 完了した登録セッション数
    pub completed_enrollments: u32,
    /// ベースラインメトリクス（メトリクス名 → 平均値）
    pub baseline: HashMap<String, f64>,
    /// 収集済みキーストロークパターン
    pub keystroke_patterns: Vec<KeystrokePattern>,
    /// 収集済みモーションパターン
    pub motion_patterns: Vec<MotionPattern>,
    /// 検証履歴
    pub sessions: Vec<BehavioralSession>,
    /// 異常検知履歴
    pub anomalies: Vec<AnomalyDetection>,
    /// 作成時刻
    pub created_at: DateTime<Utc>,
}

impl BehavioralProfile {
    /// 新しいプロファイルを作成（登録待ち状態）
    pub fn new(subject_id: impl Into<String>, device_fingerprint: Option<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            device_fingerprint,
            status: ProfileStatus::Enrollment,
            confidence_score: 0,
            completed_enrollments: 0,
            baseline: HashMap::new(),
            keystroke_patterns: Vec::new(),
            motion_patterns: Vec::new(),
            sessions: Vec::new(),
            anomalies: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// 登録セッションを開始
    ///
    /// 登録待ちまたは有効状態からのみ開始できる。
    pub fn start_enrollment_session(&mut self) -> Result<()> {
        match self.status {
            ProfileStatus::Enrollment | ProfileStatus::Active => {
                self.status = ProfileStatus::Enrolling;
                Ok(())
            }
            other => Err(Error::InvalidState(format!(
                "cannot start enrollment session from {:?}",
                other
            ))),
        }
    }

    /// キーストロークサンプルを記録
    pub fn record_keystroke_sample(
        &mut self,
        events: &[KeystrokeEvent],
        origin: SampleOrigin,
    ) -> Result<()> {
        self.ensure_collecting()?;
        let pattern = KeystrokePattern::from_events(events, origin)?;
        self.keystroke_patterns.push(pattern);
        Ok(())
    }

    /// モーションサンプルを記録
    pub fn record_motion_sample(
        &mut self,
        events: &[MotionEvent],
        origin: SampleOrigin,
    ) -> Result<()> {
        self.ensure_collecting()?;
        let pattern = MotionPattern::from_events(events, origin)?;
        self.motion_patterns.push(pattern);
        Ok(())
    }

    fn ensure_collecting(&self) -> Result<()> {
        match self.status {
            ProfileStatus::Enrolling | ProfileStatus::Active => Ok(()),
            other => Err(Error::InvalidState(format!(
                "cannot record samples in {:?}",
                other
            ))),
        }
    }

    /// 登録セッションを完了
    ///
    /// 登録フェーズの全サンプル集計の算術平均でベースラインを再計算し、
    /// 有効状態へ遷移する。
    pub fn complete_enrollment_session(&mut self) -> Result<()> {
        if self.status != ProfileStatus::Enrolling {
            return Err(Error::InvalidState(format!(
                "cannot complete enrollment session from {:?}",
                self.status
            )));
        }

        self.completed_enrollments += 1;
        self.recompute_baseline();
        self.recalculate_confidence();
        self.status = ProfileStatus::Active;
        Ok(())
    }

    fn recompute_baseline(&mut self) {
        let mut sums: HashMap<&'static str, (f64, usize)> = HashMap::new();

        for pattern in self
            .keystroke_patterns
            .iter()
            .filter(|p| p.origin == SampleOrigin::Enrollment)
        {
            for (key, value) in pattern.metrics() {
                let entry = sums.entry(key).or_insert((0.0, 0));
                entry.0 += value;
                entry.1 += 1;
            }
        }
        for pattern in self
            .motion_patterns
            .iter()
            .filter(|p| p.origin == SampleOrigin::Enrollment)
        {
            for (key, value) in pattern.metrics() {
                let entry = sums.entry(key).or_insert((0.0, 0));
                entry.0 += value;
                entry.1 += 1;
            }
        }

        self.baseline = sums
            .into_iter()
            .map(|(key, (sum, count))| (key.to_string(), sum / count as f64))
            .collect();
    }

    /// 検証を実行
    ///
    /// 有効状態かつ十分なベースラインデータが前提。データ不足の場合は
    /// 低確信度の推測を返さず `InsufficientData` で拒否する。
    /// ベースラインの無いモダリティは中立スコア50として扱う。
    pub fn verify(
        &mut self,
        keystroke_sample: Option<&[KeystrokeEvent]>,
        motion_sample: Option<&[MotionEvent]>,
        config: &BehaviorConfig,
    ) -> Result<VerificationOutcome> {
        if self.status != ProfileStatus::Active {
            return Err(Error::InvalidState(format!(
                "cannot verify profile in {:?}",
                self.status
            )));
        }
        if self.completed_enrollments < config.min_enrollment_sessions
            || self.keystroke_patterns.len() < config.min_keystroke_patterns
            || self.motion_patterns.len() < config.min_motion_patterns
        {
            return Err(Error::InsufficientData(format!(
                "baseline not established for {}: {} enrollment sessions, {} keystroke patterns, {} motion patterns",
                self.subject_id,
                self.completed_enrollments,
                self.keystroke_patterns.len(),
                self.motion_patterns.len()
            )));
        }
        if keystroke_sample.is_none() && motion_sample.is_none() {
            return Err(Error::InvalidArgument(
                "verification requires at least one modality sample".to_string(),
            ));
        }

        let keystroke_score = match keystroke_sample {
            Some(events) => {
                let pattern = KeystrokePattern::from_events(events, SampleOrigin::Verification)?;
                Some(self.modality_score(&pattern.metrics()))
            }
            None => None,
        };
        let motion_score = match motion_sample {
            Some(events) => {
                let pattern = MotionPattern::from_events(events, SampleOrigin::Verification)?;
                Some(self.modality_score(&pattern.metrics()))
            }
            None => None,
        };

        let provided: Vec<f64> = [keystroke_score, motion_score]
            .into_iter()
            .flatten()
            .collect();
        let overall_score = provided.iter().sum::<f64>() / provided.len() as f64;
        let is_match = overall_score >= config.match_threshold;

        self.sessions.push(BehavioralSession {
            overall_score,
            passed: is_match,
            recorded_at: Utc::now(),
        });
        if overall_score < config.anomaly_threshold {
            self.anomalies.push(AnomalyDetection {
                score: overall_score,
                description: format!(
                    "verification score {:.1} below anomaly threshold {:.1}",
                    overall_score, config.anomaly_threshold
                ),
                recorded_at: Utc::now(),
            });
        }
        self.recalculate_confidence();

        Ok(VerificationOutcome {
            is_match,
            overall_score,
            keystroke_score,
            motion_score,
        })
    }

    /// モダリティのスコアを算出
    ///
    /// メトリクスごとに逆距離類似度 max(0, 100 − 10×|sample − baseline|) を
    /// 取り平均する。ベースラインの無いモダリティは中立スコア。
    fn modality_score(&self, metrics: &[(&'static str, f64)]) -> f64 {
        let mut scores = Vec::new();
        for (key, value) in metrics {
            if let Some(baseline) = self.baseline.get(*key) {
                let score = (100.0 - 10.0 * (value - baseline).abs()).max(0.0);
                scores.push(score);
            }
        }

        if scores.is_empty() {
            NEUTRAL_SCORE
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        }
    }

    /// 確信度スコアを再計算
    ///
    /// clamp(20×完了登録数, 0, 60) + min(5×直近30日の成功検証数, 30)
    /// − 10×直近7日の異常数、全体を [0,100] に収める。
    pub fn recalculate_confidence(&mut self) {
        let now = Utc::now();
        let enrollment_part = (20 * self.completed_enrollments as i64).clamp(0, 60);

        let success_cutoff = now - Duration::days(30);
        let recent_successes = self
            .sessions
            .iter()
            .filter(|s| s.passed && s.recorded_at >= success_cutoff)
            .count() as i64;
        let success_part = (5 * recent_successes).min(30);

        let anomaly_cutoff = now - Duration::days(7);
        let recent_anomalies = self
            .anomalies
            .iter()
            .filter(|a| a.recorded_at >= anomaly_cutoff)
            .count() as i64;

        let confidence = enrollment_part + success_part - 10 * recent_anomalies;
        self.confidence_score = confidence.clamp(0, 100) as u8;
    }

    /// プロファイルを一時停止（有効状態からのみ）
    pub fn suspend(&mut self) -> Result<()> {
        match self.status {
            ProfileStatus::Active => {
                self.status = ProfileStatus::Suspended;
                Ok(())
            }
            other => Err(Error::InvalidState(format!(
                "cannot suspend profile in {:?}",
                other
            ))),
        }
    }

    /// 一時停止中のプロファイルを復帰
    pub fn reinstate(&mut self) -> Result<()> {
        match self.status {
            ProfileStatus::Suspended => {
                self.status = ProfileStatus::Active;
                Ok(())
            }
            other => Err(Error::InvalidState(format!(
                "cannot reinstate profile in {:?}",
                other
            ))),
        }
    }

    /// プロファイルを無効化
    pub fn disable(&mut self) {
        self.status = ProfileStatus::Disabled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keystrokes(timestamps: &[u64], pressure: f64) -> Vec<KeystrokeEvent> {
        timestamps
            .iter()
            .map(|t| KeystrokeEvent {
                key: "a".to_string(),
                timestamp_ms: *t,
                pressure,
            })
            .collect()
    }

    fn motions(step_px: f64, step_ms: u64, count: usize) -> Vec<MotionEvent> {
        (0..count)
            .map(|i| MotionEvent {
                x: step_px * i as f64,
                y: 0.0,
                timestamp_ms: step_ms * i as u64,
            })
            .collect()
    }

    /// 3回の登録セッションでキーストローク12件・モーション6件を集める
    fn enrolled_profile() -> BehavioralProfile {
        let mut profile = BehavioralProfile::new("subject-1", Some("fp-1".to_string()));
        for _ in 0..3 {
            profile.start_enrollment_session().unwrap();
            for _ in 0..4 {
                profile
                    .record_keystroke_sample(
                        &keystrokes(&[0, 100, 200, 300], 0.5),
                        SampleOrigin::Enrollment,
                    )
                    .unwrap();
            }
            for _ in 0..2 {
                profile
                    .record_motion_sample(&motions(100.0, 100, 4), SampleOrigin::Enrollment)
                    .unwrap();
            }
            profile.complete_enrollment_session().unwrap();
        }
        profile
    }

    #[test]
    fn test_enrollment_state_machine() {
        let mut profile = BehavioralProfile::new("subject-1", None);
        assert_eq!(profile.status, ProfileStatus::Enrollment);

        // 登録開始前の記録は失敗
        let result = profile.record_keystroke_sample(
            &keystrokes(&[0, 100], 0.5),
            SampleOrigin::Enrollment,
        );
        assert!(matches!(result, Err(Error::InvalidState(_))));

        // 完了は登録セッション中のみ
        assert!(matches!(
            profile.complete_enrollment_session(),
            Err(Error::InvalidState(_))
        ));

        profile.start_enrollment_session().unwrap();
        assert_eq!(profile.status, ProfileStatus::Enrolling);
        assert!(matches!(
            profile.start_enrollment_session(),
            Err(Error::InvalidState(_))
        ));

        profile
            .record_keystroke_sample(&keystrokes(&[0, 100], 0.5), SampleOrigin::Enrollment)
            .unwrap();
        profile.complete_enrollment_session().unwrap();
        assert_eq!(profile.status, ProfileStatus::Active);
        assert_eq!(profile.completed_enrollments, 1);
    }

    #[test]
    fn test_baseline_is_mean_of_enrollment_samples() {
        let mut profile = BehavioralProfile::new("subject-1", None);
        profile.start_enrollment_session().unwrap();
        profile
            .record_keystroke_sample(&keystrokes(&[0, 100, 200], 0.4), SampleOrigin::Enrollment)
            .unwrap();
        profile
            .record_keystroke_sample(&keystrokes(&[0, 200, 400], 0.6), SampleOrigin::Enrollment)
            .unwrap();
        profile.complete_enrollment_session().unwrap();

        // (100 + 200) / 2 = 150, (0.4 + 0.6) / 2 = 0.5
        assert_eq!(profile.baseline["keystroke_latency"], 150.0);
        assert_eq!(profile.baseline["keystroke_pressure"], 0.5);
    }

    #[test]
    fn test_verification_refused_without_baseline_data() {
        let mut profile = BehavioralProfile::new("subject-1", None);
        profile.start_enrollment_session().unwrap();
        profile
            .record_keystroke_sample(&keystrokes(&[0, 100], 0.5), SampleOrigin::Enrollment)
            .unwrap();
        profile.complete_enrollment_session().unwrap();

        // 登録1回・パターン不足 → 低確信度の推測ではなく拒否
        let result = profile.verify(
            Some(&keystrokes(&[0, 100], 0.5)),
            None,
            &BehaviorConfig::default(),
        );
        assert!(matches!(result, Err(Error::InsufficientData(_))));
    }

    #[test]
    fn test_verification_matches_consistent_behavior() {
        let mut profile = enrolled_profile();

        let outcome = profile
            .verify(
                Some(&keystrokes(&[0, 100, 200, 300], 0.5)),
                Some(&motions(100.0, 100, 4)),
                &BehaviorConfig::default(),
            )
            .unwrap();

        assert!(outcome.is_match);
        assert_eq!(outcome.overall_score, 100.0);
        assert_eq!(outcome.keystroke_score, Some(100.0));
        assert_eq!(outcome.motion_score, Some(100.0));
        assert_eq!(profile.sessions.len(), 1);
        assert!(profile.anomalies.is_empty());
    }

    #[test]
    fn test_verification_flags_divergent_behavior() {
        let mut profile = enrolled_profile();

        // レイテンシ・圧力ともにベースラインから外れる
        let outcome = profile
            .verify(
                Some(&keystrokes(&[0, 500, 1000], 0.9)),
                None,
                &BehaviorConfig::default(),
            )
            .unwrap();

        assert!(!outcome.is_match);
        assert!(outcome.overall_score < 50.0);
        assert_eq!(profile.anomalies.len(), 1);
    }

    #[test]
    fn test_missing_baseline_modality_scores_neutral() {
        // キーストロークのみで登録し、モーションは検証タグでのみ収集する
        let mut profile = BehavioralProfile::new("subject-1", None);
        for _ in 0..3 {
            profile.start_enrollment_session().unwrap();
            for _ in 0..4 {
                profile
                    .record_keystroke_sample(
                        &keystrokes(&[0, 100, 200, 300], 0.5),
                        SampleOrigin::Enrollment,
                    )
                    .unwrap();
            }
            profile.complete_enrollment_session().unwrap();
        }
        for _ in 0..5 {
            profile
                .record_motion_sample(&motions(100.0, 100, 4), SampleOrigin::Verification)
                .unwrap();
        }

        let outcome = profile
            .verify(
                None,
                Some(&motions(100.0, 100, 4)),
                &BehaviorConfig::default(),
            )
            .unwrap();

        // モーションのベースラインが無い → 中立50
        assert_eq!(outcome.motion_score, Some(50.0));
        assert_eq!(outcome.overall_score, 50.0);
        assert!(!outcome.is_match);
        // 50は異常閾値未満ではない
        assert!(profile.anomalies.is_empty());
    }

    #[test]
    fn test_confidence_after_enrollment_and_success() {
        let mut profile = enrolled_profile();
        // 登録3回 → 60
        assert_eq!(profile.confidence_score, 60);

        profile
            .verify(
                Some(&keystrokes(&[0, 100, 200, 300], 0.5)),
                None,
                &BehaviorConfig::default(),
            )
            .unwrap();
        // 60 + 5×1 = 65
        assert_eq!(profile.confidence_score, 65);
    }

    #[test]
    fn test_confidence_penalized_by_anomalies() {
        let mut profile = enrolled_profile();

        profile
            .verify(
                Some(&keystrokes(&[0, 900, 1800], 0.9)),
                None,
                &BehaviorConfig::default(),
            )
            .unwrap();

        // 60 + 0 - 10×1 = 50
        assert_eq!(profile.confidence_score, 50);
    }

    #[test]
    fn test_verify_requires_active_status() {
        let mut profile = enrolled_profile();
        profile.suspend().unwrap();

        let result = profile.verify(
            Some(&keystrokes(&[0, 100], 0.5)),
            None,
            &BehaviorConfig::default(),
        );
        assert!(matches!(result, Err(Error::InvalidState(_))));

        profile.reinstate().unwrap();
        assert_eq!(profile.status, ProfileStatus::Active);
    }

    #[test]
    fn test_verify_requires_a_modality() {
        let mut profile = enrolled_profile();
        let result = profile.verify(None, None, &BehaviorConfig::default());
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }
}
