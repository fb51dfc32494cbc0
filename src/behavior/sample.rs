//! 行動サンプルの集計
//!
//! 生のキーストローク・モーションイベント列から、ベースライン比較に
//! 使う数値集計（パターンレコード)を算出します。

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// ベースラインメトリクス名: 平均キー間レイテンシ（ms）
pub const METRIC_KEYSTROKE_LATENCY: &str = "keystroke_latency";
/// ベースラインメトリクス名: 平均キー圧力
pub const METRIC_KEYSTROKE_PRESSURE: &str = "keystroke_pressure";
/// ベースラインメトリクス名: 平均移動速度（px/ms）
pub const METRIC_MOTION_SPEED: &str = "motion_speed";
/// ベースラインメトリクス名: 平均加速度
pub const METRIC_MOTION_ACCELERATION: &str = "motion_acceleration";

/// サンプルの由来
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleOrigin {
    /// 登録フェーズ（ベースライン構築に使用）
    Enrollment,
    /// 検証フェーズ
    Verification,
}

/// キーストロークイベント
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeystrokeEvent {
    /// キー識別子
    pub key: String,
    /// 打鍵時刻（ミリ秒）
    pub timestamp_ms: u64,
    /// キー圧力（0.0-1.0）
    pub pressure: f64,
}

/// モーションイベント（ポインタ座標のサンプリング点）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionEvent {
    /// X座標
    pub x: f64,
    /// Y座標
    pub y: f64,
    /// サンプリング時刻（ミリ秒）
    pub timestamp_ms: u64,
}

/// キーストロークパターン（1サンプルの集計）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeystrokePattern {
    /// 平均キー間レイテンシ（ms）
    pub avg_latency_ms: f64,
    /// 平均キー圧力
    pub avg_pressure: f64,
    /// サンプルの由来
    pub origin: SampleOrigin,
    /// 記録時刻
    pub recorded_at: DateTime<Utc>,
}

impl KeystrokePattern {
    /// イベント列から集計
    ///
    /// イベントが1件の場合レイテンシは0として扱う。空列は拒否。
    pub fn from_events(events: &[KeystrokeEvent], origin: SampleOrigin) -> Result<Self> {
        if events.is_empty() {
            return Err(Error::InvalidArgument(
                "keystroke sample requires at least one event".to_string(),
            ));
        }

        let avg_latency_ms = if events.len() < 2 {
            0.0
        } else {
            let total: u64 = events
                .windows(2)
                .map(|pair| pair[1].timestamp_ms.saturating_sub(pair[0].timestamp_ms))
                .sum();
            total as f64 / (events.len() - 1) as f64
        };

        let avg_pressure =
            events.iter().map(|e| e.pressure).sum::<f64>() / events.len() as f64;

        Ok(Self {
            avg_latency_ms,
            avg_pressure,
            origin,
            recorded_at: Utc::now(),
        })
    }

    /// ベースライン計算用のメトリクス組
    pub fn metrics(&self) -> [(&'static str, f64); 2] {
        [
            (METRIC_KEYSTROKE_LATENCY, self.avg_latency_ms),
            (METRIC_KEYSTROKE_PRESSURE, self.avg_pressure),
        ]
    }
}

/// モーションパターン（1サンプルの集計）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionPattern {
    /// 平均移動速度（px/ms）
    pub avg_speed: f64,
    /// 平均加速度（速度変化率の絶対値）
    pub avg_acceleration: f64,
    /// サンプルの由来
    pub origin: SampleOrigin,
    /// 記録時刻
    pub recorded_at: DateTime<Utc>,
}

impl MotionPattern {
    /// イベント列から集計
    ///
    /// 速度の算出に最低2点が必要。同時刻の連続点は無視する。
    pub fn from_events(events: &[MotionEvent], origin: SampleOrigin) -> Result<Self> {
        if events.len() < 2 {
            return Err(Error::InvalidArgument(
                "motion sample requires at least two events".to_string(),
            ));
        }

        let mut speeds = Vec::new();
        for pair in events.windows(2) {
            let dt = pair[1].timestamp_ms.saturating_sub(pair[0].timestamp_ms);
            if dt == 0 {
                continue;
            }
            let dx = pair[1].x - pair[0].x;
            let dy = pair[1].y - pair[0].y;
            speeds.push((dx * dx + dy * dy).sqrt() / dt as f64);
        }

        if speeds.is_empty() {
            return Err(Error::InvalidArgument(
                "motion sample has no time progression".to_string(),
            ));
        }

        let avg_speed = speeds.iter().sum::<f64>() / speeds.len() as f64;

        let avg_acceleration = if speeds.len() < 2 {
            0.0
        } else {
            let total: f64 = speeds
                .windows(2)
                .map(|pair| (pair[1] - pair[0]).abs())
                .sum();
            total / (speeds.len() - 1) as f64
        };

        Ok(Self {
            avg_speed,
            avg_acceleration,
            origin,
            recorded_at: Utc::now(),
        })
    }

    /// ベースライン計算用のメトリクス組
    pub fn metrics(&self) -> [(&'static str, f64); 2] {
        [
            (METRIC_MOTION_SPEED, self.avg_speed),
            (METRIC_MOTION_ACCELERATION, self.avg_acceleration),
        ]
    }
}
