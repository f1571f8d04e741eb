//! 学習サンプル（特徴量 + 目標値）

use crate::error::MalformedRecord;
use crate::features::{FeatureVector, encode};
use crate::record::PositionRecord;

/// 評価値の正規化スケール
pub const TARGET_SCALE: f32 = 1024.0;

/// 2つの評価値成分から目標値を計算
///
/// `(score1 + 0.5 * score2) / 1024`
#[inline]
pub fn target_from_scores(score1: i32, score2: i32) -> f32 {
    ((f64::from(score1) + 0.5 * f64::from(score2)) / f64::from(TARGET_SCALE)) as f32
}

/// 1ステップ分の学習サンプル
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub features: FeatureVector,
    pub target: f32,
}

impl Sample {
    /// パース済みレコードから作る（手番側視点へ反転する）
    pub fn from_record(record: &PositionRecord<'_>) -> Result<Sample, MalformedRecord> {
        let features = encode(record.placement, record.mirror())?;
        Ok(Sample {
            features,
            target: target_from_scores(record.score1, record.score2),
        })
    }

    /// コーパス1行から直接作る
    pub fn from_line(line: &str) -> Result<Sample, MalformedRecord> {
        let record = PositionRecord::parse(line)?;
        Sample::from_record(&record)
    }
}
