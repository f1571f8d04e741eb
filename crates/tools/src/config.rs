//! 学習設定（TOML）
//!
//! 省略したセクションは既定値になる。未知のキーはエラーにする。

use anyhow::{Context, Result, bail, ensure};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use sunset_core::export::{ElementType, ExportFormat};
use sunset_core::sampler::SamplingPolicy;

use crate::nnue_trainer::trainer::LossType;

fn default_checkpoint_path() -> PathBuf {
    PathBuf::from("checkpoint.bin")
}

fn default_workers() -> usize {
    4
}

fn default_seed() -> u64 {
    42
}

fn default_true() -> bool {
    true
}

/// 設定ファイル全体
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// コーパスのパスまたは glob パターン
    pub corpus: String,
    /// 重みアーティファクトの出力先
    pub output_path: PathBuf,
    #[serde(default = "default_checkpoint_path")]
    pub checkpoint_path: PathBuf,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// JSONL メトリクスの出力先（`-` なら標準出力）
    #[serde(default)]
    pub log_path: Option<String>,
    #[serde(default)]
    pub training: TrainingSection,
    #[serde(default)]
    pub sampling: SamplingSection,
    #[serde(default)]
    pub model: ModelSection,
    #[serde(default)]
    pub export: ExportSection,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TrainingSection {
    pub batch_size: usize,
    pub epochs: usize,
    /// 何ステップごとに損失を報告するか
    pub report_freq: usize,
    /// 何エポックごとに重みとチェックポイントを保存するか
    pub save_freq: usize,
    pub lr: f32,
    pub weight_decay: f32,
    pub loss: LossType,
}

impl Default for TrainingSection {
    fn default() -> Self {
        Self {
            batch_size: 1024,
            epochs: 10,
            report_freq: 100,
            save_freq: 1,
            lr: 0.001,
            weight_decay: 0.0,
            loss: LossType::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyKind {
    #[default]
    Partition,
    RandomOffset,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SamplingSection {
    #[serde(default)]
    pub policy: PolicyKind,
    /// パーティション方式でエポックごとに順序を混ぜるか
    #[serde(default = "default_true")]
    pub shuffle: bool,
    /// ランダムオフセット方式の1エポックあたりのサンプル数
    #[serde(default)]
    pub samples_per_epoch: Option<u64>,
}

impl Default for SamplingSection {
    fn default() -> Self {
        Self {
            policy: PolicyKind::default(),
            shuffle: true,
            samples_per_epoch: None,
        }
    }
}

impl SamplingSection {
    pub fn policy(&self) -> Result<SamplingPolicy> {
        match self.policy {
            PolicyKind::Partition => Ok(SamplingPolicy::Partition {
                shuffle: self.shuffle,
            }),
            PolicyKind::RandomOffset => match self.samples_per_epoch {
                Some(n) if n > 0 => Ok(SamplingPolicy::RandomOffset {
                    samples_per_epoch: n,
                }),
                _ => bail!("sampling.samples_per_epoch must be set (> 0) for random-offset"),
            },
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ModelSection {
    /// 隠れ層の幅（入力 768 と出力 1 は固定）
    pub hidden: Vec<usize>,
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            hidden: vec![256, 128, 32],
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ExportSection {
    pub format: ExportFormat,
    pub element_type: ElementType,
}

impl Config {
    /// ファイルから読み込んで検証する
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.corpus.trim().is_empty(), "corpus must not be empty");
        ensure!(self.workers > 0, "workers must be at least 1");
        let t = &self.training;
        ensure!(t.batch_size > 0, "training.batch_size must be at least 1");
        ensure!(t.report_freq > 0, "training.report_freq must be at least 1");
        ensure!(t.save_freq > 0, "training.save_freq must be at least 1");
        ensure!(
            t.lr.is_finite() && t.lr > 0.0,
            "training.lr must be a positive number (got {})",
            t.lr
        );
        ensure!(
            t.weight_decay.is_finite() && t.weight_decay >= 0.0,
            "training.weight_decay must be >= 0 (got {})",
            t.weight_decay
        );
        ensure!(
            self.model.hidden.iter().all(|&h| h > 0),
            "model.hidden widths must be positive: {:?}",
            self.model.hidden
        );
        self.sampling.policy()?;
        Ok(())
    }
}
