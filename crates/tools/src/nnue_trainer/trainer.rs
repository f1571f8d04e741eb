//! 学習ループ
//!
//! エポック単位での学習と、重み・チェックポイントの定期保存を管理する。

use anyhow::{Context, Result, bail};
use indicatif::{ProgressBar, ProgressStyle};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use sunset_core::Sample;
use sunset_core::export::{ElementType, ExportFormat};

use super::checkpoint::ModelState;
use super::dataset::SampleLoader;
use super::export::export_network;
use super::logging::StructuredLogger;
use super::network::TrainableNetwork;
use super::optimizer::{Adam, Optimizer};
use crate::config::Config;

/// 学習設定
#[derive(Clone, Debug)]
pub struct TrainConfig {
    /// バッチサイズ
    pub batch_size: usize,
    /// エポック数（再開時は通算）
    pub epochs: usize,
    /// 学習率
    pub learning_rate: f32,
    /// 重み減衰
    pub weight_decay: f32,
    /// シード値
    pub seed: u64,
    /// 損失関数の種類
    pub loss_type: LossType,
    /// 勝率変換のスケール（目標値の単位で）
    pub eval_scale: f32,
    /// 損失を報告するステップ間隔
    pub report_freq: usize,
    /// 重みとチェックポイントを保存するエポック間隔
    pub save_freq: usize,
    pub output_path: PathBuf,
    pub checkpoint_path: PathBuf,
    pub format: ExportFormat,
    pub element_type: ElementType,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            batch_size: 1024,
            epochs: 10,
            learning_rate: 0.001,
            weight_decay: 0.0,
            seed: 42,
            loss_type: LossType::default(),
            eval_scale: 0.5,
            report_freq: 100,
            save_freq: 1,
            output_path: PathBuf::from("net.rs"),
            checkpoint_path: PathBuf::from("checkpoint.bin"),
            format: ExportFormat::default(),
            element_type: ElementType::default(),
        }
    }
}

impl TrainConfig {
    pub fn from_config(config: &Config) -> Self {
        let t = &config.training;
        Self {
            batch_size: t.batch_size,
            epochs: t.epochs,
            learning_rate: t.lr,
            weight_decay: t.weight_decay,
            seed: config.seed,
            loss_type: t.loss,
            report_freq: t.report_freq,
            save_freq: t.save_freq,
            output_path: config.output_path.clone(),
            checkpoint_path: config.checkpoint_path.clone(),
            format: config.export.format,
            element_type: config.export.element_type,
            ..Self::default()
        }
    }
}

/// 損失関数の種類
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LossType {
    /// 平均二乗誤差
    Mse,
    /// シグモイド交差エントロピー（勝率ベース）
    #[default]
    SigmoidCrossEntropy,
}

impl LossType {
    /// 1サンプル分の (損失, d損失/d出力)
    pub fn loss_and_grad(self, predicted: f32, target: f32, eval_scale: f32) -> (f32, f32) {
        match self {
            LossType::Mse => {
                let diff = predicted - target;
                (diff * diff, 2.0 * diff)
            }
            LossType::SigmoidCrossEntropy => {
                let p = sigmoid(predicted / eval_scale).clamp(1e-7, 1.0 - 1e-7);
                let t = sigmoid(target / eval_scale);
                let loss = -t * p.ln() - (1.0 - t) * (1.0 - p).ln();
                (loss, (p - t) / eval_scale)
            }
        }
    }
}

/// 1エポック分の結果
#[derive(Clone, Copy, Debug, Default)]
pub struct EpochReport {
    pub avg_loss: f32,
    pub samples: u64,
    pub batches: u64,
    /// 中断で途中終了した
    pub interrupted: bool,
}

/// 学習全体の結果
#[derive(Clone, Copy, Debug, Default)]
pub struct TrainSummary {
    /// 通算の完了エポック数
    pub epochs_completed: u64,
    /// 通算の更新ステップ数
    pub steps: u64,
    pub interrupted: bool,
    /// 最後に完了したエポックの平均損失
    pub last_loss: Option<f32>,
}

/// トレーナー
pub struct Trainer {
    config: TrainConfig,
    state: ModelState,
    interrupted: Arc<AtomicBool>,
    logger: Option<StructuredLogger>,
}

impl Trainer {
    /// 新しいモデルで作成（シードから初期化）
    pub fn new(config: TrainConfig, hidden: &[usize]) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let mut network = TrainableNetwork::new(hidden);
        network.init_random(&mut rng);
        let optimizer =
            Adam::new(&network, config.learning_rate).with_weight_decay(config.weight_decay);
        Self::with_state(config, ModelState::new(network, optimizer))
    }

    /// 既存の状態（チェックポイント）から作成
    pub fn with_state(config: TrainConfig, state: ModelState) -> Self {
        Self {
            config,
            state,
            interrupted: Arc::new(AtomicBool::new(false)),
            logger: None,
        }
    }

    /// チェックポイントがあれば再開し、なければ新しいモデルで作成
    ///
    /// 読めないチェックポイントや隠れ層の不一致はエラーにする。
    pub fn resume_or_new(config: TrainConfig, hidden: &[usize]) -> Result<Self> {
        let path = config.checkpoint_path.clone();
        if !path.exists() {
            log::info!("no checkpoint at {}, starting from scratch", path.display());
            return Ok(Self::new(config, hidden));
        }
        let state = ModelState::load(&path, config.learning_rate, config.weight_decay)?;
        let found = state.network.hidden();
        if found != hidden {
            bail!(
                "checkpoint {} has hidden layers {found:?} but the config asks for {hidden:?}",
                path.display()
            );
        }
        log::info!(
            "resuming from {} at epoch {}, step {}",
            path.display(),
            state.epoch,
            state.step
        );
        Ok(Self::with_state(config, state))
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// 中断フラグを取得
    pub fn interrupted(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupted)
    }

    pub fn state(&self) -> &ModelState {
        &self.state
    }

    /// 学習を実行
    ///
    /// 終了時（正常終了・中断・エラー）には必ず重みとチェックポイントを書く。
    pub fn train(&mut self, loader: &mut SampleLoader) -> Result<TrainSummary> {
        log::info!(
            "training: {} records/epoch, {} workers, batch {}, epochs {}..{}, lr {}, params {}",
            loader.records_per_epoch(),
            loader.worker_count(),
            self.config.batch_size,
            self.state.epoch,
            self.config.epochs,
            self.config.learning_rate,
            self.state.network.param_count()
        );

        let result = self.run_epochs(loader);
        if let Err(e) = &result {
            log::error!("training stopped: {e:#}");
        }
        let saved = self.save_all();
        let summary = result?;
        saved?;

        if let Some(logger) = &self.logger {
            logger.event(
                "finish",
                json!({
                    "epochs": summary.epochs_completed,
                    "steps": summary.steps,
                    "interrupted": summary.interrupted,
                }),
            );
            let _ = logger.flush();
        }
        Ok(summary)
    }

    fn run_epochs(&mut self, loader: &mut SampleLoader) -> Result<TrainSummary> {
        let mut summary = TrainSummary {
            epochs_completed: self.state.epoch,
            steps: self.state.step,
            ..TrainSummary::default()
        };

        for epoch in self.state.epoch..self.config.epochs as u64 {
            if self.interrupted.load(Ordering::SeqCst) {
                summary.interrupted = true;
                break;
            }

            let started = Instant::now();
            loader.start_epoch(epoch)?;
            let report = self.train_epoch(loader, epoch);
            let stats = loader.finish();
            let report = report?;
            let stats = stats?;

            summary.steps = self.state.step;
            if report.interrupted {
                log::warn!("interrupted in epoch {} at step {}", epoch + 1, self.state.step);
                summary.interrupted = true;
                break;
            }

            self.state.epoch = epoch + 1;
            summary.epochs_completed = self.state.epoch;
            summary.last_loss = Some(report.avg_loss);

            log::info!(
                "epoch {}/{}: loss={:.6} samples={} skipped={} draws={} ({:.1}s)",
                epoch + 1,
                self.config.epochs,
                report.avg_loss,
                report.samples,
                stats.skipped,
                stats.draws,
                started.elapsed().as_secs_f64()
            );
            if let Some(logger) = &self.logger {
                logger.event(
                    "epoch",
                    json!({
                        "epoch": epoch + 1,
                        "step": self.state.step,
                        "loss": report.avg_loss,
                        "samples": report.samples,
                        "batches": report.batches,
                        "produced": stats.produced,
                        "skipped": stats.skipped,
                        "draws": stats.draws,
                        "secs": started.elapsed().as_secs_f64(),
                    }),
                );
            }

            if self.state.epoch % self.config.save_freq as u64 == 0 {
                self.save_all()?;
            }
        }
        Ok(summary)
    }

    /// 1エポックの学習
    fn train_epoch(&mut self, loader: &mut SampleLoader, epoch: u64) -> Result<EpochReport> {
        let num_batches = loader.records_per_epoch().div_ceil(self.config.batch_size as u64);

        let progress = ProgressBar::new(num_batches);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} loss:{msg}")
                .context("invalid progress template")?,
        );

        let mut report = EpochReport::default();
        let mut total_loss = 0.0f64;
        let mut window_loss = 0.0f64;
        let mut window_samples = 0u64;

        loop {
            if self.interrupted.load(Ordering::SeqCst) {
                report.interrupted = true;
                break;
            }
            let Some(batch) = loader.next_batch(self.config.batch_size)? else {
                break;
            };

            self.state.network.zero_grad();
            let batch_loss = self.compute_batch_loss(&batch);
            self.state.optimizer.step(&mut self.state.network);
            self.state.step += 1;

            let n = batch.len() as u64;
            total_loss += f64::from(batch_loss) * n as f64;
            window_loss += f64::from(batch_loss) * n as f64;
            report.samples += n;
            report.batches += 1;
            window_samples += n;

            if self.state.step % self.config.report_freq as u64 == 0 {
                let avg = window_loss / window_samples as f64;
                progress.set_message(format!("{avg:.6}"));
                log::debug!("epoch {} step {}: loss={avg:.6}", epoch + 1, self.state.step);
                if let Some(logger) = &self.logger {
                    logger.event(
                        "step",
                        json!({
                            "epoch": epoch + 1,
                            "step": self.state.step,
                            "loss": avg,
                            "lr": self.state.optimizer.get_lr(),
                            "samples": window_samples,
                        }),
                    );
                }
                window_loss = 0.0;
                window_samples = 0;
            }
            progress.inc(1);
        }
        progress.finish_and_clear();

        if report.samples > 0 {
            report.avg_loss = (total_loss / report.samples as f64) as f32;
        }
        Ok(report)
    }

    /// バッチの平均損失を計算（勾配はバッチ平均で累積）
    fn compute_batch_loss(&mut self, batch: &[Sample]) -> f32 {
        let scale = 1.0 / batch.len() as f32;
        let mut total_loss = 0.0;

        for sample in batch {
            let (output, cache) = self.state.network.forward(&sample.features);
            let (loss, grad) =
                self.config.loss_type.loss_and_grad(output, sample.target, self.config.eval_scale);
            total_loss += loss;
            self.state.network.backward(&cache, grad * scale);
        }

        total_loss * scale
    }

    /// 現在の重みとチェックポイントを保存
    pub fn save_all(&self) -> Result<()> {
        export_network(
            &self.state.network,
            &self.config.output_path,
            self.config.format,
            self.config.element_type,
        )?;
        self.state.save(&self.config.checkpoint_path)?;
        log::info!(
            "saved weights to {} and checkpoint to {} (epoch {}, step {})",
            self.config.output_path.display(),
            self.config.checkpoint_path.display(),
            self.state.epoch,
            self.state.step
        );
        if let Some(logger) = &self.logger {
            logger.event(
                "save",
                json!({
                    "epoch": self.state.epoch,
                    "step": self.state.step,
                    "output": self.config.output_path.display().to_string(),
                }),
            );
        }
        Ok(())
    }
}

/// シグモイド関数
#[inline]
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}
