//! 評価関数の学習ツール
//!
//! コーパスから `768 -> hidden... -> 1` のモデルを学習し、重みを書き出す。
//!
//! # 使用例
//!
//! ```bash
//! cargo run -p tools --release --bin train_nnue -- train.toml
//!
//! # 設定ファイルの一部を上書き
//! RUST_LOG=info cargo run -p tools --release --bin train_nnue -- \
//!   train.toml --epochs 20 --workers 8
//! ```
//!
//! チェックポイントがあればそこから再開する。Ctrl-C で現在のバッチを終えて
//! 重みとチェックポイントを書いてから終了する。

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::Ordering;

use sunset_core::ShardPlan;
use tools::Config;
use tools::nnue_trainer::{
    SampleLoader, StructuredLogger, TrainConfig, Trainer, check_existing_artifact,
};

/// チャネルに溜めるサンプル数（バッチ何個分か）
const PREFETCH_BATCHES: usize = 4;

#[derive(Parser)]
#[command(
    name = "train-nnue",
    version,
    about = "評価関数の学習ツール\n\nTOML 設定に従ってコーパスからモデルを学習する"
)]
struct Cli {
    /// 設定ファイル（TOML）
    config: PathBuf,

    /// エポック数（設定ファイルより優先）
    #[arg(long)]
    epochs: Option<usize>,

    /// ワーカー数（設定ファイルより優先）
    #[arg(long)]
    workers: Option<usize>,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)?;
    if let Some(epochs) = cli.epochs {
        config.training.epochs = epochs;
    }
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    config.validate().context("Invalid command-line override")?;

    let policy = config.sampling.policy()?;
    let plan = ShardPlan::from_pattern(&config.corpus, policy, config.workers, config.seed)
        .with_context(|| format!("Failed to prepare corpus {}", config.corpus))?;
    let mut loader =
        SampleLoader::new(&plan, config.training.batch_size.saturating_mul(PREFETCH_BATCHES))?;

    let train_config = TrainConfig::from_config(&config);
    let mut trainer = Trainer::resume_or_new(train_config, &config.model.hidden)?;
    if let Some(path) = &config.log_path {
        let logger = StructuredLogger::new(path)
            .with_context(|| format!("Failed to open structured log {path}"))?;
        trainer = trainer.with_logger(logger);
    }

    // 強制終了で書きかけになったアーティファクトは作り直す
    if let Some(reason) = check_existing_artifact(
        &trainer.state().network,
        &config.output_path,
        config.export.format,
    )? {
        log::warn!(
            "{} is incomplete ({reason}); regenerating from the current model",
            config.output_path.display()
        );
        trainer.save_all()?;
    }

    let interrupted = trainer.interrupted();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupted, finishing current batch...");
        interrupted.store(true, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl-C handler")?;

    let summary = trainer.train(&mut loader)?;

    eprintln!(
        "\n{} after {} epochs ({} steps); weights in {}",
        if summary.interrupted {
            "Stopped"
        } else {
            "Training complete"
        },
        summary.epochs_completed,
        summary.steps,
        config.output_path.display()
    );
    Ok(())
}
