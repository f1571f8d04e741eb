//! チェックポイントから重みアーティファクトを書き出す
//!
//! ```bash
//! cargo run -p tools --release --bin export_weights -- \
//!   --checkpoint checkpoint.bin --output net.npy --format plain
//! ```

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use sunset_core::export::{ElementType, ExportFormat};
use tools::nnue_trainer::export_checkpoint;

#[derive(Parser)]
#[command(
    name = "export-weights",
    version,
    about = "チェックポイントの重みを宣言形式または平坦形式で書き出す"
)]
struct Cli {
    /// 学習のチェックポイント
    #[arg(long)]
    checkpoint: PathBuf,

    /// 出力ファイル（既存なら上書き）
    #[arg(short, long)]
    output: PathBuf,

    /// 出力形式（declarations | plain）
    #[arg(long, default_value_t = ExportFormat::Declarations)]
    format: ExportFormat,

    /// 宣言形式の要素型（f32 | f64）
    #[arg(long, default_value_t = ElementType::F32)]
    element_type: ElementType,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let state = export_checkpoint(&cli.checkpoint, &cli.output, cli.format, cli.element_type)?;
    eprintln!(
        "Exported {} layers {:?} (epoch {}, step {}) to {} as {}",
        state.network.layers.len(),
        state.network.dims(),
        state.epoch,
        state.step,
        cli.output.display(),
        cli.format
    );
    Ok(())
}
