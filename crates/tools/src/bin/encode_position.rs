//! 1局面の特徴量を表示する（インデックス配置の確認用）
//!
//! ```bash
//! # コーパスの1行（手番から反転を決める）
//! cargo run -p tools --bin encode_position -- 'rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1|35|20'
//!
//! # 駒配置だけ
//! cargo run -p tools --bin encode_position -- '8/8/8/8/8/8/8/K6k' --mirror
//! ```

use anyhow::{Context, Result};
use clap::Parser;

use sunset_core::features::NUM_PLANES;
use sunset_core::{PieceType, PositionRecord, Square, encode, target_from_scores};

#[derive(Parser)]
#[command(
    name = "encode-position",
    version,
    about = "コーパス行または駒配置文字列を 768 次元特徴量に変換して表示する"
)]
struct Cli {
    /// コーパス行（`<placement> <meta>|<score1>|<score2>`）または駒配置のみ
    input: String,

    /// 盤面を上下反転して色を入れ替える（駒配置のみのとき有効）
    #[arg(long)]
    mirror: bool,
}

fn plane_label(plane: usize) -> String {
    let side = if plane < 6 { "mover" } else { "opponent" };
    let piece = PieceType::ALL[plane % 6];
    format!("{side} {piece:?}").to_lowercase()
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let (placement, mirror, target) = if cli.input.contains('|') {
        let record = PositionRecord::parse(&cli.input).context("Malformed corpus line")?;
        if cli.mirror {
            log::warn!("--mirror is ignored for corpus lines; side to move decides");
        }
        let target = target_from_scores(record.score1, record.score2);
        (record.placement, record.mirror(), Some((record, target)))
    } else {
        (cli.input.trim(), cli.mirror, None)
    };

    let features = encode(placement, mirror).context("Invalid placement")?;
    let active: Vec<usize> = features.active_indices().collect();

    println!("placement: {placement}");
    println!("mirror:    {mirror}");
    if let Some((record, target)) = target {
        println!(
            "scores:    {} + 0.5 * {} -> target {target}",
            record.score1, record.score2
        );
    }
    println!("active:    {} of {}", active.len(), features.len());
    println!("indices:   {active:?}");

    for plane in 0..NUM_PLANES {
        let squares: Vec<String> = active
            .iter()
            .filter(|&&idx| idx / 64 == plane)
            .filter_map(|&idx| Square::from_index(idx % 64))
            .map(|sq| sq.to_string())
            .collect();
        if !squares.is_empty() {
            println!("  plane {plane:2} {:<16} {}", plane_label(plane), squares.join(" "));
        }
    }
    Ok(())
}
