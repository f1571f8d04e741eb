//! 設定ファイルのコーパスとサンプリング方式からワーカー割り当てを表示する
//!
//! ```bash
//! cargo run -p tools --release --bin shard_plan -- train.toml --workers 8
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;

use sunset_core::ShardPlan;
use sunset_core::sampler::{ShardSource, display_name};
use tools::Config;

#[derive(Parser)]
#[command(
    name = "shard-plan",
    version,
    about = "ワーカーごとのシャード割り当てとレコード数を表示する"
)]
struct Cli {
    /// 設定ファイル（TOML）
    config: PathBuf,

    /// ワーカー数（設定ファイルより優先）
    #[arg(long)]
    workers: Option<usize>,

    /// JSON で出力する
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)?;
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    config.validate()?;

    let policy = config.sampling.policy()?;
    let plan = ShardPlan::from_pattern(&config.corpus, policy, config.workers, config.seed)
        .with_context(|| format!("Failed to prepare corpus {}", config.corpus))?;

    if cli.json {
        let workers: Vec<serde_json::Value> = plan
            .assignments()
            .iter()
            .map(|a| match &a.source {
                ShardSource::Partition(segments) => {
                    let segments: Vec<serde_json::Value> = segments
                        .iter()
                        .map(|s| {
                            json!({
                                "file": s.path().display().to_string(),
                                "start": s.records.start,
                                "end": s.records.end,
                            })
                        })
                        .collect();
                    json!({
                        "worker": a.worker,
                        "records": a.records(),
                        "segments": segments,
                    })
                }
                ShardSource::RandomOffset { path, budget } => json!({
                    "worker": a.worker,
                    "records": budget,
                    "file": path.display().to_string(),
                }),
            })
            .collect();
        let files: Vec<String> = plan.files().iter().map(|p| p.display().to_string()).collect();
        let out = json!({
            "policy": format!("{:?}", plan.policy()),
            "files": files,
            "total_records": plan.total_records(),
            "workers": workers,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("policy:  {:?}", plan.policy());
    println!("files:   {}", plan.files().len());
    println!("records: {} per epoch", plan.total_records());
    for a in plan.assignments() {
        match &a.source {
            ShardSource::Partition(segments) => {
                println!("worker {:3}: {:>10} records", a.worker, a.records());
                for s in segments {
                    println!(
                        "    {} [{}..{})",
                        display_name(s.path()),
                        s.records.start,
                        s.records.end
                    );
                }
            }
            ShardSource::RandomOffset { path, budget } => {
                println!(
                    "worker {:3}: {:>10} samples from {} (random offsets)",
                    a.worker,
                    budget,
                    display_name(path)
                );
            }
        }
    }
    Ok(())
}
