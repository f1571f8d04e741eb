//! コーパスのシャーディングとサンプル供給
//!
//! 2つの方式を同じ [`SampleSource`] として扱う。
//!
//! - [`SamplingPolicy::Partition`]: 全レコードをワーカー数で等分し、重複も漏れもなく読む
//! - [`SamplingPolicy::RandomOffset`]: ランダムなバイトオフセットから行を拾う近似方式
//!
//! 担当範囲の終端は `Ok(None)`（エラーではない）。

mod line_index;
mod partition;
mod random_offset;

pub use line_index::{CorpusIndex, LineIndex, ShardRange};
pub use partition::PartitionSource;
pub use random_offset::{MAX_DRAWS_FACTOR, RandomOffsetSource};

use crate::error::{MalformedRecord, SamplerError};
use crate::sample::Sample;
use std::ops::Range;
use std::path::{Path, PathBuf};

/// 1行の最大バイト数（改行込み）
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// ソースごとの集計
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    /// 返したサンプル数
    pub produced: u64,
    /// 壊れていて読み捨てた行数
    pub skipped: u64,
    /// 読んだ（引いた）行数
    pub draws: u64,
}

impl SourceStats {
    pub fn merge(&mut self, other: &SourceStats) {
        self.produced += other.produced;
        self.skipped += other.skipped;
        self.draws += other.draws;
    }
}

/// 「次のサンプルを返すか、終端を返す」だけのサンプル供給源
pub trait SampleSource: Send {
    /// 次のサンプル。担当分を読み切ったら `Ok(None)`
    fn next_sample(&mut self) -> Result<Option<Sample>, SamplerError>;

    /// エポックの先頭へ戻る
    fn restart(&mut self, epoch: u64) -> Result<(), SamplerError>;

    fn stats(&self) -> SourceStats;
}

/// サンプリング方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingPolicy {
    Partition { shuffle: bool },
    RandomOffset { samples_per_epoch: u64 },
}

/// ワーカーが読む対象
#[derive(Debug, Clone)]
pub enum ShardSource {
    /// ファイルごとの連続レコード範囲（複数ファイルにまたがる場合は複数）
    Partition(Vec<ShardRange>),
    /// 1ファイルへのランダムオフセットカーソル
    RandomOffset { path: PathBuf, budget: u64 },
}

/// ワーカー番号と読む対象の組
#[derive(Debug, Clone)]
pub struct ShardAssignment {
    pub worker: usize,
    pub source: ShardSource,
}

impl ShardAssignment {
    /// 1エポックで読む（返す）レコード数
    pub fn records(&self) -> u64 {
        match &self.source {
            ShardSource::Partition(segments) => segments.iter().map(|s| s.len() as u64).sum(),
            ShardSource::RandomOffset { budget, .. } => *budget,
        }
    }
}

/// 全ワーカー分の割り当て
#[derive(Debug, Clone)]
pub struct ShardPlan {
    policy: SamplingPolicy,
    seed: u64,
    files: Vec<PathBuf>,
    assignments: Vec<ShardAssignment>,
    total_records: u64,
}

impl ShardPlan {
    /// ソート済みのコーパスファイル列から割り当てを作る
    pub fn build(
        files: &[PathBuf],
        policy: SamplingPolicy,
        workers: usize,
        seed: u64,
    ) -> Result<ShardPlan, SamplerError> {
        if workers == 0 {
            return Err(SamplerError::NoWorkers);
        }
        if files.is_empty() {
            return Err(SamplerError::NoCorpus(String::new()));
        }

        let (assignments, total_records) = match policy {
            SamplingPolicy::Partition { .. } => {
                let corpus = CorpusIndex::build(files)?;
                let total = corpus.total();
                let assignments = partition_ranges(total, workers)?
                    .into_iter()
                    .enumerate()
                    .map(|(worker, range)| ShardAssignment {
                        worker,
                        source: ShardSource::Partition(corpus.segments(range)),
                    })
                    .collect();
                (assignments, total as u64)
            }
            SamplingPolicy::RandomOffset { samples_per_epoch } => {
                for path in files {
                    std::fs::metadata(path).map_err(|e| SamplerError::io(path, e))?;
                }
                let assignments = (0..workers)
                    .map(|worker| ShardAssignment {
                        worker,
                        source: ShardSource::RandomOffset {
                            path: files[worker % files.len()].clone(),
                            budget: worker_budget(samples_per_epoch, workers, worker),
                        },
                    })
                    .collect();
                (assignments, samples_per_epoch)
            }
        };

        log::info!(
            "shard plan: {} files, {} workers, {} records per epoch ({:?})",
            files.len(),
            workers,
            total_records,
            policy
        );
        Ok(ShardPlan {
            policy,
            seed,
            files: files.to_vec(),
            assignments,
            total_records,
        })
    }

    /// glob パターンを展開して割り当てを作る
    pub fn from_pattern(
        pattern: &str,
        policy: SamplingPolicy,
        workers: usize,
        seed: u64,
    ) -> Result<ShardPlan, SamplerError> {
        let files = resolve_corpus(pattern)?;
        ShardPlan::build(&files, policy, workers, seed)
    }

    pub fn policy(&self) -> SamplingPolicy {
        self.policy
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn assignments(&self) -> &[ShardAssignment] {
        &self.assignments
    }

    /// 1エポックの総レコード数（ランダムオフセットでは目標サンプル数）
    pub fn total_records(&self) -> u64 {
        self.total_records
    }

    /// ワーカーごとのソースを開く
    pub fn open_sources(&self) -> Result<Vec<Box<dyn SampleSource>>, SamplerError> {
        let shuffle = matches!(self.policy, SamplingPolicy::Partition { shuffle: true });
        self.assignments
            .iter()
            .map(|a| -> Result<Box<dyn SampleSource>, SamplerError> {
                match &a.source {
                    ShardSource::Partition(segments) => Ok(Box::new(PartitionSource::new(
                        a.worker,
                        segments.clone(),
                        shuffle,
                        self.seed,
                    ))),
                    ShardSource::RandomOffset { path, budget } => Ok(Box::new(
                        RandomOffsetSource::open(path, a.worker, *budget, self.seed)?,
                    )),
                }
            })
            .collect()
    }
}

/// コーパスの glob パターンを展開する（結果はソート済み）
///
/// パターンがそのまま存在するファイルを指す場合も1件として扱う。
pub fn resolve_corpus(pattern: &str) -> Result<Vec<PathBuf>, SamplerError> {
    let entries = glob::glob(pattern).map_err(|e| SamplerError::Pattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })?;

    let mut files = Vec::new();
    for entry in entries {
        match entry {
            Ok(path) if path.is_file() => files.push(path),
            Ok(_) => {}
            Err(e) => {
                let path = e.path().to_path_buf();
                return Err(SamplerError::io(path, e.into_error()));
            }
        }
    }
    if files.is_empty() {
        return Err(SamplerError::NoCorpus(pattern.to_string()));
    }
    files.sort();
    Ok(files)
}

/// `N` 件を `W` ワーカーへ連続範囲で分ける
///
/// `c = ceil(N / W)` として worker `w` は `[min(w*c, N), min((w+1)*c, N))`。
pub fn partition_ranges(total: usize, workers: usize) -> Result<Vec<Range<usize>>, SamplerError> {
    if workers == 0 {
        return Err(SamplerError::NoWorkers);
    }
    let chunk = total.div_ceil(workers);
    Ok((0..workers)
        .map(|w| (w * chunk).min(total)..((w + 1) * chunk).min(total))
        .collect())
}

/// ランダムオフセット方式のワーカー別予算（余りは先頭のワーカーへ）
pub fn worker_budget(samples_per_epoch: u64, workers: usize, worker: usize) -> u64 {
    let workers = workers as u64;
    let base = samples_per_epoch / workers;
    let rem = samples_per_epoch % workers;
    base + u64::from((worker as u64) < rem)
}

/// `(seed, worker, epoch)` から乱数シードを導出する（splitmix64）
pub fn stream_seed(seed: u64, worker: usize, epoch: u64) -> u64 {
    let mut z = seed
        ^ (worker as u64).wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ epoch.wrapping_add(1).wrapping_mul(0xD1B5_4A32_D192_ED03);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// 行バイト列をサンプルへ変換する
pub(crate) fn decode_line(bytes: &[u8]) -> Result<Sample, MalformedRecord> {
    if bytes.len() > MAX_LINE_BYTES {
        return Err(MalformedRecord::TooLong(MAX_LINE_BYTES));
    }
    let line = std::str::from_utf8(bytes).map_err(|_| MalformedRecord::InvalidUtf8)?;
    Sample::from_line(line)
}

/// パスの表示用短縮（ファイル名のみ）
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
