//! ランダムオフセット方式
//!
//! ファイル内の一様なバイトオフセットを引き、そのオフセットを含む行を
//! 丸ごと読む。長い行ほど選ばれやすい近似サンプリング。
//!
//! 壊れた行は予算に数えない。予算の 8 倍引いても埋まらなければ打ち切る。

use super::{MAX_LINE_BYTES, SampleSource, SourceStats, decode_line, stream_seed};
use crate::error::{MalformedRecord, SamplerError};
use crate::sample::Sample;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// 行頭を探すときに1回で戻るバイト数
const SCAN_CHUNK: usize = 4096;

/// 予算に対する最大試行回数の倍率
pub const MAX_DRAWS_FACTOR: u64 = 8;

pub struct RandomOffsetSource {
    worker: usize,
    seed: u64,
    path: PathBuf,
    file: File,
    file_len: u64,
    budget: u64,
    rng: ChaCha8Rng,
    epoch_produced: u64,
    epoch_draws: u64,
    chunk: Vec<u8>,
    line: Vec<u8>,
    stats: SourceStats,
}

impl RandomOffsetSource {
    /// `budget` はこのワーカーが1エポックで返すサンプル数
    pub fn open(path: &Path, worker: usize, budget: u64, seed: u64) -> Result<Self, SamplerError> {
        let file = File::open(path).map_err(|e| SamplerError::io(path, e))?;
        let file_len = file.metadata().map_err(|e| SamplerError::io(path, e))?.len();
        Ok(Self {
            worker,
            seed,
            path: path.to_path_buf(),
            file,
            file_len,
            budget,
            rng: ChaCha8Rng::seed_from_u64(stream_seed(seed, worker, 0)),
            epoch_produced: 0,
            epoch_draws: 0,
            chunk: vec![0; SCAN_CHUNK],
            line: Vec::new(),
            stats: SourceStats::default(),
        })
    }

    fn max_draws(&self) -> u64 {
        self.budget.saturating_mul(MAX_DRAWS_FACTOR)
    }

    fn io_err(&self, e: std::io::Error) -> SamplerError {
        SamplerError::io(&self.path, e)
    }

    /// `offset` を含む行の先頭を後方走査で探す
    ///
    /// 行頭が `MAX_LINE_BYTES` より前にある場合は `None`。
    fn find_line_start(&mut self, offset: u64) -> Result<Option<u64>, SamplerError> {
        let mut end = offset;
        while end > 0 {
            if offset - end > MAX_LINE_BYTES as u64 {
                return Ok(None);
            }
            let start = end.saturating_sub(SCAN_CHUNK as u64);
            let n = (end - start) as usize;
            self.file
                .seek(SeekFrom::Start(start))
                .map_err(|e| self.io_err(e))?;
            self.file
                .read_exact(&mut self.chunk[..n])
                .map_err(|e| self.io_err(e))?;
            if let Some(i) = self.chunk[..n].iter().rposition(|&b| b == b'\n') {
                let line_start = start + i as u64 + 1;
                if offset - line_start > MAX_LINE_BYTES as u64 {
                    return Ok(None);
                }
                return Ok(Some(line_start));
            }
            end = start;
        }
        if offset > MAX_LINE_BYTES as u64 {
            return Ok(None);
        }
        Ok(Some(0))
    }

    /// `start` から改行（含む）またはファイル末尾までを `self.line` に読む
    ///
    /// 上限を超えたら `false`。
    fn read_line_from(&mut self, start: u64) -> Result<bool, SamplerError> {
        self.line.clear();
        self.file
            .seek(SeekFrom::Start(start))
            .map_err(|e| self.io_err(e))?;
        loop {
            let n = self.file.read(&mut self.chunk).map_err(|e| self.io_err(e))?;
            if n == 0 {
                return Ok(self.line.len() <= MAX_LINE_BYTES);
            }
            if let Some(i) = self.chunk[..n].iter().position(|&b| b == b'\n') {
                self.line.extend_from_slice(&self.chunk[..=i]);
                return Ok(self.line.len() <= MAX_LINE_BYTES);
            }
            self.line.extend_from_slice(&self.chunk[..n]);
            if self.line.len() > MAX_LINE_BYTES {
                return Ok(false);
            }
        }
    }

    /// 1回引いて行をデコードする
    fn draw(&mut self) -> Result<Result<Sample, MalformedRecord>, SamplerError> {
        let offset = self.rng.random_range(0..self.file_len);
        let Some(start) = self.find_line_start(offset)? else {
            return Ok(Err(MalformedRecord::TooLong(MAX_LINE_BYTES)));
        };
        if !self.read_line_from(start)? {
            return Ok(Err(MalformedRecord::TooLong(MAX_LINE_BYTES)));
        }
        Ok(decode_line(&self.line))
    }
}

impl SampleSource for RandomOffsetSource {
    fn next_sample(&mut self) -> Result<Option<Sample>, SamplerError> {
        if self.file_len == 0 {
            return Ok(None);
        }
        while self.epoch_produced < self.budget && self.epoch_draws < self.max_draws() {
            self.epoch_draws += 1;
            self.stats.draws += 1;
            match self.draw()? {
                Ok(sample) => {
                    self.epoch_produced += 1;
                    self.stats.produced += 1;
                    return Ok(Some(sample));
                }
                Err(e) => {
                    self.stats.skipped += 1;
                    log::trace!("worker {}: discarding draw in {}: {e}", self.worker, self.path.display());
                }
            }
        }
        if self.epoch_produced < self.budget {
            log::debug!(
                "worker {}: stopped after {} draws with {}/{} samples",
                self.worker,
                self.epoch_draws,
                self.epoch_produced,
                self.budget
            );
        }
        Ok(None)
    }

    fn restart(&mut self, epoch: u64) -> Result<(), SamplerError> {
        self.rng = ChaCha8Rng::seed_from_u64(stream_seed(self.seed, self.worker, epoch));
        self.epoch_produced = 0;
        self.epoch_draws = 0;
        Ok(())
    }

    fn stats(&self) -> SourceStats {
        self.stats
    }
}
