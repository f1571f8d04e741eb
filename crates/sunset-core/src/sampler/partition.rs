//! 決定的パーティション方式
//!
//! ワーカーごとに重ならない連続レコード範囲を割り当て、エポックごとに
//! 範囲内を1回ずつ読む。シャッフル有効時は `(seed, worker, epoch)` から
//! 決まる順列で訪問する。

use super::line_index::ShardRange;
use super::{MAX_LINE_BYTES, SampleSource, SourceStats, decode_line, stream_seed};
use crate::error::{MalformedRecord, SamplerError};
use crate::sample::Sample;
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};

/// 1区間分の読み込み状態
struct SegmentReader {
    range: ShardRange,
    reader: Option<BufReader<File>>,
    /// `reader` の現在位置（不明なら None）
    pos: Option<u64>,
}

impl SegmentReader {
    fn new(range: ShardRange) -> Self {
        Self {
            range,
            reader: None,
            pos: None,
        }
    }

    /// 区間内 `local` 番目のレコードの生バイトを読む
    ///
    /// 長すぎる行は読まずに `Ok(false)` を返す。
    fn read_record(&mut self, local: usize, buf: &mut Vec<u8>) -> Result<bool, SamplerError> {
        let line = self.range.records.start + local;
        let Some(span) = self.range.index.span(line) else {
            return Ok(false);
        };
        let len = span.end - span.start;
        if len > MAX_LINE_BYTES as u64 {
            return Ok(false);
        }

        let path = self.range.index.path();
        if self.reader.is_none() {
            let file = File::open(path).map_err(|e| SamplerError::io(path, e))?;
            self.reader = Some(BufReader::new(file));
            self.pos = Some(0);
        }
        let Some(reader) = self.reader.as_mut() else {
            return Ok(false);
        };

        if self.pos != Some(span.start) {
            reader
                .seek(SeekFrom::Start(span.start))
                .map_err(|e| SamplerError::io(path, e))?;
        }
        buf.clear();
        buf.resize(len as usize, 0);
        if let Err(e) = reader.read_exact(buf) {
            self.pos = None;
            return Err(SamplerError::io(path, e));
        }
        self.pos = Some(span.end);
        Ok(true)
    }
}

/// ワーカー1つ分のパーティションソース
pub struct PartitionSource {
    worker: usize,
    seed: u64,
    shuffle: bool,
    segments: Vec<SegmentReader>,
    /// 各区間先頭のローカル番号
    offsets: Vec<usize>,
    len: usize,
    order: Option<Vec<usize>>,
    cursor: usize,
    buf: Vec<u8>,
    stats: SourceStats,
}

impl PartitionSource {
    pub fn new(worker: usize, segments: Vec<ShardRange>, shuffle: bool, seed: u64) -> Self {
        let mut offsets = Vec::with_capacity(segments.len());
        let mut len = 0;
        for seg in &segments {
            offsets.push(len);
            len += seg.len();
        }
        let mut source = Self {
            worker,
            seed,
            shuffle,
            segments: segments.into_iter().map(SegmentReader::new).collect(),
            offsets,
            len,
            order: None,
            cursor: 0,
            buf: Vec::new(),
            stats: SourceStats::default(),
        };
        source.reset_order(0);
        source
    }

    /// 担当レコード数
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn reset_order(&mut self, epoch: u64) {
        self.cursor = 0;
        self.order = if self.shuffle && self.len > 1 {
            let mut rng = ChaCha8Rng::seed_from_u64(stream_seed(self.seed, self.worker, epoch));
            let mut order: Vec<usize> = (0..self.len).collect();
            order.shuffle(&mut rng);
            Some(order)
        } else {
            None
        };
    }

    /// ローカル番号を (区間, 区間内番号) へ変換
    fn locate(&self, local: usize) -> (usize, usize) {
        let seg = self.offsets.partition_point(|&o| o <= local) - 1;
        (seg, local - self.offsets[seg])
    }
}

impl SampleSource for PartitionSource {
    fn next_sample(&mut self) -> Result<Option<Sample>, SamplerError> {
        while self.cursor < self.len {
            let local = match &self.order {
                Some(order) => order[self.cursor],
                None => self.cursor,
            };
            self.cursor += 1;
            self.stats.draws += 1;

            let (seg, line) = self.locate(local);
            let result = if self.segments[seg].read_record(line, &mut self.buf)? {
                decode_line(&self.buf)
            } else {
                Err(MalformedRecord::TooLong(MAX_LINE_BYTES))
            };

            match result {
                Ok(sample) => {
                    self.stats.produced += 1;
                    return Ok(Some(sample));
                }
                Err(e) => {
                    self.stats.skipped += 1;
                    log::trace!(
                        "worker {}: skipping record {} of {}: {e}",
                        self.worker,
                        self.segments[seg].range.records.start + line,
                        self.segments[seg].range.path().display()
                    );
                }
            }
        }
        Ok(None)
    }

    fn restart(&mut self, epoch: u64) -> Result<(), SamplerError> {
        self.reset_order(epoch);
        Ok(())
    }

    fn stats(&self) -> SourceStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::line_index::CorpusIndex;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn corpus_file(dir: &TempDir, name: &str, scores: &[i32]) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = File::create(&path).unwrap();
        for s in scores {
            writeln!(f, "4k3/8/8/8/8/8/8/4K3 w - - 0 1|{s}|0").unwrap();
        }
        path
    }

    fn drain(source: &mut PartitionSource) -> Vec<i32> {
        let mut out = Vec::new();
        while let Some(sample) = source.next_sample().unwrap() {
            out.push((sample.target * 1024.0).round() as i32);
        }
        out
    }

    #[test]
    fn test_sequential_read_across_segments() {
        let dir = TempDir::new().unwrap();
        let a = corpus_file(&dir, "a.txt", &[1, 2, 3]);
        let b = corpus_file(&dir, "b.txt", &[4, 5]);
        let corpus = CorpusIndex::build(&[a, b]).unwrap();

        let mut source = PartitionSource::new(0, corpus.segments(1..5), false, 7);
        assert_eq!(source.len(), 4);
        assert_eq!(drain(&mut source), vec![2, 3, 4, 5]);
        assert_eq!(source.next_sample().unwrap(), None);

        let stats = source.stats();
        assert_eq!(stats.produced, 4);
        assert_eq!(stats.skipped, 0);
    }

    #[test]
    fn test_shuffle_visits_same_set() {
        let dir = TempDir::new().unwrap();
        let scores: Vec<i32> = (1..=50).collect();
        let a = corpus_file(&dir, "a.txt", &scores);
        let corpus = CorpusIndex::build(&[a]).unwrap();

        let mut source = PartitionSource::new(1, corpus.segments(0..50), true, 42);
        let first = drain(&mut source);
        source.restart(1).unwrap();
        let second = drain(&mut source);

        assert_ne!(first, scores);
        assert_ne!(first, second);
        let mut sorted = first.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, scores);
        let mut sorted = second.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, scores);

        // 同じエポックなら同じ順序
        source.restart(1).unwrap();
        assert_eq!(drain(&mut source), second);
    }

    #[test]
    fn test_malformed_lines_are_skipped_and_counted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mixed.txt");
        let mut f = File::create(&path).unwrap();
        writeln!(f, "4k3/8/8/8/8/8/8/4K3 w - - 0 1|10|0").unwrap();
        writeln!(f, "garbage").unwrap();
        writeln!(f, "4k3/8/8/8/8/8/8/4K3 w - - 0 1|oops|0").unwrap();
        f.write_all(&[0xff, 0xfe, b'|', b'1', b'|', b'2', b'\n']).unwrap();
        writeln!(f, "{}", "x".repeat(70_000)).unwrap();
        writeln!(f, "4k3/8/8/8/8/8/8/4K3 b - - 0 1|20|0").unwrap();
        drop(f);

        let corpus = CorpusIndex::build(&[path]).unwrap();
        let mut source = PartitionSource::new(0, corpus.segments(0..corpus.total()), false, 0);
        assert_eq!(drain(&mut source), vec![10, 20]);
        let stats = source.stats();
        assert_eq!(stats.produced, 2);
        assert_eq!(stats.skipped, 4);
        assert_eq!(stats.draws, 6);
    }

    #[test]
    fn test_empty_range_ends_immediately() {
        let mut source = PartitionSource::new(3, Vec::new(), true, 0);
        assert!(source.is_empty());
        assert_eq!(source.next_sample().unwrap(), None);
        source.restart(5).unwrap();
        assert_eq!(source.next_sample().unwrap(), None);
    }
}
