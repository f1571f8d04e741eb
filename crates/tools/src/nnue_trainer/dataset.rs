//! 学習データの供給
//!
//! ワーカーごとに1スレッドを立て、各スレッドが自分の [`SampleSource`] から
//! サンプルを読み出して有界チャネルへ送る。学習ループ側はチャネルから
//! バッチを組み立てるだけで、モデルには触れさせない。

use anyhow::{Context, Result, bail};
use crossbeam_channel::{Receiver, bounded};
use std::thread::JoinHandle;
use sunset_core::sampler::{SampleSource, ShardPlan, SourceStats};
use sunset_core::Sample;

/// ワーカーから学習ループへのメッセージ
enum WorkerMsg {
    Sample(Sample),
    Err { worker: usize, message: String },
}

/// エポック単位のマルチスレッドローダ
pub struct SampleLoader {
    /// スレッド実行中は `None`（スレッドが所有している）
    sources: Vec<Option<Box<dyn SampleSource>>>,
    prefetch: usize,
    records_per_epoch: u64,
    rx: Option<Receiver<WorkerMsg>>,
    workers: Vec<(usize, JoinHandle<Box<dyn SampleSource>>)>,
    /// 直前の `finish` までに報告した累計
    reported: SourceStats,
}

impl SampleLoader {
    /// 割り当てからワーカーごとのソースを開く
    ///
    /// `prefetch` はチャネルに溜められるサンプル数。
    pub fn new(plan: &ShardPlan, prefetch: usize) -> Result<Self> {
        let sources = plan
            .open_sources()
            .context("Failed to open corpus shards")?
            .into_iter()
            .map(Some)
            .collect();
        Ok(Self::from_sources(sources, prefetch, plan.total_records()))
    }

    fn from_sources(
        sources: Vec<Option<Box<dyn SampleSource>>>,
        prefetch: usize,
        records_per_epoch: u64,
    ) -> Self {
        Self {
            sources,
            prefetch: prefetch.max(1),
            records_per_epoch,
            rx: None,
            workers: Vec::new(),
            reported: SourceStats::default(),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.sources.len()
    }

    /// 1エポックで読む見込みのレコード数
    pub fn records_per_epoch(&self) -> u64 {
        self.records_per_epoch
    }

    /// エポックを開始する（前のエポックが残っていれば先に片付ける）
    pub fn start_epoch(&mut self, epoch: u64) -> Result<()> {
        if self.rx.is_some() {
            self.finish()?;
        }

        let (tx, rx) = bounded::<WorkerMsg>(self.prefetch);
        for (worker, slot) in self.sources.iter_mut().enumerate() {
            let Some(mut source) = slot.take() else {
                bail!("sampler worker {worker} was lost in a previous epoch");
            };
            if let Err(e) = source.restart(epoch) {
                *slot = Some(source);
                return Err(e).with_context(|| format!("Failed to restart worker {worker}"));
            }

            let tx = tx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("sampler-{worker}"))
                .spawn(move || {
                    loop {
                        match source.next_sample() {
                            Ok(Some(sample)) => {
                                if tx.send(WorkerMsg::Sample(sample)).is_err() {
                                    break; // receiver dropped
                                }
                            }
                            Ok(None) => break,
                            Err(e) => {
                                let _ = tx.send(WorkerMsg::Err {
                                    worker,
                                    message: e.to_string(),
                                });
                                break;
                            }
                        }
                    }
                    source
                })
                .with_context(|| format!("Failed to spawn sampler worker {worker}"))?;
            self.workers.push((worker, handle));
        }
        self.rx = Some(rx);
        log::debug!("epoch {epoch}: started {} sampler workers", self.workers.len());
        Ok(())
    }

    /// 次のバッチ（最大 `batch_size` 件）。全ワーカーが読み切ったら `None`
    ///
    /// ワーカーの I/O エラーはここでエラーとして返す。
    pub fn next_batch(&mut self, batch_size: usize) -> Result<Option<Vec<Sample>>> {
        let Some(rx) = &self.rx else {
            return Ok(None);
        };
        let mut batch = Vec::with_capacity(batch_size);
        while batch.len() < batch_size {
            match rx.recv() {
                Ok(WorkerMsg::Sample(sample)) => batch.push(sample),
                Ok(WorkerMsg::Err { worker, message }) => {
                    bail!("sampler worker {worker} failed: {message}")
                }
                Err(_) => break,
            }
        }
        Ok((!batch.is_empty()).then_some(batch))
    }

    /// エポックを終了してスレッドを回収し、このエポックの集計を返す
    ///
    /// 読み残しがあっても構わない（ワーカーは送信に失敗して止まる）。
    pub fn finish(&mut self) -> Result<SourceStats> {
        self.rx.take();
        let mut lost = Vec::new();
        for (worker, handle) in self.workers.drain(..) {
            match handle.join() {
                Ok(source) => self.sources[worker] = Some(source),
                Err(_) => lost.push(worker),
            }
        }
        if !lost.is_empty() {
            bail!("sampler workers {lost:?} panicked");
        }

        let total = self.stats();
        let epoch = SourceStats {
            produced: total.produced - self.reported.produced,
            skipped: total.skipped - self.reported.skipped,
            draws: total.draws - self.reported.draws,
        };
        self.reported = total;
        Ok(epoch)
    }

    /// 全ワーカーの累計（スレッド実行中のソースは含まない）
    pub fn stats(&self) -> SourceStats {
        let mut total = SourceStats::default();
        for source in self.sources.iter().flatten() {
            total.merge(&source.stats());
        }
        total
    }
}

impl Drop for SampleLoader {
    fn drop(&mut self) {
        let _ = self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use sunset_core::sampler::SamplingPolicy;
    use sunset_core::SamplerError;
    use tempfile::TempDir;

    /// 目標値が 0, 1, 2, ... になるコーパス
    fn write_corpus(dir: &TempDir, name: &str, range: std::ops::Range<i32>) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        for i in range {
            writeln!(f, "4k3/8/8/8/8/8/8/4K3 w - - 0 1|{}|0", i * 1024).unwrap();
        }
        path
    }

    fn drain(loader: &mut SampleLoader, batch_size: usize) -> Vec<i32> {
        let mut targets = Vec::new();
        while let Some(batch) = loader.next_batch(batch_size).unwrap() {
            assert!(batch.len() <= batch_size);
            targets.extend(batch.iter().map(|s| s.target as i32));
        }
        targets.sort_unstable();
        targets
    }

    #[test]
    fn test_partition_epoch_visits_every_record_once() {
        let dir = TempDir::new().unwrap();
        let files = vec![
            write_corpus(&dir, "a.txt", 0..7),
            write_corpus(&dir, "b.txt", 7..20),
        ];
        let plan = ShardPlan::build(&files, SamplingPolicy::Partition { shuffle: true }, 3, 1)
            .unwrap();
        let mut loader = SampleLoader::new(&plan, 4).unwrap();
        assert_eq!(loader.worker_count(), 3);
        assert_eq!(loader.records_per_epoch(), 20);

        for epoch in 0..2 {
            loader.start_epoch(epoch).unwrap();
            assert_eq!(drain(&mut loader, 6), (0..20).collect::<Vec<_>>());
            let stats = loader.finish().unwrap();
            assert_eq!(stats.produced, 20);
            assert_eq!(stats.skipped, 0);
        }
        assert_eq!(loader.stats().produced, 40);
    }

    #[test]
    fn test_malformed_lines_are_counted_not_returned() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mixed.txt");
        std::fs::write(
            &path,
            "4k3/8/8/8/8/8/8/4K3 w|1024|0\ngarbage\n4k3/8/8/8/8/8/8/4K3 b|2048|0\nx w|1|2\n",
        )
        .unwrap();
        let plan =
            ShardPlan::build(&[path], SamplingPolicy::Partition { shuffle: false }, 2, 0).unwrap();
        let mut loader = SampleLoader::new(&plan, 1).unwrap();
        loader.start_epoch(0).unwrap();
        assert_eq!(drain(&mut loader, 3), vec![1, 2]);
        let stats = loader.finish().unwrap();
        assert_eq!(stats.produced, 2);
        assert_eq!(stats.skipped, 2);
    }

    #[test]
    fn test_random_offset_epoch_meets_budget() {
        let dir = TempDir::new().unwrap();
        let files = vec![write_corpus(&dir, "a.txt", 0..50)];
        let policy = SamplingPolicy::RandomOffset {
            samples_per_epoch: 25,
        };
        let plan = ShardPlan::build(&files, policy, 2, 9).unwrap();
        let mut loader = SampleLoader::new(&plan, 8).unwrap();
        loader.start_epoch(0).unwrap();
        let targets = drain(&mut loader, 10);
        assert_eq!(targets.len(), 25);
        assert!(targets.iter().all(|t| (0..50).contains(t)));
        assert_eq!(loader.finish().unwrap().produced, 25);
    }

    #[test]
    fn test_finish_mid_epoch_does_not_block() {
        let dir = TempDir::new().unwrap();
        let files = vec![write_corpus(&dir, "a.txt", 0..200)];
        let plan = ShardPlan::build(&files, SamplingPolicy::Partition { shuffle: false }, 2, 0)
            .unwrap();
        let mut loader = SampleLoader::new(&plan, 1).unwrap();
        loader.start_epoch(0).unwrap();
        assert_eq!(loader.next_batch(3).unwrap().unwrap().len(), 3);
        let stats = loader.finish().unwrap();
        assert!(stats.produced < 200);

        // 次のエポックは最初から読み直せる
        loader.start_epoch(1).unwrap();
        assert_eq!(drain(&mut loader, 64).len(), 200);
    }

    /// 途中で I/O エラーを返すソース
    struct FailingSource {
        left: u32,
        stats: SourceStats,
    }

    impl SampleSource for FailingSource {
        fn next_sample(&mut self) -> Result<Option<Sample>, SamplerError> {
            if self.left == 0 {
                return Err(SamplerError::NoCorpus("gone".to_string()));
            }
            self.left -= 1;
            self.stats.produced += 1;
            Ok(Some(Sample::from_line("8/8/8/8/8/8/8/8 w|0|0").unwrap()))
        }

        fn restart(&mut self, _epoch: u64) -> Result<(), SamplerError> {
            self.left = 2;
            Ok(())
        }

        fn stats(&self) -> SourceStats {
            self.stats
        }
    }

    #[test]
    fn test_worker_error_surfaces_in_next_batch() {
        let source: Box<dyn SampleSource> = Box::new(FailingSource {
            left: 0,
            stats: SourceStats::default(),
        });
        let mut loader = SampleLoader::from_sources(vec![Some(source)], 4, 2);
        loader.start_epoch(0).unwrap();
        let err = loader.next_batch(8).unwrap_err();
        assert!(err.to_string().contains("worker 0"));
        assert_eq!(loader.finish().unwrap().produced, 2);
    }
}
