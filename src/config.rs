use crate::error::GBError;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_WORKERS: usize = 2;
pub const DEFAULT_THREADS: usize = 2;
pub const DEFAULT_MESSAGE_BATCH_SIZE: usize = 1_000;
const PARTITIONS_PER_THREAD: usize = 2;

/// Everything that tunes how a job runs. Nothing in here changes what a job computes.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Number of worker processes.
    pub workers: usize,
    /// Threads per worker running vertex compute over disjoint partitions.
    pub compute_threads: usize,
    /// Threads per worker claiming and reading input splits.
    pub loader_threads: usize,
    /// Number of logical partitions; derived from workers and threads when unset.
    pub partitions: Option<usize>,
    pub max_supersteps: Option<u64>,
    /// How long the master waits for a worker to report before declaring it failed.
    pub worker_timeout: Duration,
    /// Granularity of the polling loops that wait on the network or on the coordinator.
    pub poll_interval: Duration,
    pub max_recovery_attempts: u32,
    pub coordination_retries: u32,
    /// First backoff between coordination retries; doubled after every attempt, up to 1024 times
    /// the first one.
    pub coordination_backoff: Duration,
    /// Every job checkpoints into its own `job_{id}` directory below this one.
    pub checkpoint_dir: Option<PathBuf>,
    /// Checkpoint every this many supersteps. Zero disables checkpointing.
    pub checkpoint_frequency: u64,
    pub checkpoint_retries: u32,
    pub checkpoints_retained: usize,
    pub message_batch_size: usize,
    /// Reads at most this many records from every split.
    pub split_max_records: Option<u64>,
    pub randomize_splits: bool,
    pub rebalance_after_load: bool,
    /// A worker may hold this fraction more vertices than the average before partitions move.
    pub rebalance_tolerance: f64,
}

impl Default for JobConfig {
    fn default() -> Self {
        JobConfig {
            workers: DEFAULT_WORKERS,
            compute_threads: DEFAULT_THREADS,
            loader_threads: DEFAULT_THREADS,
            partitions: None,
            max_supersteps: None,
            worker_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(5),
            max_recovery_attempts: 3,
            coordination_retries: 5,
            coordination_backoff: Duration::from_millis(50),
            checkpoint_dir: None,
            checkpoint_frequency: 0,
            checkpoint_retries: 2,
            checkpoints_retained: 2,
            message_batch_size: DEFAULT_MESSAGE_BATCH_SIZE,
            split_max_records: None,
            randomize_splits: false,
            rebalance_after_load: false,
            rebalance_tolerance: 0.2,
        }
    }
}

impl JobConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_compute_threads(mut self, threads: usize) -> Self {
        self.compute_threads = threads;
        self
    }

    pub fn with_loader_threads(mut self, threads: usize) -> Self {
        self.loader_threads = threads;
        self
    }

    pub fn with_partitions(mut self, partitions: usize) -> Self {
        self.partitions = Some(partitions);
        self
    }

    pub fn with_max_supersteps(mut self, max_supersteps: u64) -> Self {
        self.max_supersteps = Some(max_supersteps);
        self
    }

    pub fn with_worker_timeout(mut self, timeout: Duration) -> Self {
        self.worker_timeout = timeout;
        self
    }

    pub fn with_checkpoints(mut self, dir: impl Into<PathBuf>, frequency: u64) -> Self {
        self.checkpoint_dir = Some(dir.into());
        self.checkpoint_frequency = frequency;
        self
    }

    pub fn with_max_recovery_attempts(mut self, attempts: u32) -> Self {
        self.max_recovery_attempts = attempts;
        self
    }

    pub fn with_message_batch_size(mut self, batch_size: usize) -> Self {
        self.message_batch_size = batch_size;
        self
    }

    pub fn with_split_max_records(mut self, max_records: u64) -> Self {
        self.split_max_records = Some(max_records);
        self
    }

    pub fn with_rebalance_after_load(mut self, rebalance: bool) -> Self {
        self.rebalance_after_load = rebalance;
        self
    }

    pub fn partition_count(&self) -> usize {
        self.partitions
            .unwrap_or_else(|| self.workers * self.compute_threads * PARTITIONS_PER_THREAD)
    }

    /// The configuration one job runs with: checkpoints go to the job's own directory.
    pub fn for_job(&self, job_id: &str) -> JobConfig {
        let mut config = self.clone();
        config.checkpoint_dir =
            self.checkpoint_dir.as_ref().map(|dir| dir.join(format!("job_{}", job_id)));
        config
    }

    pub fn checkpointing_enabled(&self) -> bool {
        self.checkpoint_dir.is_some() && self.checkpoint_frequency > 0
    }

    pub fn validate(&self) -> Result<(), GBError> {
        if self.workers == 0 {
            return Err(GBError::Config("At least one worker is needed".to_owned()));
        }
        if self.compute_threads == 0 || self.loader_threads == 0 {
            return Err(GBError::Config("Thread counts must be positive".to_owned()));
        }
        if self.partition_count() == 0 {
            return Err(GBError::Config("At least one partition is needed".to_owned()));
        }
        if self.message_batch_size == 0 {
            return Err(GBError::Config("Message batch size must be positive".to_owned()));
        }
        if self.checkpoint_frequency > 0 && self.checkpoint_dir.is_none() {
            return Err(GBError::Config(
                "A checkpoint frequency needs a checkpoint directory".to_owned(),
            ));
        }
        if self.checkpointing_enabled() && self.checkpoints_retained == 0 {
            return Err(GBError::Config("At least one checkpoint must be retained".to_owned()));
        }
        if self.poll_interval >= self.worker_timeout {
            return Err(GBError::Config(format!(
                "Poll interval {:?} must be shorter than the worker timeout {:?}",
                self.poll_interval, self.worker_timeout
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::JobConfig;
    use crate::error::GBError;

    #[test]
    fn partitions_follow_threads() {
        let config = JobConfig::default().with_workers(3).with_compute_threads(4);
        assert_eq!(config.partition_count(), 24);
        assert_eq!(config.with_partitions(5).partition_count(), 5);
    }

    #[test]
    fn invalid_configs() {
        assert!(JobConfig::default().validate().is_ok());
        assert!(matches!(
            JobConfig::default().with_workers(0).validate(),
            Err(GBError::Config(_))
        ));
        let mut config = JobConfig::default();
        config.checkpoint_frequency = 2;
        assert!(matches!(config.validate(), Err(GBError::Config(_))));
    }
}
