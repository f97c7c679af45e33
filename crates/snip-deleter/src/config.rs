use std::time::Duration;
use typed_builder::TypedBuilder;

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, TypedBuilder)]
pub struct DeleterConfig {
    /// How often queued deletions are written to storage.
    #[builder(default = DEFAULT_FLUSH_INTERVAL)]
    pub flush_interval: Duration,
    /// Jobs the queue holds before producers have to wait.
    #[builder(default = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,
}

impl Default for DeleterConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}
