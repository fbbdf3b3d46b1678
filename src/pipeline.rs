use std::fmt;

use anyhow::Result;
use tracing::info;

/// Processes every item a spider produced.
pub trait ItemPipeline<I>: Send + Sync {
    fn process_item(&self, item: I, spider: &str) -> Result<I>;
}

impl<I, F> ItemPipeline<I> for F
where
    F: Fn(I, &str) -> Result<I> + Send + Sync,
{
    fn process_item(&self, item: I, spider: &str) -> Result<I> {
        (self)(item, spider)
    }
}

/// Logs every item.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPipeline;

impl<I: fmt::Debug> ItemPipeline<I> for LogPipeline {
    fn process_item(&self, item: I, spider: &str) -> Result<I> {
        info!(spider, "scraped {:?}", item);
        Ok(item)
    }
}

/// Runs items through a chain of pipelines in order.
pub struct Pipelines<I> {
    pipelines: Vec<Box<dyn ItemPipeline<I>>>,
}

impl<I> Pipelines<I> {
    pub fn new() -> Self {
        Self {
            pipelines: Vec::new(),
        }
    }

    pub fn push(mut self, pipeline: impl ItemPipeline<I> + 'static) -> Self {
        self.pipelines.push(Box::new(pipeline));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    /// The first failing pipeline aborts the chain.
    pub fn process(&self, item: I, spider: &str) -> Result<I> {
        self.pipelines
            .iter()
            .try_fold(item, |item, pipeline| pipeline.process_item(item, spider))
    }
}

impl<I> Default for Pipelines<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I> fmt::Debug for Pipelines<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipelines")
            .field("len", &self.pipelines.len())
            .finish()
    }
}
