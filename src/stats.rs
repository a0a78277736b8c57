/// Counters collected during one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub articles_processed: u64,
    pub empty_articles: u64,
    pub raw_bytes: u64,
    pub processed_bytes: u64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one normalized article; empty bodies are still articles.
    pub fn record_article(&mut self, normalized: &str) {
        self.articles_processed += 1;
        if normalized.is_empty() {
            self.empty_articles += 1;
        }
    }

    pub fn articles(&self) -> u64 {
        self.articles_processed
    }

    pub fn empty(&self) -> u64 {
        self.empty_articles
    }

    pub fn non_empty(&self) -> u64 {
        self.articles_processed - self.empty_articles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values_are_zero() {
        let stats = PipelineStats::new();
        assert_eq!(stats.articles(), 0);
        assert_eq!(stats.empty(), 0);
        assert_eq!(stats.raw_bytes, 0);
        assert_eq!(stats.processed_bytes, 0);
    }

    #[test]
    fn empty_articles_are_counted_not_dropped() {
        let mut stats = PipelineStats::new();
        stats.record_article("Hello world.");
        stats.record_article("");
        stats.record_article("Plain text.");
        assert_eq!(stats.articles(), 3);
        assert_eq!(stats.empty(), 1);
        assert_eq!(stats.non_empty(), 2);
    }
}
