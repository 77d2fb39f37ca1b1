use feed::{FeedEngine, MemoryStore};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<FeedEngine>,
    pub store: Arc<MemoryStore>,
    pub max_interest_keys: usize,
}

impl AppState {
    pub fn new(engine: Arc<FeedEngine>, store: Arc<MemoryStore>, max_interest_keys: usize) -> Self {
        Self {
            engine,
            store,
            max_interest_keys,
        }
    }
}
