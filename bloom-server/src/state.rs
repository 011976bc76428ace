use bloom_core::db::Database;
use bloom_core::llm::CompletionBackend;
use bloom_core::wallet::{ChainClient, WalletCustody};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    /// `None` when no completion API key is configured; completion routes
    /// then answer 503.
    pub llm: Option<Arc<dyn CompletionBackend>>,
    pub custody: Arc<dyn WalletCustody>,
    pub chain: Arc<dyn ChainClient>,
    pub public_url: Arc<str>,
}
