use bloom_core::llm::LlmConfig;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub db_path: String,
    pub listen_addr: String,
    pub public_url: String,
    pub seed_demo: bool,
    pub llm: Option<LlmConfig>,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let listen_addr =
            std::env::var("BLOOM_LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into());
        Self {
            db_path: std::env::var("BLOOM_DB_PATH").unwrap_or_else(|_| "agentbloom.db".into()),
            public_url: std::env::var("BLOOM_PUBLIC_URL")
                .unwrap_or_else(|_| "http://localhost:8080".into()),
            seed_demo: std::env::var("BLOOM_SEED_DEMO")
                .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            llm: build_llm_config_from_env(),
            listen_addr,
        }
    }
}

fn build_llm_config_from_env() -> Option<LlmConfig> {
    let api_key_env = std::env::var("LLM_API_KEY_ENV").unwrap_or_else(|_| "OPENAI_API_KEY".into());
    if std::env::var(&api_key_env).is_err() {
        return None;
    }

    Some(LlmConfig {
        provider: std::env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".into()),
        model: std::env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into()),
        api_key_env,
    })
}
