//! HTTP surface for AgentBloom: JSON routes over the core store plus the
//! Farcaster frame endpoints.

pub mod config;
pub mod routes;
pub mod state;

use bloom_core::db::Database;
use bloom_core::llm::{CompletionBackend, RigBackend};
use bloom_core::models::{BountyStatus, NewAgent, NewBounty, TransactionType};
use bloom_core::store::Store;
use bloom_core::wallet::{LocalCustody, UnimplementedChain};
use config::ServerConfig;
use state::AppState;
use std::collections::HashMap;
use std::sync::Arc;

pub fn build_state(config: &ServerConfig) -> bloom_core::Result<AppState> {
    let db = Database::open(&config.db_path)?;
    let llm = config
        .llm
        .clone()
        .map(|cfg| Arc::new(RigBackend::new(cfg)) as Arc<dyn CompletionBackend>);
    if llm.is_none() {
        tracing::warn!("no completion api key configured; agent runs and scoring are disabled");
    }
    Ok(AppState {
        db,
        llm,
        custody: Arc::new(LocalCustody),
        chain: Arc::new(UnimplementedChain),
        public_url: Arc::from(config.public_url.trim_end_matches('/')),
    })
}

/// Loads the demo fixtures into `db` once. Returns the demo user's id.
pub fn seed_demo_data(db: &Database) -> bloom_core::Result<String> {
    let fixtures = Store::with_fixtures();
    let Some(demo) = fixtures.user() else {
        return Err(bloom_core::BloomError::not_found("user", "demo"));
    };
    if let Some(existing) = db.user_by_wallet(&demo.wallet_address)? {
        tracing::info!(user_id = %existing.id, "demo data already present");
        return Ok(existing.id);
    }

    let user = db.upsert_user(&demo.wallet_address, demo.fid)?;
    db.record_transaction(
        &user.id,
        TransactionType::Purchase,
        300.0,
        Some("Credit purchase".into()),
    )?;
    db.stake(&user.id, demo.staked_amount)?;
    db.record_transaction(
        &user.id,
        TransactionType::Spend,
        480.0,
        Some("Agent runs".into()),
    )?;

    let mut agent_ids = HashMap::new();
    for agent in fixtures.agents() {
        let created = db.insert_agent(&NewAgent {
            user_id: user.id.clone(),
            name: agent.name.clone(),
            description: agent.description.clone(),
            prompt_template: agent.prompt_template.clone(),
        })?;
        agent_ids.insert(agent.id.as_str(), created.id);
    }

    for bounty in fixtures.bounties() {
        let created = db.insert_bounty(&NewBounty {
            creator_id: user.id.clone(),
            title: bounty.title.clone(),
            description: bounty.description.clone(),
            reward: bounty.reward,
        })?;
        let assigned = bounty
            .assigned_agent_id
            .as_deref()
            .and_then(|id| agent_ids.get(id));
        if let Some(agent_id) = assigned {
            db.claim_bounty(&created.id, agent_id)?;
            if bounty.status == BountyStatus::Closed {
                db.close_bounty(&created.id)?;
            }
        }
    }

    tracing::info!(user_id = %user.id, "seeded demo data");
    Ok(user.id)
}
