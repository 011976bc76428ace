use crate::analytics::{self, PerformanceReport};
use crate::changes::{ChangeEvent, ChangeKind, Table};
use crate::db::Database;
use crate::error::{BloomError, Result};
use crate::models::{
    new_id, Agent, AgentStatus, Bounty, BountyStatus, CreditTransaction, NewAgent, NewBounty,
    PerformanceMetrics, TransactionType, User,
};
use crate::staking;
use chrono::{DateTime, TimeZone, Utc};

/// In-memory application state for one signed-in user.
///
/// Single-threaded by construction: callers own the store and mutate it
/// through `&mut self`. Changes pushed from the database are mirrored with
/// [`Store::apply_change`].
#[derive(Clone, Debug, Default)]
pub struct Store {
    user: Option<User>,
    agents: Vec<Agent>,
    bounties: Vec<Bounty>,
    transactions: Vec<CreditTransaction>,
}

impl Store {
    pub fn hydrate(db: &Database, user_id: &str) -> Result<Self> {
        let user = db.user(user_id)?;
        Ok(Self {
            agents: db.agents_for_user(user_id)?,
            bounties: db.bounties(None)?,
            transactions: db.transactions_for_user(user_id)?,
            user: Some(user),
        })
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn bounties(&self) -> &[Bounty] {
        &self.bounties
    }

    pub fn transactions(&self) -> &[CreditTransaction] {
        &self.transactions
    }

    fn user_mut(&mut self) -> Result<&mut User> {
        self.user
            .as_mut()
            .ok_or_else(|| BloomError::not_found("user", "<signed out>"))
    }

    pub fn create_agent(&mut self, new: NewAgent) -> &Agent {
        let now = Utc::now();
        self.agents.push(Agent {
            id: new_id(),
            user_id: new.user_id,
            name: new.name,
            description: new.description,
            prompt_template: new.prompt_template,
            performance: PerformanceMetrics::default(),
            status: AgentStatus::Active,
            created_at: now,
            updated_at: now,
        });
        &self.agents[self.agents.len() - 1]
    }

    pub fn set_agent_status(&mut self, id: &str, status: AgentStatus) -> Result<()> {
        let agent = self
            .agents
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| BloomError::not_found("agent", id))?;
        agent.status = status;
        agent.updated_at = Utc::now();
        Ok(())
    }

    pub fn remove_agent(&mut self, id: &str) -> Result<Agent> {
        let idx = self
            .agents
            .iter()
            .position(|a| a.id == id)
            .ok_or_else(|| BloomError::not_found("agent", id))?;
        Ok(self.agents.remove(idx))
    }

    pub fn post_bounty(&mut self, new: NewBounty) -> Result<&Bounty> {
        if !(new.reward >= 0.0) {
            return Err(BloomError::validation("reward", "must not be negative"));
        }
        let now = Utc::now();
        self.bounties.push(Bounty {
            id: new_id(),
            creator_id: new.creator_id,
            title: new.title,
            description: new.description,
            reward: new.reward,
            status: BountyStatus::Open,
            assigned_agent_id: None,
            created_at: now,
            updated_at: now,
        });
        Ok(&self.bounties[self.bounties.len() - 1])
    }

    /// Assigns an open bounty to `agent_id`. Any other status leaves the
    /// bounty untouched and returns `false`.
    pub fn claim_bounty(&mut self, id: &str, agent_id: &str) -> Result<bool> {
        let bounty = self
            .bounties
            .iter_mut()
            .find(|b| b.id == id)
            .ok_or_else(|| BloomError::not_found("bounty", id))?;
        if bounty.status != BountyStatus::Open {
            return Ok(false);
        }
        bounty.status = BountyStatus::InProgress;
        bounty.assigned_agent_id = Some(agent_id.to_string());
        bounty.updated_at = Utc::now();
        Ok(true)
    }

    /// Closes an in-progress bounty. The assigned agent, when held here,
    /// gets a successful run with the reward folded into its metrics; the
    /// reward is credited as earnings when that agent belongs to the
    /// signed-in user.
    pub fn close_bounty(&mut self, id: &str) -> Result<bool> {
        let now = Utc::now();
        let bounty = self
            .bounties
            .iter_mut()
            .find(|b| b.id == id)
            .ok_or_else(|| BloomError::not_found("bounty", id))?;
        if bounty.status != BountyStatus::InProgress {
            return Ok(false);
        }
        bounty.status = BountyStatus::Closed;
        bounty.updated_at = now;
        let (reward, title, agent_id) = (
            bounty.reward,
            bounty.title.clone(),
            bounty.assigned_agent_id.clone(),
        );

        let Some(agent) = agent_id
            .as_deref()
            .and_then(|aid| self.agents.iter_mut().find(|a| a.id == aid))
        else {
            return Ok(true);
        };
        agent.performance.record_run(true, reward);
        agent.updated_at = now;

        let own_id = self.user.as_ref().map(|u| u.id.as_str());
        let owned = own_id == Some(agent.user_id.as_str());
        if owned && reward > 0.0 {
            self.credit(TransactionType::Earn, reward, Some(format!("Bounty reward: {title}")))?;
        }
        Ok(true)
    }

    pub fn purchase_credits(&mut self, amount: f64) -> Result<&CreditTransaction> {
        self.credit(TransactionType::Purchase, amount, None)
    }

    pub fn spend_credits(
        &mut self,
        amount: f64,
        description: Option<String>,
    ) -> Result<&CreditTransaction> {
        if !(amount > 0.0) {
            return Err(BloomError::validation("amount", "must be positive"));
        }
        let user = self.user_mut()?;
        if user.credit_balance < amount {
            return Err(BloomError::InsufficientCredits {
                balance: user.credit_balance,
                requested: amount,
            });
        }
        user.credit_balance -= amount;
        user.updated_at = Utc::now();
        Ok(self.push_transaction(TransactionType::Spend, amount, description))
    }

    /// Stakes `amount` and returns the credits granted for it.
    pub fn stake(&mut self, amount: f64) -> Result<f64> {
        if !(amount > 0.0) {
            return Err(BloomError::validation("amount", "must be positive"));
        }
        self.user_mut()?.staked_amount += amount;
        let credits = staking::credits_for_stake(amount);
        self.credit(TransactionType::Stake, credits, Some(format!("Staked {amount}")))?;
        Ok(credits)
    }

    fn credit(
        &mut self,
        kind: TransactionType,
        amount: f64,
        description: Option<String>,
    ) -> Result<&CreditTransaction> {
        if !(amount > 0.0) {
            return Err(BloomError::validation("amount", "must be positive"));
        }
        let user = self.user_mut()?;
        user.credit_balance += amount;
        user.updated_at = Utc::now();
        Ok(self.push_transaction(kind, amount, description))
    }

    fn push_transaction(
        &mut self,
        kind: TransactionType,
        amount: f64,
        description: Option<String>,
    ) -> &CreditTransaction {
        let user_id = self.user.as_ref().map(|u| u.id.clone()).unwrap_or_default();
        self.transactions.push(CreditTransaction {
            id: new_id(),
            user_id,
            kind,
            amount,
            description,
            created_at: Utc::now(),
        });
        &self.transactions[self.transactions.len() - 1]
    }

    /// Mirrors a change pushed by the database. Rows belonging to other
    /// users are ignored, except bounties which are shared.
    pub fn apply_change(&mut self, event: &ChangeEvent) -> Result<()> {
        let record = &event.record;
        let own_id = self.user.as_ref().map(|u| u.id.clone());

        if event.kind == ChangeKind::Delete {
            let id = record
                .get("id")
                .and_then(serde_json::Value::as_str)
                .ok_or_else(|| BloomError::validation("id", "delete event without id"))?;
            match event.table {
                Table::Agents => self.agents.retain(|a| a.id != id),
                Table::Bounties => self.bounties.retain(|b| b.id != id),
                Table::CreditTransactions => self.transactions.retain(|t| t.id != id),
                Table::Users => {
                    if own_id.as_deref() == Some(id) {
                        self.user = None;
                    }
                }
            }
            return Ok(());
        }

        match event.table {
            Table::Users => {
                let user: User = serde_json::from_value(record.clone())?;
                if own_id.as_deref() == Some(user.id.as_str()) {
                    self.user = Some(user);
                }
            }
            Table::Agents => {
                let agent: Agent = serde_json::from_value(record.clone())?;
                if own_id.as_deref() == Some(agent.user_id.as_str()) {
                    upsert_by_id(&mut self.agents, agent, |a| &a.id);
                }
            }
            Table::Bounties => {
                let bounty: Bounty = serde_json::from_value(record.clone())?;
                upsert_by_id(&mut self.bounties, bounty, |b| &b.id);
            }
            Table::CreditTransactions => {
                let tx: CreditTransaction = serde_json::from_value(record.clone())?;
                if own_id.as_deref() == Some(tx.user_id.as_str()) {
                    upsert_by_id(&mut self.transactions, tx, |t| &t.id);
                }
            }
        }
        Ok(())
    }

    pub fn performance_report(&self) -> Result<PerformanceReport> {
        let user = self
            .user
            .as_ref()
            .ok_or_else(|| BloomError::not_found("user", "<signed out>"))?;
        Ok(analytics::performance_report(
            &user.id,
            &self.agents,
            &self.bounties,
            &self.transactions,
        ))
    }

    /// Demo state used to seed an empty database and in tests.
    pub fn with_fixtures() -> Self {
        let user = User {
            id: "user-demo".into(),
            fid: Some(1),
            wallet_address: "0x71c7656ec7ab88b098defb751b7401b5f6d8976f".into(),
            credit_balance: 500.0,
            staked_amount: 25.0,
            created_at: fixture_time(0),
            updated_at: fixture_time(0),
        };

        let agents = vec![
            fixture_agent("agent-research", "Research Assistant", 0.92, 48, 12.5, 1),
            fixture_agent("agent-writer", "Content Writer", 0.85, 31, 8.0, 2),
            fixture_agent("agent-analyst", "Data Analyst", 0.78, 19, 15.0, 3),
        ];

        let bounties = vec![
            fixture_bounty("bounty-docs", "Document the staking flow", 50.0, BountyStatus::Open, None, 4),
            fixture_bounty(
                "bounty-summary",
                "Summarize weekly governance calls",
                30.0,
                BountyStatus::InProgress,
                Some("agent-writer"),
                5,
            ),
            fixture_bounty(
                "bounty-dataset",
                "Clean the token holder dataset",
                80.0,
                BountyStatus::Closed,
                Some("agent-analyst"),
                6,
            ),
        ];

        let transactions = vec![
            fixture_tx("tx-purchase", TransactionType::Purchase, 300.0, "Credit purchase", 1),
            fixture_tx("tx-stake", TransactionType::Stake, 600.0, "Staked 25", 2),
            fixture_tx("tx-spend", TransactionType::Spend, 480.0, "Agent runs", 4),
            fixture_tx("tx-earn", TransactionType::Earn, 80.0, "Bounty reward: Clean the token holder dataset", 6),
        ];

        Self {
            user: Some(user),
            agents,
            bounties,
            transactions,
        }
    }
}

fn upsert_by_id<T>(items: &mut Vec<T>, item: T, id: impl Fn(&T) -> &String) {
    match items.iter().position(|existing| id(existing) == id(&item)) {
        Some(idx) => items[idx] = item,
        None => items.push(item),
    }
}

fn fixture_time(day: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_717_200_000 + day * 86_400, 0)
        .single()
        .unwrap_or_default()
}

fn fixture_agent(
    id: &str,
    name: &str,
    success_rate: f64,
    total_runs: u64,
    average_reward: f64,
    day: i64,
) -> Agent {
    Agent {
        id: id.into(),
        user_id: "user-demo".into(),
        name: name.into(),
        description: format!("{name} demo agent"),
        prompt_template: format!("You are a {name}. Complete the task: {{{{input}}}}"),
        performance: PerformanceMetrics {
            success_rate,
            total_runs,
            average_reward,
        },
        status: AgentStatus::Active,
        created_at: fixture_time(day),
        updated_at: fixture_time(day),
    }
}

fn fixture_bounty(
    id: &str,
    title: &str,
    reward: f64,
    status: BountyStatus,
    assigned: Option<&str>,
    day: i64,
) -> Bounty {
    Bounty {
        id: id.into(),
        creator_id: "user-demo".into(),
        title: title.into(),
        description: format!("{title}."),
        reward,
        status,
        assigned_agent_id: assigned.map(ToString::to_string),
        created_at: fixture_time(day - 1),
        updated_at: fixture_time(day),
    }
}

fn fixture_tx(id: &str, kind: TransactionType, amount: f64, description: &str, day: i64) -> CreditTransaction {
    CreditTransaction {
        id: id.into(),
        user_id: "user-demo".into(),
        kind,
        amount,
        description: Some(description.into()),
        created_at: fixture_time(day),
    }
}
