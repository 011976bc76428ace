use crate::changes::{ChangeEvent, ChangeFeed, ChangeKind, Table};
use crate::error::{BloomError, Result};
use crate::models::{
    new_id, Agent, AgentRun, AgentStatus, Bounty, BountyStatus, CreditTransaction, NewAgent,
    NewBounty, PerformanceMetrics, TransactionType, User,
};
use crate::staking;
use chrono::Utc;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::sync::Arc;

const SCHEMA: &str = "
    PRAGMA journal_mode=WAL;
    PRAGMA synchronous=NORMAL;

    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        fid INTEGER,
        wallet_address TEXT NOT NULL UNIQUE,
        credit_balance REAL NOT NULL DEFAULT 0 CHECK (credit_balance >= 0),
        staked_amount REAL NOT NULL DEFAULT 0 CHECK (staked_amount >= 0),
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS agents (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        prompt_template TEXT NOT NULL,
        success_rate REAL NOT NULL DEFAULT 0 CHECK (success_rate BETWEEN 0 AND 1),
        total_runs INTEGER NOT NULL DEFAULT 0 CHECK (total_runs >= 0),
        average_reward REAL NOT NULL DEFAULT 0,
        status TEXT NOT NULL DEFAULT 'active'
            CHECK (status IN ('active', 'completed', 'failed')),
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS bounties (
        id TEXT PRIMARY KEY,
        creator_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        reward REAL NOT NULL CHECK (reward >= 0),
        status TEXT NOT NULL DEFAULT 'open'
            CHECK (status IN ('open', 'inProgress', 'closed')),
        assigned_agent_id TEXT REFERENCES agents(id) ON DELETE SET NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS credit_transactions (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        type TEXT NOT NULL CHECK (type IN ('purchase', 'spend', 'earn', 'stake')),
        amount REAL NOT NULL CHECK (amount > 0),
        description TEXT,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS agent_runs (
        id TEXT PRIMARY KEY,
        agent_id TEXT NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
        success INTEGER NOT NULL CHECK (success IN (0, 1)),
        reward REAL NOT NULL DEFAULT 0 CHECK (reward >= 0),
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_agents_user ON agents(user_id);
    CREATE INDEX IF NOT EXISTS idx_bounties_creator ON bounties(creator_id);
    CREATE INDEX IF NOT EXISTS idx_bounties_status ON bounties(status);
    CREATE INDEX IF NOT EXISTS idx_credit_tx_user ON credit_transactions(user_id);
    CREATE INDEX IF NOT EXISTS idx_agent_runs_agent ON agent_runs(agent_id);

    CREATE TRIGGER IF NOT EXISTS agent_runs_metrics AFTER INSERT ON agent_runs
    BEGIN
        UPDATE agents SET
            total_runs = (SELECT COUNT(*) FROM agent_runs WHERE agent_id = NEW.agent_id),
            success_rate = (SELECT AVG(success) FROM agent_runs WHERE agent_id = NEW.agent_id),
            average_reward = (SELECT AVG(reward) FROM agent_runs WHERE agent_id = NEW.agent_id),
            updated_at = NEW.created_at
        WHERE id = NEW.agent_id;
    END;

    CREATE TRIGGER IF NOT EXISTS credit_transactions_balance AFTER INSERT ON credit_transactions
    BEGIN
        UPDATE users SET
            credit_balance = credit_balance
                + CASE NEW.type WHEN 'spend' THEN -NEW.amount ELSE NEW.amount END,
            updated_at = NEW.created_at
        WHERE id = NEW.user_id;
    END;
";

const USER_COLUMNS: &str =
    "id, fid, wallet_address, credit_balance, staked_amount, created_at, updated_at";
const AGENT_COLUMNS: &str = "id, user_id, name, description, prompt_template, success_rate, \
     total_runs, average_reward, status, created_at, updated_at";
const BOUNTY_COLUMNS: &str = "id, creator_id, title, description, reward, status, \
     assigned_agent_id, created_at, updated_at";
const TX_COLUMNS: &str = "id, user_id, type, amount, description, created_at";

/// Record store for users, agents, bounties and credit transactions.
///
/// Integrity lives in the schema: foreign keys, CHECK constraints on the
/// enumerated columns and on balances, and triggers that maintain agent
/// metrics and user balances. Every successful write is pushed to the
/// change feed.
#[derive(Clone)]
pub struct Database {
    db_path: Arc<PathBuf>,
    feed: ChangeFeed,
}

impl Database {
    pub fn open(path: &str) -> Result<Self> {
        let db_path = PathBuf::from(path);
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&db_path)?;
        conn.execute_batch(SCHEMA)?;
        tracing::info!(path = %db_path.display(), "opened record database");

        Ok(Self {
            db_path: Arc::new(db_path),
            feed: ChangeFeed::default(),
        })
    }

    pub fn subscribe(&self, table: Table) -> Receiver<ChangeEvent> {
        self.feed.subscribe(table)
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&*self.db_path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }

    fn publish<T: Serialize>(&self, table: Table, kind: ChangeKind, record: &T) {
        match serde_json::to_value(record) {
            Ok(record) => self.feed.publish(ChangeEvent {
                table,
                kind,
                record,
            }),
            Err(err) => tracing::warn!(?table, error = %err, "could not encode change event"),
        }
    }

    fn publish_user(&self, id: &str) {
        match self.user(id) {
            Ok(user) => self.publish(Table::Users, ChangeKind::Update, &user),
            Err(err) => tracing::warn!(user_id = id, error = %err, "could not refresh user"),
        }
    }

    // users

    /// Returns the user owning `wallet_address`, creating it on first sight.
    pub fn upsert_user(&self, wallet_address: &str, fid: Option<u64>) -> Result<User> {
        if let Some(existing) = self.user_by_wallet(wallet_address)? {
            if fid.is_none() || existing.fid == fid {
                return Ok(existing);
            }
            let conn = self.connect()?;
            conn.execute(
                "UPDATE users SET fid = ?1, updated_at = ?2 WHERE id = ?3",
                params![fid.map(|f| f as i64), Utc::now(), existing.id],
            )?;
            let user = self.user(&existing.id)?;
            self.publish(Table::Users, ChangeKind::Update, &user);
            return Ok(user);
        }

        let now = Utc::now();
        let user = User {
            id: new_id(),
            fid,
            wallet_address: wallet_address.to_string(),
            credit_balance: 0.0,
            staked_amount: 0.0,
            created_at: now,
            updated_at: now,
        };
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO users (id, fid, wallet_address, credit_balance, staked_amount, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                user.id,
                user.fid.map(|f| f as i64),
                user.wallet_address,
                user.credit_balance,
                user.staked_amount,
                user.created_at,
                user.updated_at,
            ],
        )?;
        tracing::info!(user_id = %user.id, "created user");
        self.publish(Table::Users, ChangeKind::Insert, &user);
        Ok(user)
    }

    pub fn user(&self, id: &str) -> Result<User> {
        let conn = self.connect()?;
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            params![id],
            map_user,
        )
        .optional()?
        .ok_or_else(|| BloomError::not_found("user", id))
    }

    pub fn user_by_wallet(&self, wallet_address: &str) -> Result<Option<User>> {
        let conn = self.connect()?;
        Ok(conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE wallet_address = ?1"),
                params![wallet_address],
                map_user,
            )
            .optional()?)
    }

    // agents

    pub fn insert_agent(&self, new: &NewAgent) -> Result<Agent> {
        let now = Utc::now();
        let agent = Agent {
            id: new_id(),
            user_id: new.user_id.clone(),
            name: new.name.clone(),
            description: new.description.clone(),
            prompt_template: new.prompt_template.clone(),
            performance: PerformanceMetrics::default(),
            status: AgentStatus::Active,
            created_at: now,
            updated_at: now,
        };
        let conn = self.connect()?;
        conn.execute(
            &format!(
                "INSERT INTO agents ({AGENT_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            params![
                agent.id,
                agent.user_id,
                agent.name,
                agent.description,
                agent.prompt_template,
                agent.performance.success_rate,
                agent.performance.total_runs as i64,
                agent.performance.average_reward,
                agent.status.as_str(),
                agent.created_at,
                agent.updated_at,
            ],
        )
        .map_err(|e| missing_parent(e, "user", &new.user_id))?;
        self.publish(Table::Agents, ChangeKind::Insert, &agent);
        Ok(agent)
    }

    pub fn agent(&self, id: &str) -> Result<Agent> {
        let conn = self.connect()?;
        conn.query_row(
            &format!("SELECT {AGENT_COLUMNS} FROM agents WHERE id = ?1"),
            params![id],
            map_agent,
        )
        .optional()?
        .ok_or_else(|| BloomError::not_found("agent", id))
    }

    pub fn agents_for_user(&self, user_id: &str) -> Result<Vec<Agent>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {AGENT_COLUMNS} FROM agents WHERE user_id = ?1 ORDER BY created_at ASC"
        ))?;
        let rows = stmt.query_map(params![user_id], map_agent)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn update_agent_status(&self, id: &str, status: AgentStatus) -> Result<Agent> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE agents SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), Utc::now(), id],
        )?;
        if changed == 0 {
            return Err(BloomError::not_found("agent", id));
        }
        let agent = self.agent(id)?;
        self.publish(Table::Agents, ChangeKind::Update, &agent);
        Ok(agent)
    }

    pub fn delete_agent(&self, id: &str) -> Result<()> {
        let conn = self.connect()?;
        if conn.execute("DELETE FROM agents WHERE id = ?1", params![id])? == 0 {
            return Err(BloomError::not_found("agent", id));
        }
        self.publish(Table::Agents, ChangeKind::Delete, &serde_json::json!({ "id": id }));
        Ok(())
    }

    /// Records one run; the schema trigger refreshes the agent's metrics.
    pub fn record_run(&self, agent_id: &str, success: bool, reward: f64) -> Result<Agent> {
        let run = AgentRun {
            id: new_id(),
            agent_id: agent_id.to_string(),
            success,
            reward,
            created_at: Utc::now(),
        };
        let conn = self.connect()?;
        insert_run(&conn, &run).map_err(|e| missing_parent(e, "agent", agent_id))?;
        let agent = self.agent(agent_id)?;
        self.publish(Table::Agents, ChangeKind::Update, &agent);
        Ok(agent)
    }

    // bounties

    pub fn insert_bounty(&self, new: &NewBounty) -> Result<Bounty> {
        let now = Utc::now();
        let bounty = Bounty {
            id: new_id(),
            creator_id: new.creator_id.clone(),
            title: new.title.clone(),
            description: new.description.clone(),
            reward: new.reward,
            status: BountyStatus::Open,
            assigned_agent_id: None,
            created_at: now,
            updated_at: now,
        };
        let conn = self.connect()?;
        conn.execute(
            &format!(
                "INSERT INTO bounties ({BOUNTY_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
            ),
            params![
                bounty.id,
                bounty.creator_id,
                bounty.title,
                bounty.description,
                bounty.reward,
                bounty.status.as_str(),
                bounty.assigned_agent_id,
                bounty.created_at,
                bounty.updated_at,
            ],
        )
        .map_err(|e| missing_parent(e, "user", &new.creator_id))?;
        self.publish(Table::Bounties, ChangeKind::Insert, &bounty);
        Ok(bounty)
    }

    pub fn bounty(&self, id: &str) -> Result<Bounty> {
        let conn = self.connect()?;
        conn.query_row(
            &format!("SELECT {BOUNTY_COLUMNS} FROM bounties WHERE id = ?1"),
            params![id],
            map_bounty,
        )
        .optional()?
        .ok_or_else(|| BloomError::not_found("bounty", id))
    }

    pub fn bounties(&self, status: Option<BountyStatus>) -> Result<Vec<Bounty>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {BOUNTY_COLUMNS} FROM bounties
             WHERE ?1 IS NULL OR status = ?1
             ORDER BY created_at DESC"
        ))?;
        let rows = stmt.query_map(params![status.map(|s| s.as_str())], map_bounty)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Moves an open bounty to `inProgress` under `agent_id`. Returns `false`
    /// and changes nothing when the bounty is not open.
    pub fn claim_bounty(&self, id: &str, agent_id: &str) -> Result<bool> {
        let conn = self.connect()?;
        let changed = conn
            .execute(
                "UPDATE bounties SET status = 'inProgress', assigned_agent_id = ?1, updated_at = ?2
                 WHERE id = ?3 AND status = 'open'",
                params![agent_id, Utc::now(), id],
            )
            .map_err(|e| missing_parent(e, "agent", agent_id))?;
        if changed == 0 {
            // distinguishes "not open" from "no such bounty"
            self.bounty(id)?;
            tracing::debug!(bounty_id = id, "claim ignored; bounty not open");
            return Ok(false);
        }
        let bounty = self.bounty(id)?;
        self.publish(Table::Bounties, ChangeKind::Update, &bounty);
        Ok(true)
    }

    /// Closes an in-progress bounty. The assigned agent gets a successful run
    /// and its owner an `earn` transaction for the reward. Returns `false`
    /// when the bounty was not in progress.
    pub fn close_bounty(&self, id: &str) -> Result<bool> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let now = Utc::now();
        let changed = tx.execute(
            "UPDATE bounties SET status = 'closed', updated_at = ?1
             WHERE id = ?2 AND status = 'inProgress'",
            params![now, id],
        )?;
        if changed == 0 {
            drop(tx);
            self.bounty(id)?;
            return Ok(false);
        }

        let bounty = tx.query_row(
            &format!("SELECT {BOUNTY_COLUMNS} FROM bounties WHERE id = ?1"),
            params![id],
            map_bounty,
        )?;
        let mut payout = None;
        if let Some(agent_id) = bounty.assigned_agent_id.as_deref() {
            insert_run(
                &tx,
                &AgentRun {
                    id: new_id(),
                    agent_id: agent_id.to_string(),
                    success: true,
                    reward: bounty.reward,
                    created_at: now,
                },
            )?;
            let owner: Option<String> = tx
                .query_row(
                    "SELECT user_id FROM agents WHERE id = ?1",
                    params![agent_id],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(owner) = owner.filter(|_| bounty.reward > 0.0) {
                let earn = CreditTransaction {
                    id: new_id(),
                    user_id: owner,
                    kind: TransactionType::Earn,
                    amount: bounty.reward,
                    description: Some(format!("Bounty reward: {}", bounty.title)),
                    created_at: now,
                };
                insert_transaction(&tx, &earn)?;
                payout = Some(earn);
            }
        }
        tx.commit()?;

        self.publish(Table::Bounties, ChangeKind::Update, &bounty);
        if let Some(agent_id) = bounty.assigned_agent_id.as_deref() {
            match self.agent(agent_id) {
                Ok(agent) => self.publish(Table::Agents, ChangeKind::Update, &agent),
                Err(err) => tracing::warn!(agent_id, error = %err, "could not refresh agent"),
            }
        }
        if let Some(earn) = payout {
            self.publish(Table::CreditTransactions, ChangeKind::Insert, &earn);
            self.publish_user(&earn.user_id);
        }
        Ok(true)
    }

    pub fn delete_bounty(&self, id: &str) -> Result<()> {
        let conn = self.connect()?;
        if conn.execute("DELETE FROM bounties WHERE id = ?1", params![id])? == 0 {
            return Err(BloomError::not_found("bounty", id));
        }
        self.publish(Table::Bounties, ChangeKind::Delete, &serde_json::json!({ "id": id }));
        Ok(())
    }

    // credits

    /// Inserts a transaction; the balance trigger applies it. A spend that
    /// would overdraw the balance violates the CHECK and is rejected whole.
    pub fn record_transaction(
        &self,
        user_id: &str,
        kind: TransactionType,
        amount: f64,
        description: Option<String>,
    ) -> Result<CreditTransaction> {
        if !(amount > 0.0) {
            return Err(BloomError::validation("amount", "must be positive"));
        }
        let tx = CreditTransaction {
            id: new_id(),
            user_id: user_id.to_string(),
            kind,
            amount,
            description,
            created_at: Utc::now(),
        };
        let conn = self.connect()?;
        if let Err(err) = insert_transaction(&conn, &tx) {
            if is_constraint(&err) && kind == TransactionType::Spend {
                let balance = self.user(user_id)?.credit_balance;
                return Err(BloomError::InsufficientCredits {
                    balance,
                    requested: amount,
                });
            }
            return Err(missing_parent(err, "user", user_id));
        }
        tracing::info!(user_id, kind = kind.as_str(), amount, "recorded credit transaction");
        self.publish(Table::CreditTransactions, ChangeKind::Insert, &tx);
        self.publish_user(user_id);
        Ok(tx)
    }

    pub fn transactions_for_user(&self, user_id: &str) -> Result<Vec<CreditTransaction>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TX_COLUMNS} FROM credit_transactions
             WHERE user_id = ?1
             ORDER BY created_at DESC"
        ))?;
        let rows = stmt.query_map(params![user_id], map_transaction)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Adds `amount` to the user's stake and grants the staking credits.
    pub fn stake(&self, user_id: &str, amount: f64) -> Result<CreditTransaction> {
        if !(amount > 0.0) {
            return Err(BloomError::validation("amount", "must be positive"));
        }
        let now = Utc::now();
        let credits = staking::credits_for_stake(amount);
        let grant = CreditTransaction {
            id: new_id(),
            user_id: user_id.to_string(),
            kind: TransactionType::Stake,
            amount: credits,
            description: Some(format!("Staked {amount}")),
            created_at: now,
        };

        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "UPDATE users SET staked_amount = staked_amount + ?1, updated_at = ?2 WHERE id = ?3",
            params![amount, now, user_id],
        )?;
        if changed == 0 {
            return Err(BloomError::not_found("user", user_id));
        }
        insert_transaction(&tx, &grant)?;
        tx.commit()?;

        tracing::info!(user_id, amount, credits, "staked");
        self.publish(Table::CreditTransactions, ChangeKind::Insert, &grant);
        self.publish_user(user_id);
        Ok(grant)
    }
}

fn insert_run(conn: &Connection, run: &AgentRun) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO agent_runs (id, agent_id, success, reward, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![run.id, run.agent_id, run.success, run.reward, run.created_at],
    )
}

fn insert_transaction(conn: &Connection, tx: &CreditTransaction) -> rusqlite::Result<usize> {
    conn.execute(
        &format!("INSERT INTO credit_transactions ({TX_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
        params![
            tx.id,
            tx.user_id,
            tx.kind.as_str(),
            tx.amount,
            tx.description,
            tx.created_at,
        ],
    )
}

fn is_constraint(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

/// Foreign-key failures on insert mean the referenced row does not exist.
fn missing_parent(err: rusqlite::Error, entity: &'static str, id: &str) -> BloomError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY =>
        {
            BloomError::not_found(entity, id)
        }
        _ => BloomError::Database(err),
    }
}

fn parse_column<T>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|err: String| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, err.into())
    })
}

fn map_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        fid: row.get::<_, Option<i64>>(1)?.map(|f| f as u64),
        wallet_address: row.get(2)?,
        credit_balance: row.get(3)?,
        staked_amount: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn map_agent(row: &rusqlite::Row<'_>) -> rusqlite::Result<Agent> {
    Ok(Agent {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        prompt_template: row.get(4)?,
        performance: PerformanceMetrics {
            success_rate: row.get(5)?,
            total_runs: row.get::<_, i64>(6)?.max(0) as u64,
            average_reward: row.get(7)?,
        },
        status: parse_column(row, 8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn map_bounty(row: &rusqlite::Row<'_>) -> rusqlite::Result<Bounty> {
    Ok(Bounty {
        id: row.get(0)?,
        creator_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        reward: row.get(4)?,
        status: parse_column(row, 5)?,
        assigned_agent_id: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn map_transaction(row: &rusqlite::Row<'_>) -> rusqlite::Result<CreditTransaction> {
    Ok(CreditTransaction {
        id: row.get(0)?,
        user_id: row.get(1)?,
        kind: parse_column(row, 2)?,
        amount: row.get(3)?,
        description: row.get(4)?,
        created_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_path(name: &str) -> String {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time")
            .as_nanos();
        format!("/tmp/agentbloom-tests/{name}-{nanos}.db")
    }

    fn seeded(name: &str) -> (Database, User, Agent) {
        let db = Database::open(&db_path(name)).expect("open");
        let user = db.upsert_user("0xabc0000000000000000000000000000000000001", None).expect("user");
        let agent = db
            .insert_agent(&NewAgent {
                user_id: user.id.clone(),
                name: "Scout".into(),
                description: "finds leads".into(),
                prompt_template: "Research {{input}}".into(),
            })
            .expect("agent");
        (db, user, agent)
    }

    fn post(db: &Database, creator: &str, reward: f64) -> Bounty {
        db.insert_bounty(&NewBounty {
            creator_id: creator.into(),
            title: "Write docs".into(),
            description: "for the API".into(),
            reward,
        })
        .expect("bounty")
    }

    #[test]
    fn one_user_per_wallet() {
        let db = Database::open(&db_path("wallet")).expect("open");
        let a = db.upsert_user("0xdead", None).expect("first");
        let b = db.upsert_user("0xdead", Some(42)).expect("second");
        assert_eq!(a.id, b.id);
        assert_eq!(b.fid, Some(42));
        assert_eq!(db.user(&a.id).expect("user").fid, Some(42));
    }

    #[test]
    fn agent_roundtrip_and_status_update() {
        let (db, user, agent) = seeded("agent-roundtrip");
        assert_eq!(db.agent(&agent.id).expect("agent"), agent);

        let updated = db
            .update_agent_status(&agent.id, AgentStatus::Failed)
            .expect("update");
        assert_eq!(updated.status, AgentStatus::Failed);
        assert_eq!(db.agents_for_user(&user.id).expect("list").len(), 1);

        db.delete_agent(&agent.id).expect("delete");
        assert!(matches!(
            db.agent(&agent.id),
            Err(BloomError::NotFound { entity: "agent", .. })
        ));
    }

    #[test]
    fn agent_for_unknown_user_is_rejected() {
        let db = Database::open(&db_path("fk")).expect("open");
        let err = db
            .insert_agent(&NewAgent {
                user_id: "nobody".into(),
                name: "x".into(),
                description: String::new(),
                prompt_template: "y".into(),
            })
            .expect_err("fk violation");
        assert!(matches!(err, BloomError::NotFound { entity: "user", .. }));
    }

    #[test]
    fn runs_maintain_metrics() {
        let (db, _user, agent) = seeded("metrics");
        db.record_run(&agent.id, true, 10.0).expect("run 1");
        db.record_run(&agent.id, false, 0.0).expect("run 2");
        let agent = db.record_run(&agent.id, true, 20.0).expect("run 3");

        assert_eq!(agent.performance.total_runs, 3);
        assert!((agent.performance.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((agent.performance.average_reward - 10.0).abs() < 1e-9);
    }

    #[test]
    fn claim_only_from_open() {
        let (db, user, agent) = seeded("claim");
        let bounty = post(&db, &user.id, 30.0);

        assert!(db.claim_bounty(&bounty.id, &agent.id).expect("claim"));
        let claimed = db.bounty(&bounty.id).expect("bounty");
        assert_eq!(claimed.status, BountyStatus::InProgress);
        assert_eq!(claimed.assigned_agent_id.as_deref(), Some(agent.id.as_str()));

        // second claim is a no-op
        assert!(!db.claim_bounty(&bounty.id, &agent.id).expect("reclaim"));
        assert_eq!(db.bounty(&bounty.id).expect("bounty"), claimed);

        assert!(matches!(
            db.claim_bounty("missing", &agent.id),
            Err(BloomError::NotFound { entity: "bounty", .. })
        ));
    }

    #[test]
    fn closing_pays_the_agent_owner() {
        let (db, user, agent) = seeded("close");
        let bounty = post(&db, &user.id, 30.0);

        assert!(!db.close_bounty(&bounty.id).expect("close open"));
        db.claim_bounty(&bounty.id, &agent.id).expect("claim");
        assert!(db.close_bounty(&bounty.id).expect("close"));

        assert_eq!(db.bounty(&bounty.id).expect("bounty").status, BountyStatus::Closed);
        let txs = db.transactions_for_user(&user.id).expect("txs");
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].kind, TransactionType::Earn);
        assert_eq!(db.user(&user.id).expect("user").credit_balance, 30.0);
        assert_eq!(db.agent(&agent.id).expect("agent").performance.total_runs, 1);
    }

    #[test]
    fn deleting_a_bounty_notifies_subscribers() {
        let (db, user, _agent) = seeded("delete-bounty");
        let bounty = post(&db, &user.id, 12.0);
        let bounties = db.subscribe(Table::Bounties);

        db.delete_bounty(&bounty.id).expect("delete");
        assert!(matches!(
            db.bounty(&bounty.id),
            Err(BloomError::NotFound { entity: "bounty", .. })
        ));
        let event = bounties.try_recv().expect("delete event");
        assert_eq!(event.kind, ChangeKind::Delete);
        assert_eq!(event.record, serde_json::json!({ "id": bounty.id }));

        assert!(matches!(
            db.delete_bounty(&bounty.id),
            Err(BloomError::NotFound { entity: "bounty", .. })
        ));
        assert!(bounties.try_recv().is_err());
    }

    #[test]
    fn overdraft_is_rejected_by_the_schema() {
        let (db, user, _agent) = seeded("overdraft");
        db.record_transaction(&user.id, TransactionType::Purchase, 100.0, None)
            .expect("purchase");
        db.record_transaction(&user.id, TransactionType::Spend, 40.0, Some("run".into()))
            .expect("spend");

        let err = db
            .record_transaction(&user.id, TransactionType::Spend, 100.0, None)
            .expect_err("overdraft");
        match err {
            BloomError::InsufficientCredits { balance, requested } => {
                assert_eq!(balance, 60.0);
                assert_eq!(requested, 100.0);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(db.transactions_for_user(&user.id).expect("txs").len(), 2);
    }

    #[test]
    fn stake_grants_bonus_credits() {
        let (db, user, _agent) = seeded("stake");
        let grant = db.stake(&user.id, 10.0).expect("stake");
        assert!((grant.amount - 240.0).abs() < 1e-9);

        let user = db.user(&user.id).expect("user");
        assert_eq!(user.staked_amount, 10.0);
        assert!((user.credit_balance - 240.0).abs() < 1e-9);
    }

    #[test]
    fn writes_are_pushed_to_subscribers() {
        let (db, user, agent) = seeded("feed");
        let bounties = db.subscribe(Table::Bounties);
        let bounty = post(&db, &user.id, 5.0);
        db.claim_bounty(&bounty.id, &agent.id).expect("claim");

        let inserted = bounties.try_recv().expect("insert event");
        assert_eq!(inserted.kind, ChangeKind::Insert);
        let updated = bounties.try_recv().expect("update event");
        assert_eq!(updated.kind, ChangeKind::Update);
        assert_eq!(
            updated.record.get("status").and_then(serde_json::Value::as_str),
            Some("inProgress")
        );
    }
}
