use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub fid: Option<u64>,
    pub wallet_address: String,
    pub credit_balance: f64,
    pub staked_amount: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub success_rate: f64,
    pub total_runs: u64,
    pub average_reward: f64,
}

impl PerformanceMetrics {
    /// Folds one run into the running averages, matching what the
    /// `agent_runs_metrics` trigger computes over the full run history.
    pub fn record_run(&mut self, success: bool, reward: f64) {
        let runs = self.total_runs as f64;
        let next = runs + 1.0;
        let hit = if success { 1.0 } else { 0.0 };
        self.success_rate = (self.success_rate * runs + hit) / next;
        self.average_reward = (self.average_reward * runs + reward) / next;
        self.total_runs += 1;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AgentStatus {
    Active,
    Completed,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub description: String,
    pub prompt_template: String,
    pub performance: PerformanceMetrics,
    pub status: AgentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BountyStatus {
    Open,
    InProgress,
    Closed,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bounty {
    pub id: String,
    pub creator_id: String,
    pub title: String,
    pub description: String,
    pub reward: f64,
    pub status: BountyStatus,
    pub assigned_agent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransactionType {
    Purchase,
    Spend,
    Earn,
    Stake,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditTransaction {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub amount: f64,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRun {
    pub id: String,
    pub agent_id: String,
    pub success: bool,
    pub reward: f64,
    pub created_at: DateTime<Utc>,
}

/// Fields a caller supplies when creating an agent.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAgent {
    pub user_id: String,
    pub name: String,
    pub description: String,
    pub prompt_template: String,
}

/// Fields a caller supplies when posting a bounty.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBounty {
    pub creator_id: String,
    pub title: String,
    pub description: String,
    pub reward: f64,
}

/// Storage representation of the enumerated fields. Matches the serde names
/// and the CHECK constraints in the schema.
macro_rules! column_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text,)+
                }
            }
        }

        impl std::str::FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($ty::$variant),)+
                    other => Err(format!("invalid {} '{other}'", stringify!($ty))),
                }
            }
        }
    };
}

column_enum!(AgentStatus {
    Active => "active",
    Completed => "completed",
    Failed => "failed",
});

column_enum!(BountyStatus {
    Open => "open",
    InProgress => "inProgress",
    Closed => "closed",
});

column_enum!(TransactionType {
    Purchase => "purchase",
    Spend => "spend",
    Earn => "earn",
    Stake => "stake",
});

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
