use crate::models::{Agent, Bounty, BountyStatus, CreditTransaction, TransactionType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const RECENT_ACTIVITY_LIMIT: usize = 10;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ActivityKind {
    AgentCreated,
    BountyCompleted { reward: f64 },
    CreditsEarned { amount: f64 },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    pub id: String,
    #[serde(flatten)]
    pub kind: ActivityKind,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceReport {
    pub total_bounties: usize,
    pub completed_bounties: usize,
    pub total_earnings: f64,
    pub average_success_rate: f64,
    pub top_agent: Option<Agent>,
    pub recent_activity: Vec<ActivityEvent>,
}

pub fn performance_report(
    user_id: &str,
    agents: &[Agent],
    bounties: &[Bounty],
    transactions: &[CreditTransaction],
) -> PerformanceReport {
    let user_bounties: Vec<&Bounty> = bounties
        .iter()
        .filter(|b| b.creator_id == user_id)
        .collect();
    let completed: Vec<&Bounty> = user_bounties
        .iter()
        .copied()
        .filter(|b| b.status == BountyStatus::Closed)
        .collect();
    let earnings: Vec<&CreditTransaction> = transactions
        .iter()
        .filter(|t| t.kind == TransactionType::Earn)
        .collect();

    PerformanceReport {
        total_bounties: user_bounties.len(),
        completed_bounties: completed.len(),
        total_earnings: earnings.iter().map(|t| t.amount).sum(),
        average_success_rate: average_success_rate(agents),
        top_agent: top_agent(agents).cloned(),
        recent_activity: recent_activity(agents, &completed, &earnings),
    }
}

pub fn average_success_rate(agents: &[Agent]) -> f64 {
    if agents.is_empty() {
        return 0.0;
    }
    let total: f64 = agents.iter().map(|a| a.performance.success_rate).sum();
    total / agents.len() as f64
}

/// Highest success rate wins; on a tie the earlier agent is kept.
pub fn top_agent(agents: &[Agent]) -> Option<&Agent> {
    agents.iter().fold(None, |best: Option<&Agent>, agent| match best {
        Some(b) if agent.performance.success_rate > b.performance.success_rate => Some(agent),
        Some(b) => Some(b),
        None => Some(agent),
    })
}

fn recent_activity(
    agents: &[Agent],
    completed: &[&Bounty],
    earnings: &[&CreditTransaction],
) -> Vec<ActivityEvent> {
    let mut events = Vec::with_capacity(agents.len() + completed.len() + earnings.len());

    events.extend(agents.iter().map(|a| ActivityEvent {
        id: format!("agent-{}", a.id),
        kind: ActivityKind::AgentCreated,
        description: format!("Created agent {}", a.name),
        timestamp: a.created_at,
    }));
    events.extend(completed.iter().map(|b| ActivityEvent {
        id: format!("bounty-{}", b.id),
        kind: ActivityKind::BountyCompleted { reward: b.reward },
        description: format!("Completed bounty {}", b.title),
        timestamp: b.updated_at,
    }));
    events.extend(earnings.iter().map(|t| ActivityEvent {
        id: format!("tx-{}", t.id),
        kind: ActivityKind::CreditsEarned { amount: t.amount },
        description: t
            .description
            .clone()
            .unwrap_or_else(|| format!("Earned {} credits", t.amount)),
        timestamp: t.created_at,
    }));

    // sort_by is stable, so equal timestamps keep insertion order
    events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    events.truncate(RECENT_ACTIVITY_LIMIT);
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AgentStatus, PerformanceMetrics};
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).single().expect("ts")
    }

    fn agent(id: &str, rate: f64, created: i64) -> Agent {
        Agent {
            id: id.into(),
            user_id: "u1".into(),
            name: format!("agent {id}"),
            description: String::new(),
            prompt_template: "{{input}}".into(),
            performance: PerformanceMetrics {
                success_rate: rate,
                total_runs: 0,
                average_reward: 0.0,
            },
            status: AgentStatus::Active,
            created_at: at(created),
            updated_at: at(created),
        }
    }

    fn bounty(id: &str, creator: &str, status: BountyStatus, updated: i64) -> Bounty {
        Bounty {
            id: id.into(),
            creator_id: creator.into(),
            title: format!("bounty {id}"),
            description: String::new(),
            reward: 25.0,
            status,
            assigned_agent_id: None,
            created_at: at(0),
            updated_at: at(updated),
        }
    }

    fn tx(id: &str, kind: TransactionType, amount: f64, created: i64) -> CreditTransaction {
        CreditTransaction {
            id: id.into(),
            user_id: "u1".into(),
            kind,
            amount,
            description: None,
            created_at: at(created),
        }
    }

    #[test]
    fn empty_inputs_give_zeroed_report() {
        let report = performance_report("u1", &[], &[], &[]);
        assert_eq!(report.total_bounties, 0);
        assert_eq!(report.completed_bounties, 0);
        assert_eq!(report.total_earnings, 0.0);
        assert_eq!(report.average_success_rate, 0.0);
        assert!(report.top_agent.is_none());
        assert!(report.recent_activity.is_empty());
    }

    #[test]
    fn average_is_arithmetic_mean() {
        let agents = vec![agent("a", 0.5, 0), agent("b", 0.7, 1), agent("c", 0.9, 2)];
        let avg = average_success_rate(&agents);
        assert!((avg - 0.7).abs() < 1e-12);
    }

    #[test]
    fn top_agent_keeps_first_on_tie() {
        let agents = vec![agent("a", 0.8, 0), agent("b", 0.8, 1), agent("c", 0.2, 2)];
        assert_eq!(top_agent(&agents).map(|a| a.id.as_str()), Some("a"));

        let agents = vec![agent("a", 0.1, 0), agent("b", 0.95, 1), agent("c", 0.95, 2)];
        let best = top_agent(&agents).expect("top");
        assert_eq!(best.id, "b");
        assert!(agents
            .iter()
            .all(|a| best.performance.success_rate >= a.performance.success_rate));
    }

    #[test]
    fn counts_only_the_users_bounties() {
        let bounties = vec![
            bounty("b1", "u1", BountyStatus::Closed, 5),
            bounty("b2", "u1", BountyStatus::Open, 6),
            bounty("b3", "u2", BountyStatus::Closed, 7),
        ];
        let txs = vec![
            tx("t1", TransactionType::Earn, 10.0, 1),
            tx("t2", TransactionType::Spend, 4.0, 2),
            tx("t3", TransactionType::Earn, 2.5, 3),
        ];
        let report = performance_report("u1", &[], &bounties, &txs);
        assert_eq!(report.total_bounties, 2);
        assert_eq!(report.completed_bounties, 1);
        assert_eq!(report.total_earnings, 12.5);
        assert!(report
            .recent_activity
            .iter()
            .all(|e| e.id != "bounty-b3"));
        assert!(report
            .recent_activity
            .iter()
            .any(|e| e.kind == ActivityKind::BountyCompleted { reward: 25.0 }));
    }

    #[test]
    fn activity_is_newest_first_and_capped() {
        let agents: Vec<Agent> = (0..8).map(|i| agent(&format!("a{i}"), 0.5, i * 10)).collect();
        let bounties: Vec<Bounty> = (0..5)
            .map(|i| bounty(&format!("b{i}"), "u1", BountyStatus::Closed, i * 7))
            .collect();
        let txs: Vec<CreditTransaction> = (0..5)
            .map(|i| tx(&format!("t{i}"), TransactionType::Earn, 1.0, i * 13))
            .collect();

        let report = performance_report("u1", &agents, &bounties, &txs);
        assert_eq!(report.recent_activity.len(), RECENT_ACTIVITY_LIMIT);
        assert!(report
            .recent_activity
            .windows(2)
            .all(|w| w[0].timestamp >= w[1].timestamp));
        assert_eq!(report.recent_activity[0].timestamp, at(70));
    }

    #[test]
    fn activity_events_carry_amounts() {
        let txs = vec![tx("t1", TransactionType::Earn, 42.0, 0)];
        let report = performance_report("u1", &[], &[], &txs);
        assert_eq!(
            report.recent_activity[0].kind,
            ActivityKind::CreditsEarned { amount: 42.0 }
        );
        assert_eq!(report.recent_activity[0].description, "Earned 42 credits");
    }
}
