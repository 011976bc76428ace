use serde::{Deserialize, Serialize};

pub const MAX_NAME_LEN: usize = 64;
pub const MAX_TITLE_LEN: usize = 120;
pub const MAX_PROMPT_LEN: usize = 4000;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserV1 {
    pub wallet_address: String,
    #[serde(default)]
    pub fid: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAgentV1 {
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub prompt_template: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBountyV1 {
    pub creator_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub reward: f64,
}

pub fn validate_wallet_address(address: &str) -> Result<(), String> {
    let Some(hex) = address.strip_prefix("0x") else {
        return Err(format!("wallet address '{address}' must start with 0x"));
    };
    if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("wallet address '{address}' must be 40 hex digits"));
    }
    Ok(())
}

pub fn validate_create_user(user: &CreateUserV1) -> Result<(), String> {
    validate_wallet_address(&user.wallet_address)?;
    if user.fid == Some(0) {
        return Err("fid must be positive".into());
    }
    Ok(())
}

pub fn validate_create_agent(agent: &CreateAgentV1) -> Result<(), String> {
    if agent.user_id.trim().is_empty() {
        return Err("userId is required".into());
    }
    required_text("name", &agent.name, MAX_NAME_LEN)?;
    required_text("promptTemplate", &agent.prompt_template, MAX_PROMPT_LEN)?;
    Ok(())
}

pub fn validate_create_bounty(bounty: &CreateBountyV1) -> Result<(), String> {
    if bounty.creator_id.trim().is_empty() {
        return Err("creatorId is required".into());
    }
    required_text("title", &bounty.title, MAX_TITLE_LEN)?;
    if !bounty.reward.is_finite() || bounty.reward < 0.0 {
        return Err(format!("invalid reward '{}'", bounty.reward));
    }
    Ok(())
}

fn required_text(field: &str, value: &str, max_len: usize) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field} is required"));
    }
    if value.chars().count() > max_len {
        return Err(format!("{field} exceeds {max_len} characters"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_wallet_addresses() {
        assert!(validate_wallet_address("0x71C7656EC7ab88b098defB751B7401B5f6d8976F").is_ok());
        assert!(validate_wallet_address("71c7656ec7ab88b098defb751b7401b5f6d8976f").is_err());
        assert!(validate_wallet_address("0x1234").is_err());
        assert!(validate_wallet_address("0xzzc7656ec7ab88b098defb751b7401b5f6d8976f").is_err());
    }

    #[test]
    fn validates_agent_payload() {
        let agent: CreateAgentV1 = serde_json::from_value(serde_json::json!({
            "userId": "u1",
            "name": "Scout",
            "promptTemplate": "Find {{input}}"
        }))
        .expect("parse");
        assert!(validate_create_agent(&agent).is_ok());

        let long = CreateAgentV1 {
            name: "x".repeat(MAX_NAME_LEN + 1),
            ..agent
        };
        assert_eq!(
            validate_create_agent(&long),
            Err(format!("name exceeds {MAX_NAME_LEN} characters"))
        );
    }

    #[test]
    fn rejects_negative_or_nan_rewards() {
        let mut bounty = CreateBountyV1 {
            creator_id: "u1".into(),
            title: "Translate docs".into(),
            description: String::new(),
            reward: 10.0,
        };
        assert!(validate_create_bounty(&bounty).is_ok());
        bounty.reward = -1.0;
        assert!(validate_create_bounty(&bounty).is_err());
        bounty.reward = f64::NAN;
        assert!(validate_create_bounty(&bounty).is_err());
    }
}
