use crate::error::{BloomError, Result};
use serde::{Deserialize, Serialize};

pub const FRAME_VERSION: &str = "vNext";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameScreen {
    Home,
    Agents,
    Bounties,
    Credits,
}

impl FrameScreen {
    pub const ALL: [FrameScreen; 4] = [
        FrameScreen::Home,
        FrameScreen::Agents,
        FrameScreen::Bounties,
        FrameScreen::Credits,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FrameScreen::Home => "home",
            FrameScreen::Agents => "agents",
            FrameScreen::Bounties => "bounties",
            FrameScreen::Credits => "credits",
        }
    }

    /// Buttons in display order with the screen each one leads to.
    pub fn buttons(&self) -> &'static [(&'static str, FrameScreen)] {
        match self {
            FrameScreen::Home => &[
                ("My Agents", FrameScreen::Agents),
                ("Bounties", FrameScreen::Bounties),
                ("Credits", FrameScreen::Credits),
            ],
            FrameScreen::Agents => &[
                ("Back", FrameScreen::Home),
                ("Bounties", FrameScreen::Bounties),
            ],
            FrameScreen::Bounties => &[
                ("Back", FrameScreen::Home),
                ("My Agents", FrameScreen::Agents),
                ("Credits", FrameScreen::Credits),
            ],
            FrameScreen::Credits => &[
                ("Back", FrameScreen::Home),
                ("Bounties", FrameScreen::Bounties),
            ],
        }
    }
}

impl std::str::FromStr for FrameScreen {
    type Err = BloomError;

    fn from_str(s: &str) -> Result<Self> {
        FrameScreen::ALL
            .into_iter()
            .find(|screen| screen.as_str() == s)
            .ok_or_else(|| BloomError::not_found("frame screen", s))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CastId {
    pub fid: u64,
    pub hash: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UntrustedData {
    pub fid: u64,
    pub button_index: u32,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub message_hash: Option<String>,
    #[serde(default)]
    pub timestamp: Option<u64>,
    #[serde(default)]
    pub cast_id: Option<CastId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustedData {
    pub message_bytes: String,
}

/// Signature packet posted by a client when a frame button is pressed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameAction {
    pub untrusted_data: UntrustedData,
    pub trusted_data: TrustedData,
}

/// `fc:frame` meta tags for `screen`, in document order.
pub fn metadata(screen: FrameScreen, base_url: &str) -> Vec<(String, String)> {
    let base = base_url.trim_end_matches('/');
    let image = format!("{base}/{}", image_path(screen));

    let mut tags = vec![
        ("fc:frame".to_string(), FRAME_VERSION.to_string()),
        ("fc:frame:image".to_string(), image.clone()),
        ("og:image".to_string(), image),
        (
            "fc:frame:post_url".to_string(),
            format!("{base}/frames/action?screen={}", screen.as_str()),
        ),
    ];
    for (idx, (label, _)) in screen.buttons().iter().enumerate() {
        tags.push((format!("fc:frame:button:{}", idx + 1), label.to_string()));
    }
    tags
}

/// Path, relative to the public base URL, of the image for `screen`.
pub fn image_path(screen: FrameScreen) -> String {
    format!("frames/{}/image.svg", screen.as_str())
}

/// 1.91:1 card for `screen`: the product name, the screen title and the
/// labels of its buttons.
pub fn render_image(screen: FrameScreen) -> String {
    let title = match screen {
        FrameScreen::Home => "Your AI agents, staked and earning",
        FrameScreen::Agents => "My Agents",
        FrameScreen::Bounties => "Open Bounties",
        FrameScreen::Credits => "Credits & Staking",
    };
    let labels = screen
        .buttons()
        .iter()
        .map(|(label, _)| *label)
        .collect::<Vec<_>>()
        .join("  ·  ");

    let mut svg = String::from(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"1146\" height=\"600\" viewBox=\"0 0 1146 600\">\n",
    );
    svg.push_str("<rect width=\"1146\" height=\"600\" fill=\"#14101f\"/>\n");
    svg.push_str(
        "<text x=\"573\" y=\"180\" fill=\"#f472b6\" font-size=\"64\" font-family=\"sans-serif\" text-anchor=\"middle\">AgentBloom</text>\n",
    );
    svg.push_str(&format!(
        "<text x=\"573\" y=\"320\" fill=\"#ffffff\" font-size=\"48\" font-family=\"sans-serif\" text-anchor=\"middle\">{}</text>\n",
        escape(title)
    ));
    svg.push_str(&format!(
        "<text x=\"573\" y=\"460\" fill=\"#a1a1aa\" font-size=\"32\" font-family=\"sans-serif\" text-anchor=\"middle\">{}</text>\n",
        escape(&labels)
    ));
    svg.push_str("</svg>\n");
    svg
}

pub fn render_html(screen: FrameScreen, base_url: &str) -> String {
    let mut html = String::from("<!DOCTYPE html>\n<html>\n<head>\n");
    html.push_str(&format!("<title>AgentBloom {}</title>\n", screen.as_str()));
    for (property, content) in metadata(screen, base_url) {
        html.push_str(&format!(
            "<meta property=\"{}\" content=\"{}\" />\n",
            escape(&property),
            escape(&content)
        ));
    }
    html.push_str("</head>\n<body></body>\n</html>\n");
    html
}

/// Structural checks on a button press from `screen`. Returns the screen the
/// button leads to. Signature verification belongs to the hub.
pub fn validate_action(screen: FrameScreen, action: &FrameAction) -> Result<FrameScreen> {
    let data = &action.untrusted_data;
    if data.fid == 0 {
        return Err(BloomError::validation("fid", "must be a registered fid"));
    }
    if action.trusted_data.message_bytes.trim().is_empty() {
        return Err(BloomError::validation("messageBytes", "is required"));
    }

    let buttons = screen.buttons();
    let idx = data.button_index as usize;
    if idx == 0 || idx > buttons.len() {
        return Err(BloomError::validation(
            "buttonIndex",
            format!("{} is outside 1..={} for {}", idx, buttons.len(), screen.as_str()),
        ));
    }
    Ok(buttons[idx - 1].1)
}

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(fid: u64, button_index: u32) -> FrameAction {
        FrameAction {
            untrusted_data: UntrustedData {
                fid,
                button_index,
                url: None,
                message_hash: None,
                timestamp: None,
                cast_id: None,
            },
            trusted_data: TrustedData {
                message_bytes: "0a4b".into(),
            },
        }
    }

    #[test]
    fn metadata_lists_buttons_in_order() {
        let tags = metadata(FrameScreen::Home, "https://bloom.example/");
        assert_eq!(tags[0], ("fc:frame".to_string(), "vNext".to_string()));
        assert!(tags.contains(&(
            "fc:frame:post_url".to_string(),
            "https://bloom.example/frames/action?screen=home".to_string()
        )));
        assert!(tags.contains(&("fc:frame:button:3".to_string(), "Credits".to_string())));
        assert!(!tags.iter().any(|(k, _)| k == "fc:frame:button:4"));
        assert!(tags.contains(&(
            "fc:frame:image".to_string(),
            "https://bloom.example/frames/home/image.svg".to_string()
        )));
    }

    #[test]
    fn image_names_screen_and_buttons() {
        let svg = render_image(FrameScreen::Credits);
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains("Credits &amp; Staking"));
        assert!(svg.contains("Back  ·  Bounties"));
    }

    #[test]
    fn every_screen_fits_the_button_limit() {
        for screen in FrameScreen::ALL {
            assert!((1..=4).contains(&screen.buttons().len()));
            assert_eq!(screen.as_str().parse::<FrameScreen>().ok(), Some(screen));
        }
        assert!("settings".parse::<FrameScreen>().is_err());
    }

    #[test]
    fn buttons_route_to_next_screen() {
        assert_eq!(
            validate_action(FrameScreen::Home, &action(7, 2)).expect("valid"),
            FrameScreen::Bounties
        );
        assert_eq!(
            validate_action(FrameScreen::Credits, &action(7, 1)).expect("valid"),
            FrameScreen::Home
        );
    }

    #[test]
    fn rejects_out_of_range_buttons_and_anonymous_fids() {
        assert!(validate_action(FrameScreen::Agents, &action(7, 3)).is_err());
        assert!(validate_action(FrameScreen::Agents, &action(7, 0)).is_err());
        assert!(validate_action(FrameScreen::Agents, &action(0, 1)).is_err());
    }

    #[test]
    fn parses_client_payload() {
        let raw = r#"{
            "untrustedData": {"fid": 2, "buttonIndex": 1, "url": "https://bloom.example",
                              "messageHash": "0xd2b1", "timestamp": 1706243218,
                              "castId": {"fid": 226, "hash": "0xa48d"}},
            "trustedData": {"messageBytes": "d2b1ddc6c88e865810"}
        }"#;
        let parsed: FrameAction = serde_json::from_str(raw).expect("parse");
        assert_eq!(parsed.untrusted_data.cast_id.map(|c| c.fid), Some(226));
    }

    #[test]
    fn html_escapes_content() {
        let html = render_html(FrameScreen::Agents, "https://bloom.example/?a=1&b=\"2\"");
        assert!(html.contains("&amp;b=&quot;2&quot;"));
        assert!(html.contains("property=\"fc:frame:button:2\" content=\"Bounties\""));
    }
}
