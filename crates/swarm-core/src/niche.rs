//! Niche matching
//!
//! Classifies inbound messages into a (channel, domain) niche using literal,
//! case-insensitive keyword matching. Categories are checked in a fixed
//! priority order and anything unmatched lands in `general`.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::InboundMessage;

/// Channel id for niches that span every chat platform
pub const MULTI_CHANNEL: &str = "multi-channel";

/// Work domain of a message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Coding,
    Research,
    Scheduling,
    Communication,
    General,
}

impl Domain {
    /// All domains in matching priority order
    pub const ALL: [Domain; 5] = [
        Domain::Coding,
        Domain::Research,
        Domain::Scheduling,
        Domain::Communication,
        Domain::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Coding => "coding",
            Self::Research => "research",
            Self::Scheduling => "scheduling",
            Self::Communication => "communication",
            Self::General => "general",
        }
    }

    /// Parse a domain name; unknown names fall back to `General`
    pub fn from_string(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "coding" => Self::Coding,
            "research" => Self::Research,
            "scheduling" => Self::Scheduling,
            "communication" => Self::Communication,
            _ => Self::General,
        }
    }

    fn keywords(&self) -> &'static [&'static str] {
        match self {
            Self::Coding => &[
                "code",
                "coding",
                "debug",
                "function",
                "bug",
                "compile",
                "stack trace",
                "refactor",
                "repository",
                "pull request",
                "deploy",
                "script",
                "programming",
                "syntax",
                "algorithm",
                "unit test",
            ],
            Self::Research => &[
                "research",
                "paper",
                "study",
                "analyze",
                "analysis",
                "investigate",
                "literature",
                "survey",
                "citation",
                "find out about",
            ],
            Self::Scheduling => &[
                "schedule",
                "meeting",
                "calendar",
                "appointment",
                "remind",
                "deadline",
                "tomorrow",
                "book a",
            ],
            Self::Communication => &[
                "email",
                "send",
                "message",
                "reply",
                "draft",
                "letter",
                "notify",
                "announce",
                "phone call",
            ],
            Self::General => &[],
        }
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A (channel, domain) class of incoming work
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct NicheDescriptor {
    pub channel: String,
    pub domain: Domain,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    /// Always `"{channel}-{domain}"`
    pub key: String,
}

impl NicheDescriptor {
    pub fn new(channel: impl Into<String>, domain: Domain) -> Self {
        let channel = channel.into();
        let key = format!("{}-{}", channel, domain);
        Self {
            channel,
            domain,
            style: None,
            key,
        }
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = Some(style.into());
        self
    }
}

/// Signature of a message classifier, so the manager can be built with another one
pub type NicheMatcher = fn(&InboundMessage) -> NicheDescriptor;

/// Classify a message into its niche. Never fails.
pub fn match_niche(msg: &InboundMessage) -> NicheDescriptor {
    let niche = NicheDescriptor::new(msg.channel.clone(), classify_domain(&msg.text));
    debug!("Matched niche {} for message in chat {}", niche.key, msg.chat_id);
    niche
}

/// Keyword classification: first category (by priority) with a matching keyword wins
pub fn classify_domain(text: &str) -> Domain {
    let lower = text.to_lowercase();
    Domain::ALL
        .iter()
        .copied()
        .find(|domain| domain.keywords().iter().any(|k| lower.contains(k)))
        .unwrap_or(Domain::General)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_coding() {
        assert_eq!(
            classify_domain("Can you help me debug this function?"),
            Domain::Coding
        );
    }

    #[test]
    fn test_classify_research() {
        assert_eq!(
            classify_domain("Research the latest papers on transformers"),
            Domain::Research
        );
    }

    #[test]
    fn test_classify_scheduling() {
        assert_eq!(
            classify_domain("Schedule a meeting for tomorrow"),
            Domain::Scheduling
        );
    }

    #[test]
    fn test_classify_communication() {
        assert_eq!(
            classify_domain("Send an email to the team"),
            Domain::Communication
        );
    }

    #[test]
    fn test_classify_general() {
        assert_eq!(classify_domain("Hello, how are you?"), Domain::General);
        assert_eq!(classify_domain(""), Domain::General);
    }

    #[test]
    fn test_classify_case_insensitive() {
        assert_eq!(classify_domain("DEBUG THIS NOW"), Domain::Coding);
    }

    #[test]
    fn test_priority_on_overlap() {
        // "code" (coding) and "email" (communication) both match: coding wins
        assert_eq!(
            classify_domain("email me the code review notes"),
            Domain::Coding
        );
        // research beats scheduling
        assert_eq!(
            classify_domain("schedule time to study the survey results"),
            Domain::Research
        );
    }

    #[test]
    fn test_match_niche_discord_coding() {
        let msg = InboundMessage::new("discord", "c1", "u1", "there's a bug in my script");
        let niche = match_niche(&msg);
        assert_eq!(niche.channel, "discord");
        assert_eq!(niche.domain, Domain::Coding);
        assert_eq!(niche.key, "discord-coding");
        assert!(niche.style.is_none());
    }

    #[test]
    fn test_channel_copied_verbatim() {
        let msg = InboundMessage::new("My-Custom.Bridge", "c", "u", "hi");
        let niche = match_niche(&msg);
        assert_eq!(niche.key, "My-Custom.Bridge-general");
    }

    #[test]
    fn test_multi_channel_key() {
        let niche = NicheDescriptor::new(MULTI_CHANNEL, Domain::Research);
        assert_eq!(niche.key, "multi-channel-research");
    }

    #[test]
    fn test_domain_serde_and_parse() {
        assert_eq!(
            serde_json::to_string(&Domain::Scheduling).unwrap(),
            "\"scheduling\""
        );
        assert_eq!(Domain::from_string("Research"), Domain::Research);
        assert_eq!(Domain::from_string("cooking"), Domain::General);
    }
}
