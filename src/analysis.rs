//! Prompt construction for the dashboard
//!
//! Threat events and country records come from external collaborators (the
//! country directory and the synthetic threat feed); here they are only
//! rendered into chat-completion requests.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::completion::{ChatMessage, CompletionRequest};

/// Completion budget for a full threat analysis
pub const ANALYSIS_MAX_TOKENS: u32 = 2000;

/// Completion budget for a conversational reply
pub const CHAT_MAX_TOKENS: u32 = 1000;

/// Persona for threat analysis requests
pub const ANALYST_SYSTEM_PROMPT: &str = "You are a cybersecurity expert providing threat analysis \
and recommendations for countries. Be specific, actionable, and professional in your responses.";

/// Category of a threat event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThreatType {
    Malware,
    Phishing,
    #[serde(rename = "DDoS")]
    DDoS,
    #[serde(rename = "Data Breach")]
    DataBreach,
}

impl fmt::Display for ThreatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ThreatType::Malware => "Malware",
            ThreatType::Phishing => "Phishing",
            ThreatType::DDoS => "DDoS",
            ThreatType::DataBreach => "Data Breach",
        };
        f.write_str(label)
    }
}

/// Threat level, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ThreatLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl ThreatLevel {
    /// Severity on a 1-4 scale
    pub fn severity(self) -> u8 {
        match self {
            ThreatLevel::Low => 1,
            ThreatLevel::Medium => 2,
            ThreatLevel::High => 3,
            ThreatLevel::Critical => 4,
        }
    }
}

impl fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One threat event as produced by the threat feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Threat {
    pub country_code: String,
    #[serde(rename = "type")]
    pub kind: ThreatType,
    pub level: ThreatLevel,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

impl Threat {
    /// One-line summary used in prompts: `<type> (<level>): <description>`
    pub fn summary(&self) -> String {
        format!("{} ({}): {}", self.kind, self.level, self.description)
    }
}

/// Country record as returned by the country directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountryProfile {
    pub code: String,
    pub name: String,
    pub capital: String,
    pub continent: String,
}

/// Render the user prompt for a country's threat analysis
pub fn threat_analysis_prompt(country: &CountryProfile, threats: &[Threat]) -> String {
    let listed = threats
        .iter()
        .map(|threat| format!("- {}", threat.summary()))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Analyze the cybersecurity threat landscape for {name}:\n\n\
         Current Threats:\n{listed}\n\n\
         Country Context:\n\
         - Capital: {capital}\n\
         - Region: {continent}\n\n\
         Provide:\n\
         1. Risk assessment summary\n\
         2. Top 3 immediate recommendations\n\
         3. Long-term security strategy",
        name = country.name,
        listed = listed,
        capital = country.capital,
        continent = country.continent,
    )
}

/// Build the streaming request for a threat analysis
pub fn threat_analysis_request(
    model: &str,
    country: &CountryProfile,
    threats: &[Threat],
) -> CompletionRequest {
    CompletionRequest::streaming(
        model,
        vec![
            ChatMessage::system(ANALYST_SYSTEM_PROMPT),
            ChatMessage::user(threat_analysis_prompt(country, threats)),
        ],
    )
    .with_max_tokens(ANALYSIS_MAX_TOKENS)
}

/// Build the streaming request for a free-form conversation
pub fn chat_request(model: &str, messages: Vec<ChatMessage>) -> CompletionRequest {
    CompletionRequest::streaming(model, messages).with_max_tokens(CHAT_MAX_TOKENS)
}
