// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Allocation classes, records and requests.

use serde::{Deserialize, Serialize};

/// Kind of identifier being allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationClass {
    Capability,
    Session,
    Namespace,
    Module,
    Function,
}

impl AllocationClass {
    /// All classes, in prefix-matching order.
    pub const ALL: [AllocationClass; 5] = [
        Self::Capability,
        Self::Session,
        Self::Namespace,
        Self::Module,
        Self::Function,
    ];

    /// Slug prefix (`CAP`, `SES`, ...).
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Capability => "CAP",
            Self::Session => "SES",
            Self::Namespace => "NS",
            Self::Module => "MOD",
            Self::Function => "FN",
        }
    }

    /// Lowercase class name used in keys and cids.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Capability => "capability",
            Self::Session => "session",
            Self::Namespace => "namespace",
            Self::Module => "module",
            Self::Function => "function",
        }
    }

    /// `event_type` written to the stream.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Capability => "capability_allocated",
            Self::Session => "session_allocated",
            Self::Namespace => "namespace_allocated",
            Self::Module => "module_allocated",
            Self::Function => "function_allocated",
        }
    }

    /// Class for a slug prefix.
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.prefix() == prefix)
    }
}

impl std::fmt::Display for AllocationClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An allocated identifier. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub class: AllocationClass,
    pub slug: String,
    pub cid: String,
    pub directory: String,
    pub token: String,
    pub sequence: i64,
    pub project: String,
    pub environment: String,
    pub domain: String,
    #[serde(default)]
    pub purpose: String,
    /// RFC 3339.
    pub allocated: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Actions accepted on `agent.naming.request`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum NamingAction {
    AllocateCapability {
        domain: String,
        #[serde(default, alias = "description")]
        purpose: Option<String>,
        #[serde(default)]
        project: Option<String>,
        #[serde(default)]
        environment: Option<String>,
    },
    AllocateSession {
        #[serde(default, alias = "type")]
        agent_type: Option<String>,
        #[serde(default)]
        project: Option<String>,
        #[serde(default)]
        environment: Option<String>,
    },
    AllocateNamespace {
        project: String,
        environment: String,
        #[serde(default)]
        class_type: Option<String>,
    },
    AllocateModule {
        domain: String,
        #[serde(default, alias = "description")]
        purpose: Option<String>,
        #[serde(default)]
        project: Option<String>,
        #[serde(default)]
        environment: Option<String>,
    },
    AllocateFunction {
        domain: String,
        #[serde(default, alias = "description")]
        purpose: Option<String>,
        #[serde(default)]
        project: Option<String>,
        #[serde(default)]
        environment: Option<String>,
    },
    ValidateName {
        name: String,
    },
    Health {},
}

/// Session domain for an agent type: `claude*` → `CLAUDE`, other → `AGENT`,
/// none → `GENERIC`.
pub fn session_domain(agent_type: Option<&str>) -> &'static str {
    match agent_type.map(str::trim) {
        None | Some("") => "GENERIC",
        Some(t) if t.to_ascii_lowercase().starts_with("claude") => "CLAUDE",
        Some(_) => "AGENT",
    }
}

/// Weaviate-style class name: `<Project>_<Env>_<Class>`.
pub fn class_name(project: &str, environment: &str, class_type: &str) -> String {
    if project.is_empty() || environment.is_empty() {
        return format!("Semantic_{}", title_case(class_type));
    }
    format!(
        "{}_{}_{}",
        title_case(project),
        title_case(environment),
        title_case(class_type)
    )
}

fn title_case(word: &str) -> String {
    let lower = word.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Domain part of a slug: uppercase, alphanumerics only, `-`/space → `_`.
pub fn normalize_domain(domain: &str) -> String {
    domain
        .trim()
        .chars()
        .filter_map(|c| match c {
            c if c.is_ascii_alphanumeric() => Some(c.to_ascii_uppercase()),
            '-' | '_' | ' ' => Some('_'),
            _ => None,
        })
        .collect()
}

/// A parsed `<CLASS>-<DOMAIN>-<n>[__<token>]` name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedName {
    pub class: AllocationClass,
    pub domain: String,
    pub sequence: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Parse a slug or directory name.
pub fn parse_name(name: &str) -> Result<ParsedName, String> {
    let (slug, token) = match name.split_once("__") {
        Some((slug, token)) => (slug, Some(token)),
        None => (name, None),
    };
    if let Some(token) = token {
        if !super::token::is_valid(token) {
            return Err(format!("invalid token '{}'", token));
        }
    }

    let (prefix, rest) = slug
        .split_once('-')
        .ok_or_else(|| "expected <CLASS>-<DOMAIN>-<n>".to_string())?;
    let class = AllocationClass::from_prefix(prefix)
        .ok_or_else(|| format!("unknown class prefix '{}'", prefix))?;
    let (domain, sequence) = rest
        .rsplit_once('-')
        .ok_or_else(|| "missing sequence".to_string())?;
    if domain.is_empty() || normalize_domain(domain) != domain {
        return Err(format!("invalid domain '{}'", domain));
    }
    let sequence: i64 = sequence
        .parse()
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| format!("invalid sequence '{}'", sequence))?;

    Ok(ParsedName {
        class,
        domain: domain.to_string(),
        sequence,
        token: token.map(|t| t.to_ascii_uppercase()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixes() {
        assert_eq!(AllocationClass::Capability.prefix(), "CAP");
        assert_eq!(AllocationClass::Function.prefix(), "FN");
        assert_eq!(AllocationClass::from_prefix("MOD"), Some(AllocationClass::Module));
        assert_eq!(AllocationClass::from_prefix("XYZ"), None);
        assert_eq!(AllocationClass::Namespace.event_type(), "namespace_allocated");
    }

    #[test]
    fn test_session_domain() {
        assert_eq!(session_domain(Some("claude_coding")), "CLAUDE");
        assert_eq!(session_domain(Some("agent_session")), "AGENT");
        assert_eq!(session_domain(Some("  ")), "GENERIC");
        assert_eq!(session_domain(None), "GENERIC");
    }

    #[test]
    fn test_class_name() {
        assert_eq!(class_name("centerfire", "DEV", "conversation"), "Centerfire_Dev_Conversation");
        assert_eq!(class_name("", "dev", "note"), "Semantic_Note");
    }

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain("auth"), "AUTH");
        assert_eq!(normalize_domain(" user-mgmt "), "USER_MGMT");
        assert_eq!(normalize_domain("a.b"), "AB");
    }

    #[test]
    fn test_parse_name() {
        let parsed = parse_name("CAP-AUTH-12").unwrap();
        assert_eq!(parsed.class, AllocationClass::Capability);
        assert_eq!(parsed.domain, "AUTH");
        assert_eq!(parsed.sequence, 12);
        assert!(parsed.token.is_none());

        let parsed = parse_name("SES-CLAUDE-3__0123ABCD").unwrap();
        assert_eq!(parsed.class, AllocationClass::Session);
        assert_eq!(parsed.token.as_deref(), Some("0123ABCD"));

        let parsed = parse_name("MOD-USER_MGMT-1").unwrap();
        assert_eq!(parsed.domain, "USER_MGMT");

        assert!(parse_name("CAP-AUTH").is_err());
        assert!(parse_name("CAP-AUTH-0").is_err());
        assert!(parse_name("XYZ-AUTH-1").is_err());
        assert!(parse_name("CAP-auth-1").is_err());
        assert!(parse_name("CAP-AUTH-1__bad").is_err());
    }

    #[test]
    fn test_decode_actions() {
        let action: NamingAction = serde_json::from_value(serde_json::json!({
            "action": "allocate_capability",
            "domain": "AUTH",
            "description": "login"
        }))
        .unwrap();
        assert_eq!(
            action,
            NamingAction::AllocateCapability {
                domain: "AUTH".to_string(),
                purpose: Some("login".to_string()),
                project: None,
                environment: None,
            }
        );
    }
}
