// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Channel, stream and key names.
//!
//! Every name that crosses the bus is derived here so that writers and
//! readers agree on the shape.

/// Default project namespace.
pub const DEFAULT_PROJECT: &str = "centerfire";

/// Default environment.
pub const DEFAULT_ENVIRONMENT: &str = "dev";

/// Registry request channel.
pub const MANAGER_REQUEST: &str = "agent.manager.request";

/// Registry response channel (used when no reply channel is given).
pub const MANAGER_RESPONSE: &str = "agent.manager.response";

/// Scaffolder request channel.
pub const STRUCT_REQUEST: &str = "agent.struct.request";

/// Documentation agent request channel.
pub const SEMDOC_REQUEST: &str = "agent.semdoc.request";

/// Infrastructure manager request channel.
pub const STACK_REQUEST: &str = "agent.stack.request";

/// Request channel for a logical agent topic (`naming`, `struct`, ...).
pub fn request_channel(topic: &str) -> String {
    format!("agent.{}.request", topic)
}

/// Paired response channel for a logical agent topic.
pub fn response_channel(topic: &str) -> String {
    format!("agent.{}.response", topic)
}

/// Per-agent reply channel for registration acknowledgements.
pub fn manager_reply_channel(agent_name: &str) -> String {
    format!("{}:{}", MANAGER_RESPONSE, agent_name)
}

/// Key under which the Registry mirrors a live agent record.
pub fn running_agent_key(project: &str, agent_name: &str) -> String {
    format!("{}:agents:running:{}", project, agent_name)
}

/// Counter key for a (class, domain) pair: `<P>.<E>.sequence:<CLASS>-<DOMAIN>`.
pub fn sequence_key(project: &str, environment: &str, class_prefix: &str, domain: &str) -> String {
    format!(
        "{}.{}.sequence:{}-{}",
        project, environment, class_prefix, domain
    )
}

/// Allocation record key: `<P>.<E>.names:<class>:<slug>`.
pub fn allocation_key(project: &str, environment: &str, class: &str, slug: &str) -> String {
    format!("{}.{}.names:{}:{}", project, environment, class, slug)
}

/// Names stream (capabilities, modules, functions, sessions).
pub fn names_stream(project: &str) -> String {
    format!("{}:semantic:names", project)
}

/// Namespaces stream.
pub fn namespaces_stream(project: &str) -> String {
    format!("{}:semantic:namespaces", project)
}

/// Structured conversation turns.
pub fn semantic_conversations_stream(project: &str) -> String {
    format!("{}:semantic:conversations", project)
}

/// Raw conversation chunks scraped from shells.
pub fn conversations_stream(project: &str) -> String {
    format!("{}:conversations", project)
}

/// Session graph events.
pub fn neo4j_sessions_stream(project: &str) -> String {
    format!("{}:neo4j:sessions", project)
}

/// Documentation contract events.
pub fn semdoc_contracts_stream(project: &str) -> String {
    format!("{}:semdoc:contracts", project)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channels() {
        assert_eq!(request_channel("naming"), "agent.naming.request");
        assert_eq!(response_channel("naming"), "agent.naming.response");
        assert_eq!(
            manager_reply_channel("AGT-NAMING-2"),
            "agent.manager.response:AGT-NAMING-2"
        );
    }

    #[test]
    fn test_sequence_and_record_keys() {
        assert_eq!(
            sequence_key("centerfire", "dev", "CAP", "AUTH"),
            "centerfire.dev.sequence:CAP-AUTH"
        );
        assert_eq!(
            allocation_key("centerfire", "dev", "capability", "CAP-AUTH-1"),
            "centerfire.dev.names:capability:CAP-AUTH-1"
        );
    }

    #[test]
    fn test_streams() {
        assert_eq!(names_stream("centerfire"), "centerfire:semantic:names");
        assert_eq!(namespaces_stream("centerfire"), "centerfire:semantic:namespaces");
        assert_eq!(conversations_stream("acme"), "acme:conversations");
        assert_eq!(neo4j_sessions_stream("acme"), "acme:neo4j:sessions");
        assert_eq!(semdoc_contracts_stream("acme"), "acme:semdoc:contracts");
    }
}
