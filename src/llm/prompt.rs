// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Thin per-task prompt templates.

const FILE_SEARCH: &str = "You are a file analyst. Help find files related to: {input}\n\
\n\
Task: Suggest specific file paths, directories, or search patterns.\n\
Format: Concrete, actionable file locations.\n\
\n\
Query: {input}";

const KNOWLEDGE_QUERY: &str = "You are a knowledge curator. Help query conversation history for: {input}\n\
\n\
Context: A vector database holds conversation embeddings.\n\
Task: Suggest semantic search terms and query strategies.\n\
Format: Specific search terms and filters.\n\
\n\
Query: {input}";

const TODO_UPDATE: &str = "You are a workflow manager. Help organize tasks: {input}\n\
\n\
Task: Structure, prioritize, and track progress.\n\
Format: Clear, actionable todo items.\n\
\n\
Request: {input}";

/// Wrap the caller's text for an action. Unknown actions pass it through.
pub fn build_prompt(action: &str, input: &str) -> String {
    let template = match action {
        "file_search" => FILE_SEARCH,
        "weaviate_query" | "knowledge_query" => KNOWLEDGE_QUERY,
        "todo_update" => TODO_UPDATE,
        _ => return input.to_string(),
    };
    template.replace("{input}", input)
}
