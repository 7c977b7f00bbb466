// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Naming engine: sequence-backed identifier allocation.
//!
//! For class `C`, project `P`, environment `E` and domain `D`:
//!
//! ```text
//! INCR <P>.<E>.sequence:<C>-<D>          → n
//! token                                  → 8 chars, time-ordered
//! SET NX <P>.<E>.names:<class>:<C>-<D>-n → record (never overwritten)
//! XADD <project>:semantic:names          → <class>_allocated
//! PUBLISH agent.struct.request           → create_structure (capabilities)
//! ```
//!
//! Allocation is not idempotent: a retried request gets a new sequence.

mod engine;
pub mod token;
mod types;

pub use engine::{AllocationRequest, NamingService};
pub use types::{
    class_name, normalize_domain, parse_name, session_domain, Allocation, AllocationClass,
    NamingAction, ParsedName,
};
