//! Query plans and local-first routing.
//!
//! A [`QueryInterpreter`] turns a question into a [`QueryPlan`]; the
//! [`QueryRouter`] answers the plan from the local store when it holds
//! matching records and from the gateway otherwise, tagging the
//! [`QueryAnswer`] with its [`Provenance`].

mod error;
pub mod format;
pub mod interpreter;
pub mod plan;
pub mod router;

pub use error::QueryError;
pub use format::summarize;
pub use interpreter::{KeywordInterpreter, QueryInterpreter};
pub use plan::{ExecutionMode, PlanFilters, QueryPlan};
pub use router::{Provenance, QueryAnswer, QueryRouter, remote_path};
