//! Service adapters for the Portway gateway.
//!
//! Each supported upstream (PostgreSQL, MySQL, SQL Server, Supabase,
//! Stripe, Mixpanel) implements the shared [`contracts::ServiceAdapter`]
//! capability set. The SQL guard and the adapter registry live here so the
//! gateway dispatcher stays driver-agnostic.

pub mod contracts;
pub mod error;
pub mod mixpanel;
pub mod safety;
pub mod sql;
pub mod sql_guard;
pub mod stripe;
pub mod supabase;

pub use contracts::{
    AdapterRegistry, ServiceAdapter, ServiceConfig, ServiceKind, ToolDef, ToolOutcome,
};
pub use error::AdapterError;
