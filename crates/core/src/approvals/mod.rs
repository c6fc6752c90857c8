//! Pure approval-chain rules: turning configuration into ordered steps and deciding who may act
//! on a step. Nothing in here touches storage.

pub mod authorizer;
pub mod resolver;

pub use authorizer::{StepAuthorization, StepAuthorizer};
pub use resolver::{ConfigResolver, ResolveError};
