// handlers/mod.rs - Handler tiers
//
// Public (no auth) → Protected (JWT + resolved role) → Elevated (admin role).
// The function endpoints keep their hosted-function paths and sit behind the
// same authentication as the protected tier.

pub mod elevated;
pub mod functions;
pub mod protected;
pub mod public;
pub mod query;

pub use query::ListQuery;
