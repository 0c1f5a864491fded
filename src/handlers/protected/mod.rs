// handlers/protected/mod.rs - Protected handlers (JWT authentication required)
//
// Route Prefix: /api/*
// Middleware: JWT validation + user/role resolution. Permission checks
// happen in the services.

pub mod auth;
pub mod clients;
pub mod predefined;
pub mod protocols;
pub mod settings;
pub mod templates;

pub use auth::me as auth_me;
