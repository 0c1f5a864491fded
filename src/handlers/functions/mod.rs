// handlers/functions/mod.rs - Document-processing operations
//
// Route Prefix: /functions/v1/*
// Middleware: same JWT + user resolution as the protected tier

pub mod process;

pub use process::{idempotency_key, process_and_send_protocol, process_document};
