//! mailmint - turns transactional bank emails into a structured ledger.
//!
//! The crate wires together the email-to-ledger ingestion pipeline:
//! mailbox credential management, incremental Gmail scanning, LLM-backed
//! field extraction, two-stage transaction categorization, idempotent
//! ledger upserts, and a scheduled exchange-rate cache.

pub mod clock;
pub mod config;
pub mod daemon;
pub mod domain;
pub mod providers;
pub mod services;
pub mod storage;
