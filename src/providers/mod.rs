//! External service clients: OAuth, mail, LLM, and exchange rates.

pub mod ai;
pub mod fx;
pub mod mail;
pub mod oauth;
