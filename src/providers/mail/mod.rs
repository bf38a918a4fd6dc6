//! Mail provider abstraction and the Gmail implementation.

mod gmail;
mod traits;

pub use gmail::GmailClient;
pub use traits::{MailClient, MailError, MailLabel, MailMessage, MessagePage, Result};
