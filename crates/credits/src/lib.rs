//! Credit accounts: tiers, reservations, refunds and top-ups.
//!
//! Pure domain rules with no IO. Storage adapters (in-memory, Postgres) apply
//! these rules atomically per account.

pub mod account;

pub use account::{CreditAccount, CreditError, CreditTier, Reservation, WEEK_DAYS};
