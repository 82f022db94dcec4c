//! Boxoffice - ticket inventory reservation and checkout lifecycle
//!
//! Holds ticket inventory while a buyer pays, reconciles payment webhooks into
//! issued tickets, and validates tickets at the door.

pub mod checkin;
pub mod checkout;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod extractors;
pub mod fees;
pub mod handlers;
pub mod holds;
pub mod id;
pub mod issuance;
pub mod ledger;
pub mod middleware;
pub mod models;
pub mod payments;
pub mod util;
