pub mod checkin;
pub mod orders;
pub mod public;
pub mod webhooks;
