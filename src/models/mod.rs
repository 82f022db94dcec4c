mod api_key;
mod event;
mod fee_rule;
mod hold;
mod order;
mod product;
mod scan_log;
mod ticket;
mod ticket_tier;

pub use api_key::*;
pub use event::*;
pub use fee_rule::*;
pub use hold::*;
pub use order::*;
pub use product::*;
pub use scan_log::*;
pub use ticket::*;
pub use ticket_tier::*;
