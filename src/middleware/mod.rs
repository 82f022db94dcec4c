mod api_key_auth;

pub use api_key_auth::*;
