mod helpers;
mod secret;

pub use helpers::{parse_boolean_flag, parse_env_number};
pub use secret::Secret;
