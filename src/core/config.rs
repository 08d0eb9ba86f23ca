mod parsing;
mod settings;
mod types;

pub(crate) use parsing::parse_mode;
pub(crate) use types::{ConfigError, Settings};
