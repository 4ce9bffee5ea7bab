//! Project configuration entities and the lookup snapshot built from them.
mod holdout_config;
mod models;
mod project_config;

pub use models::*;
pub use project_config::ProjectConfig;
