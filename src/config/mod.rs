pub mod loader;
pub mod models;
pub mod validation;

pub use loader::load_authz_file;
pub use models::*;
pub use validation::{AppConfigValidator, ValidationError, ValidationResult};
