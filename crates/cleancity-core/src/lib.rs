pub mod config;
pub mod error;
pub mod estimator;
pub mod location;
pub mod types;

pub use config::CleanCityConfig;
pub use error::{CleanCityError, Result};
pub use estimator::{Estimate, Estimator};
pub use types::*;
