pub mod assistant;
pub mod relay;
pub mod services;
pub mod traits;
