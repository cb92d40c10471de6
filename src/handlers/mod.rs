pub mod health;
pub mod lots;
pub mod stages;
pub mod stock;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;
