//! HTTP implementations of the collaborator traits.

pub mod openrouter;
pub mod waha;

pub use openrouter::OpenRouterClient;
pub use waha::WahaClient;
