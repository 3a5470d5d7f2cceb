pub mod app_state;
pub mod config;
pub mod db;
pub mod delivery;
pub mod error;
pub mod http;
pub mod relay;
pub mod statuspage;

pub use app_state::AppState;
pub use config::AppConfig;
pub use error::{RelayError, RelayResult};
