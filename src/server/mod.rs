mod app;
pub mod head;
pub mod io;
mod listener;
mod middleware;
mod state;

pub use app::create_app;
pub use listener::{UpgradeHandler, UpgradeListener};
pub use middleware::api_key_auth;
pub use state::AppState;
