pub mod auth;
pub mod handlers;
pub mod rpc;
pub mod server;

pub use auth::TokenAuthority;
pub use handlers::HandlerState;
pub use server::{spawn_background, start, AppState, ServerConfig, ServerHandle};
