pub mod handler;

pub use handler::{WebSocketHandler, WS_PATH};
