//! IPC module for operator, observer and detector clients

mod protocol;
mod server;

pub use protocol::{EngineStatus, Notification, Request, Response, MAX_MESSAGE_LEN};
pub use server::Server;
