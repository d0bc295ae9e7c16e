mod handler;
mod message;
mod router;

pub use handler::ws_handler;
pub use message::{ClientMessage, OutboundMessage, ServerMessage};
pub use router::EventRouter;
