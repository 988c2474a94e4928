pub mod activity;
pub mod handlers;
pub mod items;
pub mod middleware;
pub mod orchestrator;
pub mod routes;
pub mod ws;

pub use routes::create_router;
pub use ws::WsMessage;
