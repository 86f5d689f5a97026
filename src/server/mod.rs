pub mod dispatch;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod types;
