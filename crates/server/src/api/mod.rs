pub mod batches;
pub mod cookie_files;
pub mod engine;
pub mod handlers;
pub mod middleware;
pub mod routes;

pub use routes::create_router;
