pub mod health_handlers;
pub mod navigation_handlers;
