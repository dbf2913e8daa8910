//! Viewer accept loop
//!
//! Accepts TCP connections and hands them to the pipeline's admission queue.
//! What gets written on each socket is up to the [`DeliveryHandler`](crate::DeliveryHandler).

pub mod config;
pub mod listener;

pub use config::ListenerConfig;
pub use listener::ViewerListener;
