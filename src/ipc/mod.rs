//! Control channel between operator tools and the daemon

mod protocol;
mod server;

pub use server::{Control, Server};
