#![no_std]

mod axis;
mod clock;
pub mod config;
mod counter;
mod error;
mod link;
mod pid;
mod responder;
mod status;
mod task;
#[cfg(test)]
mod testing;

pub use axis::*;
pub use clock::*;
pub use counter::*;
pub use error::*;
pub use link::*;
pub use pid::*;
pub use responder::*;
pub use status::*;
pub use task::*;
