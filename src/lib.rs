use std::io::{self, Read};

pub mod config;
pub mod digest;
pub mod error;
pub mod factory;
pub mod hub;
pub mod image;
pub mod manager;
pub mod pack;
pub mod runtime;
pub mod util;

pub use error::{Result, VmImageError};
pub use factory::Factory;
pub use image::{Image, PullPolicy};
pub use manager::{BackendType, Manager};

/// Progress output of a backend operation, read to EOF to wait for it.
pub type ImageStream = Box<dyn Read + Send>;

/// Stream for operations that finished before returning.
pub fn empty_stream() -> ImageStream {
    Box::new(io::empty())
}
