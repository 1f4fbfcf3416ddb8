pub mod backend;
pub mod etag;
pub mod manager;
#[cfg(test)]
pub mod memory_backend;
pub mod progress;
