// Library exports for the binary and integration tests

pub mod album;
pub mod config;
pub mod cue;
pub mod extract;
pub mod fs;
pub mod fuse;
pub mod fuse_path;
pub mod text_encoding;
pub mod tracks;
