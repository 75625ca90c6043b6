//! promptdj: a real-time generative music player.
//!
//! Steers a remote music generation session with weighted text prompts and
//! plays the streamed audio gap-free on the local output device.

pub mod audio;
pub mod config;
pub mod control;
pub mod pipeline;
pub mod session;
