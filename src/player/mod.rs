pub mod audio;
pub mod gateway;
pub mod playback;
pub mod queue;
pub mod session;
pub mod snapshot;
pub mod state;
