pub mod control;
pub mod detector;
pub mod drums;
pub mod frame;
pub mod link;
pub mod performance;
pub mod sensor_loop;
pub mod server;
pub mod session;
pub mod simulator;
pub mod sounds;
pub mod synth;
pub mod tutorial;
pub mod types;

#[cfg(feature = "audio")]
pub mod audio_out;
