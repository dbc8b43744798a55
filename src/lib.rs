// Library exports for the facial emotion pipeline

#[cfg(feature = "camera")]
pub mod camera;
pub mod config;
pub mod emotion;
pub mod error;
pub mod locator;
pub mod models;
pub mod pipeline;
pub mod preprocess;
pub mod sampler;
pub mod source;
pub mod still;
pub mod ui;
