pub mod axis;
pub mod color;
pub mod config;
pub mod data;
pub mod settings;

pub use axis::*;
pub use color::*;
pub use config::*;
pub use data::*;
pub use settings::*;
