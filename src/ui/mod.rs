pub mod icons;
pub mod progress;

pub use progress::{BuildUI, format_duration};
