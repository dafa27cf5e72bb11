pub mod progress;

pub use progress::{IndicatifProgress, SilentProgress};
