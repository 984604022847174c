//! Train/test split generation.
//!
//! Partitions a series into ordered train/test windows:
//! - Expanding: training always starts at the first observation
//! - Rolling: training keeps a fixed span once the window is full
//! - Test windows advance by a fixed step and never run past the series end

pub mod scheme;

pub use scheme::{generate, SplitError, SplitScheme, SplitSchemeConfig, SplitSpec, WindowType};
