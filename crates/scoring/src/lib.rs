//! Concentration Scoring
//!
//! Maps aggregate detection counts to a single 0-100 concentration
//! percentage and a presentation tier.

mod concentration;
pub mod palette;

pub use concentration::{
    concentration, ConcentrationReport, ConcentrationTier, CRITICAL_MAX, GOOD_MIN,
};
pub use palette::{class_style, ClassStyle};
