//! Numeric helpers shared by the localization stages.

pub mod linalg;
pub mod safe_cast;
