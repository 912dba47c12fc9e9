pub mod adjust;
pub mod baseline;
pub mod calibration;
pub mod candidate;
pub mod gates;
pub mod odds;
pub mod portfolio;
pub mod pricing;
pub mod quality;
pub mod reference;
