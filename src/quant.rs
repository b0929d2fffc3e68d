pub mod broadcast;
pub mod pricing;
