pub mod observability;
pub mod registration;
