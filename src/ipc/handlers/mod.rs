pub mod core;
pub mod export;
pub mod grades;
pub mod reports;
pub mod sheets;
