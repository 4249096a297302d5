pub mod detail;
pub mod listing;
pub mod payload;
