pub mod overlay;
pub mod requests;
