pub mod cache;
pub mod inspect;
