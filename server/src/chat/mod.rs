pub mod history;
pub mod store;
