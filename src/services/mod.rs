pub mod classifier;
pub mod history;
pub mod session;
