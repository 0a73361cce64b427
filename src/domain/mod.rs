pub mod credentials;
pub mod reading;
pub mod retry;
pub mod window;
