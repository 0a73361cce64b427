pub mod credentials_file;
pub mod db;
pub mod flume_api;
