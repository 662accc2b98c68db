pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod fetch;
pub mod import;
pub mod measure;
pub mod merge;
pub mod pdf;
pub mod text;
