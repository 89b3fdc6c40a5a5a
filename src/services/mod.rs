pub mod file_service;
pub mod optimizer;
pub mod short_link_service;
pub mod storage;
