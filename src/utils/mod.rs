pub mod range;
pub mod safe_path;
pub mod sanitize;
