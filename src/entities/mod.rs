pub mod prelude;

pub mod materials;
pub mod short_link_rules;
pub mod short_links;
pub mod submissions;
pub mod ticket_files;
