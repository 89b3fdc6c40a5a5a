pub use super::materials::Entity as Materials;
pub use super::short_link_rules::Entity as ShortLinkRules;
pub use super::short_links::Entity as ShortLinks;
pub use super::submissions::Entity as Submissions;
pub use super::ticket_files::Entity as TicketFiles;
