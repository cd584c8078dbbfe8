pub mod days;
pub mod links;
pub mod template;
