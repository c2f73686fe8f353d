pub mod command;
pub mod courses;
pub mod status;
