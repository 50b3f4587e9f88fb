pub mod shell;
pub mod time;
