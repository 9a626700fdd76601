pub mod cmd_get;
pub mod cmd_print;
pub mod cmd_set;
pub mod cmd_toggle;
pub mod common;
