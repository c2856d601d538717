//! Command implementations.

mod info;
mod ports;
mod upload;

pub(crate) use info::cmd_info;
pub(crate) use ports::cmd_list_ports;
pub(crate) use upload::cmd_upload;
