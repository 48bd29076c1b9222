//! Library half of the `pqstep` binary: the column tool, the model client
//! and the MCP server loop. `main.rs` only parses arguments and prints.

pub mod ai;
pub mod exit_codes;
pub mod server;
pub mod tool;
