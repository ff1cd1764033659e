//! CLI Module
//!
//! Exit codes for automation and the mapping from library errors onto them

pub mod exit_codes;

pub use exit_codes::{exit_code_description, exit_code_for, print_exit_codes, CliResult, ExitCodes};
