// Client-facing protocol surface: head-info parsing, negotiated options and report-status.
pub mod commands;
pub mod options;
pub mod report;

pub use commands::{CommandKind, CommandList, CommandResult, ReasonCode, RefUpdateCommand};
pub use options::Options;
pub use report::{write_fatal, write_messages, write_report_status};
