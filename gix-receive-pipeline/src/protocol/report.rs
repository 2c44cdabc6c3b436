// Report-status and message emission towards the client.
//
// report-status lines are plain pkt-lines terminated by a flush packet.
// Messages go to sideband channel 2; channel 3 aborts the client and is only
// used by `write_fatal()`.

use std::io::{self, Write};

use gix_packetline_blocking as pkt;
use gix_packetline_blocking::encode as enc;

use crate::protocol::commands::{CommandResult, RefUpdateCommand};
use crate::session::{ClientMessages, MessageLevel};

/// Write the report-status section for `commands`.
///
/// Commands still `NotAttempted` are reported as `ng` since they never reached the ref store.
pub fn write_report_status<W: Write>(out: &mut W, commands: &[RefUpdateCommand]) -> io::Result<()> {
    enc::data_to_write(b"unpack ok\n", &mut *out)?;
    for cmd in commands {
        let line = match cmd.result() {
            CommandResult::Ok => format!("ok {}\n", cmd.name()),
            CommandResult::Rejected { reason, .. } => format!("ng {} {}\n", cmd.name(), single_line(reason)),
            CommandResult::NotAttempted => format!("ng {} not attempted\n", cmd.name()),
        };
        enc::data_to_write(line.as_bytes(), &mut *out)?;
    }
    enc::flush_to_write(&mut *out)?;
    out.flush()
}

/// Send all collected messages on sideband channel 2, errors prefixed with `error: `.
pub fn write_messages<W: Write>(out: &mut W, messages: &ClientMessages) -> io::Result<()> {
    for message in messages.iter() {
        let line = match message.level {
            MessageLevel::Info => format!("{}\n", message.text),
            MessageLevel::Error => format!("error: {}\n", message.text),
        };
        enc::band_to_write(pkt::Channel::Progress, line.as_bytes(), &mut *out)?;
    }
    out.flush()
}

/// Send a fatal error on sideband channel 3, which terminates the client's session.
pub fn write_fatal<W: Write>(out: &mut W, message: &str) -> io::Result<()> {
    enc::band_to_write(pkt::Channel::Error, format!("{message}\n").as_bytes(), &mut *out)?;
    out.flush()
}

fn single_line(reason: &str) -> String {
    reason.replace(['\n', '\r'], " ")
}
