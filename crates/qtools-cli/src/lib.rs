//! qtools CLI - Shared pieces of the command-line tools
//!
//! Each binary in `src/bin` parses its arguments with the definitions in
//! [`args`], builds its configuration and runs one handler from
//! `qtools-core` on a reactor.

pub mod args;
pub mod generate;
pub mod io;

pub use args::{
    BrokerArgs, ConnectArgs, ConnectToolArgs, LogArgs, MessageArgs, ReceiveArgs, RequestArgs,
    RespondArgs, SendArgs,
};
pub use generate::{write_records, Generator, Schedule};
pub use io::{forward_interrupt, open_input, open_output};
