use clap::{Args, Parser, Subcommand};

use crate::ids::Identity;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Address of the hub to connect to.
    #[arg(long, global = true, default_value = "127.0.0.1:5000")]
    pub server: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the identity the hub assigns to this connection.
    Whoami,
    /// List the identities of the other connected clients.
    Peers,
    /// Relay a message to one or more clients.
    Send(SendArgs),
    /// Print every message relayed to this client until the hub disconnects.
    Listen(ListenArgs),
}

#[derive(Args, Debug, Clone)]
pub struct SendArgs {
    /// Comma-separated recipient identities, e.g. `3,7`.
    #[arg(long, required = true, value_delimiter = ',')]
    pub to: Vec<Identity>,

    /// Message body. Read from stdin when omitted.
    pub message: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ListenArgs {
    /// Messages buffered between the receive loop and the terminal.
    #[arg(long, default_value_t = 64, value_parser = clap::value_parser!(u32).range(1..))]
    pub capacity: u32,
}
