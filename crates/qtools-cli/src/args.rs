//! Command line definitions for every tool

use std::path::PathBuf;

use clap::{Args, Parser};
use qtools_core::Verbosity;
use qtools_types::{BrokerConfig, ConnectConfig, Result, Server, TransformConfig};

const URL_HELP: &str = "\
URLs:
  [SCHEME:][//SERVER/]ADDRESS

  SCHEME   amqp (default) or amqps
  SERVER   HOST[:PORT], defaulting to --server or 127.0.0.1:5672
  ADDRESS  The name of a queue or topic

Example URLs:
  queue1
  //example.net/jobs
  amqp://example.net:10000/jobs";

/// Logging options shared by all tools
#[derive(Args, Debug, Clone, Default)]
pub struct LogArgs {
    /// Print errors and warnings only
    #[arg(long)]
    pub quiet: bool,

    /// Print detailed logging
    #[arg(long)]
    pub verbose: bool,
}

impl LogArgs {
    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.quiet, self.verbose)
    }
}

/// Connection options shared by the client tools
#[derive(Args, Debug, Clone)]
pub struct ConnectArgs {
    /// Connect to HOST[:PORT] when a URL names no server
    #[arg(long, value_name = "HOST[:PORT]")]
    pub server: Option<String>,

    /// Set a unique identity for the client container
    #[arg(long, value_name = "ID")]
    pub id: Option<String>,

    /// Identify as USER
    #[arg(long, value_name = "USER")]
    pub user: Option<String>,

    /// Authenticate with SECRET
    #[arg(long, value_name = "SECRET")]
    pub password: Option<String>,

    /// Restrict SASL to MECHS
    #[arg(long, value_name = "MECHS", default_value = "anonymous,plain")]
    pub allowed_mechs: String,

    /// Connect using TLS
    #[arg(long)]
    pub tls: bool,

    /// The client TLS certificate file
    #[arg(long, value_name = "FILE")]
    pub cert: Option<PathBuf>,

    /// The client TLS private key file
    #[arg(long, value_name = "FILE")]
    pub key: Option<PathBuf>,

    /// The CA certificate file used to verify the server
    #[arg(long, value_name = "FILE")]
    pub trust: Option<PathBuf>,

    /// Write "ready" to FILE once all links are open
    #[arg(long, value_name = "FILE")]
    pub ready_file: Option<PathBuf>,
}

impl ConnectArgs {
    pub fn config(&self) -> Result<ConnectConfig> {
        let server = match &self.server {
            Some(server) => Server::parse(server)?,
            None => Server::default(),
        };

        Ok(ConnectConfig {
            id: self.id.clone(),
            server,
            user: self.user.clone(),
            password: self.password.clone(),
            allowed_mechs: self.allowed_mechs.clone(),
            tls: self.tls,
            cert: self.cert.clone(),
            key: self.key.clone(),
            trust: self.trust.clone(),
            ready_file: self.ready_file.clone(),
        })
    }
}

/// Start a message broker
#[derive(Parser, Debug)]
#[command(name = "qbroker", version)]
pub struct BrokerArgs {
    /// Listen for connections on HOST
    #[arg(long, value_name = "HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Listen for connections on PORT
    #[arg(long, value_name = "PORT", default_value_t = 5672)]
    pub port: u16,

    /// Set a unique identity for the broker container
    #[arg(long, value_name = "ID")]
    pub id: Option<String>,

    /// Write "ready" to FILE once listening
    #[arg(long, value_name = "FILE")]
    pub ready_file: Option<PathBuf>,

    #[command(flatten)]
    pub log: LogArgs,
}

impl BrokerArgs {
    pub fn config(&self) -> BrokerConfig {
        BrokerConfig {
            id: self.id.clone(),
            host: self.host.clone(),
            port: self.port,
            ready_file: self.ready_file.clone(),
        }
    }
}

/// Send messages to a target
#[derive(Parser, Debug)]
#[command(name = "qsend", version, after_help = URL_HELP)]
pub struct SendArgs {
    /// The location of a message target
    #[arg(value_name = "URL")]
    pub url: String,

    /// The content of a message
    #[arg(value_name = "MESSAGE")]
    pub messages: Vec<String>,

    /// Also send to URL. This option can be repeated.
    #[arg(long = "url", value_name = "URL")]
    pub more_urls: Vec<String>,

    /// The content of a message. This option can be repeated.
    #[arg(short = 'm', long = "message", value_name = "CONTENT")]
    pub message_options: Vec<String>,

    /// Read messages from FILE, one per line (default stdin)
    #[arg(long, value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// Send messages before the receiver has acknowledged receipt
    #[arg(long)]
    pub presettled: bool,

    #[command(flatten)]
    pub connect: ConnectArgs,

    #[command(flatten)]
    pub log: LogArgs,
}

impl SendArgs {
    pub fn urls(&self) -> Vec<String> {
        all_urls(&self.url, &self.more_urls)
    }

    /// Messages named on the command line, positional ones first
    pub fn messages(&self) -> Vec<String> {
        self.messages
            .iter()
            .chain(&self.message_options)
            .cloned()
            .collect()
    }
}

/// Receive messages from a source
#[derive(Parser, Debug)]
#[command(name = "qreceive", version, after_help = URL_HELP)]
pub struct ReceiveArgs {
    /// The location of a message source
    #[arg(value_name = "URL", required = true)]
    pub urls: Vec<String>,

    /// Exit after receiving COUNT messages
    #[arg(short = 'c', long, value_name = "COUNT")]
    pub count: Option<u64>,

    /// Write messages to FILE (default stdout)
    #[arg(long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Write messages in JSON format
    #[arg(long)]
    pub json: bool,

    /// Don't prefix output lines with the source address
    #[arg(long)]
    pub no_prefix: bool,

    /// Print message application properties
    #[arg(long)]
    pub properties: bool,

    #[command(flatten)]
    pub connect: ConnectArgs,

    #[command(flatten)]
    pub log: LogArgs,
}

/// Send requests and receive responses
#[derive(Parser, Debug)]
#[command(name = "qrequest", version, after_help = URL_HELP)]
pub struct RequestArgs {
    /// The location of a request target
    #[arg(value_name = "URL")]
    pub url: String,

    /// The content of a request message
    #[arg(value_name = "MESSAGE")]
    pub messages: Vec<String>,

    /// Also send requests to URL. This option can be repeated.
    #[arg(long = "url", value_name = "URL")]
    pub more_urls: Vec<String>,

    /// The content of a request message. This option can be repeated.
    #[arg(short = 'm', long = "message", value_name = "CONTENT")]
    pub message_options: Vec<String>,

    /// Read request messages from FILE, one per line (default stdin)
    #[arg(long, value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// Write response messages to FILE (default stdout)
    #[arg(long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Write messages in JSON format
    #[arg(long)]
    pub json: bool,

    /// Don't prefix output lines with the target address
    #[arg(long)]
    pub no_prefix: bool,

    /// Send requests before the responder has acknowledged receipt
    #[arg(long)]
    pub presettled: bool,

    #[command(flatten)]
    pub connect: ConnectArgs,

    #[command(flatten)]
    pub log: LogArgs,
}

impl RequestArgs {
    pub fn urls(&self) -> Vec<String> {
        all_urls(&self.url, &self.more_urls)
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages
            .iter()
            .chain(&self.message_options)
            .cloned()
            .collect()
    }
}

/// Receive requests and send responses
#[derive(Parser, Debug)]
#[command(name = "qrespond", version, after_help = URL_HELP)]
pub struct RespondArgs {
    /// The location of a request source
    #[arg(value_name = "URL", required = true)]
    pub urls: Vec<String>,

    /// Exit after processing COUNT requests
    #[arg(short = 'c', long, value_name = "COUNT")]
    pub count: Option<u64>,

    /// Convert the request text to upper case
    #[arg(long)]
    pub upper: bool,

    /// Reverse the request text
    #[arg(long)]
    pub reverse: bool,

    /// Append STRING to the request text
    #[arg(long, value_name = "STRING")]
    pub append: Option<String>,

    #[command(flatten)]
    pub connect: ConnectArgs,

    #[command(flatten)]
    pub log: LogArgs,
}

impl RespondArgs {
    pub fn transform(&self) -> TransformConfig {
        TransformConfig {
            upper: self.upper,
            reverse: self.reverse,
            append: self.append.clone(),
        }
    }
}

/// Generate message records
#[derive(Parser, Debug)]
#[command(name = "qmessage", version)]
pub struct MessageArgs {
    /// Write messages to FILE (default stdout)
    #[arg(long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Exit after generating COUNT messages (default 1, unlimited with --rate)
    #[arg(short = 'c', long, value_name = "COUNT")]
    pub count: Option<u64>,

    /// Generate COUNT messages per second
    #[arg(long, value_name = "COUNT")]
    pub rate: Option<u32>,

    /// Set the message ID
    #[arg(long, value_name = "STRING", help_heading = "Message fields")]
    pub id: Option<String>,

    /// Set the ID for matching related messages
    #[arg(long, value_name = "STRING", help_heading = "Message fields")]
    pub correlation_id: Option<String>,

    /// Set the ID of the user producing the message
    #[arg(long, value_name = "STRING", help_heading = "Message fields")]
    pub user: Option<String>,

    /// Set the target address
    #[arg(long, value_name = "ADDRESS", help_heading = "Message fields")]
    pub to: Option<String>,

    /// Set the address for replies
    #[arg(long, value_name = "ADDRESS", help_heading = "Message fields")]
    pub reply_to: Option<String>,

    /// Set the durable flag
    #[arg(long, help_heading = "Message fields")]
    pub durable: bool,

    /// Set the priority to INTEGER
    #[arg(long, value_name = "INTEGER", help_heading = "Message fields")]
    pub priority: Option<u8>,

    /// Set the time-to-live to FLOAT seconds
    #[arg(long, value_name = "FLOAT", help_heading = "Message fields")]
    pub ttl: Option<f64>,

    /// Set the message summary
    #[arg(long, value_name = "STRING", help_heading = "Message fields")]
    pub subject: Option<String>,

    /// Set the main message content
    #[arg(long, value_name = "STRING", help_heading = "Message fields")]
    pub body: Option<String>,

    /// Set an application property. This option can be repeated.
    #[arg(
        long,
        num_args = 2,
        value_names = ["NAME", "VALUE"],
        action = clap::ArgAction::Append,
        help_heading = "Message fields"
    )]
    pub property: Vec<String>,

    #[command(flatten)]
    pub log: LogArgs,
}

impl MessageArgs {
    /// `--property` values as name/value pairs, in the order given
    pub fn properties(&self) -> Vec<(String, String)> {
        self.property
            .chunks_exact(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect()
    }
}

/// Check the connection to a server
#[derive(Parser, Debug)]
#[command(name = "qconnect", version)]
pub struct ConnectToolArgs {
    /// Servers to connect to (default --server)
    #[arg(value_name = "HOST[:PORT]")]
    pub servers: Vec<String>,

    #[command(flatten)]
    pub connect: ConnectArgs,

    #[command(flatten)]
    pub log: LogArgs,
}

fn all_urls(first: &str, more: &[String]) -> Vec<String> {
    std::iter::once(first.to_string())
        .chain(more.iter().cloned())
        .collect()
}
