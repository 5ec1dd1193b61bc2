use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "relive", version, about = "Replay captured browser sessions")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Daemon socket path (default: $XDG_RUNTIME_DIR/relive.sock)
    #[arg(long, global = true)]
    pub socket: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the daemon hosting the browser and the replay engine
    Serve {
        /// Header-signing service endpoint. Without it API requests
        /// fall back to the static app token.
        #[arg(long)]
        signer_url: Option<String>,

        /// Directory for per-session browser profiles
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Seconds an open attempt may take before it is torn down
        #[arg(long, default_value_t = 30)]
        load_timeout: u64,
    },

    /// Open a context from a credential JSON file ('-' reads stdin)
    Open {
        file: PathBuf,
    },

    /// Close the active context
    Close,

    /// Toggle devtools on the active context
    Devtools,

    /// Print the daemon's current state
    Status,

    /// Stream lifecycle events until interrupted
    Watch,

    /// Check whether the daemon is running
    Ping,

    /// Ask a running daemon to exit
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_serve_with_options() {
        let cli = Cli::parse_from([
            "relive",
            "-vv",
            "serve",
            "--signer-url",
            "http://127.0.0.1:9000/sign",
            "--load-timeout",
            "15",
        ]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Serve {
                signer_url,
                load_timeout,
                ..
            } => {
                assert_eq!(signer_url.as_deref(), Some("http://127.0.0.1:9000/sign"));
                assert_eq!(load_timeout, 15);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_open_with_file() {
        let cli = Cli::parse_from(["relive", "open", "cred.json"]);
        match cli.command {
            Command::Open { file } => assert_eq!(file, PathBuf::from("cred.json")),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
