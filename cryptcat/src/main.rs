//! Cryptcat — encrypted netcat.
//!
//! Two endpoints sharing a passphrase exchange bytes, files, or chat over
//! a confidential, integrity-protected, replay-resistant channel.
//!
//! ```text
//! cryptcat -k secret -l -p 4444               # listen and relay
//! cryptcat -k secret 192.168.1.100 4444       # connect and relay
//! cryptcat -k secret -f report.pdf host 4444  # send a file
//! cryptcat -k secret -c host 4444             # chat
//! ```

mod modes;

use std::path::PathBuf;

use clap::Parser;
use clap::error::ErrorKind;

use cryptcat_net::Error;
use modes::{Mode, Shutdown};

const DEFAULT_PORT: u16 = 4444;
const DEFAULT_P2P_PORT: u16 = 5555;
const MAX_PASSPHRASE_LEN: usize = 1024;

#[derive(Parser, Debug)]
#[command(
    name = "cryptcat",
    version,
    about = "Encrypted netcat — Twofish-256-CFB with HMAC-SHA256",
    after_help = "Examples:\n  \
        cryptcat -k password -l -p 4444\n  \
        cryptcat -k password 192.168.1.100 4444\n  \
        cryptcat -k secret -f document.pdf 192.168.1.100 5555\n  \
        cryptcat -k secret -c 192.168.1.100 4444"
)]
struct Cli {
    /// Listen mode (default: connect when a host is given)
    #[arg(short = 'l', long)]
    listen: bool,

    /// Port number
    #[arg(short = 'p', long, value_name = "PORT")]
    port: Option<u16>,

    /// Encryption passphrase (required)
    #[arg(short = 'k', long = "key", value_name = "PASSPHRASE")]
    key: Option<String>,

    /// Execute command (remote shell)
    #[arg(short = 'e', long = "execute", value_name = "CMD")]
    execute: Option<String>,

    /// Encrypted chat mode
    #[arg(short = 'c', long)]
    chat: bool,

    /// Send a file
    #[arg(short = 'f', long, value_name = "PATH")]
    file: Option<PathBuf>,

    /// Enable P2P networking
    #[arg(long)]
    p2p: bool,

    /// P2P listening port
    #[arg(long, value_name = "PORT", default_value_t = DEFAULT_P2P_PORT)]
    p2p_port: u16,

    /// P2P bootstrap node
    #[arg(long, value_name = "HOST:PORT")]
    p2p_bootstrap: Option<String>,

    /// Verbose output
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Quiet mode
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Remote host
    host: Option<String>,

    /// Remote port (overrides -p)
    #[arg(value_name = "PORT")]
    port_positional: Option<u16>,
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    init_logging(cli.verbose, cli.quiet);

    if let Err(e) = run(cli).await {
        eprintln!("cryptcat: {e}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let default = if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

async fn run(cli: Cli) -> Result<(), Error> {
    let Some(key) = cli.key.as_deref() else {
        return Err(Error::InvalidArgument(
            "encryption passphrase is required (-k)".into(),
        ));
    };
    if key.is_empty() || key.len() > MAX_PASSPHRASE_LEN {
        return Err(Error::InvalidArgument(format!(
            "passphrase must be 1..={MAX_PASSPHRASE_LEN} bytes"
        )));
    }

    // Declared by the CLI, not implemented: refuse up front.
    if cli.execute.is_some() {
        return Err(Error::InvalidArgument("remote shell mode is not implemented".into()));
    }
    if cli.p2p || cli.p2p_bootstrap.is_some() {
        return Err(Error::InvalidArgument("p2p mode is not implemented".into()));
    }

    let port = cli.port_positional.or(cli.port).unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(Error::InvalidArgument("port must be 1..=65535".into()));
    }

    let mode = if let Some(path) = cli.file.clone() {
        Mode::SendFile(path)
    } else if cli.chat {
        Mode::Chat
    } else {
        Mode::Relay
    };

    let shutdown = Shutdown::install();

    // Without an explicit -l, a missing host means listen (netcat habit).
    if cli.listen || cli.host.is_none() {
        if matches!(mode, Mode::SendFile(_)) {
            return Err(Error::InvalidArgument(
                "file send needs a host to connect to; a listener receives files automatically"
                    .into(),
            ));
        }
        modes::run_listen(port, key.as_bytes(), mode, shutdown).await
    } else {
        let host = cli.host.as_deref().expect("checked above");
        modes::run_connect(host, port, key.as_bytes(), mode, shutdown).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positional_host_and_port() {
        let cli = Cli::try_parse_from(["cryptcat", "-k", "pw", "example.org", "9999"]).unwrap();
        assert_eq!(cli.host.as_deref(), Some("example.org"));
        assert_eq!(cli.port_positional, Some(9999));
        assert!(!cli.listen);
    }

    #[test]
    fn port_flag_and_positional_coexist() {
        let cli = Cli::try_parse_from(["cryptcat", "-k", "pw", "-p", "1000", "host", "2000"]).unwrap();
        // The positional wins in run().
        assert_eq!(cli.port, Some(1000));
        assert_eq!(cli.port_positional, Some(2000));
    }

    #[test]
    fn key_is_optional_at_parse_time() {
        // Validated in run() so its absence exits 1, not a usage error.
        let cli = Cli::try_parse_from(["cryptcat", "-l"]).unwrap();
        assert!(cli.key.is_none());
        assert!(cli.listen);
    }

    #[test]
    fn mode_flags_parse() {
        let cli = Cli::try_parse_from(["cryptcat", "-k", "pw", "-c", "host"]).unwrap();
        assert!(cli.chat);
        let cli = Cli::try_parse_from(["cryptcat", "-k", "pw", "-f", "a.bin", "host"]).unwrap();
        assert_eq!(cli.file.as_deref(), Some(std::path::Path::new("a.bin")));
        let cli = Cli::try_parse_from(["cryptcat", "-k", "pw", "--p2p-port", "6000"]).unwrap();
        assert_eq!(cli.p2p_port, 6000);
    }
}
