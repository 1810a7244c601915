use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "snc",
    version,
    about = "rsync and TCP port forwarding through a menu-driven jump host",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, help = "Jump server address (host[:port], port defaults to 22)")]
    pub jumper: String,

    #[arg(long, help = "SSH user on the jump server (default: $USER)")]
    pub user: Option<String>,

    #[arg(long, help = "SSH private key file (default: $HOME/.ssh/id_rsa)")]
    pub ssh_key: Option<PathBuf>,

    #[arg(long, help = "Relay server address (host:port)")]
    pub proxy: String,

    #[arg(
        short = 'w',
        long,
        default_value_t = 3,
        help = "Jumper/relay connect timeout in seconds"
    )]
    pub wait: u64,

    #[arg(long, help = "Echo everything read from the jumper and every command sent")]
    pub debug: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "rsync files between local and a host behind the jumper",
        visible_alias = "r"
    )]
    Rsync(RsyncArgs),

    #[command(
        about = "Forward a remote TCP port to a local listener",
        visible_alias = "f"
    )]
    Forward(ForwardArgs),
}

#[derive(Args, Debug)]
pub struct RsyncArgs {
    #[arg(
        short = 'l',
        long,
        default_value_t = 65222,
        help = "Local port the embedded SSH server listens on"
    )]
    pub listen: u16,

    #[arg(short = 'u', long, help = "Skip files that are newer on the receiver")]
    pub update: bool,

    #[arg(long, help = "Remote host:path, or the local path when uploading")]
    pub remote: String,

    #[arg(long, help = "The other end of the transfer")]
    pub target: Option<String>,
}

#[derive(Args, Debug)]
pub struct ForwardArgs {
    #[arg(long, help = "Server address to forward to, format: 'host:port'")]
    pub server: String,

    #[arg(long, help = "Host name to hop to at the jumper menu")]
    pub remote: String,

    #[arg(
        short = 'l',
        long,
        help = "Local listen address (default: the port of the server address)"
    )]
    pub listen: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_structure_is_valid() {
        use clap::CommandFactory;

        Cli::command().debug_assert();
    }

    #[test]
    fn parses_forward_with_alias() {
        let cli = Cli::try_parse_from([
            "snc",
            "--jumper",
            "gw.corp",
            "--proxy",
            "relay:65533",
            "f",
            "--server",
            "10.0.0.5:5432",
            "--remote",
            "db01",
        ])
        .unwrap();

        assert_eq!(cli.jumper, "gw.corp");
        assert_eq!(cli.wait, 3);
        match cli.command {
            Commands::Forward(args) => {
                assert_eq!(args.server, "10.0.0.5:5432");
                assert_eq!(args.remote, "db01");
                assert!(args.listen.is_none());
            }
            _ => panic!("expected forward subcommand"),
        }
    }

    #[test]
    fn parses_rsync_defaults() {
        let cli = Cli::try_parse_from([
            "snc",
            "--jumper",
            "gw.corp:2222",
            "--proxy",
            "relay:65533",
            "-w",
            "5",
            "rsync",
            "--remote",
            "web01:/var/log/app",
            "--target",
            "./logs",
        ])
        .unwrap();

        assert_eq!(cli.wait, 5);
        match cli.command {
            Commands::Rsync(args) => {
                assert_eq!(args.listen, 65222);
                assert!(!args.update);
                assert_eq!(args.remote, "web01:/var/log/app");
                assert_eq!(args.target.as_deref(), Some("./logs"));
            }
            _ => panic!("expected rsync subcommand"),
        }
    }

    #[test]
    fn missing_jumper_is_rejected() {
        let result = Cli::try_parse_from([
            "snc",
            "--proxy",
            "relay:65533",
            "f",
            "--server",
            "10.0.0.5:80",
            "--remote",
            "web01",
        ]);
        assert!(result.is_err());
    }
}
