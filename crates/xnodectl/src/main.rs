use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use xnodectl::cmd_get;
use xnodectl::cmd_print;
use xnodectl::cmd_set::{self, SetArgs, ValueKind};
use xnodectl::cmd_toggle;

#[derive(Parser, Debug)]
#[command(name = "xnodectl", version, about = "Inspect and edit XML settings files")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
    /// Output JSON where applicable
    #[arg(long)]
    json: bool,
    /// XML file to operate on
    file: PathBuf,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Read the value at a path
    Get {
        /// Element path, optionally ending in @attribute
        #[arg(long)]
        path: String,
    },
    /// Validate and write a value, creating missing nodes
    Set {
        #[arg(long)]
        path: String,
        #[arg(long, allow_hyphen_values = true)]
        value: String,
        #[arg(long, value_enum, default_value_t = ValueKind::String)]
        kind: ValueKind,
        #[arg(long, allow_hyphen_values = true)]
        min: Option<String>,
        #[arg(long, allow_hyphen_values = true)]
        max: Option<String>,
        /// Regular expression the value must match (string kind)
        #[arg(long)]
        pattern: Option<String>,
        /// Accept "none" to remove the stored boolean
        #[arg(long)]
        three_state: bool,
        /// Store booleans as 1/0 instead of true/false
        #[arg(long)]
        binary: bool,
    },
    /// Flip a boolean value
    Toggle {
        #[arg(long)]
        path: String,
        #[arg(long)]
        binary: bool,
    },
    /// Print the document or a subtree
    Print {
        #[arg(long)]
        path: Option<String>,
    },
}

fn main() -> Result<()> {
    let Cli {
        verbose,
        json,
        file,
        cmd,
    } = Cli::parse();

    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| level.into()),
        ))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cmd {
        Cmd::Get { path } => cmd_get::run(&file, &path, json)?,
        Cmd::Set {
            path,
            value,
            kind,
            min,
            max,
            pattern,
            three_state,
            binary,
        } => {
            let args = SetArgs {
                path,
                value,
                kind,
                min,
                max,
                pattern,
                three_state,
                binary,
            };
            cmd_set::run(&file, args, json)?
        }
        Cmd::Toggle { path, binary } => cmd_toggle::run(&file, &path, binary, json)?,
        Cmd::Print { path } => cmd_print::run(&file, path.as_deref(), json)?,
    };

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_get() {
        let cli = Cli::parse_from(["xnodectl", "settings.xml", "get", "--path", "A/B@c"]);
        assert_eq!(cli.file, PathBuf::from("settings.xml"));
        match cli.cmd {
            Cmd::Get { path } => assert_eq!(path, "A/B@c"),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn parse_set_defaults_and_bounds() {
        let cli = Cli::parse_from([
            "xnodectl",
            "-vv",
            "--json",
            "settings.xml",
            "set",
            "--path",
            "A@Level",
            "--value",
            "-3",
            "--kind",
            "int",
            "--min",
            "-10",
        ]);
        assert_eq!(cli.verbose, 2);
        assert!(cli.json);
        match cli.cmd {
            Cmd::Set {
                value,
                kind,
                min,
                max,
                three_state,
                ..
            } => {
                assert_eq!(value, "-3");
                assert_eq!(kind, ValueKind::Int);
                assert_eq!(min.as_deref(), Some("-10"));
                assert_eq!(max, None);
                assert!(!three_state);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn parse_print_without_path() {
        let cli = Cli::parse_from(["xnodectl", "settings.xml", "print"]);
        match cli.cmd {
            Cmd::Print { path } => assert_eq!(path, None),
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
