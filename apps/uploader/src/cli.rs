//! Command-line arguments.

use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};

/// Parses a byte count with an optional `kb`, `mb` or `gb` suffix.
pub fn parse_size(s: &str) -> Result<u64> {
    let s_lower = s.trim().to_lowercase();

    let (num_str, multiplier): (&str, u64) = if let Some(stripped) = s_lower.strip_suffix("gb") {
        (stripped.trim(), 1024 * 1024 * 1024)
    } else if let Some(stripped) = s_lower.strip_suffix("mb") {
        (stripped.trim(), 1024 * 1024)
    } else if let Some(stripped) = s_lower.strip_suffix("kb") {
        (stripped.trim(), 1024)
    } else {
        (s_lower.as_str(), 1)
    };

    let num = num_str
        .parse::<u64>()
        .map_err(|_| anyhow!("invalid number: '{num_str}'"))?;

    let bytes = num
        .checked_mul(multiplier)
        .ok_or_else(|| anyhow!("size overflows u64"))?;
    if bytes == 0 {
        return Err(anyhow!("size must be greater than zero"));
    }

    Ok(bytes)
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Resumable chunked uploads to ThothCraft", long_about = None)]
pub struct Cli {
    /// Log at debug level.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(about = "Upload a file (Ctrl-C pauses, `resume` continues)")]
    Upload {
        path: PathBuf,

        /// Chunk size, e.g. 512kb or 4mb.
        #[arg(long, short = 'c', value_name = "SIZE", value_parser = parse_size)]
        chunk_size: Option<u64>,

        /// Chunk requests in flight.
        #[arg(long, value_name = "N")]
        concurrency: Option<usize>,

        /// MIME type; guessed from the extension when omitted.
        #[arg(long, value_name = "TYPE")]
        content_type: Option<String>,
    },
    #[command(about = "Continue an interrupted upload")]
    Resume { upload_id: String },
    #[command(about = "Show server-side progress of an upload")]
    Status { upload_id: String },
    #[command(about = "Cancel an upload and delete its stored chunks")]
    Cancel { upload_id: String },
    #[command(about = "List unfinished uploads")]
    List,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_size_units() {
        assert_eq!(parse_size("4096").unwrap(), 4096);
        assert_eq!(parse_size("512kb").unwrap(), 512 * 1024);
        assert_eq!(parse_size("4MB").unwrap(), 4 * 1024 * 1024);
        assert_eq!(parse_size(" 1 gb ").unwrap(), 1024 * 1024 * 1024);
    }

    #[test]
    fn parse_size_rejects_garbage() {
        assert!(parse_size("mb").is_err());
        assert!(parse_size("1.5mb").is_err());
        assert!(parse_size("0").is_err());
        assert!(parse_size("99999999999999gb").is_err());
    }

    #[test]
    fn parses_upload_command() {
        let cli = Cli::try_parse_from([
            "thothcraft-uploader",
            "-v",
            "upload",
            "video.mp4",
            "--chunk-size",
            "2mb",
            "--concurrency",
            "5",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Command::Upload {
                path,
                chunk_size,
                concurrency,
                content_type,
            } => {
                assert_eq!(path, PathBuf::from("video.mp4"));
                assert_eq!(chunk_size, Some(2 * 1024 * 1024));
                assert_eq!(concurrency, Some(5));
                assert!(content_type.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_id_commands() {
        let cli = Cli::try_parse_from(["thothcraft-uploader", "resume", "u-1", "--verbose"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Command::Resume { upload_id } if upload_id == "u-1"));

        let cli = Cli::try_parse_from(["thothcraft-uploader", "list"]).unwrap();
        assert!(matches!(cli.command, Command::List));

        assert!(Cli::try_parse_from(["thothcraft-uploader", "cancel"]).is_err());
    }
}
