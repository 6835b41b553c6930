use std::path::PathBuf;

use clap::{Parser, Subcommand};
use kick_archiver::config::{AppConfig, RunMode};
use url::Url;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// TOML configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Watch channels and archive their live broadcasts until interrupted
    Watch {
        /// Channel to watch; repeat for several. Replaces CHANNELS.
        #[arg(long = "channel", value_name = "NAME")]
        channels: Vec<String>,

        /// Quality preference, most preferred first. Replaces QUALITY.
        #[arg(long, value_name = "Q")]
        quality: Vec<String>,

        /// Output directory. Replaces DOWNLOAD_DIR.
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,
    },

    /// Download a single playlist URL, then transcode it
    Fetch {
        /// Master or media playlist URL
        url: Url,

        /// Basename of the output files
        #[arg(long)]
        name: Option<String>,

        /// Channel name used for the default basename
        #[arg(long)]
        channel: Option<String>,

        #[arg(long, value_name = "Q")]
        quality: Vec<String>,

        /// Follow a live playlist until it stalls
        #[arg(long)]
        live: bool,

        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,
    },
}

impl Commands {
    pub fn run_mode(&self) -> RunMode {
        match self {
            Self::Watch { .. } => RunMode::Watch,
            Self::Fetch { .. } => RunMode::Fetch,
        }
    }

    /// Command line flags win over the file and the environment.
    pub fn apply_overrides(&self, config: &mut AppConfig) {
        let (quality, output) = match self {
            Self::Watch {
                channels,
                quality,
                output,
            } => {
                if !channels.is_empty() {
                    config.channels = channels.clone();
                }
                (quality, output)
            }
            Self::Fetch {
                quality, output, ..
            } => (quality, output),
        };
        if !quality.is_empty() {
            config.quality = quality.clone();
        }
        if let Some(output) = output {
            config.output_dir = output.clone();
        }
    }
}
