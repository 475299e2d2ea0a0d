use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};


#[derive(Parser, Clone, Debug)]
#[command(author, version, about = "Insect species identification service", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// Serve the gRPC identification API
    Serve {
        #[command(flatten)]
        model: ModelArgs,

        /// Address to listen on
        #[arg(long, default_value = "[::1]:50051", env = "INSECTIFICA_ADDR")]
        addr: SocketAddr,
    },

    /// Identify one image, or every image in a directory
    Identify {
        #[command(flatten)]
        model: ModelArgs,

        /// image path or directory
        #[arg(long, required = true)]
        source: PathBuf,

        /// Print results as JSON lines
        #[arg(long)]
        json: bool,
    },
}

/// Artifacts loaded once at startup.
#[derive(clap::Args, Clone, Debug)]
pub struct ModelArgs {
    /// ONNX model path
    #[arg(long, required = true, env = "INSECTIFICA_MODEL")]
    pub model: PathBuf,

    /// Species knowledge store (.json, .csv or .xlsx)
    #[arg(long, required = true, env = "INSECTIFICA_KNOWLEDGE")]
    pub knowledge: PathBuf,

    /// Class labels, one per line, in model output order.
    /// Defaults to the row order of a tabular knowledge store, else the
    /// built-in class list.
    #[arg(long, env = "INSECTIFICA_LABELS")]
    pub labels: Option<PathBuf>,

    /// Built-in model profile (e.g. mobilenetv2-190, mobilenetv2-224)
    #[arg(long, conflicts_with = "profile_file")]
    pub profile: Option<String>,

    /// Model profile TOML (input_size, normalization, layout, output)
    #[arg(long)]
    pub profile_file: Option<PathBuf>,

    /// Number of ranked classes returned per prediction
    #[arg(long, default_value_t = 5)]
    pub top_k: usize,

    /// Use the CUDA execution provider
    #[arg(long)]
    pub cuda: bool,
}
