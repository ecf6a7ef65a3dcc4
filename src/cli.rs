use clap::Parser;
use std::path::PathBuf;

/// wiresift: live packet capture with regex and natural-language filtering
#[derive(Parser, Debug)]
#[command(name = "wiresift", version, about)]
pub struct Cli {
    /// Network interface to capture on (e.g., "en0", "eth0").
    /// If not specified, the default interface is used.
    #[arg(short, long)]
    pub interface: Option<String>,

    /// Replay a pcap file instead of capturing live
    #[arg(short, long, value_name = "FILE", conflicts_with = "interface")]
    pub read: Option<PathBuf>,

    /// Path to a TOML config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// List available network interfaces and exit
    #[arg(short, long)]
    pub list_interfaces: bool,

    /// Capture in promiscuous mode
    #[arg(long, conflicts_with = "no_promiscuous")]
    pub promiscuous: bool,

    /// Disable promiscuous mode
    #[arg(long)]
    pub no_promiscuous: bool,

    /// Snapshot length (max bytes per packet to capture)
    #[arg(long)]
    pub snaplen: Option<i32>,

    /// Read timeout in milliseconds for the capture handle
    #[arg(long)]
    pub timeout_ms: Option<i32>,

    /// Initial protocol filter (regex or substring)
    #[arg(long)]
    pub protocol: Option<String>,

    /// Initial source address filter
    #[arg(long)]
    pub src_ip: Option<String>,

    /// Initial destination address filter
    #[arg(long)]
    pub dst_ip: Option<String>,

    /// Initial source port filter
    #[arg(long)]
    pub src_port: Option<String>,

    /// Initial destination port filter
    #[arg(long)]
    pub dst_port: Option<String>,

    /// Initial free-text filter
    #[arg(long)]
    pub free_text: Option<String>,

    /// Assistant API key (otherwise read from the environment)
    #[arg(long)]
    pub api_key: Option<String>,

    /// Assistant model name
    #[arg(long)]
    pub model: Option<String>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}
