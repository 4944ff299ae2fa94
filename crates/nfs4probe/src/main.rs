//! # nfs4probe
//!
//! Talks to an NFSv4.0 server from the command line: negotiates a client
//! id, walks paths, reads attributes and data, and can sit on the callback
//! channel waiting for recalls.

use std::net::IpAddr;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use nfs4::CallbackConfig;
use nfs4::ClientConfig;
use nfs4::Nfs4Client;
use nfs4::Security;
use nfs4::check_result;
use nfs4::config::split_path;
use nfs4::proto::ResBody;
use nfs4::proto::attr::attr_bit;
use nfs4::proto::attr::attr_name;
use nfs4::proto::consts::DEFAULT_CB_PROGRAM;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, ValueEnum)]
enum Flavor {
    None,
    Sys,
}

#[derive(Parser)]
#[command(name = "nfs4probe")]
#[command(about = "Probe an NFSv4.0 server.", long_about = None)]
struct Cli {
    /// Server as `host` or `host:port`.
    #[arg(long, default_value = "127.0.0.1")]
    server: String,

    #[arg(long)]
    client_id: Option<String>,

    #[arg(long, value_enum, default_value_t = Flavor::Sys)]
    security: Flavor,

    #[arg(long, default_value_t = 0)]
    uid: u32,

    #[arg(long, default_value_t = 0)]
    gid: u32,

    #[arg(long, default_value = "localhost")]
    machine_name: String,

    #[arg(long, default_value = "/")]
    homedir: String,

    /// Per-read and per-write timeout, in seconds.
    #[arg(long, default_value_t = 15)]
    timeout: u64,

    /// Do not offer a callback channel.
    #[arg(long)]
    no_callback: bool,

    #[arg(long, default_value = "0.0.0.0:0")]
    callback_bind: String,

    #[arg(long, default_value_t = DEFAULT_CB_PROGRAM)]
    callback_program: u32,

    /// Address advertised for the callback channel.
    #[arg(long)]
    callback_addr: Option<IpAddr>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ping the server with procedure 0.
    Null,
    /// Negotiate and confirm a client id.
    Init,
    /// Print the filehandle of a path.
    Lookup { path: String },
    /// Print attributes of a path.
    Getattr {
        path: String,
        #[arg(long, value_delimiter = ',', default_value = "type,size,mode,owner,owner_group")]
        attrs: Vec<String>,
    },
    /// Read from a file with the anonymous stateid.
    Read {
        path: String,
        #[arg(long, default_value_t = 0)]
        offset: u64,
        #[arg(long, default_value_t = 4096)]
        count: u32,
    },
    /// Confirm a client id, then wait for callbacks.
    Listen {
        #[arg(long, default_value_t = 60)]
        seconds: u64,
    },
}

impl Cli {
    fn config(&self) -> ClientConfig {
        let security = match self.security {
            Flavor::None => Security::None,
            Flavor::Sys => Security::Sys,
        };
        let callback = (!self.no_callback).then(|| {
            let callback = CallbackConfig::new().bind(self.callback_bind.clone()).program(self.callback_program);
            match self.callback_addr {
                Some(addr) => callback.advertise(addr),
                None => callback,
            }
        });
        let mut config = ClientConfig::new(self.server.clone())
            .security(security)
            .uid(self.uid)
            .gid(self.gid)
            .machine_name(self.machine_name.clone())
            .homedir(&self.homedir)
            .callback(callback)
            .timeout(Duration::from_secs(self.timeout));
        if let Some(id) = &self.client_id {
            config = config.client_id(id.clone());
        }
        config
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.config();
    let client = Nfs4Client::connect(config.clone())
        .await
        .with_context(|| format!("connecting to {}", config.server_addr()))?;

    match cli.command {
        Command::Null => {
            client.null().await?;
            println!("ok");
        }
        Command::Init => {
            let clientid = client.init().await?;
            println!("clientid {:016x}", clientid);
        }
        Command::Lookup { path } => {
            let fh = client.get_fh(&split_path(&path)).await?;
            println!("{}", hex(&fh));
        }
        Command::Getattr { path, attrs } => {
            let mut bits = Vec::new();
            for name in &attrs {
                match attr_bit(name) {
                    Some(bit) => bits.push(bit),
                    None => bail!("unknown attribute {:?}", name),
                }
            }
            let fh = client.get_fh(&split_path(&path)).await?;
            for (bit, value) in client.getattr_values(&fh, &bits).await? {
                println!("{}: {:?}", attr_name(bit).unwrap_or("?"), value);
            }
        }
        Command::Read { path, offset, count } => {
            let fh = client.get_fh(&split_path(&path)).await?;
            let res = client.read_file(&fh, offset, count, None).await?;
            check_result(&res, "READ")?;
            match res.last().map(|last| &last.body) {
                Some(ResBody::Read { eof, data }) => {
                    println!("{} bytes, eof {}", data.len(), eof);
                    println!("{}", String::from_utf8_lossy(data));
                }
                other => bail!("unexpected READ result {:?}", other),
            }
        }
        Command::Listen { seconds } => {
            let clientid = client.init().await?;
            let Some(listener) = client.listener() else {
                bail!("callbacks are disabled");
            };
            info!(clientid, addr = %listener.local_addr(), "waiting for callbacks");
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            let stats = listener.registry().stats();
            println!("recalls {} getattrs {} illegal {}", stats.recalls, stats.getattrs, stats.illegal);
        }
    }

    client.shutdown().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    run(Cli::parse()).await
}
