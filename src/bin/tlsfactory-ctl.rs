use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tlsfactory::constants::DEFAULT_FACTORY_LISTEN;
use tlsfactory::endpoint::EndpointHandle;
use tlsfactory::network::FactoryClient;
use tlsfactory::security::pem::read_pem_file;
use tlsfactory::security::settings::{available_cipher_suites, AfterHandshake};
use tlsfactory::security::{probe, ProbeConfig, SecurityConfigSpec, VerificationMode};

/// tlsfactory-ctl: driver CLI for a running tlsfactory process
///
/// Creates and destroys secure endpoints over the factory RPC, reads back the
/// handshake outcomes they recorded, and can probe an endpoint with a TLS client.
#[derive(Parser, Debug)]
#[command(
    name = "tlsfactory-ctl",
    version,
    about = "Driver CLI for the tlsfactory endpoint factory"
)]
struct Cli {
    /// Factory RPC address
    #[arg(short, long, default_value = DEFAULT_FACTORY_LISTEN, global = true)]
    factory: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Provision a secure endpoint
    Create {
        /// Trust anchor PEM file (repeatable)
        #[arg(long = "anchor")]
        anchors: Vec<PathBuf>,
        /// Server certificate chain PEM (an ephemeral localhost identity is used when omitted)
        #[arg(long, requires = "key")]
        cert: Option<PathBuf>,
        #[arg(long, requires = "cert")]
        key: Option<PathBuf>,
        /// none | optional | require
        #[arg(long, default_value = "none")]
        verify: VerificationMode,
        /// Allowed protocol version (repeatable): TLSv1.2, TLSv1.3
        #[arg(long = "protocol")]
        protocols: Vec<String>,
        /// Allowed cipher suite (repeatable)
        #[arg(long = "cipher")]
        ciphers: Vec<String>,
        /// Expected peer identity: exact subject DN, ~substring, or DNS name
        #[arg(long)]
        peer_identity: Option<String>,
        #[arg(long)]
        bind: Option<String>,
        #[arg(long)]
        handshake_timeout_ms: Option<u64>,
        /// close | promote
        #[arg(long, default_value = "close")]
        after_handshake: AfterHandshake,
    },
    /// Tear down an endpoint
    Destroy { handle: u64 },
    /// Print the recorded handshake outcomes of an endpoint
    Outcomes { handle: u64 },
    /// Print the state and posture of an endpoint
    Describe { handle: u64 },
    /// List live endpoints
    List,
    /// Check the factory is reachable
    Ping,
    /// Ask the factory process to destroy every endpoint and exit
    Shutdown,
    /// List cipher suite names accepted by --cipher
    Ciphers,
    /// Handshake once against an endpoint as a TLS client
    Probe {
        addr: SocketAddr,
        /// Client certificate chain PEM
        #[arg(long, requires = "key")]
        cert: Option<PathBuf>,
        #[arg(long, requires = "cert")]
        key: Option<PathBuf>,
        #[arg(long = "protocol")]
        protocols: Vec<String>,
        #[arg(long = "cipher")]
        ciphers: Vec<String>,
        /// Verify the server against this anchor (any server certificate is accepted otherwise)
        #[arg(long)]
        server_anchor: Option<PathBuf>,
        #[arg(long, default_value = "localhost")]
        server_name: String,
        #[arg(long, default_value_t = 5000)]
        timeout_ms: u64,
    },
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn connect(addr: &str) -> anyhow::Result<FactoryClient> {
    FactoryClient::connect(addr)
        .await
        .map_err(|e| anyhow::anyhow!("cannot reach factory at {}: {}", addr, e))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Create {
            anchors,
            cert,
            key,
            verify,
            protocols,
            ciphers,
            peer_identity,
            bind,
            handshake_timeout_ms,
            after_handshake,
        } => {
            let mut spec = SecurityConfigSpec::new()
                .verify(verify)
                .after_handshake(after_handshake);
            for path in &anchors {
                spec = spec.trust_anchor(read_pem_file(path)?);
            }
            if let (Some(c), Some(k)) = (cert, key) {
                spec = spec.identity(read_pem_file(c)?, read_pem_file(k)?);
            }
            if !protocols.is_empty() {
                spec.protocols = Some(protocols);
            }
            spec.cipher_suites = ciphers;
            spec.peer_identity = peer_identity;
            spec.bind = bind;
            spec.handshake_timeout_ms = handshake_timeout_ms;
            let created = connect(&cli.factory).await?.create_server(&spec).await?;
            print_json(&created)?;
        }
        Commands::Destroy { handle } => {
            connect(&cli.factory)
                .await?
                .destroy_server(EndpointHandle(handle))
                .await?;
            println!("Destroyed {}", EndpointHandle(handle));
        }
        Commands::Outcomes { handle } => {
            let outcomes = connect(&cli.factory)
                .await?
                .get_outcomes(EndpointHandle(handle))
                .await?;
            if outcomes.is_empty() {
                println!("<none>");
            }
            for o in outcomes {
                println!("{}", serde_json::to_string(&o)?);
            }
        }
        Commands::Describe { handle } => {
            let info = connect(&cli.factory)
                .await?
                .describe_server(EndpointHandle(handle))
                .await?;
            print_json(&info)?;
        }
        Commands::List => {
            let list = connect(&cli.factory).await?.list_servers().await?;
            if list.is_empty() {
                println!("<none>");
            }
            for info in list {
                println!(
                    "{}\t{}\t{}\tattempts={}",
                    info.handle,
                    info.address,
                    info.state.as_str(),
                    info.attempts
                );
            }
        }
        Commands::Ping => {
            let reply = connect(&cli.factory).await?.ping().await?;
            print_json(&reply)?;
        }
        Commands::Shutdown => {
            let reply = connect(&cli.factory).await?.shutdown().await?;
            println!("Factory shutting down ({} endpoints closed)", reply.closed_endpoints);
        }
        Commands::Ciphers => {
            for name in available_cipher_suites() {
                println!("{}", name);
            }
        }
        Commands::Probe {
            addr,
            cert,
            key,
            protocols,
            ciphers,
            server_anchor,
            server_name,
            timeout_ms,
        } => {
            let mut cfg = ProbeConfig::new().server_name(server_name);
            if let (Some(c), Some(k)) = (cert, key) {
                cfg = cfg.identity(read_pem_file(c)?, read_pem_file(k)?);
            }
            if let Some(path) = server_anchor {
                cfg = cfg.server_anchor(read_pem_file(path)?);
            }
            cfg.protocols = protocols;
            cfg.cipher_suites = ciphers;
            let report = probe(addr, &cfg, Duration::from_millis(timeout_ms)).await?;
            print_json(&report)?;
            println!("(server-side verdict: tlsfactory-ctl outcomes <handle>)");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("❌ {:#}", e);
        std::process::exit(1);
    }
}
