//! UTM Remote command-line client.
//!
//! # Usage
//!
//! ```bash
//! # Generate a client certificate, connect, and list machines
//! utmremote --cert client.crt --generate --server utm.local
//!
//! # Start a machine and print its SPICE URL
//! utmremote --cert client.crt --server utm.local \
//!     --start 2A6F9A81-0000-4000-8000-000000000001 --spice-cert spice.pem
//! ```
//!
//! With no action flag the client prints `<id> <name> <state>` for every
//! machine. The connection fingerprint is checked against `--fingerprint`
//! when given, otherwise against the trusted-server store, otherwise
//! printed for the user to confirm out of band.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use utmremote_client::{
    fetch_spice_certificate, ClientIdentity, Fingerprint, ServerStore, Session, UtmClient,
    DEFAULT_PORT,
};
use utmremote_proto::vm::{SpiceServerInfo, StartOptions, StopMethod, VmId};

/// Connect to UTM using the remote protocol.
#[derive(Parser, Debug)]
#[command(name = "utmremote")]
#[command(about = "Connect to UTM using the remote protocol")]
#[command(version)]
struct Args {
    /// Client certificate to use (PEM format)
    #[arg(short, long)]
    cert: PathBuf,

    /// Hostname of the server to connect to
    #[arg(short, long)]
    server: Option<String>,

    /// Port to connect to
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Password to authenticate with
    #[arg(short = 'P', long)]
    password: Option<String>,

    /// Expected connection fingerprint
    #[arg(short, long)]
    fingerprint: Option<String>,

    /// Generate a new certificate at the --cert path first
    #[arg(short, long)]
    generate: bool,

    /// Start a virtual machine (repeatable)
    #[arg(short = 'S', long = "start", value_name = "ID")]
    start: Vec<String>,

    /// Stop a virtual machine (repeatable)
    #[arg(short = 'T', long = "stop", value_name = "ID")]
    stop: Vec<String>,

    /// Restart a virtual machine (repeatable)
    #[arg(long, value_name = "ID")]
    restart: Vec<String>,

    /// Pause a virtual machine (repeatable)
    #[arg(long, value_name = "ID")]
    pause: Vec<String>,

    /// Resume a virtual machine (repeatable)
    #[arg(long, value_name = "ID")]
    resume: Vec<String>,

    /// Save the SPICE server certificate to this file (PEM format)
    #[arg(short = 'C', long = "spice-cert", value_name = "PATH")]
    spice_cert: Option<PathBuf>,

    /// Enable debug output
    #[arg(short, long)]
    debug: bool,
}

impl Args {
    fn has_actions(&self) -> bool {
        !(self.start.is_empty()
            && self.stop.is_empty()
            && self.restart.is_empty()
            && self.pause.is_empty()
            && self.resume.is_empty())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let default_filter = if args.debug { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    if args.generate {
        ClientIdentity::generate_to_file(&args.cert)?;
        println!("Wrote new client certificate to {}", args.cert.display());
    }

    let Some(server) = args.server.clone() else {
        if args.generate {
            return Ok(());
        }
        return Err("--server is required unless only generating a certificate".into());
    };

    let identity = ClientIdentity::load(&args.cert)?;
    let client = UtmClient::new(identity);

    let mut store = ServerStore::open_default().unwrap_or_else(|error| {
        tracing::warn!(%error, "trusted-server store unavailable");
        ServerStore::open(PathBuf::from("servers.json"))
    });

    let expected = match &args.fingerprint {
        Some(text) => Some(Fingerprint::from_str(text)?),
        None => store.fingerprint_for(&server, args.port),
    };

    let pending = client.open(&server, args.port).await?;
    let connection_fp = *pending.connection_fingerprint();
    if args.debug {
        eprintln!("server fingerprint: {}", pending.server_fingerprint());
        eprintln!("client fingerprint: {}", pending.client_fingerprint());
    }
    match expected {
        Some(expected) if expected != connection_fp => {
            pending.reject();
            return Err(format!(
                "fingerprint mismatch: expected {expected}, got {connection_fp}"
            )
            .into());
        }
        Some(_) => {}
        None => println!("connection fingerprint: {connection_fp}"),
    }

    let session = pending.establish(args.password.as_deref()).await?;

    store.remember(&server, args.port, &connection_fp);
    if let Err(error) = store.save() {
        tracing::warn!(%error, "could not persist trusted-server store");
    }

    if args.has_actions() {
        run_actions(&args, &server, &session).await?;
    } else {
        list_machines(&session).await?;
    }

    session.close();
    Ok(())
}

/// Default action: one `<id> <name> <state>` line per machine.
async fn list_machines(session: &Session) -> Result<(), Box<dyn std::error::Error>> {
    let ids = session.list_virtual_machines().await?;
    for info in session.get_virtual_machine_information(ids).await? {
        println!("{} {:32} {}", info.id, info.name, info.state);
    }
    Ok(())
}

async fn run_actions(
    args: &Args,
    server: &str,
    session: &Session,
) -> Result<(), Box<dyn std::error::Error>> {
    for vm in &args.pause {
        println!("Pausing {vm}");
        session.pause_virtual_machine(&VmId::from(vm.as_str())).await?;
    }
    for vm in &args.stop {
        println!("Stopping {vm}");
        session
            .stop_virtual_machine(&VmId::from(vm.as_str()), StopMethod::Request)
            .await?;
    }
    for vm in &args.restart {
        println!("Restarting {vm}");
        session.restart_virtual_machine(&VmId::from(vm.as_str())).await?;
    }
    for vm in &args.start {
        println!("Starting {vm}");
        let info = session
            .start_virtual_machine(&VmId::from(vm.as_str()), StartOptions::empty())
            .await?;
        print_spice_endpoint(args, server, &info).await?;
    }
    for vm in &args.resume {
        println!("Resuming {vm}");
        session.resume_virtual_machine(&VmId::from(vm.as_str())).await?;
    }
    Ok(())
}

/// Print the `spice://` URL for a started machine and optionally save the
/// SPICE server's certificate.
async fn print_spice_endpoint(
    args: &Args,
    server: &str,
    info: &SpiceServerInfo,
) -> Result<(), Box<dyn std::error::Error>> {
    let external = info.spice_port_external.filter(|port| *port > 0);
    let (host, port) = match external {
        Some(port) => (
            info.spice_host_external.clone().unwrap_or_else(|| server.to_owned()),
            Some(port),
        ),
        None => (server.to_owned(), info.spice_port_internal),
    };
    let Some(port) = port.filter(|port| *port > 0) else {
        return Ok(());
    };

    if let Some(path) = &args.spice_cert {
        let pem = fetch_spice_certificate(
            &host,
            u16::try_from(port).map_err(|_| format!("SPICE port {port} out of range"))?,
            info.spice_public_key.as_deref(),
        )
        .await?;
        std::fs::write(path, pem)?;
        println!("Wrote SPICE server certificate to {}", path.display());
    }

    let host_part =
        if host.contains(':') { format!("[{host}]") } else { host.clone() };
    let password = info.spice_password.clone().unwrap_or_default();
    println!("SPICE URL: spice://{host_part}?tls-port={port}&password={password}");
    Ok(())
}
