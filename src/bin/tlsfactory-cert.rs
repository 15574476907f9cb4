use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{ArgAction, Parser, Subcommand};
use tlsfactory::security::identity::spki_fingerprint;
use tlsfactory::security::pem::read_pem_file;
use tlsfactory::security::pki::{CertificateAuthority, IssuedCert, LeafRole};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Generate test PKI material for handshake matrices.
///
/// - ECDSA P-256 + SHA-256 keys
/// - CA certificates with keyCertSign, leaves with serverAuth and/or clientAuth EKUs
/// - Key permissions 0600 (on Unix), certs 0644
#[derive(Parser, Debug)]
#[command(
    name = "tlsfactory-cert",
    version,
    about = "Generate CA and leaf certificates for tlsfactory test matrices"
)]
struct Cli {
    /// Overwrite output files if they exist
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    force: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a self-signed certificate authority (<out-dir>/<name>.pem + .key)
    Ca {
        #[arg(long, default_value = "tlsfactory test CA")]
        cn: String,
        #[arg(long, default_value = "pki")]
        out_dir: PathBuf,
        #[arg(long, default_value = "ca")]
        name: String,
    },
    /// Issue a leaf signed by an existing CA
    Leaf {
        #[arg(long, default_value = "pki/ca.pem")]
        ca_cert: PathBuf,
        #[arg(long, default_value = "pki/ca.key")]
        ca_key: PathBuf,
        /// Subject common name
        #[arg(long)]
        cn: String,
        /// DNS subject alternative names (repeatable)
        #[arg(long = "san")]
        sans: Vec<String>,
        /// server | client | both
        #[arg(long, default_value = "both")]
        role: LeafRole,
        #[arg(long, default_value = "pki")]
        out_dir: PathBuf,
        /// Output file stem; defaults to the common name
        #[arg(long)]
        name: Option<String>,
    },
    /// Generate a complete matrix: trusted CA, rogue CA, server, two clients and a rogue client
    Matrix {
        #[arg(long, default_value = "pki")]
        out_dir: PathBuf,
    },
}

fn ensure_parent(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
        #[cfg(unix)]
        {
            let perm = fs::Permissions::from_mode(0o755);
            fs::set_permissions(parent, perm).ok();
        }
    }
    Ok(())
}

fn write_file(path: &Path, contents: &[u8], mode: u32, force: bool) -> std::io::Result<()> {
    if path.exists() && !force {
        return Err(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("{} exists; use --force to overwrite", path.display()),
        ));
    }
    ensure_parent(path)?;
    let mut f = File::create(path)?;
    f.write_all(contents)?;
    #[cfg(unix)]
    {
        let perm = fs::Permissions::from_mode(mode);
        fs::set_permissions(path, perm)?;
    }
    #[cfg(not(unix))]
    let _ = mode;
    Ok(())
}

fn write_pair(
    out_dir: &Path,
    name: &str,
    cert_pem: &str,
    key_pem: &str,
    force: bool,
) -> anyhow::Result<(PathBuf, PathBuf)> {
    let cert_path = out_dir.join(format!("{}.pem", name));
    let key_path = out_dir.join(format!("{}.key", name));
    write_file(&cert_path, cert_pem.as_bytes(), 0o644, force)?;
    write_file(&key_path, key_pem.as_bytes(), 0o600, force)?;
    Ok((cert_path, key_path))
}

fn report(label: &str, cert_path: &Path, key_path: &Path, der_fp: Option<String>) {
    println!("✅ {}", label);
    println!("  cert: {}", cert_path.display());
    println!("  key:  {}", key_path.display());
    if let Some(fp) = der_fp {
        println!("  spki_sha256: {}", fp);
    }
}

fn write_leaf(
    out_dir: &Path,
    name: &str,
    leaf: &IssuedCert,
    force: bool,
) -> anyhow::Result<()> {
    let (c, k) = write_pair(out_dir, name, &leaf.cert_pem, &leaf.key_pem, force)?;
    report(name, &c, &k, Some(spki_fingerprint(&leaf.der)));
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Ca { cn, out_dir, name } => {
            let ca = CertificateAuthority::generate(&cn)?;
            let (c, k) = write_pair(&out_dir, &name, ca.cert_pem(), &ca.key_pem(), cli.force)?;
            report(&format!("CA '{}'", cn), &c, &k, None);
        }
        Commands::Leaf {
            ca_cert,
            ca_key,
            cn,
            sans,
            role,
            out_dir,
            name,
        } => {
            let ca = CertificateAuthority::from_pem(
                &read_pem_file(&ca_cert)?,
                &read_pem_file(&ca_key)?,
            )?;
            let san_refs: Vec<&str> = sans.iter().map(String::as_str).collect();
            let leaf = ca.issue(&cn, &san_refs, role)?;
            write_leaf(&out_dir, name.as_deref().unwrap_or(&cn), &leaf, cli.force)?;
        }
        Commands::Matrix { out_dir } => {
            let ca = CertificateAuthority::generate("tlsfactory test CA")?;
            let rogue = CertificateAuthority::generate("tlsfactory rogue CA")?;
            let (c, k) = write_pair(&out_dir, "ca", ca.cert_pem(), &ca.key_pem(), cli.force)?;
            report("trusted CA", &c, &k, None);
            let (c, k) = write_pair(
                &out_dir,
                "rogue-ca",
                rogue.cert_pem(),
                &rogue.key_pem(),
                cli.force,
            )?;
            report("rogue CA", &c, &k, None);
            write_leaf(
                &out_dir,
                "server",
                &ca.issue("server", &["localhost"], LeafRole::Server)?,
                cli.force,
            )?;
            write_leaf(
                &out_dir,
                "client-a",
                &ca.issue("client-a", &["client-a.test"], LeafRole::Client)?,
                cli.force,
            )?;
            write_leaf(
                &out_dir,
                "client-b",
                &ca.issue("client-b", &["client-b.test"], LeafRole::Client)?,
                cli.force,
            )?;
            write_leaf(
                &out_dir,
                "rogue-client",
                &rogue.issue("client-a", &["client-a.test"], LeafRole::Client)?,
                cli.force,
            )?;
            println!(
                "\nCreate an endpoint trusting the CA (example):\n  tlsfactory-ctl create --verify require --anchor {}/ca.pem --cert {}/server.pem --key {}/server.key",
                out_dir.display(),
                out_dir.display(),
                out_dir.display()
            );
        }
    }
    Ok(())
}
