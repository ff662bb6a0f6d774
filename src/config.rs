//! Command-line and environment configuration

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::gpg::{GpgBinary, DEFAULT_GPG_EXEC, DEFAULT_KEYS_DIR, GPG_EXEC_ENV};
use crate::telemetry::LogFormat;
use crate::webhook::{TLS_CERT_FILE, TLS_KEY_FILE};
use crate::Error;

/// Longest accepted retry interval, one week
pub const MAX_REQUEUE_MINUTES: u64 = 7 * 24 * 60;

/// SOPS operator - decrypts SopsSecret resources into Kubernetes Secrets
#[derive(Parser, Debug, Clone)]
#[command(name = "sops-operator", version, about, long_about = None)]
pub struct Config {
    /// Generate CRD manifests and exit
    #[arg(long)]
    pub crd: bool,

    /// Minutes between retries of a failed reconciliation
    #[arg(
        long,
        env = "REQUEUE_AFTER_MINUTES",
        default_value_t = 5,
        value_parser = clap::value_parser!(u64).range(1..=MAX_REQUEUE_MINUTES)
    )]
    pub requeue_after_minutes: u64,

    /// GnuPG executable used to unlock data keys and import private keys; blank means `gpg`
    #[arg(long, env = GPG_EXEC_ENV, default_value = DEFAULT_GPG_EXEC, value_parser = parse_gpg_exec)]
    pub gpg_exec: String,

    /// Directory where imported private keys are written
    #[arg(long, env = "KEYS_DIR", default_value = DEFAULT_KEYS_DIR)]
    pub keys_dir: PathBuf,

    /// GnuPG home directory; the gpg default when unset
    #[arg(long, env = "GNUPGHOME")]
    pub gnupg_home: Option<PathBuf>,

    /// Reconciliations run in parallel per controller (0 = unbounded)
    #[arg(long, env = "CONCURRENCY", default_value_t = 4)]
    pub concurrency: u16,

    /// Admission webhook listen address
    #[arg(long, env = "WEBHOOK_ADDR", default_value = "0.0.0.0:9443")]
    pub webhook_addr: SocketAddr,

    /// Directory holding `tls.crt` and `tls.key`; the webhook is disabled when unset
    #[arg(long, env = "WEBHOOK_CERT_DIR")]
    pub webhook_cert_dir: Option<PathBuf>,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,
}

fn parse_gpg_exec(value: &str) -> Result<String, String> {
    let value = value.trim();
    if value.is_empty() {
        Ok(DEFAULT_GPG_EXEC.to_string())
    } else {
        Ok(value.to_string())
    }
}

impl Config {
    /// Check values clap cannot express
    pub fn validate(&self) -> Result<(), Error> {
        if let Some(dir) = &self.webhook_cert_dir {
            for file in [TLS_CERT_FILE, TLS_KEY_FILE] {
                if !dir.join(file).is_file() {
                    return Err(Error::config(format!(
                        "{} not found in webhook certificate directory {}",
                        file,
                        dir.display()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Interval after which failed passes are retried
    pub fn requeue_after(&self) -> Duration {
        Duration::from_secs(self.requeue_after_minutes.saturating_mul(60))
    }

    /// GnuPG binary configured from the flags
    pub fn gpg_binary(&self) -> GpgBinary {
        GpgBinary::new(self.gpg_exec.clone(), self.keys_dir.clone())
            .with_gnupg_home(self.gnupg_home.clone())
    }
}
