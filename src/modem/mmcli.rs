//! ModemManager access through the `mmcli` command-line tool

use super::{BearerHandle, IpType, ModemHandle, ModemManager};
use crate::command::{args, CommandOutput, CommandRunner};
use crate::error::{WwanError, WwanResult};
use crate::validation;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

const MMCLI_BIN: &str = "mmcli";

pub struct Mmcli {
    runner: Arc<dyn CommandRunner>,
}

impl Mmcli {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn exec(&self, argv: Vec<String>) -> WwanResult<CommandOutput> {
        match self.runner.run(MMCLI_BIN, &argv).await {
            // spawn failure: mmcli not installed
            Err(WwanError::CommandFailed { code: None, stderr, .. }) => {
                Err(WwanError::ModemManagerUnavailable(stderr))
            }
            other => other,
        }
    }

    async fn exec_checked(&self, argv: Vec<String>) -> WwanResult<String> {
        let cmd = format!("{} {}", MMCLI_BIN, argv.join(" "));
        let output = self.exec(argv).await?;
        if output.success() {
            return Ok(output.stdout);
        }
        let stderr = output.stderr.trim().to_string();
        if is_daemon_missing(&stderr) {
            return Err(WwanError::ModemManagerUnavailable(stderr));
        }
        Err(WwanError::CommandFailed {
            cmd,
            code: output.code,
            stderr,
        })
    }
}

fn is_daemon_missing(stderr: &str) -> bool {
    stderr.contains("couldn't find the ModemManager process")
        || stderr.contains("ModemManager is not running")
}

fn is_missing_object(stderr: &str) -> bool {
    let stderr = stderr.to_ascii_lowercase();
    stderr.contains("couldn't find bearer")
        || stderr.contains("couldn't find modem")
        || stderr.contains("not found")
}

#[async_trait]
impl ModemManager for Mmcli {
    async fn list_modems(&self) -> WwanResult<String> {
        self.exec_checked(args(&["-L"])).await
    }

    async fn modem_report(&self, modem: ModemHandle) -> WwanResult<String> {
        self.exec_checked(args(&["-m", &modem.to_string()])).await
    }

    async fn enable_modem(&self, modem: ModemHandle) -> WwanResult<()> {
        let id = modem.to_string();
        let output = self.exec(args(&["-m", &id, "-e"])).await?;
        if output.success() {
            info!(modem = %modem, "Modem enabled");
            return Ok(());
        }
        let stderr = output.stderr.trim().to_string();
        if stderr.to_ascii_lowercase().contains("already enabled") {
            debug!(modem = %modem, "Modem already enabled");
            return Ok(());
        }
        Err(WwanError::CommandFailed {
            cmd: format!("{} -m {} -e", MMCLI_BIN, id),
            code: output.code,
            stderr,
        })
    }

    async fn create_bearer(
        &self,
        modem: ModemHandle,
        apn: &str,
        ip_type: IpType,
    ) -> WwanResult<String> {
        validation::validate_apn(apn)?;
        let bearer_args = format!("--create-bearer=apn={},ip-type={}", apn, ip_type);
        self.exec_checked(args(&["-m", &modem.to_string(), &bearer_args]))
            .await
            .map_err(|e| match e {
                WwanError::CommandFailed { stderr, .. } => WwanError::BearerCreateFailed(stderr),
                other => other,
            })
    }

    async fn connect_bearer(&self, bearer: BearerHandle) -> WwanResult<()> {
        self.exec_checked(args(&["-b", &bearer.to_string(), "--connect"]))
            .await
            .map(|_| ())
    }

    async fn disconnect_bearer(&self, bearer: BearerHandle) -> WwanResult<()> {
        self.exec_checked(args(&["-b", &bearer.to_string(), "--disconnect"]))
            .await
            .map(|_| ())
    }

    async fn bearer_report(&self, bearer: BearerHandle) -> WwanResult<Option<String>> {
        let id = bearer.to_string();
        let output = self.exec(args(&["-b", &id])).await?;
        if output.success() {
            return Ok(Some(output.stdout));
        }
        let stderr = output.stderr.trim().to_string();
        if is_missing_object(&stderr) {
            return Ok(None);
        }
        if is_daemon_missing(&stderr) {
            return Err(WwanError::ModemManagerUnavailable(stderr));
        }
        Err(WwanError::CommandFailed {
            cmd: format!("{} -b {}", MMCLI_BIN, id),
            code: output.code,
            stderr,
        })
    }
}
