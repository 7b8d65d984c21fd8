//! Device client backed by the `pymobiledevice3` command-line tool
//!
//! Each operation spawns one `pymobiledevice3` subcommand and parses its JSON
//! output. The tool talks to usbmuxd, performs the lockdown handshake and the
//! AFC/diagnostics service plumbing.

use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use a5act_core::prelude::*;
use a5act_core::{ActivationState, DeviceIdentity};
use serde_json::{Map, Value};
use tokio::process::Command;
use tokio::time::timeout;

use crate::session::{DeviceClient, SessionHandle};

/// Default device tool command
pub const DEFAULT_TOOL: &str = "pymobiledevice3";

/// Default timeout for a single tool invocation
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Substrings of the tool's stderr that mean "no device attached"
const NO_DEVICE_MARKERS: &[&str] = &[
    "NoDeviceConnectedError",
    "Device is not connected",
    "DeviceNotFoundError",
    "No device",
];

/// Client that shells out to `pymobiledevice3`
#[derive(Debug, Clone)]
pub struct Pmd3Client {
    /// Tool executable (name on PATH or absolute path)
    program: PathBuf,

    /// Pin every command to one device
    udid: Option<String>,

    /// Per-invocation timeout
    command_timeout: Duration,
}

impl Default for Pmd3Client {
    fn default() -> Self {
        Self::new(DEFAULT_TOOL)
    }
}

impl Pmd3Client {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            udid: None,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Pin `open()` to a specific device
    pub fn with_udid(mut self, udid: Option<String>) -> Self {
        self.udid = udid.filter(|u| !u.is_empty());
        self
    }

    pub fn with_command_timeout(mut self, command_timeout: Duration) -> Self {
        self.command_timeout = command_timeout;
        self
    }

    /// Run a subcommand and return its stdout
    async fn run(&self, args: &[&str], udid: Option<&str>) -> Result<String> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args);
        if let Some(udid) = udid {
            cmd.args(["--udid", udid]);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        trace!("Running {} {}", self.program.display(), args.join(" "));

        let output = timeout(self.command_timeout, cmd.output())
            .await
            .map_err(|_| {
                Error::transport(format!(
                    "'{}' timed out after {:?}",
                    args.join(" "),
                    self.command_timeout
                ))
            })?
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::tool_not_found(self.program.display().to_string())
                } else {
                    Error::transport(format!("Failed to run {}: {}", self.program.display(), e))
                }
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            debug!(
                "'{}' exited with {:?}: {}",
                args.join(" "),
                output.status.code(),
                stderr.trim()
            );
            return Err(classify_failure(args, output.status.code(), &stderr));
        }

        Ok(stdout)
    }

    /// Fetch the full lockdown value dictionary
    async fn lockdown_values(&self, udid: Option<&str>) -> Result<Map<String, Value>> {
        let stdout = self.run(&["lockdown", "info"], udid).await?;
        parse_json_object(&stdout)
    }
}

impl DeviceClient for Pmd3Client {
    async fn open(&self) -> Result<SessionHandle> {
        let values = self.lockdown_values(self.udid.as_deref()).await?;
        let udid = values
            .get("UniqueDeviceID")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::protocol("lockdown info has no UniqueDeviceID"))?;

        debug!("Opened session to {}", udid);
        Ok(SessionHandle::new(udid))
    }

    async fn read_identity(&self, session: &SessionHandle) -> Result<DeviceIdentity> {
        let values = self.lockdown_values(Some(session.udid())).await?;
        DeviceIdentity::from_lockdown_values(&values)
            .ok_or_else(|| Error::protocol("lockdown info has no ProductType/ProductVersion"))
    }

    async fn read_activation_state(&self, session: &SessionHandle) -> Result<ActivationState> {
        let values = self.lockdown_values(Some(session.udid())).await?;
        Ok(ActivationState::from_lockdown(
            values.get("ActivationState").and_then(Value::as_str),
        ))
    }

    async fn read_diagnostic_key(
        &self,
        session: &SessionHandle,
        key: &str,
    ) -> Result<Option<Value>> {
        let stdout = self
            .run(&["diagnostics", "mg", key], Some(session.udid()))
            .await?;
        let values = parse_json_object(&stdout)?;

        Ok(values.get(key).filter(|v| !v.is_null()).cloned())
    }

    async fn write_file(&self, session: &SessionHandle, path: &str, contents: &[u8]) -> Result<()> {
        // afc push reads from a local file, so stage the bytes first.
        let len = contents.len();
        let contents = contents.to_vec();
        let staged = tokio::task::spawn_blocking(move || -> Result<tempfile::NamedTempFile> {
            let mut file = tempfile::NamedTempFile::new()?;
            file.write_all(&contents)?;
            file.flush()?;
            Ok(file)
        })
        .await
        .map_err(|e| Error::transport(format!("Failed to stage payload: {}", e)))??;

        let local = staged.path().to_string_lossy().to_string();
        self.run(&["afc", "push", &local, path], Some(session.udid()))
            .await?;

        info!("Wrote {} bytes to {}", len, path);
        Ok(())
    }

    async fn restart(&self, session: SessionHandle) -> Result<()> {
        self.run(&["diagnostics", "restart"], Some(session.udid()))
            .await?;
        info!("Restart issued to {}", session.udid());
        Ok(())
    }
}

/// Map a failed invocation to an error
fn classify_failure(args: &[&str], code: Option<i32>, stderr: &str) -> Error {
    if NO_DEVICE_MARKERS.iter().any(|m| stderr.contains(m)) {
        return Error::NoDevice;
    }

    let detail = stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("no output");

    Error::transport(format!(
        "'{}' failed with exit code {:?}: {}",
        args.join(" "),
        code,
        detail
    ))
}

/// Parse the JSON object in the tool's output
///
/// The tool may print warnings around the JSON, so take the outermost braces.
fn parse_json_object(output: &str) -> Result<Map<String, Value>> {
    let json_str = match (output.find('{'), output.rfind('}')) {
        (Some(start), Some(end)) if end > start => &output[start..=end],
        _ => return Err(Error::protocol("no JSON object in tool output")),
    };

    match serde_json::from_str(json_str)? {
        Value::Object(map) => Ok(map),
        other => Err(Error::protocol(format!("expected JSON object, got {}", other))),
    }
}
