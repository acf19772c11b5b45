//! Exec provider - binds a resource type to an external command
//!
//! Each operation runs the command once. The request is one JSON object on
//! stdin:
//!
//! ```json
//! {"operation": "create", "resource_type": "vpc_network", "address": "vpc_network.main",
//!  "attributes": {"name": "analytics"}, "attempt": 1}
//! ```
//!
//! `update` and `destroy` also carry `id`; `update` carries `changed`, the
//! names of the attributes that differ from the recorded ones. On success
//! the command prints one JSON object of outputs (`create` must include
//! `id`). Exit codes select the error category:
//!
//! | Code | Meaning   |
//! |------|-----------|
//! | 0    | success   |
//! | 10   | auth      |
//! | 11   | quota     |
//! | 12   | conflict  |
//! | 13   | transient |
//! | else | other     |

use declarative::{
    AttributeDiff, Attributes, CallContext, Provider, ProviderError, ResourceSchema, Value,
};
use serde_json::json;
use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Exit codes understood from provider commands
pub mod exit_code {
    pub const AUTH: i32 = 10;
    pub const QUOTA: i32 = 11;
    pub const CONFLICT: i32 = 12;
    pub const TRANSIENT: i32 = 13;
}

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug)]
pub struct ExecProvider {
    resource_type: String,
    command: Vec<String>,
    schema: ResourceSchema,
    timeout: Option<Duration>,
}

impl ExecProvider {
    pub fn new(resource_type: impl Into<String>, command: Vec<String>, schema: ResourceSchema) -> Self {
        Self {
            resource_type: resource_type.into(),
            command,
            schema,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn program(&self) -> &str {
        self.command.first().map_or("", String::as_str)
    }

    /// Run the command with one request and collect its outputs
    fn run(
        &self,
        ctx: &CallContext<'_>,
        request: &serde_json::Value,
    ) -> Result<Attributes, ProviderError> {
        log::debug!(
            "{}: running {} (attempt {})",
            ctx.address,
            self.program(),
            ctx.attempt
        );

        let mut child = Command::new(self.program())
            .args(self.command.iter().skip(1))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ProviderError::Other(format!("failed to start {}: {e}", self.program())))?;

        let body = request.to_string();
        if let Some(mut stdin) = child.stdin.take() {
            // Written from a thread so a command that never reads cannot block us
            thread::spawn(move || {
                let _ = stdin.write_all(body.as_bytes());
            });
        }
        let stdout = reader(child.stdout.take());
        let stderr = reader(child.stderr.take());

        let status = wait_with_deadline(&mut child, ctx.timeout).map_err(|e| {
            ProviderError::Other(format!("failed to wait for {}: {e}", self.program()))
        })?;
        let Some(status) = status else {
            // Reader threads are left behind; a grandchild may still hold the pipes
            return Err(ProviderError::transient(format!(
                "{} timed out after {}s",
                self.program(),
                ctx.timeout.as_secs()
            )));
        };

        let stdout = collect(stdout);
        let stderr = collect(stderr);
        if !stderr.trim().is_empty() {
            log::debug!("{}: {}", ctx.address, stderr.trim());
        }

        if !status.success() {
            return Err(classify_exit(status, &stderr));
        }
        parse_outputs(&stdout)
    }
}

impl Provider for ExecProvider {
    fn schema(&self) -> ResourceSchema {
        self.schema.clone()
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn create(
        &self,
        ctx: &CallContext<'_>,
        attributes: &Attributes,
    ) -> Result<Attributes, ProviderError> {
        let request = json!({
            "operation": "create",
            "resource_type": self.resource_type,
            "address": ctx.address.to_string(),
            "attributes": attributes,
            "attempt": ctx.attempt,
        });
        self.run(ctx, &request)
    }

    fn update(
        &self,
        ctx: &CallContext<'_>,
        id: &str,
        diff: &AttributeDiff,
    ) -> Result<Attributes, ProviderError> {
        let request = json!({
            "operation": "update",
            "resource_type": self.resource_type,
            "address": ctx.address.to_string(),
            "id": id,
            "attributes": diff.attributes,
            "changed": diff.changed,
            "attempt": ctx.attempt,
        });
        self.run(ctx, &request)
    }

    fn destroy(&self, ctx: &CallContext<'_>, id: &str) -> Result<(), ProviderError> {
        let request = json!({
            "operation": "destroy",
            "resource_type": self.resource_type,
            "address": ctx.address.to_string(),
            "id": id,
            "attributes": {},
            "attempt": ctx.attempt,
        });
        self.run(ctx, &request).map(|_| ())
    }
}

fn reader<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn collect(handle: Option<JoinHandle<String>>) -> String {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

/// Wait for the child; `None` means it was killed at the deadline
fn wait_with_deadline(child: &mut Child, timeout: Duration) -> std::io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn classify_exit(status: ExitStatus, stderr: &str) -> ProviderError {
    let message = match stderr.trim() {
        "" => format!("provider exited with {status}"),
        s => s.to_string(),
    };
    match status.code() {
        Some(exit_code::AUTH) => ProviderError::Auth { message },
        Some(exit_code::QUOTA) => ProviderError::Quota { message },
        Some(exit_code::CONFLICT) => ProviderError::Conflict { message },
        Some(exit_code::TRANSIENT) => ProviderError::Transient { message },
        _ => ProviderError::Other(message),
    }
}

/// Parse the outputs object; empty output means no outputs
fn parse_outputs(stdout: &str) -> Result<Attributes, ProviderError> {
    let stdout = stdout.trim();
    if stdout.is_empty() {
        return Ok(Attributes::new());
    }
    let parsed: serde_json::Value = serde_json::from_str(stdout)
        .map_err(|e| ProviderError::Other(format!("provider printed invalid JSON: {e}")))?;
    let serde_json::Value::Object(map) = parsed else {
        return Err(ProviderError::Other(
            "provider output must be a JSON object".to_string(),
        ));
    };
    Ok(map
        .into_iter()
        .filter_map(|(k, v)| from_json(v).map(|v| (k, v)))
        .collect())
}

/// Convert JSON into a value; nulls have no counterpart and are dropped
fn from_json(json: serde_json::Value) -> Option<Value> {
    use serde_json::Value as Json;
    match json {
        Json::Null => None,
        Json::Bool(b) => Some(Value::Bool(b)),
        Json::Number(n) => n
            .as_i64()
            .map(Value::Integer)
            .or_else(|| n.as_f64().map(Value::Float)),
        Json::String(s) => Some(Value::String(s)),
        Json::Array(items) => Some(Value::List(items.into_iter().filter_map(from_json).collect())),
        Json::Object(map) => Some(Value::Map(
            map.into_iter()
                .filter_map(|(k, v)| from_json(v).map(|v| (k, v)))
                .collect(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::Address;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    /// Provider running `sh <script>`; avoids exec-bit races on fresh files
    fn script_provider(dir: &Path, body: &str) -> ExecProvider {
        let script = dir.join("provider.sh");
        fs::write(&script, body).unwrap();
        ExecProvider::new(
            "vpc_network",
            vec!["sh".into(), script.to_string_lossy().into_owned()],
            ResourceSchema::default(),
        )
    }

    fn ctx(address: &Address, timeout: Duration) -> CallContext<'_> {
        CallContext {
            address,
            timeout,
            attempt: 1,
        }
    }

    #[test]
    fn test_create_sends_request_and_reads_outputs() {
        let dir = TempDir::new().unwrap();
        let request_file = dir.path().join("request.json");
        let provider = script_provider(
            dir.path(),
            &format!(
                "cat > '{}'\necho '{{\"id\": \"enp123\", \"labels\": null, \"size\": 3}}'\n",
                request_file.display()
            ),
        );
        let address: Address = "vpc_network.main".parse().unwrap();
        let mut attributes = Attributes::new();
        attributes.insert("name".into(), Value::from("analytics"));

        let outputs = provider
            .create(&ctx(&address, Duration::from_secs(10)), &attributes)
            .unwrap();
        assert_eq!(outputs.get("id"), Some(&Value::from("enp123")));
        assert_eq!(outputs.get("size"), Some(&Value::Integer(3)));
        assert!(!outputs.contains_key("labels"));

        let request: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&request_file).unwrap()).unwrap();
        assert_eq!(request["operation"], "create");
        assert_eq!(request["address"], "vpc_network.main");
        assert_eq!(request["attributes"]["name"], "analytics");
        assert!(request.get("id").is_none());
    }

    #[test]
    fn test_update_carries_id_and_changed() {
        let dir = TempDir::new().unwrap();
        let request_file = dir.path().join("request.json");
        let provider = script_provider(
            dir.path(),
            &format!("cat > '{}'\n", request_file.display()),
        );
        let address: Address = "vpc_network.main".parse().unwrap();
        let mut diff = AttributeDiff::default();
        diff.attributes.insert("name".into(), Value::from("renamed"));
        diff.changed.insert("name".into());

        let outputs = provider
            .update(&ctx(&address, Duration::from_secs(10)), "enp123", &diff)
            .unwrap();
        assert!(outputs.is_empty());

        let request: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&request_file).unwrap()).unwrap();
        assert_eq!(request["id"], "enp123");
        assert_eq!(request["changed"], json!(["name"]));
    }

    #[test]
    fn test_exit_codes_map_to_categories() {
        let dir = TempDir::new().unwrap();
        let provider = script_provider(
            dir.path(),
            "cat > /dev/null\necho 'clusters limit reached' >&2\nexit 11\n",
        );
        let address: Address = "vpc_network.main".parse().unwrap();
        let err = provider
            .destroy(&ctx(&address, Duration::from_secs(10)), "enp123")
            .unwrap_err();
        assert_eq!(
            err,
            ProviderError::Quota {
                message: "clusters limit reached".into()
            }
        );

        let status = Command::new("sh").args(["-c", "exit 13"]).status().unwrap();
        assert!(classify_exit(status, "").is_retryable());
        let status = Command::new("sh").args(["-c", "exit 1"]).status().unwrap();
        assert!(matches!(classify_exit(status, "boom"), ProviderError::Other(m) if m == "boom"));
    }

    #[test]
    fn test_timeout_kills_and_is_transient() {
        let dir = TempDir::new().unwrap();
        let provider = script_provider(dir.path(), "exec sleep 5\n");
        let address: Address = "vpc_network.main".parse().unwrap();
        let started = Instant::now();
        let err = provider
            .create(&ctx(&address, Duration::from_millis(200)), &Attributes::new())
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_invalid_output_is_rejected() {
        assert!(parse_outputs("not json").is_err());
        assert!(parse_outputs("[1, 2]").is_err());
        assert!(parse_outputs("  \n").unwrap().is_empty());
    }

    #[test]
    fn test_missing_program() {
        let provider = ExecProvider::new(
            "vpc_network",
            vec!["/nonexistent/landform-provider".into()],
            ResourceSchema::default(),
        );
        let address: Address = "vpc_network.main".parse().unwrap();
        let err = provider
            .create(&ctx(&address, Duration::from_secs(1)), &Attributes::new())
            .unwrap_err();
        assert!(err.to_string().contains("failed to start"));
    }
}
