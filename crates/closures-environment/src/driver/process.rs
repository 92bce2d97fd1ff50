// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Drivers that run scripts in an external interpreter process.
//!
//! The driver spawns the interpreter with a small wrapper program, writes the
//! request as JSON on stdin and reads back one marker-prefixed JSON line from
//! stdout. Script output (`print`, `console.log`) goes to stderr and is
//! forwarded to `tracing`. Each invocation is a new process, so isolation is
//! the operating system's.
//!
//! The child is spawned with `kill_on_drop`; when the deadline passes or the
//! cancel token is set the wait is abandoned and the process is killed.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use closures_core::Bindings;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::traits::*;

/// Prefix of the result line written by the wrappers.
const RESULT_MARKER: &str = "__CLOSURE_RESULT__";

/// How often the cancel token and deadline are checked while waiting.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

const NODE_WRAPPER: &str = r#"
const vm = require('vm');
const MARKER = '__CLOSURE_RESULT__';
const emit = (payload) => process.stdout.write('\n' + MARKER + JSON.stringify(payload) + '\n');
const chunks = [];
process.stdin.on('data', (chunk) => chunks.push(chunk));
process.stdin.on('end', () => {
  const req = JSON.parse(Buffer.concat(chunks).toString('utf8'));
  const log = (...args) => process.stderr.write(args.map(String).join(' ') + '\n');
  const sandbox = {};
  for (const [name, value] of Object.entries(req.inputs)) sandbox[name] = value;
  sandbox.inputs = req.inputs;
  sandbox.print = log;
  sandbox.console = { log, info: log, warn: log, error: log };
  const context = vm.createContext(sandbox);
  try {
    vm.runInContext(req.source, context, { filename: 'closure.js' });
  } catch (e) {
    const described = e && e.name && e.message !== undefined ? e.name + ': ' + e.message : String(e);
    emit({ error: described });
    return;
  }
  const outputs = {};
  for (const name of req.outputNames) {
    let value = sandbox[name];
    if (value === undefined && /^[A-Za-z_$][\w$]*$/.test(name)) {
      try {
        value = vm.runInContext('typeof ' + name + " === 'undefined' ? undefined : " + name, context);
      } catch (e) {
        value = undefined;
      }
    }
    outputs[name] = value === undefined ? null : value;
  }
  try {
    emit({ outputs });
  } catch (e) {
    emit({ error: 'Unsupported value: ' + e.message });
  }
});
"#;

const PYTHON_WRAPPER: &str = r#"
import contextlib, json, sys
MARKER = "__CLOSURE_RESULT__"

def emit(payload):
    line = "\n" + MARKER + json.dumps(payload, allow_nan=False) + "\n"
    sys.stdout.write(line)
    sys.stdout.flush()

req = json.loads(sys.stdin.read())
limit = req.get("memoryLimitBytes")
if limit:
    try:
        import resource
        resource.setrlimit(resource.RLIMIT_AS, (limit, limit))
    except (ImportError, ValueError, OSError):
        pass

scope = dict(req["inputs"])
scope["inputs"] = req["inputs"]
scope["__name__"] = "__closure__"
try:
    with contextlib.redirect_stdout(sys.stderr):
        exec(compile(req["source"], "closure.py", "exec"), scope)
except BaseException as e:
    emit({"error": "%s: %s" % (type(e).__name__, e)})
    sys.exit(0)

outputs = {name: scope.get(name) for name in req["outputNames"]}
try:
    emit({"outputs": outputs})
except (TypeError, ValueError) as e:
    emit({"error": "Unsupported value: %s" % e})
"#;

/// Interpreter family run by a [`ProcessDriver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessLanguage {
    /// JavaScript on Node.js, evaluated in a `vm` context.
    NodeJs,
    /// Python 3, evaluated with `exec`.
    Python,
}

impl ProcessLanguage {
    /// Executable used when none is configured.
    pub fn default_binary(&self) -> &'static str {
        match self {
            Self::NodeJs => "node",
            Self::Python => "python3",
        }
    }

    fn args(&self, memory_limit_bytes: Option<usize>) -> Vec<String> {
        match self {
            Self::NodeJs => {
                let mut args = Vec::new();
                if let Some(bytes) = memory_limit_bytes {
                    let mb = (bytes / (1024 * 1024)).max(1);
                    args.push(format!("--max-old-space-size={}", mb));
                }
                args.push("-e".to_string());
                args.push(NODE_WRAPPER.to_string());
                args
            }
            Self::Python => vec!["-c".to_string(), PYTHON_WRAPPER.to_string()],
        }
    }
}

/// Result line written by the wrappers.
#[derive(Debug, Deserialize)]
struct WrapperResult {
    #[serde(default)]
    outputs: Option<Bindings>,
    #[serde(default)]
    error: Option<String>,
}

/// Driver running each invocation in a fresh interpreter process.
#[derive(Debug, Clone)]
pub struct ProcessDriver {
    language: ProcessLanguage,
    binary: PathBuf,
}

impl ProcessDriver {
    /// Create a driver using `binary` as the interpreter executable.
    pub fn new(language: ProcessLanguage, binary: impl Into<PathBuf>) -> Self {
        Self {
            language,
            binary: binary.into(),
        }
    }

    /// Node.js driver using `node` from `PATH`.
    pub fn nodejs() -> Self {
        Self::new(ProcessLanguage::NodeJs, ProcessLanguage::NodeJs.default_binary())
    }

    /// Python driver using `python3` from `PATH`.
    pub fn python() -> Self {
        Self::new(ProcessLanguage::Python, ProcessLanguage::Python.default_binary())
    }

    /// The interpreter family.
    pub fn language(&self) -> ProcessLanguage {
        self.language
    }

    /// The interpreter executable.
    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

#[async_trait]
impl Driver for ProcessDriver {
    fn driver_type(&self) -> &'static str {
        "process"
    }

    async fn run(&self, request: &ExecutionRequest, cancel_token: CancelToken) -> Result<Bindings> {
        let payload = serde_json::to_vec(&json!({
            "source": request.source,
            "inputs": request.inputs,
            "outputNames": request.output_names,
            "memoryLimitBytes": request.memory_limit_bytes,
        }))?;

        let mut child = Command::new(&self.binary)
            .args(self.language.args(request.memory_limit_bytes))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                DriverError::StartFailed(format!("failed to spawn {:?}: {}", self.binary, e))
            })?;

        debug!(
            closure_id = %request.closure_id,
            generation = request.generation,
            binary = ?self.binary,
            pid = ?child.id(),
            "Interpreter process spawned"
        );

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&payload).await?;
            stdin.shutdown().await?;
        }

        let wait = child.wait_with_output();
        tokio::pin!(wait);

        // Returning early drops `wait`, and with it the child, which kills the process.
        let output = loop {
            tokio::select! {
                result = &mut wait => break result?,
                _ = tokio::time::sleep(POLL_INTERVAL) => {
                    if request.should_stop(&cancel_token) {
                        warn!(
                            closure_id = %request.closure_id,
                            generation = request.generation,
                            "Killing interpreter process"
                        );
                        return Err(DriverError::Interrupted);
                    }
                }
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
            info!(closure_id = %request.closure_id, output = %line, "Closure output");
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let result_line = stdout
            .lines()
            .rev()
            .find_map(|line| line.strip_prefix(RESULT_MARKER));

        let Some(result_line) = result_line else {
            let detail = stderr.trim();
            return Err(DriverError::Script(if detail.is_empty() {
                format!("interpreter exited with {} and no result", output.status)
            } else {
                detail.to_string()
            }));
        };

        let result: WrapperResult = serde_json::from_str(result_line)?;
        if let Some(error) = result.error {
            return Err(DriverError::Script(error));
        }

        let mut outputs = result.outputs.unwrap_or_default();
        Ok(request
            .output_names
            .iter()
            .map(|name| {
                let value = outputs.remove(name).unwrap_or(Value::Null);
                (name.clone(), value)
            })
            .collect())
    }
}
