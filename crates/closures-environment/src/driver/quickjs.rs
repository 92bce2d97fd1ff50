// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embedded JavaScript driver built on QuickJS.
//!
//! Every invocation gets its own OS thread with a fresh `Runtime` and `Context`,
//! so no script can observe another's globals. Scripts run in sloppy mode so the
//! common `result = f(inputs.a)` form creates a global without a declaration.
//!
//! Inside the script:
//! - `inputs` is an object holding every input, and each input is also bound
//!   as a global of the same name. Both names refer to the same value, so a
//!   mutation through one is visible through the other.
//! - `print(...)` and `console.log(...)` are forwarded to `tracing`.
//!
//! Long-running code is stopped by QuickJS's interrupt handler, which polls the
//! cancel token and the deadline while bytecode executes. A tight `while (true)`
//! loop is interrupted the same way as any other code.

use std::sync::atomic::Ordering;
use std::time::Instant;

use async_trait::async_trait;
use closures_core::Bindings;
use rquickjs::context::EvalOptions;
use rquickjs::prelude::{Coerced, Rest};
use rquickjs::{Context, Ctx, Function, Object, Runtime};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::codec;
use super::traits::*;

/// Stack size of each interpreter thread.
const THREAD_STACK_SIZE: usize = 8 * 1024 * 1024;

/// Interpreter stack limit, well inside [`THREAD_STACK_SIZE`].
const MAX_INTERPRETER_STACK: usize = 2 * 1024 * 1024;

/// Identifiers never looked up as lexical outputs.
const RESERVED_NAMES: &[&str] = &[
    "this", "arguments", "eval", "null", "true", "false", "undefined", "new", "typeof", "void",
    "delete", "function", "class", "var", "let", "const", "return", "if", "else", "in", "of",
];

/// QuickJS-backed driver.
#[derive(Debug, Default, Clone)]
pub struct JsDriver;

impl JsDriver {
    /// Create a new driver.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Driver for JsDriver {
    fn driver_type(&self) -> &'static str {
        "quickjs"
    }

    async fn run(&self, request: &ExecutionRequest, cancel_token: CancelToken) -> Result<Bindings> {
        let (tx, rx) = oneshot::channel();
        let request = request.clone();

        std::thread::Builder::new()
            .name("closure-quickjs".to_string())
            .stack_size(THREAD_STACK_SIZE)
            .spawn(move || {
                let started = Instant::now();
                let result = evaluate(&request, &cancel_token);
                debug!(
                    closure_id = %request.closure_id,
                    generation = request.generation,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    success = result.is_ok(),
                    "QuickJS evaluation finished"
                );
                // The receiver is gone when the supervisor already gave up on us.
                let _ = tx.send(result);
            })
            .map_err(|e| DriverError::StartFailed(format!("failed to spawn interpreter thread: {}", e)))?;

        rx.await
            .map_err(|_| DriverError::Other("interpreter thread exited without a result".to_string()))?
    }
}

/// Evaluate one request on the current thread.
fn evaluate(request: &ExecutionRequest, cancel_token: &CancelToken) -> Result<Bindings> {
    let runtime = Runtime::new().map_err(|e| DriverError::StartFailed(e.to_string()))?;
    if let Some(limit) = request.memory_limit_bytes {
        runtime.set_memory_limit(limit);
    }
    runtime.set_max_stack_size(MAX_INTERPRETER_STACK);

    let token = cancel_token.clone();
    let deadline = request.deadline;
    runtime.set_interrupt_handler(Some(Box::new(move || {
        token.load(Ordering::SeqCst) || deadline.is_some_and(|d| Instant::now() >= d)
    })));

    let context = Context::full(&runtime).map_err(|e| DriverError::StartFailed(e.to_string()))?;
    let result = context.with(|ctx| run_in_context(&ctx, request));

    match result {
        Err(DriverError::Script(message)) if request.should_stop(cancel_token) => {
            debug!(
                closure_id = %request.closure_id,
                error = %message,
                "Script stopped by interrupt"
            );
            Err(DriverError::Interrupted)
        }
        other => other,
    }
}

fn run_in_context<'js>(ctx: &Ctx<'js>, request: &ExecutionRequest) -> Result<Bindings> {
    let globals = ctx.globals();

    let inputs = Object::new(ctx.clone()).map_err(|e| script_error(ctx, e))?;
    for (name, value) in &request.inputs {
        let js = codec::json_to_js(ctx, value, &format!("inputs.{}", name))?;
        inputs
            .set(name.as_str(), js.clone())
            .map_err(|e| script_error(ctx, e))?;
        globals
            .set(name.as_str(), js)
            .map_err(|e| script_error(ctx, e))?;
    }
    globals
        .set("inputs", inputs)
        .map_err(|e| script_error(ctx, e))?;
    install_console(ctx, &globals, &request.closure_id).map_err(|e| script_error(ctx, e))?;

    let mut options = EvalOptions::default();
    options.strict = false;
    ctx.eval_with_options::<(), _>(request.source.as_str(), options)
        .map_err(|e| script_error(ctx, e))?;

    let mut outputs = Bindings::new();
    for name in &request.output_names {
        let mut value: rquickjs::Value = globals
            .get(name.as_str())
            .map_err(|e| script_error(ctx, e))?;
        if value.is_undefined() && is_plain_identifier(name) {
            value = read_lexical_binding(ctx, name);
        }
        outputs.insert(name.clone(), codec::js_to_json(&value, name)?);
    }

    Ok(outputs)
}

/// Read a top-level `let`/`const` binding, which does not live on the global object.
fn read_lexical_binding<'js>(ctx: &Ctx<'js>, name: &str) -> rquickjs::Value<'js> {
    let lookup = format!("typeof {0} === 'undefined' ? undefined : {0}", name);
    match ctx.eval::<rquickjs::Value, _>(lookup) {
        Ok(value) => value,
        Err(_) => {
            // Uninitialized bindings throw; clear the pending exception.
            let _ = ctx.catch();
            rquickjs::Value::new_undefined(ctx.clone())
        }
    }
}

fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$');
    valid_start
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        && !RESERVED_NAMES.contains(&name)
}

fn install_console<'js>(
    ctx: &Ctx<'js>,
    globals: &Object<'js>,
    closure_id: &str,
) -> rquickjs::Result<()> {
    let id = closure_id.to_string();
    let print = Function::new(ctx.clone(), move |args: Rest<Coerced<String>>| {
        let line = args
            .0
            .into_iter()
            .map(|arg| arg.0)
            .collect::<Vec<_>>()
            .join(" ");
        info!(closure_id = %id, output = %line, "Closure output");
    })?;

    let id = closure_id.to_string();
    let print_error = Function::new(ctx.clone(), move |args: Rest<Coerced<String>>| {
        let line = args
            .0
            .into_iter()
            .map(|arg| arg.0)
            .collect::<Vec<_>>()
            .join(" ");
        warn!(closure_id = %id, output = %line, "Closure error output");
    })?;

    let console = Object::new(ctx.clone())?;
    console.set("log", print.clone())?;
    console.set("info", print.clone())?;
    console.set("warn", print_error.clone())?;
    console.set("error", print_error)?;
    globals.set("console", console)?;
    globals.set("print", print)?;
    Ok(())
}

/// Turn an engine error into a script error, pulling the thrown value if any.
fn script_error(ctx: &Ctx<'_>, err: rquickjs::Error) -> DriverError {
    if !matches!(err, rquickjs::Error::Exception) {
        return DriverError::Script(err.to_string());
    }
    let thrown = ctx.catch();
    DriverError::Script(describe_thrown(&thrown))
}

fn describe_thrown(thrown: &rquickjs::Value<'_>) -> String {
    if let Some(object) = thrown.as_object() {
        let name: Option<String> = object.get("name").ok().flatten();
        let message: Option<String> = object.get("message").ok().flatten();
        if let Some(message) = message {
            return match name {
                Some(name) if !name.is_empty() => format!("{}: {}", name, message),
                _ => message,
            };
        }
    }

    thrown
        .get::<Coerced<String>>()
        .map(|s| s.0)
        .unwrap_or_else(|_| "Uncaught exception".to_string())
}
