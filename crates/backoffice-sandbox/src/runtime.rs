//! Sandbox runtime using QuickJS
//!
//! One runtime per call: created, used and dropped inside
//! [`ScriptSandbox::execute_script`]. Nothing survives between calls.
//!
//! Promise results are settled before the call returns. The job queue is
//! drained on the calling thread, so the host never observes a suspension.

use crate::globals::HostGlobals;
use crate::marshal::{format_value, import_value, try_format_value, FromScript};
use crate::{Result, SandboxError};
use rquickjs::function::Rest;
use rquickjs::{Context, Ctx, Exception, Function, Object, Persistent, Runtime, Value};
use serde_json::Map;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Evaluated before the operation script, so the script cannot shadow
/// `Error` or `Promise` to fool the bridge.
const PRELUDE: &str = r#"(() => {
    const NativeError = Error;
    const NativePromise = Promise;
    return {
        isError: (value) => value instanceof NativeError,
        isThenable: (value) =>
            value !== null &&
            (typeof value === "object" || typeof value === "function") &&
            typeof value.then === "function",
        settle: (value) => {
            const outcome = { settled: false, fulfilled: false, value: undefined };
            NativePromise.resolve(value).then(
                (result) => {
                    outcome.settled = true;
                    outcome.fulfilled = true;
                    outcome.value = result;
                },
                (reason) => {
                    outcome.settled = true;
                    outcome.value = reason;
                },
            );
            return outcome;
        },
    };
})()"#;

/// Picks up `function run`, `var run` and top-level `const`/`let` bindings alike
const LOOKUP_RUN: &str = "typeof run === 'function' ? run : undefined";

const CONSOLE_LEVELS: [&str; 5] = ["log", "info", "warn", "error", "debug"];

/// Configuration for the sandbox
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Maximum wall-clock execution time, promise settlement included
    pub timeout: Duration,
    /// Maximum heap in bytes
    pub max_memory: usize,
    /// Maximum VM stack in bytes
    pub max_stack: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_memory: 64 * 1024 * 1024, // 64MB
            max_stack: 512 * 1024,        // 512KB
        }
    }
}

/// Arguments handed to the script's `run` function
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptArgs {
    /// A single object, for `function run({ a, b })`
    Named(Map<String, serde_json::Value>),
    /// Spread positionally, for `function run(a, b)`
    Positional(Vec<serde_json::Value>),
}

impl ScriptArgs {
    pub fn none() -> Self {
        ScriptArgs::Named(Map::new())
    }
}

impl From<Map<String, serde_json::Value>> for ScriptArgs {
    fn from(arguments: Map<String, serde_json::Value>) -> Self {
        ScriptArgs::Named(arguments)
    }
}

impl From<Vec<serde_json::Value>> for ScriptArgs {
    fn from(arguments: Vec<serde_json::Value>) -> Self {
        ScriptArgs::Positional(arguments)
    }
}

/// The JavaScript sandbox
#[derive(Debug, Clone, Default)]
pub struct ScriptSandbox {
    config: SandboxConfig,
}

impl ScriptSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Run `source` and call its `run` function, casting the result into `T`
    pub fn execute_script<T: FromScript>(
        &self,
        name: &str,
        source: &str,
        args: &ScriptArgs,
        globals: &HostGlobals,
    ) -> Result<T> {
        let started = Instant::now();
        debug!(script = name, globals = globals.len(), "starting script runtime");

        let result = self.run_isolated(name, source, args, globals);

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => debug!(script = name, elapsed_ms, "script finished"),
            Err(err) => debug!(script = name, elapsed_ms, error = %err, "script failed"),
        }
        result
    }

    fn run_isolated<T: FromScript>(
        &self,
        name: &str,
        source: &str,
        args: &ScriptArgs,
        globals: &HostGlobals,
    ) -> Result<T> {
        let runtime = Runtime::new()?;
        runtime.set_memory_limit(self.config.max_memory);
        runtime.set_max_stack_size(self.config.max_stack);

        let deadline = Deadline::start(self.config.timeout);
        let interrupt = deadline.clone();
        runtime.set_interrupt_handler(Some(Box::new(move || interrupt.poll())));

        let context = Context::full(&runtime)?;

        let step = context.with(|ctx| start(&ctx, &deadline, name, source, args, globals))?;
        match step {
            Step::Done(value) => Ok(value),
            Step::Waiting(waiting) => {
                let drained = drain_jobs(&runtime, &deadline);
                context.with(|ctx| finish(&ctx, &deadline, name, waiting, drained))
            }
        }
    }
}

enum Step<T> {
    Done(T),
    Waiting(Waiting),
}

/// A thenable handed back by `run`, parked while the job queue drains
struct Waiting {
    helpers: Persistent<Object<'static>>,
    outcome: Persistent<Object<'static>>,
}

fn start<'js, T: FromScript>(
    ctx: &Ctx<'js>,
    deadline: &Deadline,
    name: &str,
    source: &str,
    args: &ScriptArgs,
    globals: &HostGlobals,
) -> Result<Step<T>> {
    let helpers_object: Object = ctx
        .eval(PRELUDE)
        .map_err(|err| SandboxError::Engine(format!("failed to load script prelude: {err}")))?;
    let helpers = Helpers::load(helpers_object.clone())?;

    let step = call_run(ctx, name, source, args, globals, &helpers, helpers_object);
    guard(ctx, deadline, &helpers, step)
}

/// Evaluate the source and call `run`. Engine exceptions stay pending for [`guard`].
fn call_run<'js, T: FromScript>(
    ctx: &Ctx<'js>,
    name: &str,
    source: &str,
    args: &ScriptArgs,
    globals: &HostGlobals,
    helpers: &Helpers<'js>,
    helpers_object: Object<'js>,
) -> Result<Step<T>> {
    install_console(ctx, name)?;
    install_globals(ctx, globals)?;

    let evaluated = ctx.eval::<Value, _>(source)?;
    reject_error_value(helpers, &evaluated)?;

    let lookup = ctx.eval::<Value, _>(LOOKUP_RUN)?;
    let run = match lookup.as_function() {
        Some(run) => run.clone(),
        None => return Err(SandboxError::MissingRun(name.to_string())),
    };

    let call_args = script_args(ctx, args)?;
    let returned = run.call::<_, Value>((Rest(call_args),))?;

    if helpers.is_thenable(&returned)? {
        let outcome = helpers.settle(&returned)?;
        return Ok(Step::Waiting(Waiting {
            helpers: Persistent::save(ctx, helpers_object),
            outcome: Persistent::save(ctx, outcome),
        }));
    }

    reject_error_value(helpers, &returned)?;
    T::from_script(&returned).map(Step::Done)
}

fn finish<'js, T: FromScript>(
    ctx: &Ctx<'js>,
    deadline: &Deadline,
    name: &str,
    waiting: Waiting,
    drained: Result<()>,
) -> Result<T> {
    let helpers = Helpers::load(waiting.helpers.restore(ctx)?)?;
    let outcome = waiting.outcome.restore(ctx)?;

    let result = drained.and_then(|()| settled_value(deadline, name, &helpers, &outcome));
    guard(ctx, deadline, &helpers, result)
}

fn settled_value<'js, T: FromScript>(
    deadline: &Deadline,
    name: &str,
    helpers: &Helpers<'js>,
    outcome: &Object<'js>,
) -> Result<T> {
    let settled: bool = outcome.get("settled")?;
    if !settled {
        return Err(SandboxError::Unsettled(name.to_string()));
    }

    let fulfilled: bool = outcome.get("fulfilled")?;
    let value: Value = outcome.get("value")?;
    if fulfilled {
        reject_error_value(helpers, &value)?;
        return T::from_script(&value);
    }

    // An interrupted async body rejects with the engine's own error
    if deadline.interrupted() {
        return Err(deadline.timeout());
    }
    match unwrap_error(helpers, &value)? {
        Some(err) => Err(err),
        None => Err(SandboxError::Rejected(format_value(&value))),
    }
}

/// Run queued promise jobs. A failed job leaves its exception pending in the
/// context, where [`finish`] picks it up.
fn drain_jobs(runtime: &Runtime, deadline: &Deadline) -> Result<()> {
    while runtime.is_job_pending() {
        if deadline.expired() {
            return Err(deadline.timeout());
        }
        if runtime.execute_pending_job().is_err() {
            return Err(SandboxError::PendingException);
        }
    }
    Ok(())
}

/// Replace a pending engine exception with the host error it stands for
fn guard<'js, V>(ctx: &Ctx<'js>, deadline: &Deadline, helpers: &Helpers<'js>, result: Result<V>) -> Result<V> {
    match result {
        Err(SandboxError::PendingException) => Err(caught(ctx, deadline, helpers)),
        other => other,
    }
}

fn caught<'js>(ctx: &Ctx<'js>, deadline: &Deadline, helpers: &Helpers<'js>) -> SandboxError {
    let thrown = ctx.catch();
    if deadline.interrupted() {
        return deadline.timeout();
    }
    match unwrap_error(helpers, &thrown) {
        Ok(Some(err)) => err,
        // A throwing `name` or `message` getter falls back to the raw value
        Ok(None) | Err(_) => SandboxError::Thrown(format_value(&thrown)),
    }
}

fn reject_error_value<'js>(helpers: &Helpers<'js>, value: &Value<'js>) -> Result<()> {
    match unwrap_error(helpers, value)? {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// If `value` is an `Error` instance, lift its name, message and stack
fn unwrap_error<'js>(helpers: &Helpers<'js>, value: &Value<'js>) -> Result<Option<SandboxError>> {
    if !helpers.is_error(value)? {
        return Ok(None);
    }
    let Some(object) = value.as_object() else {
        return Ok(None);
    };

    Ok(Some(SandboxError::Exception {
        class: string_property(object, "name")?.unwrap_or_else(|| "Error".to_string()),
        message: string_property(object, "message")?.unwrap_or_default(),
        stack: string_property(object, "stack")?.unwrap_or_default(),
    }))
}

fn string_property(object: &Object<'_>, key: &str) -> Result<Option<String>> {
    let value: Value = object.get(key)?;
    match value.as_string() {
        Some(string) => Ok(Some(string.to_string()?)),
        None => Ok(None),
    }
}

fn script_args<'js>(ctx: &Ctx<'js>, args: &ScriptArgs) -> Result<Vec<Value<'js>>> {
    match args {
        ScriptArgs::Named(map) => {
            let object = serde_json::Value::Object(map.clone());
            Ok(vec![import_value(ctx, &object)?])
        }
        ScriptArgs::Positional(values) => {
            let mut imported = Vec::with_capacity(values.len());
            for value in values {
                imported.push(import_value(ctx, value)?);
            }
            Ok(imported)
        }
    }
}

fn install_globals<'js>(ctx: &Ctx<'js>, globals: &HostGlobals) -> Result<()> {
    let global_object = ctx.globals();
    for (name, function) in globals.iter() {
        let function = Arc::clone(function);
        let binding = Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, args: Rest<Value<'js>>| -> rquickjs::Result<Value<'js>> {
                let mut host_args = Vec::with_capacity(args.0.len());
                for arg in args.0.iter() {
                    let exported = crate::marshal::export_value(arg).map_err(|err| match err {
                        SandboxError::PendingException => rquickjs::Error::Exception,
                        other => Exception::throw_type(&ctx, &other.to_string()),
                    })?;
                    host_args.push(exported);
                }
                match function(&host_args) {
                    Ok(result) => import_value(&ctx, &result),
                    Err(err) => Err(Exception::throw_message(&ctx, &err.message)),
                }
            },
        )?;
        global_object.set(name, binding)?;
    }
    Ok(())
}

/// `console.*` goes to tracing, tagged with the script name
fn install_console<'js>(ctx: &Ctx<'js>, script: &str) -> Result<()> {
    let console = Object::new(ctx.clone())?;
    for level in CONSOLE_LEVELS {
        let script = script.to_string();
        let log = Function::new(ctx.clone(), move |args: Rest<Value<'js>>| -> rquickjs::Result<()> {
            let mut parts = Vec::with_capacity(args.0.len());
            for arg in args.0.iter() {
                parts.push(try_format_value(arg).map_err(|_| rquickjs::Error::Exception)?);
            }
            let line = parts.join(" ");
            match level {
                "error" => error!(target: "backoffice::script", script = %script, "{line}"),
                "warn" => warn!(target: "backoffice::script", script = %script, "{line}"),
                "debug" => debug!(target: "backoffice::script", script = %script, "{line}"),
                _ => info!(target: "backoffice::script", script = %script, "{line}"),
            }
            Ok(())
        })?;
        console.set(level, log)?;
    }
    ctx.globals().set("console", console)?;
    Ok(())
}

struct Helpers<'js> {
    is_error: Function<'js>,
    is_thenable: Function<'js>,
    settle: Function<'js>,
}

impl<'js> Helpers<'js> {
    fn load(object: Object<'js>) -> rquickjs::Result<Self> {
        Ok(Self {
            is_error: object.get("isError")?,
            is_thenable: object.get("isThenable")?,
            settle: object.get("settle")?,
        })
    }

    fn is_error(&self, value: &Value<'js>) -> rquickjs::Result<bool> {
        self.is_error.call((value.clone(),))
    }

    fn is_thenable(&self, value: &Value<'js>) -> rquickjs::Result<bool> {
        self.is_thenable.call((value.clone(),))
    }

    fn settle(&self, value: &Value<'js>) -> rquickjs::Result<Object<'js>> {
        self.settle.call((value.clone(),))
    }
}

/// Wall-clock budget shared with the runtime's interrupt handler
#[derive(Debug, Clone)]
struct Deadline {
    at: Instant,
    timeout: Duration,
    fired: Arc<AtomicBool>,
}

impl Deadline {
    fn start(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
            timeout,
            fired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Called by QuickJS periodically; `true` aborts the running script
    fn poll(&self) -> bool {
        if self.expired() {
            self.fired.store(true, Ordering::Relaxed);
            return true;
        }
        false
    }

    fn expired(&self) -> bool {
        Instant::now() >= self.at
    }

    fn interrupted(&self) -> bool {
        self.fired.load(Ordering::Relaxed)
    }

    fn timeout(&self) -> SandboxError {
        SandboxError::Timeout(self.timeout.as_millis() as u64)
    }
}
