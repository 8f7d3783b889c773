use std::collections::HashMap;

use anyhow::{anyhow, Context as AnyhowContext, Result};
use async_trait::async_trait;
use rquickjs::{Context, Ctx, Error as JsError, Function, Runtime, Value as JsValue};
use serde_json::Value;

use super::RenderBackend;
use crate::protocol::{PatchEmitter, RenderResult};
use crate::session::DocumentSession;
use crate::worker::executor::RenderFailure;
use crate::worker::installer::PackageSpec;

/// Render backend hosting a JavaScript program on an embedded QuickJS
/// engine.
///
/// The program contract: the script is evaluated once and must return the
/// JSON string of `[docs_json, render_items, root_ids]`. It may call the
/// global `sendPatch(patchJson)` to push patches host-ward at any point
/// after bootstrap, and may define `globalThis.__locationParams` to declare
/// the location schema. "Packages" are module sources registered by name
/// and evaluated into the global scope on install.
pub struct ScriptBackend {
    program: String,
    modules: HashMap<String, String>,
    engine: Option<ScriptEngine>,
}

impl ScriptBackend {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            modules: HashMap::new(),
            engine: None,
        }
    }

    /// Register the source evaluated when a package spec with this display
    /// name is installed.
    pub fn with_module(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.modules.insert(name.into(), source.into());
        self
    }

    fn engine(&self) -> Result<&ScriptEngine> {
        self.engine
            .as_ref()
            .ok_or_else(|| anyhow!("runtime not initialized"))
    }
}

#[async_trait(?Send)]
impl RenderBackend for ScriptBackend {
    async fn initialize(&mut self) -> Result<()> {
        if self.engine.is_none() {
            self.engine = Some(ScriptEngine::new()?);
        }
        Ok(())
    }

    fn bind_patch_callback(&mut self, emitter: PatchEmitter) -> Result<()> {
        let engine = self.engine()?;
        engine
            .with_context(|ctx| {
                let send_patch = Function::new(
                    ctx.clone(),
                    move |patch_json: String| -> rquickjs::Result<()> {
                        match serde_json::from_str(&patch_json) {
                            Ok(patch) => emitter.emit(patch, Vec::new()),
                            Err(err) => tracing::error!(
                                target = "quickjs",
                                error = %err,
                                "sendPatch called with invalid JSON"
                            ),
                        }
                        Ok(())
                    },
                )?
                .with_name("sendPatch")?;
                ctx.globals().set("sendPatch", send_patch)
            })
            .context("failed to register sendPatch")
    }

    async fn prepare_installer(&mut self) -> Result<()> {
        self.engine()?
            .eval(INSTALLER_BOOTSTRAP, "installer-bootstrap.js")
            .context("failed to bootstrap the module installer")
    }

    async fn install(&mut self, spec: &PackageSpec) -> Result<()> {
        let engine = self.engine()?;
        let name = spec.display_name();
        let source = self
            .modules
            .get(&name)
            .ok_or_else(|| anyhow!("no module source registered for {name}"))?;
        engine
            .eval(source, &format!("module-{name}.js"))
            .with_context(|| format!("failed to evaluate module {name}"))?;
        let register = format!(
            "if (typeof __modules === 'object') {{ __modules.loaded.push({}); }}",
            serde_json::to_string(&name)?
        );
        engine.eval(&register, "register-module.js")?;
        Ok(())
    }

    async fn execute_program(
        &mut self,
        session: &mut DocumentSession,
    ) -> Result<RenderResult, RenderFailure> {
        let engine = match self.engine() {
            Ok(engine) => engine,
            Err(err) => return Err(RenderFailure::new(format!("{err}\n"))),
        };

        let triple = engine
            .eval_with::<String>(&self.program, "render-program.js")
            .map_err(|err| RenderFailure::new(err.to_string()))?;
        let triple: Value = serde_json::from_str(&triple).map_err(|err| {
            RenderFailure::new(format!("render program returned invalid JSON: {err}\n"))
        })?;

        let parts = match triple {
            Value::Array(parts) if parts.len() == 3 => parts,
            other => {
                return Err(RenderFailure::new(format!(
                    "render program must return [docs_json, render_items, root_ids], got {other}\n"
                )))
            }
        };
        let mut parts = parts.into_iter();
        let result = RenderResult {
            docs_json: parts.next().unwrap_or(Value::Null),
            render_items: parts.next().unwrap_or(Value::Null),
            root_ids: parts.next().unwrap_or(Value::Null),
        };

        match engine.eval_with::<Option<String>>(LOCATION_PARAMS_PROBE, "location-params.js") {
            Ok(Some(raw)) => match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Object(params)) => session.init_location(params),
                _ => {
                    tracing::warn!(
                        target = "quickjs",
                        "__locationParams is not a JSON object, ignoring"
                    );
                }
            },
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(target = "quickjs", error = %err, "failed to probe location params");
            }
        }

        Ok(result)
    }
}

/// Thin wrapper over the QuickJS runtime and context with a console that
/// forwards to `tracing`.
struct ScriptEngine {
    runtime: Runtime,
    context: Context,
}

impl ScriptEngine {
    fn new() -> Result<Self> {
        let runtime = Runtime::new().context("failed to create QuickJS runtime")?;
        let context = Context::full(&runtime).context("failed to create QuickJS context")?;
        let engine = Self { runtime, context };
        engine.init_globals()?;
        Ok(engine)
    }

    fn eval(&self, source: &str, filename: &str) -> Result<()> {
        self.eval_with::<()>(source, filename)
    }

    /// Evaluate a script and deserialize the result into `V`. Exceptions
    /// come back as a traceback-shaped string: stack frames first, then the
    /// `Name: message` summary line.
    fn eval_with<V>(&self, source: &str, filename: &str) -> Result<V>
    where
        V: for<'js> rquickjs::FromJs<'js>,
    {
        let script = Self::with_source_url(source, filename);
        let eval_result = self.context.with(|ctx| ctx.eval::<V, _>(script.clone()));

        let value = match eval_result {
            Ok(value) => Ok(value),
            Err(JsError::Exception) => {
                let trace = self
                    .context
                    .with(|ctx| -> Result<Option<String>, JsError> {
                        Ok(capture_exception_trace(&ctx))
                    })
                    .unwrap_or(None)
                    .unwrap_or_else(|| "QuickJS exception\n".to_string());
                Err(anyhow::anyhow!(trace))
            }
            Err(err) => Err(anyhow::Error::from(err)),
        }?;

        // Drain promise continuations so programs that schedule microtasks
        // observe them before the next evaluation.
        self.execute_pending_jobs()?;

        Ok(value)
    }

    fn execute_pending_jobs(&self) -> Result<()> {
        // Bounded so a misbehaving program cannot wedge the worker.
        const MAX_JOBS: usize = 1000;
        let mut job_count = 0;

        while self.runtime.is_job_pending() {
            match self.runtime.execute_pending_job() {
                Ok(true) => {
                    job_count += 1;
                    if job_count >= MAX_JOBS {
                        tracing::warn!(
                            target = "quickjs",
                            "stopped processing jobs after {} iterations",
                            MAX_JOBS
                        );
                        break;
                    }
                }
                Ok(false) => break,
                Err(job_exception) => {
                    tracing::error!(
                        target = "quickjs",
                        "job execution error: {:?}",
                        job_exception
                    );
                    break;
                }
            }
        }

        Ok(())
    }

    fn with_context<T, F>(&self, f: F) -> Result<T>
    where
        F: for<'js> FnOnce(Ctx<'js>) -> rquickjs::Result<T>,
    {
        self.context.with(f).map_err(anyhow::Error::from)
    }

    fn init_globals(&self) -> Result<()> {
        self.context
            .with(|ctx| {
                let global = ctx.globals();
                let log_fn = Function::new(ctx.clone(), log_from_js)?.with_name("__host_log")?;
                global.set("__host_log", log_fn)?;

                // Worker-style programs expect `self` to exist.
                ctx.eval::<(), _>(
                    "if (typeof self === 'undefined') { var self = globalThis; }".as_bytes(),
                )?;

                ctx.eval::<(), _>(CONSOLE_BOOTSTRAP.as_bytes())
            })
            .map_err(anyhow::Error::from)
    }

    fn with_source_url(source: &str, filename: &str) -> Vec<u8> {
        let mut script = String::with_capacity(source.len() + filename.len() + 32);
        script.push_str(source);
        if !source.ends_with('\n') {
            script.push('\n');
        }
        script.push_str("//# sourceURL=");
        script.push_str(filename);
        script.push('\n');
        script.into_bytes()
    }
}

fn log_from_js(message: String) -> rquickjs::Result<()> {
    tracing::info!(target = "quickjs", message = %message);
    Ok(())
}

fn capture_exception_trace(ctx: &Ctx<'_>) -> Option<String> {
    let exception: JsValue = ctx.catch();

    if let Some(obj) = exception.as_object() {
        if let Ok(message) = obj.get::<_, String>("message") {
            let name = obj
                .get::<_, String>("name")
                .unwrap_or_else(|_| "Error".to_string());
            if let Ok(stack) = obj.get::<_, String>("stack") {
                return Some(format!("{}\n{name}: {message}\n", stack.trim_end()));
            }
            return Some(format!("{name}: {message}\n"));
        }
    }

    Some(format!("{exception:?}\n"))
}

const INSTALLER_BOOTSTRAP: &str = r#"
(() => {
    const global = globalThis;
    if (typeof global.__modules !== 'object' || global.__modules === null) {
        global.__modules = { loaded: [] };
    }
})();
"#;

const LOCATION_PARAMS_PROBE: &str =
    "globalThis.__locationParams ? JSON.stringify(globalThis.__locationParams) : null";

const CONSOLE_BOOTSTRAP: &str = r#"
(() => {
    const global = globalThis;
    const stringify = (value) => {
        try {
            if (typeof value === 'string') {
                return value;
            }
            if (value === undefined) {
                return 'undefined';
            }
            if (value === null) {
                return 'null';
            }
            return String(value);
        } catch (err) {
            return '[unprintable]';
        }
    };

    const logImpl = (...args) => {
        try {
            const joined = args.map(stringify).join(' ');
            global.__host_log(joined);
        } catch (err) {
            // Swallow logging errors; console must never throw.
        }
    };

    if (typeof global.console !== 'object' || global.console === null) {
        global.console = {};
    }

    global.console.log = logImpl;
    global.console.error = logImpl;
    global.console.warn = logImpl;
    global.console.info = logImpl;
    global.console.debug = logImpl;
})();
"#;
