//! Sample tool implementations shared by engine tests.

use aflow_core::{Param, StaticLoader, ToolFailure, ToolSpec};
use serde_json::{Value, json};

/// `double(n) -> {"n": n * 2}`.
pub fn double() -> ToolSpec {
    ToolSpec::sync_handler("double", |args| {
        let n: i64 = args.require("n")?;
        Ok(json!({ "n": n * 2 }))
    })
    .param(Param::required("n"))
    .doc("Double a number.")
}

/// `stringify(n) -> {"s": str(n)}`.
pub fn stringify() -> ToolSpec {
    ToolSpec::sync_handler("stringify", |args| {
        let n: Value = args.require("n")?;
        Ok(json!({ "s": n.to_string() }))
    })
    .param(Param::required("n"))
    .doc("Render a value as text.")
}

/// `square(x) -> x * x`, a scalar result bound to the declared output `area`.
pub fn square() -> ToolSpec {
    ToolSpec::sync_handler("square", |args| {
        let x: f64 = args.require("x")?;
        Ok(json!(x * x))
    })
    .param(Param::required("x"))
    .output("area")
}

/// `greet(name, title=None) -> "Hello, ..."`, a scalar result with no
/// declared output and a documented `Returns:` name.
pub fn greet() -> ToolSpec {
    ToolSpec::sync_handler("greet", |args| {
        let name: String = args.require("name")?;
        let title: Option<String> = args.optional("title")?;
        Ok(match title {
            Some(title) => json!(format!("Hello, {title} {name}")),
            None => json!(format!("Hello, {name}")),
        })
    })
    .param(Param::required("name"))
    .param(Param::optional("title"))
    .doc("Greet someone.\n\nReturns:\n    greeting")
}

/// A tool that always fails.
pub fn explode() -> ToolSpec {
    ToolSpec::sync_handler("explode", |_| Err(ToolFailure::failed("boom")))
}

/// A tool that counts its invocations into the context key `calls`.
pub fn count() -> ToolSpec {
    ToolSpec::sync_handler("count", |args| {
        let calls: i64 = args.optional("calls")?.unwrap_or(0);
        Ok(json!({ "calls": calls + 1 }))
    })
    .param(Param::optional("calls"))
}

/// Loader with every sample tool: `math` holds `double`, `stringify`,
/// `square`; `text` holds `greet`; `misc` holds `explode` and `count`.
pub fn sample_loader() -> StaticLoader {
    StaticLoader::new()
        .with_tool("math", double())
        .with_tool("math", stringify())
        .with_tool("math", square())
        .with_tool("text", greet())
        .with_tool("misc", explode())
        .with_tool("misc", count())
}
