//! Line-delimited JSON-RPC adapter over stdio.
//!
//! Each request is one JSON object per line: `{"id": .., "method": "..",
//! "params": {..}}`. Responses mirror the id with either a `result` or an
//! `error` object. The adapter is a thin synchronous shim over
//! [`MemoryMesh`]; log output goes to stderr so stdout stays clean for the
//! protocol.

use std::io::{BufRead, Write};

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error};

use crate::categories::Category;
use crate::error::MeshError;
use crate::memory::{parse_timestamp, Metadata, Scope};
use crate::mesh::{MemoryMesh, RecallOptions, RememberOptions, UpdateRequest};

#[derive(Deserialize)]
struct Request {
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RememberParams {
    text: String,
    metadata: Option<Metadata>,
    importance: Option<f64>,
    decay_rate: Option<f64>,
    scope: Option<String>,
    auto_importance: bool,
    session_id: Option<String>,
    category: Option<String>,
    auto_categorize: bool,
    pin: bool,
    redact: bool,
    on_conflict: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RecallParams {
    query: String,
    k: Option<usize>,
    min_relevance: Option<f64>,
    scope: Option<String>,
    session_id: Option<String>,
    category: Option<String>,
    min_importance: Option<f64>,
    time_range: Option<(String, String)>,
    metadata_filter: Option<Metadata>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct IdParams {
    id: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ScopeParams {
    scope: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ListParams {
    limit: Option<usize>,
    offset: Option<usize>,
    scope: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct UpdateParams {
    id: String,
    text: Option<String>,
    importance: Option<f64>,
    decay_rate: Option<f64>,
    metadata: Option<Metadata>,
    scope: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct SessionParams {
    session_id: String,
    scope: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct CompactParams {
    scope: Option<String>,
    threshold: Option<f64>,
    dry_run: bool,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct SessionStartParams {
    project_context: Option<String>,
}

fn parse_scope(raw: &Option<String>) -> Result<Option<Scope>, MeshError> {
    raw.as_deref().map(str::parse).transpose()
}

fn parse_category(raw: &Option<String>) -> Result<Option<Category>, MeshError> {
    raw.as_deref().map(str::parse).transpose()
}

/// Dispatch one request to the engine. Public so tests (and alternative
/// transports) can drive the adapter without a process boundary.
pub fn dispatch(mesh: &MemoryMesh, method: &str, params: Value) -> Result<Value, MeshError> {
    // Omitted params arrive as null; treat that as an empty object.
    let params = if params.is_null() { json!({}) } else { params };
    match method {
        "ping" => Ok(json!("pong")),

        "remember" => {
            let p: RememberParams = serde_json::from_value(params)?;
            let id = mesh.remember(
                &p.text,
                RememberOptions {
                    metadata: p.metadata,
                    importance: p.importance,
                    decay_rate: p.decay_rate,
                    scope: parse_scope(&p.scope)?,
                    auto_importance: p.auto_importance,
                    session_id: p.session_id,
                    category: parse_category(&p.category)?,
                    auto_categorize: p.auto_categorize,
                    pin: p.pin,
                    redact: p.redact,
                    on_conflict: p
                        .on_conflict
                        .as_deref()
                        .map(str::parse)
                        .transpose()?
                        .unwrap_or_default(),
                },
            )?;
            Ok(json!({ "id": id }))
        }

        "recall" => {
            let p: RecallParams = serde_json::from_value(params)?;
            let time_range = match &p.time_range {
                Some((start, end)) => Some((parse_timestamp(start)?, parse_timestamp(end)?)),
                None => None,
            };
            let results = mesh.recall(
                &p.query,
                RecallOptions {
                    k: p.k.unwrap_or(5),
                    min_relevance: p.min_relevance.unwrap_or(0.0),
                    scope: parse_scope(&p.scope)?,
                    session_id: p.session_id,
                    category: parse_category(&p.category)?,
                    min_importance: p.min_importance,
                    time_range,
                    metadata_filter: p.metadata_filter,
                },
            )?;
            Ok(serde_json::to_value(results)?)
        }

        "get" => {
            let p: IdParams = serde_json::from_value(params)?;
            match mesh.get(&p.id)? {
                Some(memory) => Ok(serde_json::to_value(memory)?),
                None => Err(MeshError::NotFound(p.id)),
            }
        }

        "forget" => {
            let p: IdParams = serde_json::from_value(params)?;
            Ok(json!({ "deleted": mesh.forget(&p.id)? }))
        }

        "forget_all" => {
            let p: ScopeParams = serde_json::from_value(params)?;
            let count = mesh.forget_all(parse_scope(&p.scope)?)?;
            Ok(json!({ "deleted": count }))
        }

        "update" => {
            let p: UpdateParams = serde_json::from_value(params)?;
            let updated = mesh.update(
                &p.id,
                UpdateRequest {
                    text: p.text,
                    importance: p.importance,
                    decay_rate: p.decay_rate,
                    metadata: p.metadata,
                    scope: parse_scope(&p.scope)?,
                },
            )?;
            match updated {
                Some(memory) => Ok(serde_json::to_value(memory)?),
                None => Err(MeshError::NotFound(p.id)),
            }
        }

        "list" => {
            let p: ListParams = serde_json::from_value(params)?;
            let memories = mesh.list(
                p.limit.unwrap_or(10),
                p.offset.unwrap_or(0),
                parse_scope(&p.scope)?,
            )?;
            Ok(serde_json::to_value(memories)?)
        }

        "count" => {
            let p: ScopeParams = serde_json::from_value(params)?;
            Ok(json!({ "count": mesh.count(parse_scope(&p.scope)?)? }))
        }

        "get_time_range" => {
            let p: ScopeParams = serde_json::from_value(params)?;
            let range = mesh.time_range(parse_scope(&p.scope)?)?;
            Ok(json!({
                "oldest": range.map(|(oldest, _)| oldest),
                "newest": range.map(|(_, newest)| newest),
            }))
        }

        "get_session" => {
            let p: SessionParams = serde_json::from_value(params)?;
            let memories = mesh.get_session(&p.session_id, parse_scope(&p.scope)?)?;
            Ok(serde_json::to_value(memories)?)
        }

        "list_sessions" => {
            let p: ListParams = serde_json::from_value(params)?;
            let sessions = mesh.list_sessions(parse_scope(&p.scope)?, p.limit.unwrap_or(50))?;
            Ok(serde_json::to_value(sessions)?)
        }

        "session_start" => {
            let p: SessionStartParams = serde_json::from_value(params)?;
            Ok(serde_json::to_value(
                mesh.session_start(p.project_context.as_deref())?,
            )?)
        }

        "compact" => {
            let p: CompactParams = serde_json::from_value(params)?;
            let scope = parse_scope(&p.scope)?.unwrap_or(Scope::Project);
            let result = mesh.compact(scope, p.threshold.unwrap_or(0.85), p.dry_run)?;
            Ok(serde_json::to_value(result)?)
        }

        other => Err(MeshError::invalid(format!("unknown method {other:?}"))),
    }
}

fn error_code(err: &MeshError) -> i64 {
    match err {
        MeshError::InvalidArgument(_) => -32602,
        MeshError::NotFound(_) => -32001,
        MeshError::NoProjectStore => -32002,
        MeshError::CapacityExceeded(_) => -32003,
        MeshError::SchemaMismatch { .. } => -32004,
        MeshError::Encryption(_) => -32005,
        MeshError::Cancelled => -32006,
        _ => -32000,
    }
}

/// Serve requests from `input` until EOF, writing responses to `output`.
pub fn serve<R: BufRead, W: Write>(mesh: &MemoryMesh, input: R, mut output: W) -> std::io::Result<()> {
    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => {
                debug!(method = %request.method, "dispatching request");
                match dispatch(mesh, &request.method, request.params) {
                    Ok(result) => json!({ "id": request.id, "result": result }),
                    Err(err) => {
                        error!(method = %request.method, error = %err, "request failed");
                        json!({
                            "id": request.id,
                            "error": { "code": error_code(&err), "message": err.to_string() },
                        })
                    }
                }
            }
            Err(err) => json!({
                "id": null,
                "error": { "code": -32700, "message": format!("parse error: {err}") },
            }),
        };

        let encoded = serde_json::to_string(&response).map_err(std::io::Error::other)?;
        output.write_all(encoded.as_bytes())?;
        output.write_all(b"\n")?;
        output.flush()?;
    }
    Ok(())
}

/// Serve over the process's stdin/stdout until EOF.
pub fn serve_stdio(mesh: &MemoryMesh) -> std::io::Result<()> {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    serve(mesh, stdin.lock(), stdout.lock())
}
