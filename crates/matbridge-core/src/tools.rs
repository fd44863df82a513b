//! Tool surface: named operations taking and returning JSON.
//!
//! [`ToolRouter::call`] never fails: errors come back as
//! `{"success": false, "error": {"kind", "message"}}`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::controller::{ExecutionController, ExecutionRequest, ScriptSource};
use crate::error::{BridgeError, Result, ValidationError};
use crate::names::is_valid_identifier;
use crate::obs;
use crate::sections::{script_digest, section_info, SectionRange};
use crate::session::SessionPool;

pub const EXECUTE_SCRIPT: &str = "execute_script";
pub const EXECUTE_SCRIPT_SECTION: &str = "execute_script_section";
pub const GET_SCRIPT_SECTIONS: &str = "get_script_sections";
pub const GET_WORKSPACE: &str = "get_workspace";
pub const CREATE_SCRIPT: &str = "create_script";
pub const READ_SCRIPT: &str = "read_script";
pub const GET_SESSION_STATUS: &str = "get_session_status";

/// Name, description and JSON schema of one tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

pub fn tool_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: EXECUTE_SCRIPT,
            description: "Execute code or a script file against the persistent workspace. \
                          Returns output, any runtime error, exported figures and a \
                          size-bounded workspace snapshot.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "code": {"type": "string", "description": "Code to run (when is_file is false)"},
                    "path": {"type": "string", "description": "Script path (when is_file is true)"},
                    "is_file": {"type": "boolean", "default": false},
                    "workspace_vars": {"type": "object", "description": "Variables to assign before running"},
                    "capture_plots": {"type": "boolean", "default": true}
                }
            }),
        },
        ToolSpec {
            name: EXECUTE_SCRIPT_SECTION,
            description: "Execute sections section_start..=section_end (1-based) of a \
                          script file delimited by %% lines.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "section_start": {"type": "integer", "minimum": 1},
                    "section_end": {"type": "integer", "minimum": 1},
                    "maintain_workspace": {"type": "boolean", "default": true},
                    "expected_digest": {"type": "string", "description": "script_digest from get_script_sections"},
                    "capture_plots": {"type": "boolean", "default": true}
                },
                "required": ["path", "section_start", "section_end"]
            }),
        },
        ToolSpec {
            name: GET_SCRIPT_SECTIONS,
            description: "List the sections of a script file with line ranges and previews.",
            input_schema: json!({
                "type": "object",
                "properties": {"path": {"type": "string"}},
                "required": ["path"]
            }),
        },
        ToolSpec {
            name: GET_WORKSPACE,
            description: "Snapshot the current workspace without executing anything.",
            input_schema: json!({"type": "object", "properties": {}}),
        },
        ToolSpec {
            name: CREATE_SCRIPT,
            description: "Write a script file <name>.m into the scripts directory.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string", "description": "Identifier, without .m"},
                    "code": {"type": "string"}
                },
                "required": ["name", "code"]
            }),
        },
        ToolSpec {
            name: READ_SCRIPT,
            description: "Read a script previously written to the scripts directory.",
            input_schema: json!({
                "type": "object",
                "properties": {"name": {"type": "string"}},
                "required": ["name"]
            }),
        },
        ToolSpec {
            name: GET_SESSION_STATUS,
            description: "Report session availability, uptime, activity and memory use.",
            input_schema: json!({"type": "object", "properties": {}}),
        },
    ]
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct ExecuteScriptParams {
    code: Option<String>,
    path: Option<String>,
    #[serde(default)]
    is_file: bool,
    #[serde(default)]
    workspace_vars: BTreeMap<String, Value>,
    #[serde(default = "default_true")]
    capture_plots: bool,
}

#[derive(Debug, Deserialize)]
struct ExecuteSectionParams {
    path: String,
    section_start: usize,
    section_end: usize,
    #[serde(default = "default_true")]
    maintain_workspace: bool,
    expected_digest: Option<String>,
    #[serde(default = "default_true")]
    capture_plots: bool,
}

#[derive(Debug, Deserialize)]
struct PathParams {
    path: String,
}

#[derive(Debug, Deserialize)]
struct CreateScriptParams {
    name: String,
    code: String,
}

#[derive(Debug, Deserialize)]
struct NameParams {
    name: String,
}

fn params<T: DeserializeOwned>(tool: &str, args: Value) -> Result<T> {
    let args = if args.is_null() { json!({}) } else { args };
    serde_json::from_value(args).map_err(|e| {
        ValidationError::InvalidParams {
            tool: tool.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

/// Dispatches tool calls to the default session.
pub struct ToolRouter {
    pool: Arc<SessionPool>,
    controller: ExecutionController,
}

impl ToolRouter {
    pub fn new(pool: Arc<SessionPool>, controller: ExecutionController) -> Self {
        Self { pool, controller }
    }

    pub fn pool(&self) -> &SessionPool {
        &self.pool
    }

    /// Run tool `name`. The response is always a JSON object.
    pub async fn call(&self, name: &str, args: Value) -> Value {
        obs::emit_tool_called(name);
        match self.dispatch(name, args).await {
            Ok(value) => value,
            Err(err) => {
                obs::emit_tool_failed(name, err.kind(), &err);
                error_response(&err)
            }
        }
    }

    async fn dispatch(&self, name: &str, args: Value) -> Result<Value> {
        match name {
            EXECUTE_SCRIPT => {
                let p: ExecuteScriptParams = params(name, args)?;
                let source = ScriptSource::from_parts(p.code, p.path, p.is_file)?;
                let mut request = ExecutionRequest::new(source).capture_figures(p.capture_plots);
                request.workspace_vars = p.workspace_vars;
                self.execute(request).await
            }
            EXECUTE_SCRIPT_SECTION => {
                let p: ExecuteSectionParams = params(name, args)?;
                let mut request = ExecutionRequest::file(p.path)
                    .with_sections(SectionRange::new(p.section_start, p.section_end))
                    .maintain_workspace(p.maintain_workspace)
                    .capture_figures(p.capture_plots);
                request.expected_digest = p.expected_digest;
                self.execute(request).await
            }
            GET_SCRIPT_SECTIONS => {
                let p: PathParams = params(name, args)?;
                let text = read_text(&PathBuf::from(&p.path)).await?;
                Ok(json!({
                    "success": true,
                    "path": p.path,
                    "script_digest": script_digest(&text),
                    "sections": section_info(&text),
                }))
            }
            GET_WORKSPACE => {
                let session = self.pool.acquire_default().await?;
                let workspace = self.controller.workspace(&session).await?;
                Ok(json!({"success": true, "workspace": workspace}))
            }
            CREATE_SCRIPT => {
                let p: CreateScriptParams = params(name, args)?;
                let path = self.script_path(&p.name)?;
                if let Some(dir) = path.parent() {
                    tokio::fs::create_dir_all(dir).await?;
                }
                tokio::fs::write(&path, &p.code).await?;
                Ok(json!({
                    "success": true,
                    "path": path,
                    "script_digest": script_digest(&p.code),
                }))
            }
            READ_SCRIPT => {
                let p: NameParams = params(name, args)?;
                let path = self.script_path(&p.name)?;
                let code = read_text(&path).await?;
                Ok(json!({
                    "success": true,
                    "path": path,
                    "script_digest": script_digest(&code),
                    "code": code,
                }))
            }
            GET_SESSION_STATUS => {
                let memory = match self.pool.current_default() {
                    Some(session) if session.is_available() => {
                        Some(self.controller.memory(&session).await?)
                    }
                    _ => None,
                };
                Ok(json!({
                    "success": true,
                    "sessions": self.pool.statuses(),
                    "memory": memory,
                }))
            }
            other => Err(ValidationError::UnknownTool {
                tool: other.to_string(),
            }
            .into()),
        }
    }

    async fn execute(&self, request: ExecutionRequest) -> Result<Value> {
        // Reject malformed requests before a session is launched.
        let resolved = self.controller.resolve(&request).await?;
        let session = self.pool.acquire_default().await?;
        let result = self
            .controller
            .execute_resolved(&session, request, resolved)
            .await?;
        Ok(serde_json::to_value(result)?)
    }

    fn script_path(&self, name: &str) -> Result<PathBuf> {
        if !is_valid_identifier(name) {
            return Err(ValidationError::InvalidIdentifier {
                name: name.to_string(),
            }
            .into());
        }
        Ok(self.controller.config().scripts_dir.join(format!("{name}.m")))
    }
}

async fn read_text(path: &std::path::Path) -> Result<String> {
    tokio::fs::read_to_string(path).await.map_err(|e| {
        let path = path.display().to_string();
        let err = if e.kind() == std::io::ErrorKind::NotFound {
            ValidationError::ScriptNotFound { path }
        } else {
            ValidationError::Unreadable {
                path,
                reason: e.to_string(),
            }
        };
        BridgeError::from(err)
    })
}

pub fn error_response(err: &BridgeError) -> Value {
    json!({
        "success": false,
        "error": {"kind": err.kind(), "message": err.to_string()},
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::engine::Engine;
    use crate::error::EngineError;
    use crate::fakes::{FakeEngine, MemoryFigureSink};

    fn router(scripts_dir: PathBuf) -> ToolRouter {
        let config = Arc::new(BridgeConfig {
            scripts_dir,
            ..BridgeConfig::default()
        });
        let factory = || -> std::result::Result<Box<dyn Engine>, EngineError> {
            Ok(Box::new(FakeEngine::new()))
        };
        let pool = Arc::new(SessionPool::new(Arc::new(factory), &config));
        let controller = ExecutionController::new(config, Arc::new(MemoryFigureSink::new()));
        ToolRouter::new(pool, controller)
    }

    #[test]
    fn specs_cover_every_tool() {
        let names: Vec<&str> = tool_specs().iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            vec![
                EXECUTE_SCRIPT,
                EXECUTE_SCRIPT_SECTION,
                GET_SCRIPT_SECTIONS,
                GET_WORKSPACE,
                CREATE_SCRIPT,
                READ_SCRIPT,
                GET_SESSION_STATUS
            ]
        );
        let value = serde_json::to_value(&tool_specs()[0]).unwrap();
        assert!(value.get("inputSchema").is_some());
    }

    #[tokio::test]
    async fn execute_inline_code() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(dir.path().to_path_buf());
        let out = router
            .call(EXECUTE_SCRIPT, json!({"code": "x = 4;"}))
            .await;
        assert_eq!(out["success"], json!(true));
        assert_eq!(out["workspace"]["x"]["data"], json!(4.0));
    }

    #[tokio::test]
    async fn idle_reaping_keeps_the_default_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(BridgeConfig {
            scripts_dir: dir.path().to_path_buf(),
            idle_timeout_secs: 0,
            ..BridgeConfig::default()
        });
        let factory = || -> std::result::Result<Box<dyn Engine>, EngineError> {
            Ok(Box::new(FakeEngine::new()))
        };
        let pool = Arc::new(SessionPool::new(Arc::new(factory), &config));
        let controller = ExecutionController::new(config, Arc::new(MemoryFigureSink::new()));
        let router = ToolRouter::new(pool, controller);

        router.call(EXECUTE_SCRIPT, json!({"code": "x = 1;"})).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert!(router.pool().reap_idle().is_empty());

        let ws = router.call(GET_WORKSPACE, json!({})).await;
        assert_eq!(ws["workspace"]["x"]["data"], json!(1.0));
    }

    #[tokio::test]
    async fn conflicting_sources_fail_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(dir.path().to_path_buf());
        let out = router
            .call(
                EXECUTE_SCRIPT,
                json!({"code": "x = 1", "path": "a.m", "is_file": true}),
            )
            .await;
        assert_eq!(out["success"], json!(false));
        assert_eq!(out["error"]["kind"], json!("validation"));
        assert!(router.pool().is_empty());
    }

    #[tokio::test]
    async fn unknown_tool_and_bad_params() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(dir.path().to_path_buf());
        let out = router.call("rm_rf", json!({})).await;
        assert_eq!(out["error"]["kind"], json!("validation"));

        let out = router
            .call(EXECUTE_SCRIPT_SECTION, json!({"path": "a.m", "section_start": -1}))
            .await;
        assert_eq!(out["success"], json!(false));
        assert!(out["error"]["message"]
            .as_str()
            .unwrap()
            .contains(EXECUTE_SCRIPT_SECTION));
    }

    #[tokio::test]
    async fn create_list_and_run_sections() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(dir.path().to_path_buf());
        let created = router
            .call(
                CREATE_SCRIPT,
                json!({"name": "demo", "code": "%% One\na = 1;\n%% Two\nb = 2;\n"}),
            )
            .await;
        assert_eq!(created["success"], json!(true));
        let path = created["path"].as_str().unwrap().to_string();

        let listed = router.call(GET_SCRIPT_SECTIONS, json!({"path": path})).await;
        assert_eq!(listed["sections"].as_array().unwrap().len(), 2);
        assert_eq!(listed["sections"][1]["title"], json!("Two"));
        let digest = listed["script_digest"].clone();

        let ran = router
            .call(
                EXECUTE_SCRIPT_SECTION,
                json!({"path": path, "section_start": 1, "section_end": 1, "expected_digest": digest}),
            )
            .await;
        assert_eq!(ran["success"], json!(true));
        assert!(ran["workspace"].get("a").is_some());
        assert!(ran["workspace"].get("b").is_none());

        let read = router.call(READ_SCRIPT, json!({"name": "demo"})).await;
        assert!(read["code"].as_str().unwrap().starts_with("%% One"));
    }

    #[tokio::test]
    async fn create_script_rejects_bad_names() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(dir.path().to_path_buf());
        let out = router
            .call(CREATE_SCRIPT, json!({"name": "../evil", "code": ""}))
            .await;
        assert_eq!(out["error"]["kind"], json!("validation"));
    }

    #[tokio::test]
    async fn status_and_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(dir.path().to_path_buf());
        let status = router.call(GET_SESSION_STATUS, Value::Null).await;
        assert_eq!(status["sessions"], json!([]));

        router.call(EXECUTE_SCRIPT, json!({"code": "y = 1"})).await;
        let ws = router.call(GET_WORKSPACE, json!({})).await;
        assert_eq!(ws["workspace"]["y"]["_type"], json!("full"));

        let status = router.call(GET_SESSION_STATUS, json!({})).await;
        assert_eq!(status["sessions"][0]["execution_count"], json!(1));
        assert_eq!(status["memory"]["variable_count"], json!(1));
    }
}
