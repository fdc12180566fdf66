//! LSP message types and the JSON payloads this client sends and consumes.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sonar_types::{Diagnostic, DiagnosticSeverity, Language, Range, ServerIdentity};

#[derive(Debug, thiserror::Error)]
#[error("cannot convert path to file URI: {}", path.display())]
pub struct PathToUriError {
    path: PathBuf,
}

/// JSON-RPC request id. Servers may use either form for their own requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// A decoded JSON-RPC message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request {
        id: RequestId,
        method: String,
        params: Option<Value>,
    },
    Response {
        id: RequestId,
        result: Result<Value, ResponseError>,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
}

impl Message {
    /// Classify a raw frame. Returns `None` for frames that are none of the three.
    #[must_use]
    pub fn from_value(frame: Value) -> Option<Self> {
        let Value::Object(mut map) = frame else {
            return None;
        };
        let id = map
            .remove("id")
            .filter(|id| !id.is_null())
            .and_then(|id| serde_json::from_value::<RequestId>(id).ok());
        let method = match map.remove("method") {
            Some(Value::String(method)) => Some(method),
            _ => None,
        };
        let params = map.remove("params");

        match (id, method) {
            (Some(id), Some(method)) => Some(Self::Request { id, method, params }),
            (None, Some(method)) => Some(Self::Notification { method, params }),
            (Some(id), None) => {
                if let Some(error) = map.remove("error") {
                    let error = serde_json::from_value(error).unwrap_or_else(|e| ResponseError {
                        code: 0,
                        message: format!("malformed error object: {e}"),
                        data: None,
                    });
                    Some(Self::Response {
                        id,
                        result: Err(error),
                    })
                } else {
                    let result = map.remove("result")?;
                    Some(Self::Response {
                        id,
                        result: Ok(result),
                    })
                }
            }
            (None, None) => None,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Request<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl<'a> Request<'a> {
    pub fn new(id: u64, method: &'a str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Notification<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl<'a> Notification<'a> {
    pub fn new(method: &'a str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

/// Successful reply to a server-initiated request.
pub(crate) fn response(id: &RequestId, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result,
    })
}

pub(crate) fn initialize_params(root_uri: &str, root_path: &Path) -> Value {
    let name = root_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("workspace");
    json!({
        "processId": std::process::id(),
        "clientInfo": { "name": "sonar" },
        "rootUri": root_uri,
        "rootPath": root_path.display().to_string(),
        "capabilities": {
            "textDocument": {
                "synchronization": {
                    "dynamicRegistration": false,
                    "willSave": false,
                    "willSaveWaitUntil": false,
                    "didSave": false
                },
                "publishDiagnostics": {
                    "relatedInformation": false,
                    "versionSupport": false,
                    "codeDescriptionSupport": false
                }
            },
            "workspace": {
                "workspaceFolders": true,
                "configuration": true
            }
        },
        "workspaceFolders": [{
            "uri": root_uri,
            "name": name
        }]
    })
}

pub(crate) fn did_open_params(uri: &str, language_id: &str, version: i32, text: &str) -> Value {
    json!({
        "textDocument": {
            "uri": uri,
            "languageId": language_id,
            "version": version,
            "text": text
        }
    })
}

pub(crate) fn did_close_params(uri: &str) -> Value {
    json!({
        "textDocument": { "uri": uri }
    })
}

pub(crate) fn document_diagnostic_params(uri: &str) -> Value {
    json!({
        "textDocument": { "uri": uri }
    })
}

/// Items of a `textDocument/diagnostic` result. `unchanged` reports and
/// unknown shapes carry nothing.
pub(crate) fn document_diagnostic_items(result: Value) -> Vec<Diagnostic> {
    #[derive(Deserialize)]
    struct FullReport {
        kind: String,
        #[serde(default)]
        items: Vec<LspDiagnostic>,
    }

    match serde_json::from_value::<FullReport>(result) {
        Ok(report) if report.kind == "full" => report
            .items
            .into_iter()
            .map(LspDiagnostic::into_diagnostic)
            .collect(),
        Ok(_) => Vec::new(),
        Err(e) => {
            tracing::debug!("Unparseable document diagnostic report: {e}");
            Vec::new()
        }
    }
}

/// LSP `languageId` for a document.
pub(crate) fn language_id(path: &Path, language: Language) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match (language, ext.as_deref()) {
        (Language::TypeScript, Some("tsx")) => "typescriptreact",
        (Language::JavaScript, Some("jsx")) => "javascriptreact",
        (language, _) => language.label(),
    }
}

/// Fixed answer to `workspace/configuration`: one entry per requested item.
///
/// Analyzers that pull settings during the handshake block until they get
/// a reply, so every item gets a usable default rather than `null`.
pub(crate) fn configuration_response(identity: ServerIdentity, params: Option<&Value>) -> Value {
    let items = params
        .and_then(|p| p.get("items"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let answers = items
        .iter()
        .map(|item| {
            let section = item.get("section").and_then(Value::as_str);
            configuration_defaults(identity, section)
        })
        .collect();
    Value::Array(answers)
}

fn configuration_defaults(identity: ServerIdentity, section: Option<&str>) -> Value {
    match (identity, section) {
        (ServerIdentity::Eslint, _) => json!({
            "validate": "on",
            "run": "onType",
            "packageManager": "npm",
            "useESLintClass": false,
            "experimental": { "useFlatConfig": false },
            "codeAction": {
                "disableRuleComment": { "enable": false, "location": "separateLine" },
                "showDocumentation": { "enable": false }
            },
            "codeActionOnSave": { "enable": false, "mode": "all" },
            "format": false,
            "quiet": false,
            "onIgnoredFiles": "off",
            "options": {},
            "rulesCustomizations": [],
            "problems": { "shortenToSingleLine": false },
            "nodePath": null,
            "workingDirectory": { "mode": "auto" },
            "workspaceFolder": null
        }),
        (ServerIdentity::Pyright, Some("python.analysis")) => json!({
            "diagnosticMode": "openFilesOnly",
            "typeCheckingMode": "standard",
            "autoSearchPaths": true,
            "useLibraryCodeForTypes": true
        }),
        (ServerIdentity::Pyright, Some("python")) => json!({
            "analysis": {
                "diagnosticMode": "openFilesOnly",
                "typeCheckingMode": "standard"
            }
        }),
        _ => json!({}),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct PublishDiagnosticsParams {
    pub uri: String,
    pub diagnostics: Vec<LspDiagnostic>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum LspCode {
    Number(i64),
    String(String),
}

#[derive(Debug, Deserialize)]
pub(crate) struct LspDiagnostic {
    pub range: Range,
    pub severity: Option<u64>,
    #[serde(default)]
    pub code: Option<LspCode>,
    #[serde(default)]
    pub source: Option<String>,
    pub message: String,
}

impl LspDiagnostic {
    pub fn into_diagnostic(self) -> Diagnostic {
        let severity = self
            .severity
            .and_then(DiagnosticSeverity::from_lsp)
            .unwrap_or(DiagnosticSeverity::Warning);
        let mut diag = Diagnostic::new(self.range, severity, self.message);
        match self.code {
            Some(LspCode::Number(n)) => diag = diag.with_code(n.to_string()),
            Some(LspCode::String(s)) => diag = diag.with_code(s),
            None => {}
        }
        if let Some(source) = self.source {
            diag = diag.with_source(source);
        }
        diag
    }
}

/// Capability flags read from the `initialize` result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerCapabilities {
    /// Server answers `textDocument/diagnostic` requests.
    pub pull_diagnostics: bool,
}

impl ServerCapabilities {
    pub(crate) fn from_initialize_result(result: &Value) -> Self {
        Self {
            pull_diagnostics: !result["capabilities"]["diagnosticProvider"].is_null(),
        }
    }
}

pub(crate) fn path_to_file_uri(path: &Path) -> Result<url::Url, PathToUriError> {
    url::Url::from_file_path(path).map_err(|()| PathToUriError {
        path: path.to_path_buf(),
    })
}

pub(crate) fn file_uri_to_path(uri: &str) -> Option<PathBuf> {
    url::Url::parse(uri)
        .ok()
        .and_then(|u| u.to_file_path().ok())
        .map(|p| normalize_path(&p))
}

/// Lexically resolve `.` and `..` components.
pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    let mut out = Vec::new();
    for c in path.components() {
        match c {
            Component::ParentDir => {
                if matches!(out.last(), Some(Component::Normal(_))) {
                    out.pop();
                }
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out.iter().collect()
}

#[cfg(test)]
mod tests {
    use sonar_types::Position;

    use super::*;

    #[test]
    fn test_classify_response() {
        let msg = Message::from_value(json!({"jsonrpc": "2.0", "id": 4, "result": {"ok": true}}));
        assert_eq!(
            msg,
            Some(Message::Response {
                id: RequestId::Number(4),
                result: Ok(json!({"ok": true})),
            })
        );
    }

    #[test]
    fn test_classify_null_result_is_response() {
        let msg = Message::from_value(json!({"jsonrpc": "2.0", "id": 4, "result": null}));
        assert!(matches!(
            msg,
            Some(Message::Response { result: Ok(Value::Null), .. })
        ));
    }

    #[test]
    fn test_classify_error_response() {
        let msg = Message::from_value(json!({
            "jsonrpc": "2.0",
            "id": 2,
            "error": { "code": -32600, "message": "invalid request" }
        }));
        let Some(Message::Response { result: Err(err), .. }) = msg else {
            panic!("expected error response, got {msg:?}");
        };
        assert_eq!(err.code, -32600);
        assert_eq!(err.message, "invalid request");
    }

    #[test]
    fn test_classify_server_request_with_string_id() {
        let msg = Message::from_value(json!({
            "jsonrpc": "2.0",
            "id": "abc",
            "method": "workspace/configuration",
            "params": { "items": [] }
        }));
        let Some(Message::Request { id, method, params }) = msg else {
            panic!("expected request");
        };
        assert_eq!(id, RequestId::String("abc".into()));
        assert_eq!(method, "workspace/configuration");
        assert!(params.is_some());
    }

    #[test]
    fn test_classify_notification() {
        let msg = Message::from_value(json!({"jsonrpc": "2.0", "method": "window/logMessage"}));
        assert!(matches!(msg, Some(Message::Notification { params: None, .. })));
    }

    #[test]
    fn test_classify_garbage() {
        assert_eq!(Message::from_value(json!({"jsonrpc": "2.0"})), None);
        assert_eq!(Message::from_value(json!({"jsonrpc": "2.0", "id": 1})), None);
        assert_eq!(Message::from_value(json!([1, 2, 3])), None);
    }

    #[test]
    fn test_initialize_params_has_required_fields() {
        let params = initialize_params("file:///work/app", Path::new("/work/app"));
        assert!(params["processId"].is_number());
        assert_eq!(params["rootUri"], "file:///work/app");
        assert_eq!(params["workspaceFolders"][0]["uri"], "file:///work/app");
        assert_eq!(params["workspaceFolders"][0]["name"], "app");
        assert!(params["capabilities"]["textDocument"]["publishDiagnostics"].is_object());
        assert!(params["capabilities"]["textDocument"]["synchronization"].is_object());
        assert_eq!(params["capabilities"]["workspace"]["configuration"], true);
    }

    #[test]
    fn test_did_open_and_close_params() {
        let params = did_open_params("file:///test.ts", "typescript", 1, "let x = 1;");
        assert_eq!(params["textDocument"]["uri"], "file:///test.ts");
        assert_eq!(params["textDocument"]["languageId"], "typescript");
        assert_eq!(params["textDocument"]["version"], 1);
        assert_eq!(params["textDocument"]["text"], "let x = 1;");

        let params = did_close_params("file:///test.ts");
        assert_eq!(params, json!({"textDocument": {"uri": "file:///test.ts"}}));
    }

    #[test]
    fn test_language_id_for_react_files() {
        assert_eq!(
            language_id(Path::new("a.tsx"), Language::TypeScript),
            "typescriptreact"
        );
        assert_eq!(
            language_id(Path::new("a.jsx"), Language::JavaScript),
            "javascriptreact"
        );
        assert_eq!(language_id(Path::new("a.mts"), Language::TypeScript), "typescript");
        assert_eq!(language_id(Path::new("a.py"), Language::Python), "python");
    }

    #[test]
    fn test_configuration_response_has_one_entry_per_item() {
        let params = json!({ "items": [{ "section": "" }, { "scopeUri": "file:///x" }] });
        let answer = configuration_response(ServerIdentity::Eslint, Some(&params));
        let entries = answer.as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["validate"], "on");
        assert_eq!(entries[1]["workingDirectory"]["mode"], "auto");
    }

    #[test]
    fn test_configuration_response_without_items() {
        let answer = configuration_response(ServerIdentity::Pyright, None);
        assert_eq!(answer, json!([]));
    }

    #[test]
    fn test_configuration_response_pyright_sections() {
        let params = json!({ "items": [{ "section": "python.analysis" }, { "section": "pyright" }] });
        let answer = configuration_response(ServerIdentity::Pyright, Some(&params));
        assert_eq!(answer[0]["diagnosticMode"], "openFilesOnly");
        assert_eq!(answer[1], json!({}));
    }

    #[test]
    fn test_lsp_diagnostic_conversion() {
        let json = json!({
            "uri": "file:///test.ts",
            "diagnostics": [{
                "range": { "start": { "line": 10, "character": 5 }, "end": { "line": 10, "character": 9 } },
                "severity": 1,
                "code": 2304,
                "source": "typescript",
                "message": "Cannot find name 'x'."
            }, {
                "range": { "start": { "line": 0, "character": 0 }, "end": { "line": 0, "character": 1 } },
                "code": "no-unused-vars",
                "message": "unused"
            }]
        });

        let params: PublishDiagnosticsParams = serde_json::from_value(json).unwrap();
        let mut items = params.diagnostics.into_iter().map(LspDiagnostic::into_diagnostic);

        let first = items.next().unwrap();
        assert_eq!(first.severity(), DiagnosticSeverity::Error);
        assert_eq!(first.range().start, Position::new(10, 5));
        assert_eq!(first.range().end, Position::new(10, 9));
        assert_eq!(first.code(), Some("2304"));
        assert_eq!(first.source(), Some("typescript"));

        // Severity is optional per LSP spec
        let second = items.next().unwrap();
        assert_eq!(second.severity(), DiagnosticSeverity::Warning);
        assert_eq!(second.code(), Some("no-unused-vars"));
        assert_eq!(second.source(), None);
    }

    #[test]
    fn test_capabilities_from_initialize_result() {
        let caps = ServerCapabilities::from_initialize_result(&json!({
            "capabilities": { "textDocumentSync": 2, "diagnosticProvider": { "interFileDependencies": true } }
        }));
        assert!(caps.pull_diagnostics);

        let caps = ServerCapabilities::from_initialize_result(&json!({
            "capabilities": { "textDocumentSync": { "openClose": true, "change": 1 } }
        }));
        assert!(!caps.pull_diagnostics);

        assert_eq!(
            ServerCapabilities::from_initialize_result(&json!({})),
            ServerCapabilities::default()
        );
    }

    #[test]
    fn test_document_diagnostic_report_items() {
        let full = json!({
            "kind": "full",
            "resultId": "3",
            "items": [{
                "range": { "start": { "line": 2, "character": 4 }, "end": { "line": 2, "character": 7 } },
                "severity": 1,
                "message": "undefined: foo"
            }]
        });
        let items = document_diagnostic_items(full);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].range().start, Position::new(2, 4));
        assert_eq!(items[0].message(), "undefined: foo");

        assert!(document_diagnostic_items(json!({ "kind": "unchanged", "resultId": "3" })).is_empty());
        assert!(document_diagnostic_items(Value::Null).is_empty());
    }

    #[test]
    fn test_path_to_file_uri_and_back() {
        #[cfg(windows)]
        let path = PathBuf::from(r"C:\Users\test\src\main.ts");
        #[cfg(not(windows))]
        let path = PathBuf::from("/home/test/src/main.ts");

        let uri = path_to_file_uri(&path).expect("should create URI");
        let roundtrip = file_uri_to_path(uri.as_str()).expect("should parse back to path");
        assert_eq!(roundtrip, path);
    }

    #[cfg(not(windows))]
    #[test]
    fn test_file_uri_to_path_normalizes_traversal() {
        assert_eq!(
            file_uri_to_path("file:///work/src/../lib/a.ts"),
            Some(PathBuf::from("/work/lib/a.ts"))
        );
    }

    #[test]
    fn test_file_uri_to_path_invalid_uri() {
        assert!(file_uri_to_path("not-a-uri").is_none());
        assert!(file_uri_to_path("https://example.com/test.rs").is_none());
    }

    #[test]
    fn test_request_serialization_without_params() {
        let req = Request::new(1, "shutdown", None);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["id"], 1);
        assert_eq!(json["method"], "shutdown");
        assert!(
            json.get("params").is_none(),
            "params must be omitted, not null"
        );
    }

    #[test]
    fn test_notification_serialization() {
        let notif = Notification::new("initialized", Some(json!({})));
        let json = serde_json::to_value(&notif).unwrap();
        assert_eq!(json["method"], "initialized");
        assert!(json.get("id").is_none());
        assert!(json.get("params").is_some());
    }

    #[test]
    fn test_response_echoes_id() {
        let reply = response(&RequestId::String("cfg-1".into()), Value::Null);
        assert_eq!(reply["id"], "cfg-1");
        assert!(reply["result"].is_null());
        assert!(reply.get("error").is_none());
    }
}
