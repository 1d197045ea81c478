//! Command registry: the table mapping command names to remote methods.
//!
//! Each row is a [`CommandSpec`]. Adding a command means adding a row; the
//! request builder itself never branches on command names.
//!
//! Positional arguments are bound into a typed [`MethodParams`] record chosen
//! by the row's [`ParamShape`], then serialized into the generic `params`
//! object the daemon expects. Fixed parameters (such as `canonical`) are
//! appended after the positional ones. Commands that read window state can
//! also be pointed at a stored snapshot through [`RequestOptions`].

use serde::Serialize;
use serde_json::Value;

use crate::error::{ProtocolError, Result};
use crate::messages::Request;

/// A constant parameter attached to every request of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixedValue {
    /// JSON boolean.
    Bool(bool),
    /// JSON string.
    Str(&'static str),
}

impl FixedValue {
    fn to_value(self) -> Value {
        match self {
            FixedValue::Bool(b) => Value::Bool(b),
            FixedValue::Str(s) => Value::String(s.to_string()),
        }
    }
}

/// Positional parameter layout of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamShape {
    /// No arguments.
    None,
    /// `<hwnd>`
    Window,
    /// `<x> <y>`
    Point,
    /// `<hwnd> <x> <y>`
    WindowPoint,
    /// `<hwnd> <text>`
    WindowText,
    /// `<hwnd> <name> <value>`
    WindowProperty,
    /// `<hwnd> <true|false>`
    Visibility,
    /// `<hwnd> <msg> [wparam] [lparam]`
    PostMessage,
    /// `<path>`
    Path,
    /// `<path> <name>`
    RegistryValue,
    /// `<path> <name> <type> <data>`
    RegistryWrite,
    /// `<address> <length>`
    MemoryRange,
    /// `<address> <data_b64>`
    MemoryWrite,
    /// `<x> <y> <width> <height>`
    Region,
    /// `<x> <y> <width> <height> <color>`
    PixelSearch,
    /// `<data_b64>`
    Input,
    /// `<snapshot_id> [old_snapshot_id]`
    EventsPoll,
    /// `<pattern>`
    Pattern,
    /// `<pid>`
    Process,
    /// `<text>`
    Text,
    /// `<name>`
    Name,
    /// `<name> <value>`
    NameValue,
    /// `<name> <action>`
    ServiceControl,
}

impl ParamShape {
    /// Required positional parameter names, in order.
    pub fn names(self) -> &'static [&'static str] {
        match self {
            ParamShape::None => &[],
            ParamShape::Window => &["hwnd"],
            ParamShape::Point => &["x", "y"],
            ParamShape::WindowPoint => &["hwnd", "x", "y"],
            ParamShape::WindowText => &["hwnd", "text"],
            ParamShape::WindowProperty => &["hwnd", "name", "value"],
            ParamShape::Visibility => &["hwnd", "visible"],
            ParamShape::PostMessage => &["hwnd", "msg"],
            ParamShape::Path => &["path"],
            ParamShape::RegistryValue => &["path", "name"],
            ParamShape::RegistryWrite => &["path", "name", "type", "data"],
            ParamShape::MemoryRange => &["address", "length"],
            ParamShape::MemoryWrite => &["address", "data_b64"],
            ParamShape::Region => &["x", "y", "width", "height"],
            ParamShape::PixelSearch => &["x", "y", "width", "height", "color"],
            ParamShape::Input => &["data_b64"],
            ParamShape::EventsPoll => &["snapshot_id"],
            ParamShape::Pattern => &["pattern"],
            ParamShape::Process => &["pid"],
            ParamShape::Text => &["text"],
            ParamShape::Name => &["name"],
            ParamShape::NameValue => &["name", "value"],
            ParamShape::ServiceControl => &["name", "action"],
        }
    }

    /// Optional trailing parameter names, in order.
    pub fn optional(self) -> &'static [&'static str] {
        match self {
            ParamShape::PostMessage => &["wparam", "lparam"],
            ParamShape::EventsPoll => &["old_snapshot_id"],
            _ => &[],
        }
    }

    /// Binds command-line arguments to a typed parameter record.
    ///
    /// Fails if required arguments are missing or if arguments are left over
    /// after the optional ones.
    pub fn bind(self, command: &str, args: &[String]) -> Result<MethodParams> {
        let required = self.names();
        if args.len() < required.len() {
            return Err(ProtocolError::Usage {
                command: command.to_string(),
                missing: required[args.len()..]
                    .iter()
                    .map(|name| name.to_string())
                    .collect(),
            });
        }

        let accepted = required.len() + self.optional().len();
        if args.len() > accepted {
            return Err(ProtocolError::TooManyArguments {
                command: command.to_string(),
                extra: args[accepted..].to_vec(),
            });
        }

        let arg = |i: usize| args[i].clone();
        let opt = |i: usize| args.get(i).cloned();

        let params = match self {
            ParamShape::None => MethodParams::Empty {},
            ParamShape::Window => MethodParams::Window { hwnd: arg(0) },
            ParamShape::Point => MethodParams::Point {
                x: arg(0),
                y: arg(1),
            },
            ParamShape::WindowPoint => MethodParams::WindowPoint {
                hwnd: arg(0),
                x: arg(1),
                y: arg(2),
            },
            ParamShape::WindowText => MethodParams::WindowText {
                hwnd: arg(0),
                text: arg(1),
            },
            ParamShape::WindowProperty => MethodParams::WindowProperty {
                hwnd: arg(0),
                name: arg(1),
                value: arg(2),
            },
            ParamShape::Visibility => MethodParams::Visibility {
                hwnd: arg(0),
                visible: parse_bool("visible", &args[1])?,
            },
            ParamShape::PostMessage => MethodParams::PostMessage {
                hwnd: arg(0),
                msg: arg(1),
                wparam: opt(2),
                lparam: opt(3),
            },
            ParamShape::Path => MethodParams::Path { path: arg(0) },
            ParamShape::RegistryValue => MethodParams::RegistryValue {
                path: arg(0),
                name: arg(1),
            },
            ParamShape::RegistryWrite => MethodParams::RegistryWrite {
                path: arg(0),
                name: arg(1),
                kind: arg(2),
                data: arg(3),
            },
            ParamShape::MemoryRange => MethodParams::MemoryRange {
                address: arg(0),
                length: arg(1),
            },
            ParamShape::MemoryWrite => MethodParams::MemoryWrite {
                address: arg(0),
                data_b64: arg(1),
            },
            ParamShape::Region => MethodParams::Region {
                x: arg(0),
                y: arg(1),
                width: arg(2),
                height: arg(3),
            },
            ParamShape::PixelSearch => MethodParams::PixelSearch {
                x: arg(0),
                y: arg(1),
                width: arg(2),
                height: arg(3),
                color: arg(4),
            },
            ParamShape::Input => MethodParams::Input { data_b64: arg(0) },
            ParamShape::EventsPoll => MethodParams::EventsPoll {
                snapshot_id: arg(0),
                old_snapshot_id: opt(1),
            },
            ParamShape::Pattern => MethodParams::Pattern { pattern: arg(0) },
            ParamShape::Process => MethodParams::Process { pid: arg(0) },
            ParamShape::Text => MethodParams::Text { text: arg(0) },
            ParamShape::Name => MethodParams::Name { name: arg(0) },
            ParamShape::NameValue => MethodParams::NameValue {
                name: arg(0),
                value: arg(1),
            },
            ParamShape::ServiceControl => MethodParams::ServiceControl {
                name: arg(0),
                action: arg(1),
            },
        };
        Ok(params)
    }
}

fn parse_bool(param: &str, value: &str) -> Result<bool> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(ProtocolError::InvalidArgument {
            param: param.to_string(),
            value: value.to_string(),
            expected: "true or false".to_string(),
        }),
    }
}

/// Typed parameters of one method call.
///
/// Values are passed through as the strings the user typed, except where
/// the daemon expects another JSON type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum MethodParams {
    /// No parameters; serializes as `{}`.
    Empty {},
    /// A window handle.
    Window { hwnd: String },
    /// Screen coordinates.
    Point { x: String, y: String },
    /// Client coordinates inside a window.
    WindowPoint { hwnd: String, x: String, y: String },
    /// Text sent to a window.
    WindowText { hwnd: String, text: String },
    /// A window property assignment.
    WindowProperty {
        hwnd: String,
        name: String,
        value: String,
    },
    /// Desired visibility of a window.
    Visibility { hwnd: String, visible: bool },
    /// A posted window message.
    PostMessage {
        hwnd: String,
        msg: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        wparam: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        lparam: Option<String>,
    },
    /// A registry key or file path.
    Path { path: String },
    /// A named registry value.
    RegistryValue { path: String, name: String },
    /// A registry value assignment.
    RegistryWrite {
        path: String,
        name: String,
        #[serde(rename = "type")]
        kind: String,
        data: String,
    },
    /// A memory region.
    MemoryRange { address: String, length: String },
    /// Bytes to write at an address.
    MemoryWrite { address: String, data_b64: String },
    /// A screen rectangle.
    Region {
        x: String,
        y: String,
        width: String,
        height: String,
    },
    /// A screen rectangle and the colour to look for.
    PixelSearch {
        x: String,
        y: String,
        width: String,
        height: String,
        color: String,
    },
    /// Base64-encoded input events.
    Input { data_b64: String },
    /// Snapshot ids to diff.
    EventsPoll {
        snapshot_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        old_snapshot_id: Option<String>,
    },
    /// A window title pattern.
    Pattern { pattern: String },
    /// A process id.
    Process { pid: String },
    /// Free text.
    Text { text: String },
    /// A named object.
    Name { name: String },
    /// A named value assignment.
    NameValue { name: String, value: String },
    /// A service and what to do with it.
    ServiceControl { name: String, action: String },
}

/// One row of the command table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    /// Name typed on the command line.
    pub name: &'static str,
    /// Remote method invoked.
    pub method: &'static str,
    /// Positional parameter layout.
    pub shape: ParamShape,
    /// Constant parameters appended to every request.
    pub fixed: &'static [(&'static str, FixedValue)],
    /// One-line description for the usage banner.
    pub summary: &'static str,
    /// Accepts `--snapshot <id>`.
    pub snapshot: bool,
}

impl CommandSpec {
    /// All positional parameter names, required first.
    pub fn positional_params(&self) -> Vec<&'static str> {
        let mut names = self.shape.names().to_vec();
        names.extend_from_slice(self.shape.optional());
        names
    }

    /// Synopsis such as `post-message <hwnd> <msg> [wparam] [lparam]`.
    pub fn synopsis(&self) -> String {
        let mut line = self.name.to_string();
        for name in self.shape.names() {
            line.push_str(&format!(" <{}>", name));
        }
        for name in self.shape.optional() {
            line.push_str(&format!(" [{}]", name));
        }
        if self.snapshot {
            line.push_str(" [--snapshot <id>]");
        }
        line
    }
}

const CANONICAL: &[(&str, FixedValue)] = &[("canonical", FixedValue::Bool(true))];
const NO_FIXED: &[(&str, FixedValue)] = &[];

macro_rules! command {
    ($name:literal, $method:literal, $shape:ident, $fixed:expr, $summary:literal) => {
        command!($name, $method, $shape, $fixed, $summary, false)
    };
    (
        $name:literal,
        $method:literal,
        $shape:ident,
        $fixed:expr,
        $summary:literal,
        $snapshot:literal
    ) => {
        CommandSpec {
            name: $name,
            method: $method,
            shape: ParamShape::$shape,
            fixed: $fixed,
            summary: $summary,
            snapshot: $snapshot,
        }
    };
}

/// Every supported command.
pub static COMMANDS: &[CommandSpec] = &[
    // Snapshots and window queries
    command!("capture", "snapshot.capture", None, CANONICAL, "Capture a window snapshot"),
    command!("top", "window.listTop", None, CANONICAL, "List top-level windows", true),
    command!("info", "window.getInfo", Window, CANONICAL, "Show window details", true),
    command!("children", "window.listChildren", Window, CANONICAL, "List child windows", true),
    command!("tree", "window.getTree", Window, CANONICAL, "Show the window tree"),
    command!("pick", "window.pickAtPoint", Point, NO_FIXED, "Find the window at a point", true),
    command!("find-regex", "window.findRegex", Pattern, NO_FIXED, "Find windows by title"),
    // Window control
    command!("highlight", "window.highlight", Window, NO_FIXED, "Flash a window border"),
    command!("set-prop", "window.setProperty", WindowProperty, NO_FIXED, "Set a window property"),
    command!(
        "ensure-visible",
        "window.ensureVisible",
        Visibility,
        NO_FIXED,
        "Show or hide a window"
    ),
    command!(
        "ensure-foreground",
        "window.ensureForeground",
        Window,
        NO_FIXED,
        "Bring a window to the front"
    ),
    command!("post-message", "window.postMessage", PostMessage, NO_FIXED, "Post a window message"),
    command!(
        "control-click",
        "window.controlClick",
        WindowPoint,
        NO_FIXED,
        "Click inside a window"
    ),
    command!("control-send", "window.controlSend", WindowText, NO_FIXED, "Send text to a window"),
    command!("send-input", "input.send", Input, NO_FIXED, "Inject raw input events"),
    // Events
    command!("events-poll", "events.poll", EventsPoll, NO_FIXED, "Diff two snapshots"),
    command!("events-subscribe", "events.subscribe", None, NO_FIXED, "Subscribe to window events"),
    command!("events-unsubscribe", "events.unsubscribe", None, NO_FIXED, "Stop window events"),
    // Daemon
    command!("status", "daemon.status", None, NO_FIXED, "Show daemon status"),
    command!("health", "daemon.health", None, NO_FIXED, "Check daemon health"),
    // Screen
    command!("get-pixel", "screen.getPixel", Point, NO_FIXED, "Read a pixel colour"),
    command!(
        "pixel-search",
        "screen.pixelSearch",
        PixelSearch,
        NO_FIXED,
        "Find a colour in a region"
    ),
    command!("capture-region", "screen.capture", Region, NO_FIXED, "Capture a screen region"),
    // Processes and memory
    command!("ps", "process.list", None, NO_FIXED, "List processes"),
    command!("kill", "process.kill", Process, NO_FIXED, "Terminate a process"),
    command!("mem-read", "mem.read", MemoryRange, NO_FIXED, "Read process memory"),
    command!("mem-write", "mem.write", MemoryWrite, NO_FIXED, "Write process memory"),
    // Files
    command!("file-info", "file.getInfo", Path, NO_FIXED, "Show file metadata"),
    command!("file-read", "file.read", Path, NO_FIXED, "Read a file"),
    // Registry
    command!("reg-read", "reg.read", Path, NO_FIXED, "Read a registry key"),
    command!("reg-write", "reg.write", RegistryWrite, NO_FIXED, "Write a registry value"),
    command!("reg-delete", "reg.delete", RegistryValue, NO_FIXED, "Delete a registry value"),
    // Clipboard
    command!("clip-read", "clipboard.read", None, NO_FIXED, "Read the clipboard"),
    command!("clip-write", "clipboard.write", Text, NO_FIXED, "Write the clipboard"),
    // Services
    command!("svc-list", "service.list", None, NO_FIXED, "List services"),
    command!("svc-status", "service.status", Name, NO_FIXED, "Show service status"),
    command!("svc-control", "service.control", ServiceControl, NO_FIXED, "Start or stop a service"),
    // Environment
    command!("env-get", "env.get", Name, NO_FIXED, "Read an environment variable"),
    command!("env-set", "env.set", NameValue, NO_FIXED, "Set an environment variable"),
    // Wine
    command!("wine-drives", "wine.drives", None, NO_FIXED, "List Wine drive mappings"),
    command!("wine-overrides", "wine.overrides", None, NO_FIXED, "List Wine DLL overrides"),
    // Synchronization
    command!("mutex-check", "sync.checkMutex", Name, NO_FIXED, "Check for a named mutex"),
    command!("mutex-create", "sync.createMutex", Name, NO_FIXED, "Create a named mutex"),
];

/// Finds a command by name.
pub fn lookup(name: &str) -> Result<&'static CommandSpec> {
    COMMANDS
        .iter()
        .find(|spec| spec.name == name)
        .ok_or_else(|| ProtocolError::UnknownCommand(name.to_string()))
}

/// Options that apply across commands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Stored snapshot to query instead of the live desktop.
    pub snapshot_id: Option<String>,
}

/// Builds the request for `command` invoked with positional `args`.
///
/// Fails with [`ProtocolError::UnknownCommand`] or [`ProtocolError::Usage`]
/// before anything touches the network.
pub fn build_request(id: impl Into<String>, command: &str, args: &[String]) -> Result<Request> {
    build_request_with(id, command, args, &RequestOptions::default())
}

/// Builds a request, applying `options` on top of the positional arguments.
pub fn build_request_with(
    id: impl Into<String>,
    command: &str,
    args: &[String],
    options: &RequestOptions,
) -> Result<Request> {
    let spec = lookup(command)?;
    let bound = spec.shape.bind(spec.name, args)?;

    let Value::Object(mut params) = serde_json::to_value(&bound)
        .map_err(|e| ProtocolError::Serialization(e.to_string()))?
    else {
        return Err(ProtocolError::Serialization(format!(
            "parameters of {} did not serialize to an object",
            spec.name
        )));
    };

    if let Some(snapshot_id) = &options.snapshot_id {
        if !spec.snapshot {
            return Err(ProtocolError::InvalidArgument {
                param: "snapshot".to_string(),
                value: snapshot_id.clone(),
                expected: format!("one of the commands {}", snapshot_commands().join(", ")),
            });
        }
        params.insert("snapshot_id".to_string(), Value::String(snapshot_id.clone()));
    }

    for (name, value) in spec.fixed {
        params.insert(name.to_string(), value.to_value());
    }

    Ok(Request {
        id: id.into(),
        method: spec.method.to_string(),
        params,
    })
}

fn snapshot_commands() -> Vec<&'static str> {
    COMMANDS
        .iter()
        .filter(|spec| spec.snapshot)
        .map(|spec| spec.name)
        .collect()
}

/// Method polled repeatedly by `wininspect watch`.
pub const WATCH_METHOD: &str = "events.poll";

/// Builds one poll of a watch loop.
///
/// Without snapshot ids the daemon diffs against the previous poll on the
/// same connection.
pub fn watch_request(id: impl Into<String>) -> Request {
    let mut params = serde_json::Map::new();
    for (name, value) in CANONICAL {
        params.insert(name.to_string(), value.to_value());
    }
    Request {
        id: id.into(),
        method: WATCH_METHOD.to_string(),
        params,
    }
}

/// The command list shown by `wininspect commands` and on usage errors.
pub fn usage() -> String {
    let synopses: Vec<String> = COMMANDS.iter().map(CommandSpec::synopsis).collect();
    let width = synopses.iter().map(String::len).max().unwrap_or(0);

    let mut text = String::from("Commands:\n");
    for (spec, synopsis) in COMMANDS.iter().zip(&synopses) {
        text.push_str(&format!(
            "  {:<width$}  {}\n",
            synopsis,
            spec.summary,
            width = width
        ));
    }
    text
}
