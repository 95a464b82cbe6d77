use ptymux_channels::ChannelError;
use ptymux_toolcore::ToolResult;
use ptymux_types::{ReadOutput, NO_DATA_MESSAGE};

/// HTTP request lines we normalise before writing to a socket
const HTTP_METHODS: [&str; 9] = [
    "GET ", "POST ", "PUT ", "DELETE ", "HEAD ", "OPTIONS ", "PATCH ", "CONNECT ", "TRACE ",
];

/// Markers that usually mean a device is waiting for input
const PROMPT_MARKERS: [&str; 6] = [">", "#", "$", ":", "login:", "Password:"];

pub(crate) fn already_open(message: &str) -> ToolResult {
    ToolResult::error_kind(message.to_string(), "already_open")
}

pub(crate) fn not_open(message: &str) -> ToolResult {
    ToolResult::error_kind(message.to_string(), "not_open")
}

pub(crate) fn invalid_params(message: impl Into<String>) -> ToolResult {
    ToolResult::error_kind(message.into(), "invalid_params")
}

/// `"{prefix}: {err}"` keeping the channel error kind
pub(crate) fn channel_failure(prefix: &str, err: &ChannelError) -> ToolResult {
    ToolResult::error_kind(format!("{}: {}", prefix, err), err.kind_name())
}

/// Text for a read result; `closed_note` replaces an ended stream
pub(crate) fn render_output(output: &ReadOutput, closed_note: &str) -> String {
    match output {
        ReadOutput::Data(text) => text.clone(),
        ReadOutput::NoData => NO_DATA_MESSAGE.to_string(),
        ReadOutput::Closed => closed_note.to_string(),
    }
}

pub(crate) fn port_number(value: i64) -> Option<u16> {
    u16::try_from(value).ok().filter(|port| *port > 0)
}

pub(crate) fn command_line(command: &str, args: &[String]) -> String {
    std::iter::once(command)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Fix up line endings of something that looks like an HTTP request.
///
/// Returns `None` for anything else, otherwise the rewritten request and a
/// note for every change made.
pub(crate) fn normalize_http_request(data: &str) -> Option<(String, Vec<String>)> {
    if !HTTP_METHODS.iter().any(|method| data.starts_with(method)) {
        return None;
    }

    let mut notes = vec![
        "Detected HTTP request".to_string(),
        format!("Original: {} bytes", data.len()),
    ];
    let mut request = data.to_string();

    if !request.contains("\r\n") {
        request = request.replace('\n', "\r\n");
        notes.push("Converted \\n to \\r\\n".to_string());
    }

    if !request.ends_with("\r\n\r\n") {
        if request.ends_with("\r\n") {
            request.push_str("\r\n");
            notes.push("Added final \\r\\n".to_string());
        } else if request.ends_with('\n') {
            request.pop();
            request.push_str("\r\n\r\n");
            notes.push("Fixed ending to \\r\\n\\r\\n".to_string());
        } else {
            request.push_str("\r\n\r\n");
            notes.push("Added \\r\\n\\r\\n".to_string());
        }
    }

    notes.push(format!("Final: {} bytes", request.len()));
    Some((request, notes))
}

pub(crate) fn contains_prompt(text: &str) -> bool {
    PROMPT_MARKERS.iter().any(|marker| text.contains(marker))
}
