use regex::Regex;
use std::sync::LazyLock;

/// Private mode toggles (`ESC[?2004h` and friends), clear-line, clear-screen
/// and cursor-home. Colors and other SGR sequences are left alone.
static TERMINAL_NOISE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[(?:\?[0-9]+[hl]|[KJH])").expect("escape pattern is valid")
});

/// Remove terminal control sequences that carry no text.
///
/// Lossy: a program that relies on cursor homing to redraw will read as
/// concatenated frames.
pub fn clean_output(text: &str) -> String {
    TERMINAL_NOISE.replace_all(text, "").into_owned()
}
