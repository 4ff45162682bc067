use thiserror::Error;

use super::command::{Command, ConfigOption};

/// Exact TEST reply of a device sitting in its bootloader.
pub const BOOTLOADER_SENTINEL: &str = "BOOTLOADER_MODE";

const RECORD_SEP: char = ';';
const FIELD_SEP: char = ':';
const LEGACY_PLACEHOLDER: &str = "undefined";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("options reply is not terminated by ';': {0:?}")]
    Unterminated(String),
}

/// How parameter-less commands are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WireStyle {
    /// `test\n`
    #[default]
    Clean,
    /// `test undefined\n`, byte-for-byte what older host tools sent.
    Legacy,
}

/// Serialize a request into a LF-terminated line.
pub fn format_request(command: Command, parameter: Option<&str>, style: WireStyle) -> String {
    let mut out = String::from(command.keyword());
    match (parameter, style) {
        (Some(p), _) => {
            out.push(' ');
            out.push_str(p);
        }
        (None, WireStyle::Legacy) => {
            out.push(' ');
            out.push_str(LEGACY_PLACEHOLDER);
        }
        (None, WireStyle::Clean) => {}
    }
    out.push('\n');
    out
}

/// Strip the line terminator the framer may have left on a reply.
pub fn trim_response(line: &str) -> &str {
    line.trim_end_matches(['\r', '\n'])
}

pub fn is_bootloader_reply(line: &str) -> bool {
    trim_response(line) == BOOTLOADER_SENTINEL
}

/// Parse an OPTIONS reply (`name:description;` repeated) into fresh options.
///
/// Every `;`-terminated record yields one option, even one with an empty name.
pub fn parse_options(line: &str) -> Result<Vec<ConfigOption>, ParseError> {
    let s = trim_response(line);
    if s.is_empty() {
        return Ok(Vec::new());
    }
    let body = s
        .strip_suffix(RECORD_SEP)
        .ok_or_else(|| ParseError::Unterminated(s.to_string()))?;

    Ok(body
        .split(RECORD_SEP)
        .map(|record| match record.split_once(FIELD_SEP) {
            Some((name, d)) => ConfigOption::new(name, Some(d.to_string())),
            None => ConfigOption::new(record, None),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_with_parameter() {
        let line = format_request(Command::Set, Some("x 5"), WireStyle::Clean);
        assert_eq!(line, "set x 5\n");
        let line = format_request(Command::Get, Some("baud"), WireStyle::Legacy);
        assert_eq!(line, "get baud\n");
    }

    #[test]
    fn format_without_parameter() {
        assert_eq!(
            format_request(Command::Test, None, WireStyle::Clean),
            "test\n"
        );
        assert_eq!(
            format_request(Command::Options, None, WireStyle::Legacy),
            "options undefined\n"
        );
        assert_eq!(
            format_request(Command::Reboot, None, WireStyle::Clean),
            "reboot\n"
        );
    }

    #[test]
    fn parse_two_options() {
        let opts = parse_options("a:Option A;b:Option B;").unwrap();
        assert_eq!(opts.len(), 2);
        assert_eq!(opts[0].name, "a");
        assert_eq!(opts[0].description.as_deref(), Some("Option A"));
        assert_eq!(opts[1].name, "b");
        assert_eq!(opts[1].description.as_deref(), Some("Option B"));
        assert!(opts.iter().all(|o| o.value.is_none() && !o.modified));
    }

    #[test]
    fn parse_record_counts() {
        assert!(parse_options("").unwrap().is_empty());
        assert!(parse_options("\r\n").unwrap().is_empty());
        assert_eq!(parse_options("only:one;").unwrap().len(), 1);

        let many: String = (0..12).map(|i| format!("opt{}:d{};", i, i)).collect();
        let opts = parse_options(&many).unwrap();
        assert_eq!(opts.len(), 12);
        assert_eq!(opts[11].name, "opt11");
    }

    #[test]
    fn parse_description_edge_cases() {
        let opts = parse_options("mode;url:http://x:80;\r\n").unwrap();
        assert_eq!(opts[0].name, "mode");
        assert_eq!(opts[0].description, None);
        assert_eq!(opts[1].description.as_deref(), Some("http://x:80"));
    }

    #[test]
    fn parse_unterminated() {
        assert!(matches!(
            parse_options("a:Option A"),
            Err(ParseError::Unterminated(_))
        ));
    }

    #[test]
    fn parse_keeps_nameless_record() {
        let opts = parse_options("c:z;:w;").unwrap();
        assert_eq!(opts.len(), 2);
        assert_eq!(opts[0].name, "c");
        assert_eq!(opts[1].name, "");
        assert_eq!(opts[1].description.as_deref(), Some("w"));
    }

    #[test]
    fn bootloader_sentinel_is_exact() {
        assert!(is_bootloader_reply("BOOTLOADER_MODE"));
        assert!(is_bootloader_reply("BOOTLOADER_MODE\r\n"));
        assert!(!is_bootloader_reply("bootloader_mode"));
        assert!(!is_bootloader_reply("BOOTLOADER_MODE ok"));
    }
}
