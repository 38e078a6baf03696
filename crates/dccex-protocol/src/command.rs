//! Commands exchanged with the command station.
//!
//! A command is a single-character op code plus an ordered list of
//! parameters. Parameters on the wire are separated by spaces; a parameter
//! surrounded by `"` quotes is a single token that may itself contain
//! spaces. The format template records how each parameter serializes
//! (`%s` bare, `%q` quoted, `%d` numeric, `%c` character), so a parsed
//! command round-trips to the exact wire form it arrived in.

use std::fmt;

use crate::error::{CommandError, CommandResult};

/// A single-character command family identifier.
///
/// The wire format mandates exactly one character, so the representation is
/// a `char`, never a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpCode(char);

impl OpCode {
    /// Info/broadcast messages, e.g. the ready notification.
    pub const INFO: OpCode = OpCode('@');
    /// Generic success reply.
    pub const SUCCESS: OpCode = OpCode('O');
    /// Generic failure reply.
    pub const FAIL: OpCode = OpCode('X');
    /// Status request.
    pub const STATUS: OpCode = OpCode('s');
    /// Status response.
    pub const STATUS_RESPONSE: OpCode = OpCode('i');
    /// EEPROM save.
    pub const EEPROM: OpCode = OpCode('E');
    /// Cab speed.
    pub const CAB_SPEED: OpCode = OpCode('t');
    /// Cab function.
    pub const CAB_FUNCTION: OpCode = OpCode('F');
    /// Supported cab count request and response.
    pub const SUPPORTED_CABS: OpCode = OpCode('#');
    /// Sensor create.
    pub const SENSOR_CREATE: OpCode = OpCode('S');
    /// Sensor active broadcast.
    pub const SENSOR_ACTIVE: OpCode = OpCode('Q');
    /// Sensor inactive broadcast.
    pub const SENSOR_INACTIVE: OpCode = OpCode('q');
    /// Turnout create/control/examine.
    pub const TURNOUT: OpCode = OpCode('T');
    /// Turnout examine response.
    pub const TURNOUT_RESPONSE: OpCode = OpCode('H');
    /// Output define and control.
    pub const OUTPUT: OpCode = OpCode('Z');
    /// Output status response.
    pub const OUTPUT_RESPONSE: OpCode = OpCode('Y');
    /// Raw output pin control.
    pub const OUTPUT_CONTROL: OpCode = OpCode('z');

    /// Create an op code from its wire character.
    pub const fn new(code: char) -> Self {
        OpCode(code)
    }

    /// The wire character of this op code.
    pub const fn as_char(self) -> char {
        self.0
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<char> for OpCode {
    fn from(code: char) -> Self {
        OpCode(code)
    }
}

/// A single command parameter.
///
/// Parsing always yields [`Parameter::Str`]; the numeric and character
/// variants enter only through the builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parameter {
    /// A textual parameter.
    Str(String),
    /// An integral parameter.
    Int(i64),
    /// A single-character parameter.
    Char(char),
}

impl Parameter {
    /// Render the parameter the way it appears between separators on the
    /// wire, without any quoting.
    fn render(&self) -> String {
        match self {
            Parameter::Str(value) => value.clone(),
            Parameter::Int(value) => value.to_string(),
            Parameter::Char(value) => value.to_string(),
        }
    }
}

impl From<&str> for Parameter {
    fn from(value: &str) -> Self {
        Parameter::Str(value.to_string())
    }
}

impl From<String> for Parameter {
    fn from(value: String) -> Self {
        Parameter::Str(value)
    }
}

impl From<char> for Parameter {
    fn from(value: char) -> Self {
        Parameter::Char(value)
    }
}

macro_rules! parameter_from_int {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Parameter {
            fn from(value: $ty) -> Self {
                Parameter::Int(value as i64)
            }
        })*
    };
}

parameter_from_int!(i8, i16, i32, i64, u8, u16, u32);

/// A framed message with op code, format template and parameters.
///
/// Commands are immutable values: construct them with [`Command::new`] or
/// [`Command::parse`] and serialize them with [`fmt::Display`] or
/// [`Command::to_bytes`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    op_code: OpCode,
    format: String,
    parameters: Vec<Parameter>,
}

impl Command {
    /// Create a command from an op code, a printf-style format template and
    /// the parameters filling its placeholders, one per placeholder in
    /// order.
    pub fn new(op_code: OpCode, format: impl Into<String>, parameters: Vec<Parameter>) -> Self {
        Command {
            op_code,
            format: format.into(),
            parameters,
        }
    }

    /// Create a control command for the given op code.
    ///
    /// A control command carries the parameter `"><⚡"` which the command
    /// station cannot interpret, so it answers with `<X>` once the output
    /// of the preceding valid command is complete. This bounds the output
    /// of enumeration commands like listing all sensors.
    pub fn control(op_code: OpCode) -> Self {
        Command::new(op_code, "%s", vec!["><⚡".into()])
    }

    /// Parse a command from a frame body.
    ///
    /// The delimiting `<` and `>` may still be present and are trimmed.
    /// The first character is the op code; the remainder tokenizes on
    /// unquoted spaces, with quoted spans captured as a single parameter
    /// whose quotedness is remembered in the format template. An op code
    /// immediately followed by its first parameter (e.g. `<JT>`) parses
    /// fine and re-serializes with a separating space (`<J T>`).
    pub fn parse(command: &str) -> CommandResult<Self> {
        let trimmed = command.trim_matches(|c| c == '<' || c == '>');
        let mut chars = trimmed.chars();
        let op_code = chars
            .next()
            .ok_or_else(|| CommandError::InvalidLength(command.to_string()))?;

        let remainder = chars.as_str().trim_matches(' ');

        let mut formats = Vec::new();
        let mut parameters = Vec::new();
        let mut current = String::new();
        let mut in_quotes = false;

        let mut store = |current: &mut String| {
            // A quoted parameter keeps its quotedness through the %q
            // format marker; the quotes themselves are stripped.
            if current.contains('"') {
                formats.push("%q");
            } else {
                formats.push("%s");
            }

            parameters.push(Parameter::Str(current.trim_matches('"').to_string()));
            current.clear();
        };

        for c in remainder.chars() {
            if c == ' ' && !in_quotes {
                store(&mut current);
                continue;
            }

            if c == '"' {
                in_quotes = !in_quotes;
            }

            current.push(c);
        }

        if !current.is_empty() {
            store(&mut current);
        }

        Ok(Command {
            op_code: OpCode(op_code),
            format: formats.join(" "),
            parameters,
        })
    }

    /// The command family of this command.
    pub fn op_code(&self) -> OpCode {
        self.op_code
    }

    /// The format template of this command.
    pub fn format(&self) -> &str {
        &self.format
    }

    /// The parameters of this command.
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// The parameters of this command as strings.
    ///
    /// Fails if a non-string parameter was supplied through the builder;
    /// parsed commands always satisfy this.
    pub fn parameter_strings(&self) -> CommandResult<Vec<String>> {
        self.parameters
            .iter()
            .map(|parameter| match parameter {
                Parameter::Str(value) => Ok(value.clone()),
                other => Err(CommandError::NotAString(other.render())),
            })
            .collect()
    }

    /// The wire form of this command: the framed text plus a trailing
    /// newline.
    pub fn to_bytes(&self) -> Vec<u8> {
        format!("{self}\n").into_bytes()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Without a format template only the op code is framed.
        if self.format.is_empty() {
            return write!(f, "<{}>", self.op_code);
        }

        let mut rendered = String::new();
        let mut parameters = self.parameters.iter();
        let mut chars = self.format.chars();

        while let Some(c) = chars.next() {
            if c != '%' {
                rendered.push(c);
                continue;
            }

            let Some(verb) = chars.next() else {
                rendered.push('%');
                break;
            };

            let Some(parameter) = parameters.next() else {
                continue;
            };

            match verb {
                'q' => {
                    rendered.push('"');
                    rendered.push_str(&parameter.render());
                    rendered.push('"');
                }
                's' | 'd' | 'c' => rendered.push_str(&parameter.render()),
                other => {
                    rendered.push('%');
                    rendered.push(other);
                }
            }
        }

        write!(f, "<{} {}>", self.op_code, rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ParseCase {
        name: &'static str,
        command: &'static str,
        op_code: char,
        format: &'static str,
        parameters: &'static [&'static str],
    }

    #[test]
    fn test_parse() {
        let cases = [
            ParseCase {
                name: "op code only",
                command: "<a>",
                op_code: 'a',
                format: "",
                parameters: &[],
            },
            ParseCase {
                name: "op code and one parameter",
                command: "<a b>",
                op_code: 'a',
                format: "%s",
                parameters: &["b"],
            },
            ParseCase {
                name: "op code and two parameters",
                command: "<a b c>",
                op_code: 'a',
                format: "%s %s",
                parameters: &["b", "c"],
            },
            ParseCase {
                name: "op code and mixed parameters",
                command: "<a 3 c>",
                op_code: 'a',
                format: "%s %s",
                parameters: &["3", "c"],
            },
            ParseCase {
                name: "op code and multi character strings",
                command: "<a 3 hello world>",
                op_code: 'a',
                format: "%s %s %s",
                parameters: &["3", "hello", "world"],
            },
            ParseCase {
                name: "op code and quoted parameter",
                command: "<a \"hello\">",
                op_code: 'a',
                format: "%q",
                parameters: &["hello"],
            },
            ParseCase {
                name: "op code and quoted parameter with space",
                command: "<a \"hello world\">",
                op_code: 'a',
                format: "%q",
                parameters: &["hello world"],
            },
            ParseCase {
                name: "op code and quoted parameter with multiple spaces",
                command: "<a \"hello world from test\">",
                op_code: 'a',
                format: "%q",
                parameters: &["hello world from test"],
            },
            ParseCase {
                name: "op code and multiple quoted parameters",
                command: "<a \"hello\" \"world\">",
                op_code: 'a',
                format: "%q %q",
                parameters: &["hello", "world"],
            },
            ParseCase {
                name: "op code and multiple quoted parameters with spaces",
                command: "<a \"hello world 1\" \"hello world 2\">",
                op_code: 'a',
                format: "%q %q",
                parameters: &["hello world 1", "hello world 2"],
            },
            ParseCase {
                name: "op code with mixed parameters and quoting",
                command: "<a 1 \"hello world\" abc 42 \"hello\">",
                op_code: 'a',
                format: "%s %q %s %s %q",
                parameters: &["1", "hello world", "abc", "42", "hello"],
            },
            ParseCase {
                name: "op code with parameter without space separation",
                command: "<a1>",
                op_code: 'a',
                format: "%s",
                parameters: &["1"],
            },
            ParseCase {
                name: "op code with string parameter without space separation",
                command: "<ab>",
                op_code: 'a',
                format: "%s",
                parameters: &["b"],
            },
            ParseCase {
                name: "op code with quoted parameter without space separation",
                command: "<a\"b\">",
                op_code: 'a',
                format: "%q",
                parameters: &["b"],
            },
            ParseCase {
                // The trailing * of trace lines is parsed as a parameter.
                name: "trace line",
                command: "<* Track B sensOffset=0 *>",
                op_code: '*',
                format: "%s %s %s %s",
                parameters: &["Track", "B", "sensOffset=0", "*"],
            },
            ParseCase {
                name: "version and hardware info",
                command: "<iDCC-EX V-5.4.0 / MEGA / EX8874 G-c389fe9>",
                op_code: 'i',
                format: "%s %s %s %s %s %s %s",
                parameters: &["DCC-EX", "V-5.4.0", "/", "MEGA", "/", "EX8874", "G-c389fe9"],
            },
        ];

        for case in cases {
            let command = Command::parse(case.command)
                .unwrap_or_else(|e| panic!("{}: parse failed: {e}", case.name));

            assert_eq!(command.op_code(), OpCode::new(case.op_code), "{}", case.name);
            assert_eq!(command.format(), case.format, "{}", case.name);

            let parameters = command.parameter_strings().expect("parsed parameters");
            assert_eq!(parameters, case.parameters, "{}", case.name);
        }
    }

    #[test]
    fn test_parse_empty_fails() {
        assert!(matches!(
            Command::parse("<>"),
            Err(CommandError::InvalidLength(_))
        ));
        assert!(matches!(
            Command::parse(""),
            Err(CommandError::InvalidLength(_))
        ));
    }

    #[test]
    fn test_display_without_parameters() {
        let command = Command::new(OpCode::STATUS, "", vec![]);
        assert_eq!(command.to_string(), "<s>");
    }

    #[test]
    fn test_display_with_parameters() {
        let command = Command::new(
            OpCode::CAB_SPEED,
            "%d %d %d",
            vec![Parameter::Int(3), Parameter::Int(100), Parameter::Int(1)],
        );
        assert_eq!(command.to_string(), "<t 3 100 1>");
    }

    #[test]
    fn test_display_with_literal_text() {
        let command = Command::new(
            OpCode::TURNOUT,
            "%d SERVO %d %d %d %d",
            vec![
                Parameter::Int(4),
                Parameter::Int(101),
                Parameter::Int(300),
                Parameter::Int(200),
                Parameter::Int(2),
            ],
        );
        assert_eq!(command.to_string(), "<T 4 SERVO 101 300 200 2>");
    }

    #[test]
    fn test_display_quoted_parameter() {
        let command = Command::new(
            OpCode::INFO,
            "%d %d %q",
            vec![Parameter::Int(0), Parameter::Int(3), "Ready".into()],
        );
        assert_eq!(command.to_string(), "<@ 0 3 \"Ready\">");
    }

    #[test]
    fn test_display_adjacent_placeholders() {
        let command = Command::new(OpCode::OUTPUT_CONTROL, "%s%d", vec!["-".into(), Parameter::Int(15)]);
        assert_eq!(command.to_string(), "<z -15>");

        let command = Command::new(OpCode::OUTPUT_CONTROL, "%s%d", vec!["".into(), Parameter::Int(15)]);
        assert_eq!(command.to_string(), "<z 15>");
    }

    #[test]
    fn test_control_command() {
        let command = Command::control(OpCode::SENSOR_ACTIVE);
        assert_eq!(command.to_string(), "<Q ><⚡>");
    }

    #[test]
    fn test_round_trip_inserts_separator() {
        let command = Command::parse("<a1>").expect("parse");
        assert_eq!(command.to_string(), "<a 1>");
    }

    #[test]
    fn test_serialization_of_parse_is_idempotent() {
        for body in ["a b c", "a \"hello world\"", "a1", "* Track B sensOffset=0 *"] {
            let first = Command::parse(body).expect("parse").to_string();
            let second = Command::parse(&first).expect("reparse").to_string();
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_parameter_strings_rejects_builder_values() {
        let command = Command::new(OpCode::CAB_SPEED, "%d", vec![Parameter::Int(3)]);
        assert!(matches!(
            command.parameter_strings(),
            Err(CommandError::NotAString(_))
        ));
    }

    #[test]
    fn test_to_bytes_appends_newline() {
        let command = Command::new(OpCode::STATUS, "", vec![]);
        assert_eq!(command.to_bytes(), b"<s>\n");
    }
}
