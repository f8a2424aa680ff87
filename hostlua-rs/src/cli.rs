//! Command-line argument parsing.
//!
//! Usage:
//!   hostlua [-c<ini>] [-e<code>] [-d name=value]... [-i] [<file>]

use std::path::PathBuf;

use crate::value::HostValue;

// ── Public types ──────────────────────────────────────────────────────────────

/// Parsed command-line arguments.
#[derive(Debug, Default)]
pub struct CliArgs {
    /// Engine config file (`-c<ini>`); otherwise the discovered one.
    pub ini: Option<PathBuf>,
    /// Inline code to evaluate (`-e<code>`).
    pub code: Option<String>,
    /// Globals bound before running (`-d name=value`).
    pub defines: Vec<(String, HostValue)>,
    /// Print collected headers to stderr afterwards (`-i`).
    pub show_headers: bool,
    /// Script file to run.
    pub script: Option<PathBuf>,
}

// ── Parsing ───────────────────────────────────────────────────────────────────

/// Parse `std::env::args()` and return [`CliArgs`] or an error message.
pub fn parse_args() -> Result<CliArgs, String> {
    let raw: Vec<String> = std::env::args().collect();
    parse_argv(raw.get(1..).unwrap_or_default())
}

/// Parse a slice of argument strings (exposed for testing).
pub fn parse_argv(argv: &[String]) -> Result<CliArgs, String> {
    let mut args = CliArgs::default();
    let mut positional: Vec<String> = Vec::new();
    let mut i = 0;

    while i < argv.len() {
        let arg = argv[i].as_str();

        // `--` ends flag processing.
        if arg == "--" {
            positional.extend(argv[i + 1..].iter().cloned());
            break;
        }

        if !arg.starts_with('-') || arg == "-" {
            positional.push(arg.to_owned());
            i += 1;
            continue;
        }

        let chars: Vec<char> = arg[1..].chars().collect();
        let mut j = 0;
        while j < chars.len() {
            match chars[j] {
                'i' => args.show_headers = true,

                // -c<ini>, -e<code>, -d<name=value>: embedded or separate
                flag @ ('c' | 'e' | 'd') => {
                    let operand = if j + 1 < chars.len() {
                        let s: String = chars[j + 1..].iter().collect();
                        j = chars.len();
                        s
                    } else if i + 1 < argv.len() {
                        i += 1;
                        argv[i].clone()
                    } else {
                        return Err(format!("-{flag} requires an argument"));
                    };
                    match flag {
                        'c' => args.ini = Some(PathBuf::from(operand)),
                        'e' => args.code = Some(operand),
                        _ => args.defines.push(parse_define(&operand)?),
                    }
                }

                c => return Err(format!("unknown option: -{c}")),
            }
            j += 1;
        }
        i += 1;
    }

    match positional.len() {
        0 => {}
        1 => args.script = Some(PathBuf::from(positional.remove(0))),
        n => return Err(format!("too many arguments ({n})")),
    }

    if args.code.is_some() && args.script.is_some() {
        return Err("-e cannot be combined with a script file".to_owned());
    }

    Ok(args)
}

/// `name=value`; the value becomes a Long, Double or Bool when it reads as
/// one, else a String.  A bare name binds `true`.
fn parse_define(s: &str) -> Result<(String, HostValue), String> {
    let (name, value) = match s.split_once('=') {
        Some((name, value)) => (name.trim(), typed_value(value)),
        None => (s.trim(), HostValue::Bool(true)),
    };
    if name.is_empty() {
        return Err(format!("invalid definition: `{s}`"));
    }
    Ok((name.to_owned(), value))
}

fn typed_value(s: &str) -> HostValue {
    if let Ok(i) = s.parse::<i64>() {
        HostValue::Long(i)
    } else if let Ok(f) = s.parse::<f64>() {
        HostValue::Double(f)
    } else if let Ok(b) = s.parse::<bool>() {
        HostValue::Bool(b)
    } else {
        HostValue::String(s.to_owned())
    }
}

/// Process exit code for a script's early-termination code.
pub fn exit_code(code: i32) -> u8 {
    u8::try_from(code.clamp(0, 255)).unwrap_or(u8::MAX)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
