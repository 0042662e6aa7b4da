//! Interactive yes/no prompts for end-of-session decisions.

use std::io::{self, BufRead, Write};

/// Interpret a yes/no answer. Empty input and anything unrecognised yield `None`.
pub fn parse_answer(input: &str) -> Option<bool> {
    match input.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

fn choices(default: bool) -> &'static str {
    if default {
        " (Y(es)/n(o)): "
    } else {
        " (y(es)/N(o)): "
    }
}

/// Ask `question` until a valid answer arrives. Empty input or end of input
/// selects `default`.
pub fn ask<R: BufRead, W: Write>(input: &mut R, output: &mut W, question: &str, default: bool) -> io::Result<bool> {
    loop {
        write!(output, "{question}{}", choices(default))?;
        output.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 || line.trim().is_empty() {
            return Ok(default);
        }
        if let Some(answer) = parse_answer(&line) {
            return Ok(answer);
        }
        writeln!(output, "Yes or no, please")?;
    }
}

/// [`ask`] on stdin/stdout.
pub fn confirm(question: &str, default: bool) -> io::Result<bool> {
    ask(&mut io::stdin().lock(), &mut io::stdout(), question, default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_answer() {
        assert_eq!(parse_answer("Y"), Some(true));
        assert_eq!(parse_answer(" yes\n"), Some(true));
        assert_eq!(parse_answer("NO"), Some(false));
        assert_eq!(parse_answer("maybe"), None);
        assert_eq!(parse_answer(""), None);
    }

    #[test]
    fn test_ask_reprompts_until_valid() {
        let mut input = Cursor::new("perhaps\ny\n");
        let mut output = Vec::new();
        assert!(ask(&mut input, &mut output, "Save?", false).unwrap());
        let shown = String::from_utf8(output).unwrap();
        assert_eq!(shown.matches("Save? (y(es)/N(o)): ").count(), 2);
        assert!(shown.contains("Yes or no, please"));
    }

    #[test]
    fn test_ask_empty_and_eof_use_default() {
        let mut output = Vec::new();
        assert!(ask(&mut Cursor::new("\n"), &mut output, "Q", true).unwrap());
        assert!(!ask(&mut Cursor::new(""), &mut output, "Q", false).unwrap());
    }
}
