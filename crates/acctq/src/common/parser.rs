use anyhow::anyhow;
use chumsky::Parser;
use chumsky::error::Simple;
use chumsky::primitive::end;
use colored::Color;

// Parsing infrastructure
pub trait CharParser<T>: Parser<char, T, Error = Simple<char>> + Sized {
    fn parse_text(&self, input: &str) -> anyhow::Result<T> {
        self.parse(input)
            .map_err(|errors| anyhow!("{}", format_errors_cli(input, errors)))
    }
}
impl<T, P> CharParser<T> for P where P: Parser<char, T, Error = Simple<char>> {}

#[cfg(not(test))]
fn color_string<S: AsRef<str>>(string: S, color: Color) -> String {
    use colored::Colorize;
    string.as_ref().color(color).to_string()
}

#[cfg(test)]
fn color_string<S: AsRef<str>>(string: S, _color: Color) -> String {
    string.as_ref().to_string()
}

/// Formats a `chumsky` error into a user-visible (optionally colored) string.
/// Only the first error is reported.
pub fn format_errors_cli(input: &str, mut errors: Vec<Simple<char>>) -> String {
    use chumsky::Span;
    use std::fmt::Write;

    const ERROR_COLOR: Color = Color::Red;

    assert!(!errors.is_empty());

    errors.truncate(1);
    let error = errors.pop().unwrap();

    let mut output = String::new();

    let span = error.span();
    let message = format!(
        "{}{}:",
        if error.found().is_some() {
            "Unexpected token"
        } else {
            "Unexpected end of input"
        },
        if let Some(label) = error.label() {
            format!(
                " while attempting to parse {}",
                color_string(label, Color::Yellow)
            )
        } else {
            String::new()
        },
    );

    output.push_str(&message);
    output.push('\n');

    if input.is_empty() {
        output.push_str("(the input was empty)");
    } else {
        writeln!(
            output,
            "  {}{}{}",
            input.chars().take(span.start()).collect::<String>(),
            color_string(
                input
                    .chars()
                    .skip(span.start())
                    .take(span.end() - span.start())
                    .collect::<String>(),
                ERROR_COLOR
            ),
            input.chars().skip(span.end()).collect::<String>()
        )
        .unwrap();

        let note = match error.reason() {
            chumsky::error::SimpleReason::Custom(msg) => msg.clone(),
            _ => format!(
                "Unexpected {}",
                error
                    .found()
                    .map(|c| format!("token `{c}`"))
                    .unwrap_or_else(|| "end of input".to_string())
            ),
        };
        let spaces = " ".repeat(2 + span.start());
        write!(
            output,
            "{spaces}{}{}",
            color_string("--- ", ERROR_COLOR),
            color_string(note, ERROR_COLOR)
        )
        .unwrap();
    }

    output
}

// Common parsers
fn parse_integer_string() -> impl CharParser<String> {
    let digit = chumsky::primitive::filter(|c: &char| c.is_ascii_digit());
    digit
        .repeated()
        .at_least(1)
        .map(|chars| chars.into_iter().collect::<String>())
        .labelled("number")
}

/// Parse 4-byte integer.
pub fn parse_u32() -> impl CharParser<u32> {
    parse_integer_string().try_map(|p, span| {
        p.parse::<u32>()
            .map_err(|_| Simple::custom(span, "Cannot parse as 4-byte unsigned integer"))
    })
}

/// Parse 8-byte integer.
pub fn parse_u64() -> impl CharParser<u64> {
    parse_integer_string().try_map(|p, span| {
        p.parse::<u64>()
            .map_err(|_| Simple::custom(span, "Cannot parse as 8-byte unsigned integer"))
    })
}

/// Return a parser that will fail if there is any input following the text
/// parsed by the provided parser.
pub fn all_consuming<T>(parser: impl CharParser<T>) -> impl CharParser<T> {
    parser.then_ignore(end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_u32() {
        assert_eq!(parse_u32().parse_text("0").unwrap(), 0);
        assert_eq!(parse_u32().parse_text("1").unwrap(), 1);
        assert_eq!(parse_u32().parse_text("1019").unwrap(), 1019);
    }

    #[test]
    fn test_parse_u32_invalid() {
        assert!(parse_u32().parse_text("").is_err());
        assert!(parse_u32().parse_text("x").is_err());
        assert!(all_consuming(parse_u32()).parse_text("12x").is_err());
    }

    #[test]
    fn test_parse_u64_large() {
        assert_eq!(
            parse_u64().parse_text("18446744073709551615").unwrap(),
            u64::MAX
        );
    }
}
