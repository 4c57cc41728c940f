#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Word(String),
    Background,
}

/// A command line ready to run: argv plus whether it ends in `&`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parsed {
    pub argv: Vec<String>,
    pub background: bool,
}

pub fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    // Split on whitespace; `&` may stand alone or be glued to the last word
    for part in input.split_whitespace() {
        match part {
            "&" => tokens.push(Token::Background),
            p if p.ends_with('&') => {
                tokens.push(Token::Word(p.trim_end_matches('&').to_string()));
                tokens.push(Token::Background);
            }
            p => tokens.push(Token::Word(p.to_string())),
        }
    }
    tokens
}

/// Returns `None` for a line with no command word.
///
/// Only a trailing `&` means background; one in the middle of the line is
/// dropped.
pub fn parse(input: &str) -> Option<Parsed> {
    let tokens = tokenize(input);
    let background = tokens.last() == Some(&Token::Background);
    let argv: Vec<String> = tokens
        .into_iter()
        .filter_map(|t| match t {
            Token::Word(w) => Some(w),
            Token::Background => None,
        })
        .collect();
    if argv.is_empty() {
        return None;
    }
    Some(Parsed { argv, background })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_command_runs_in_foreground() {
        let parsed = parse("ls -l /tmp").unwrap();
        assert_eq!(parsed.argv, ["ls", "-l", "/tmp"]);
        assert!(!parsed.background);
    }

    #[test]
    fn trailing_ampersand_means_background() {
        assert!(parse("sleep 10 &").unwrap().background);
        let glued = parse("sleep 10&").unwrap();
        assert!(glued.background);
        assert_eq!(glued.argv, ["sleep", "10"]);
    }

    #[test]
    fn blank_lines_parse_to_nothing() {
        assert_eq!(parse(""), None);
        assert_eq!(parse("   \t "), None);
        assert_eq!(parse("&"), None);
    }
}
