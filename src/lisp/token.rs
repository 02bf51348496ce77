use super::LispError;

/// One lexical token with its source position.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub col: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    /// `#{` — opens a set literal.
    SetOpen,
    Quote,
    Str(String),
    /// Any non-delimiter chunk: symbols, keywords, numbers, `##Inf` and
    /// friends. The reader decides what it means.
    Atom(String),
}

/// Splits source text into tokens. Commas are whitespace, `;` starts a
/// line comment.
pub fn tokenize(source: &str) -> Result<Vec<Token>, LispError> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();
    let mut line = 1usize;
    let mut col = 1usize;

    macro_rules! push {
        ($kind:expr, $line:expr, $col:expr) => {
            tokens.push(Token {
                kind: $kind,
                line: $line,
                col: $col,
            })
        };
    }

    while let Some(&ch) = chars.peek() {
        let (tok_line, tok_col) = (line, col);
        match ch {
            '\n' => {
                chars.next();
                line += 1;
                col = 1;
            }
            c if c.is_whitespace() || c == ',' => {
                chars.next();
                col += 1;
            }
            ';' => {
                while let Some(&c) = chars.peek() {
                    if c == '\n' {
                        break;
                    }
                    chars.next();
                    col += 1;
                }
            }
            '(' => {
                chars.next();
                col += 1;
                push!(TokenKind::LParen, tok_line, tok_col);
            }
            ')' => {
                chars.next();
                col += 1;
                push!(TokenKind::RParen, tok_line, tok_col);
            }
            '[' => {
                chars.next();
                col += 1;
                push!(TokenKind::LBracket, tok_line, tok_col);
            }
            ']' => {
                chars.next();
                col += 1;
                push!(TokenKind::RBracket, tok_line, tok_col);
            }
            '{' => {
                chars.next();
                col += 1;
                push!(TokenKind::LBrace, tok_line, tok_col);
            }
            '}' => {
                chars.next();
                col += 1;
                push!(TokenKind::RBrace, tok_line, tok_col);
            }
            '\'' => {
                chars.next();
                col += 1;
                push!(TokenKind::Quote, tok_line, tok_col);
            }
            '"' => {
                chars.next();
                col += 1;
                let mut s = String::new();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    col += 1;
                    match c {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => {
                            let escaped = chars.next().ok_or(LispError::Reader {
                                message: "unterminated escape".into(),
                                line,
                                col,
                            })?;
                            col += 1;
                            s.push(match escaped {
                                'n' => '\n',
                                't' => '\t',
                                'r' => '\r',
                                '"' => '"',
                                '\\' => '\\',
                                other => {
                                    return Err(LispError::Reader {
                                        message: format!("unknown escape \\{other}"),
                                        line,
                                        col,
                                    })
                                }
                            });
                        }
                        '\n' => {
                            line += 1;
                            col = 1;
                            s.push('\n');
                        }
                        other => s.push(other),
                    }
                }
                if !closed {
                    return Err(LispError::Reader {
                        message: "unterminated string".into(),
                        line: tok_line,
                        col: tok_col,
                    });
                }
                push!(TokenKind::Str(s), tok_line, tok_col);
            }
            '#' => {
                chars.next();
                col += 1;
                match chars.peek() {
                    Some('{') => {
                        chars.next();
                        col += 1;
                        push!(TokenKind::SetOpen, tok_line, tok_col);
                    }
                    Some('#') => {
                        // ##Inf, ##-Inf, ##NaN
                        chars.next();
                        col += 1;
                        let mut atom = String::from("##");
                        while let Some(&c) = chars.peek() {
                            if is_atom_char(c) {
                                atom.push(c);
                                chars.next();
                                col += 1;
                            } else {
                                break;
                            }
                        }
                        push!(TokenKind::Atom(atom), tok_line, tok_col);
                    }
                    other => {
                        return Err(LispError::Reader {
                            message: format!("unsupported dispatch #{}", other.unwrap_or(&' ')),
                            line: tok_line,
                            col: tok_col,
                        })
                    }
                }
            }
            _ => {
                let mut atom = String::new();
                while let Some(&c) = chars.peek() {
                    if is_atom_char(c) {
                        atom.push(c);
                        chars.next();
                        col += 1;
                    } else {
                        break;
                    }
                }
                if atom.is_empty() {
                    return Err(LispError::Reader {
                        message: format!("unexpected character {ch:?}"),
                        line: tok_line,
                        col: tok_col,
                    });
                }
                push!(TokenKind::Atom(atom), tok_line, tok_col);
            }
        }
    }

    Ok(tokens)
}

fn is_atom_char(c: char) -> bool {
    !c.is_whitespace()
        && !matches!(c, '(' | ')' | '[' | ']' | '{' | '}' | '"' | ';' | ',' | '\'')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_delimiters_and_atoms() {
        assert_eq!(
            kinds("(+ 1 2)"),
            vec![
                TokenKind::LParen,
                TokenKind::Atom("+".into()),
                TokenKind::Atom("1".into()),
                TokenKind::Atom("2".into()),
                TokenKind::RParen,
            ]
        );
    }

    #[test]
    fn test_set_open_and_special_floats() {
        assert_eq!(
            kinds("#{1} ##Inf"),
            vec![
                TokenKind::SetOpen,
                TokenKind::Atom("1".into()),
                TokenKind::RBrace,
                TokenKind::Atom("##Inf".into()),
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            kinds(r#""a\"b\n""#),
            vec![TokenKind::Str("a\"b\n".into())]
        );
    }

    #[test]
    fn test_comments_and_commas_are_whitespace() {
        assert_eq!(
            kinds("[1, 2] ; trailing\n3"),
            vec![
                TokenKind::LBracket,
                TokenKind::Atom("1".into()),
                TokenKind::Atom("2".into()),
                TokenKind::RBracket,
                TokenKind::Atom("3".into()),
            ]
        );
    }

    #[test]
    fn test_unterminated_string_errors() {
        assert!(tokenize("\"abc").is_err());
    }
}
