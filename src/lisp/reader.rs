use super::token::{tokenize, Token, TokenKind};
use super::{LispError, Value};

/// A read but not yet analyzed form, with its source position.
#[derive(Debug, Clone, PartialEq)]
pub struct Form {
    pub kind: FormKind,
    pub line: usize,
    pub col: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FormKind {
    /// Self-evaluating literal: number, string, keyword, bool, nil.
    Literal(Value),
    Symbol(String),
    List(Vec<Form>),
    Vector(Vec<Form>),
    Map(Vec<(Form, Form)>),
    Set(Vec<Form>),
}

impl Form {
    pub fn describe(&self) -> String {
        match &self.kind {
            FormKind::Literal(v) => v.to_string(),
            FormKind::Symbol(s) => s.clone(),
            FormKind::List(items) => match items.first() {
                Some(head) => format!("({} …)", head.describe()),
                None => "()".to_string(),
            },
            FormKind::Vector(_) => "[…]".to_string(),
            FormKind::Map(_) => "{…}".to_string(),
            FormKind::Set(_) => "#{…}".to_string(),
        }
    }

    /// Converts a quoted form back into a plain value. Lists and vectors
    /// both become vectors; symbols stay symbols.
    pub fn to_quoted_value(&self) -> Result<Value, LispError> {
        Ok(match &self.kind {
            FormKind::Literal(v) => v.clone(),
            FormKind::Symbol(s) => Value::symbol(s.clone()),
            FormKind::List(items) | FormKind::Vector(items) => Value::vector(
                items
                    .iter()
                    .map(Form::to_quoted_value)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            FormKind::Set(items) => Value::set(
                items
                    .iter()
                    .map(Form::to_quoted_value)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            FormKind::Map(entries) => {
                let mut map = super::value::ValueMap::new();
                for (key, value) in entries {
                    let key_value = key.to_quoted_value()?;
                    let map_key = super::value::MapKey::from_value(&key_value).ok_or_else(|| {
                        LispError::Reader {
                            message: format!("{} cannot be a map key", key_value.type_name()),
                            line: key.line,
                            col: key.col,
                        }
                    })?;
                    map.insert(map_key, value.to_quoted_value()?);
                }
                Value::map(map)
            }
        })
    }
}

/// Reads all top-level forms from source text.
pub fn read_all(source: &str) -> Result<Vec<Form>, LispError> {
    let tokens = tokenize(source)?;
    let mut reader = Reader { tokens, pos: 0 };
    let mut forms = Vec::new();
    while !reader.at_end() {
        forms.push(reader.read_form()?);
    }
    Ok(forms)
}

/// Reads a single form; trailing tokens are an error.
pub fn read_one(source: &str) -> Result<Form, LispError> {
    let mut forms = read_all(source)?;
    match forms.len() {
        1 => Ok(forms.remove(0)),
        0 => Err(LispError::Reader {
            message: "no form in input".into(),
            line: 1,
            col: 1,
        }),
        _ => Err(LispError::Reader {
            message: "expected a single form".into(),
            line: forms[1].line,
            col: forms[1].col,
        }),
    }
}

struct Reader {
    tokens: Vec<Token>,
    pos: usize,
}

impl Reader {
    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn read_form(&mut self) -> Result<Form, LispError> {
        let token = self.next().ok_or(LispError::Reader {
            message: "unexpected end of input".into(),
            line: 0,
            col: 0,
        })?;
        let (line, col) = (token.line, token.col);
        let kind = match token.kind {
            TokenKind::Str(s) => FormKind::Literal(Value::Str(s)),
            TokenKind::Atom(atom) => self.read_atom(&atom, line, col)?,
            TokenKind::Quote => {
                let quoted = self.read_form()?;
                FormKind::Literal(quoted.to_quoted_value()?)
            }
            TokenKind::LParen => FormKind::List(self.read_until(&TokenKind::RParen, line, col)?),
            TokenKind::LBracket => {
                FormKind::Vector(self.read_until(&TokenKind::RBracket, line, col)?)
            }
            TokenKind::SetOpen => FormKind::Set(self.read_until(&TokenKind::RBrace, line, col)?),
            TokenKind::LBrace => {
                let items = self.read_until(&TokenKind::RBrace, line, col)?;
                if items.len() % 2 != 0 {
                    return Err(LispError::Reader {
                        message: "map literal must contain an even number of forms".into(),
                        line,
                        col,
                    });
                }
                let mut entries = Vec::with_capacity(items.len() / 2);
                let mut iter = items.into_iter();
                while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
                    entries.push((key, value));
                }
                FormKind::Map(entries)
            }
            TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => {
                return Err(LispError::Reader {
                    message: "unmatched closing delimiter".into(),
                    line,
                    col,
                })
            }
        };
        Ok(Form { kind, line, col })
    }

    fn read_until(
        &mut self,
        closing: &TokenKind,
        line: usize,
        col: usize,
    ) -> Result<Vec<Form>, LispError> {
        let mut items = Vec::new();
        loop {
            match self.peek_kind() {
                Some(kind) if kind == closing => {
                    self.next();
                    return Ok(items);
                }
                Some(_) => items.push(self.read_form()?),
                None => {
                    return Err(LispError::Reader {
                        message: "unclosed delimiter".into(),
                        line,
                        col,
                    })
                }
            }
        }
    }

    fn read_atom(&self, atom: &str, line: usize, col: usize) -> Result<FormKind, LispError> {
        Ok(match atom {
            "nil" => FormKind::Literal(Value::Nil),
            "true" => FormKind::Literal(Value::Bool(true)),
            "false" => FormKind::Literal(Value::Bool(false)),
            "##Inf" => FormKind::Literal(Value::Float(f64::INFINITY)),
            "##-Inf" => FormKind::Literal(Value::Float(f64::NEG_INFINITY)),
            "##NaN" => FormKind::Literal(Value::Float(f64::NAN)),
            _ if atom.starts_with(':') => {
                let name = &atom[1..];
                if name.is_empty() {
                    return Err(LispError::Reader {
                        message: "empty keyword".into(),
                        line,
                        col,
                    });
                }
                FormKind::Literal(Value::keyword(name))
            }
            _ => {
                if let Some(number) = parse_number(atom) {
                    FormKind::Literal(number)
                } else if atom.starts_with("##") {
                    return Err(LispError::Reader {
                        message: format!("unknown reader literal {atom}"),
                        line,
                        col,
                    });
                } else {
                    FormKind::Symbol(atom.to_string())
                }
            }
        })
    }
}

fn parse_number(atom: &str) -> Option<Value> {
    let looks_numeric = atom
        .strip_prefix('-')
        .unwrap_or(atom)
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit());
    if !looks_numeric {
        return None;
    }
    if let Ok(n) = atom.parse::<i64>() {
        return Some(Value::Int(n));
    }
    atom.parse::<f64>().ok().map(Value::Float)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(source: &str) -> Form {
        read_one(source).unwrap()
    }

    #[test]
    fn test_reads_literals() {
        assert_eq!(read("42").kind, FormKind::Literal(Value::Int(42)));
        assert_eq!(read("-3.5").kind, FormKind::Literal(Value::Float(-3.5)));
        assert_eq!(read(":name").kind, FormKind::Literal(Value::keyword("name")));
        assert_eq!(read("nil").kind, FormKind::Literal(Value::Nil));
    }

    #[test]
    fn test_reads_nested_collections() {
        let form = read("(f [1 2] {:a 1})");
        let FormKind::List(items) = form.kind else {
            panic!("expected list");
        };
        assert_eq!(items.len(), 3);
        assert!(matches!(items[1].kind, FormKind::Vector(_)));
        assert!(matches!(items[2].kind, FormKind::Map(_)));
    }

    #[test]
    fn test_set_literal() {
        let form = read("#{1 2 2}");
        assert!(matches!(form.kind, FormKind::Set(_)));
    }

    #[test]
    fn test_quote_produces_literal() {
        let form = read("'(a b)");
        let FormKind::Literal(value) = form.kind else {
            panic!("expected literal");
        };
        assert_eq!(
            value,
            Value::vector(vec![Value::symbol("a"), Value::symbol("b")])
        );
    }

    #[test]
    fn test_odd_map_literal_is_error() {
        assert!(read_one("{:a}").is_err());
    }

    #[test]
    fn test_symbol_with_slash() {
        assert_eq!(
            read("clojure.set/union").kind,
            FormKind::Symbol("clojure.set/union".into())
        );
    }

    #[test]
    fn test_special_floats() {
        assert_eq!(read("##Inf").kind, FormKind::Literal(Value::Float(f64::INFINITY)));
        let FormKind::Literal(Value::Float(nan)) = read("##NaN").kind else {
            panic!("expected float");
        };
        assert!(nan.is_nan());
    }
}
