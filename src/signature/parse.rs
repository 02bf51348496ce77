use super::{Field, Param, Signature, SignatureError, Type};

/// Parses a contract string.
///
/// Accepted spellings: `(name :int) -> :string`, `-> {result :int}`, and the
/// return-only shorthand `:int`.
pub fn parse(source: &str) -> Result<Signature, SignatureError> {
    let mut parser = Parser {
        chars: source.char_indices().peekable(),
        source,
    };
    parser.skip_ws();

    let params = if parser.peek() == Some('(') {
        let params = parser.parse_params()?;
        parser.skip_ws();
        parser.expect_arrow()?;
        params
    } else {
        if parser.peek() == Some('-') {
            parser.expect_arrow()?;
        }
        Vec::new()
    };

    parser.skip_ws();
    let returns = parser.parse_type()?;
    parser.skip_ws();
    if let Some((position, c)) = parser.chars.peek().copied() {
        return Err(parser.error(position, format!("unexpected trailing {c:?}")));
    }
    Ok(Signature { params, returns })
}

/// Parses a bare type expression (no params, no arrow).
pub fn parse_type(source: &str) -> Result<Type, SignatureError> {
    let mut parser = Parser {
        chars: source.char_indices().peekable(),
        source,
    };
    parser.skip_ws();
    let ty = parser.parse_type()?;
    parser.skip_ws();
    if let Some((position, c)) = parser.chars.peek().copied() {
        return Err(parser.error(position, format!("unexpected trailing {c:?}")));
    }
    Ok(ty)
}

struct Parser<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    source: &'a str,
}

impl Parser<'_> {
    fn error(&self, position: usize, message: impl Into<String>) -> SignatureError {
        SignatureError::InvalidSignature {
            message: message.into(),
            position,
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, c)| *c)
    }

    fn position(&mut self) -> usize {
        self.chars
            .peek()
            .map(|(i, _)| *i)
            .unwrap_or(self.source.len())
    }

    fn bump(&mut self) -> Option<char> {
        self.chars.next().map(|(_, c)| c)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    fn expect(&mut self, wanted: char) -> Result<(), SignatureError> {
        let position = self.position();
        match self.bump() {
            Some(c) if c == wanted => Ok(()),
            Some(c) => Err(self.error(position, format!("expected {wanted:?}, found {c:?}"))),
            None => Err(self.error(position, format!("expected {wanted:?}, found end of input"))),
        }
    }

    fn expect_arrow(&mut self) -> Result<(), SignatureError> {
        self.skip_ws();
        self.expect('-')?;
        self.expect('>')
    }

    fn parse_ident(&mut self) -> Result<String, SignatureError> {
        let position = self.position();
        let mut name = String::new();
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_' || c == '-') {
            name.push(self.bump().expect("peeked"));
        }
        if name.is_empty() {
            return Err(self.error(position, "expected a name"));
        }
        Ok(name)
    }

    fn parse_params(&mut self) -> Result<Vec<Param>, SignatureError> {
        self.expect('(')?;
        let mut params = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                Some(')') => {
                    self.bump();
                    return Ok(params);
                }
                None => {
                    let position = self.position();
                    return Err(self.error(position, "unterminated parameter list"));
                }
                _ => {
                    if !params.is_empty() {
                        self.expect(',')?;
                        self.skip_ws();
                    }
                    let name = self.parse_ident()?;
                    self.skip_ws();
                    let ty = self.parse_type()?;
                    params.push(Param { name, ty });
                }
            }
        }
    }

    fn parse_type(&mut self) -> Result<Type, SignatureError> {
        self.skip_ws();
        let position = self.position();
        let base = match self.peek() {
            Some(':') => {
                self.bump();
                let name = self.parse_ident()?;
                match name.as_str() {
                    "string" => Type::String,
                    "int" => Type::Int,
                    "float" => Type::Float,
                    "bool" => Type::Bool,
                    "keyword" => Type::Keyword,
                    "any" => Type::Any,
                    "map" => Type::Map,
                    other => {
                        return Err(self.error(position, format!("unknown primitive :{other}")))
                    }
                }
            }
            Some('[') => {
                self.bump();
                let element = self.parse_type()?;
                self.skip_ws();
                self.expect(']')?;
                Type::List(Box::new(element))
            }
            Some('{') => {
                self.bump();
                let mut fields: Vec<Field> = Vec::new();
                loop {
                    self.skip_ws();
                    match self.peek() {
                        Some('}') => {
                            self.bump();
                            break;
                        }
                        None => {
                            let position = self.position();
                            return Err(self.error(position, "unterminated map type"));
                        }
                        _ => {
                            if !fields.is_empty() {
                                self.expect(',')?;
                                self.skip_ws();
                            }
                            let name = self.parse_ident()?;
                            self.skip_ws();
                            let ty = self.parse_type()?;
                            if fields.iter().any(|field| field.name == name) {
                                return Err(
                                    self.error(position, format!("duplicate field {name}"))
                                );
                            }
                            fields.push(Field { name, ty });
                        }
                    }
                }
                Type::Record(fields)
            }
            Some(c) => return Err(self.error(position, format!("expected a type, found {c:?}"))),
            None => return Err(self.error(position, "expected a type, found end of input")),
        };

        if self.peek() == Some('?') {
            self.bump();
            Ok(Type::Optional(Box::new(base)))
        } else {
            Ok(base)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_signature() {
        let sig = parse("(n :int, name :string) -> [:int]").unwrap();
        assert_eq!(sig.params.len(), 2);
        assert_eq!(sig.params[0].name, "n");
        assert_eq!(sig.params[0].ty, Type::Int);
        assert_eq!(sig.returns, Type::List(Box::new(Type::Int)));
    }

    #[test]
    fn test_return_only_shorthand() {
        let sig = parse(":int").unwrap();
        assert!(sig.params.is_empty());
        assert_eq!(sig.returns, Type::Int);
    }

    #[test]
    fn test_arrow_without_params() {
        let sig = parse("-> {result :int}").unwrap();
        assert!(sig.params.is_empty());
        assert_eq!(
            sig.returns,
            Type::Record(vec![Field {
                name: "result".into(),
                ty: Type::Int,
            }])
        );
    }

    #[test]
    fn test_optional_wrappers() {
        let sig = parse("(x :int?) -> {a :string, b [:int]?}").unwrap();
        assert!(sig.params[0].ty.is_optional());
        let Type::Record(fields) = &sig.returns else {
            panic!("expected record");
        };
        assert!(!fields[0].is_optional());
        assert!(fields[1].is_optional());
    }

    #[test]
    fn test_firewalled_field_names_parse() {
        let sig = parse("-> {summary :string, _ids [:int]}").unwrap();
        let Type::Record(fields) = &sig.returns else {
            panic!("expected record");
        };
        assert!(fields[1].is_firewalled());
        assert!(!fields[0].is_firewalled());
    }

    #[test]
    fn test_nested_composites() {
        let sig = parse("-> [{id :int, tags [:keyword]}]").unwrap();
        let Type::List(element) = &sig.returns else {
            panic!("expected list");
        };
        assert!(matches!(element.as_ref(), Type::Record(_)));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse("(n :int -> :int").is_err());
        assert!(parse(":whatever").is_err());
        assert!(parse("-> {a :int, a :int}").is_err());
        assert!(parse(":int junk").is_err());
        assert!(parse("").is_err());
    }

    #[test]
    fn test_render_parse_round_trip() {
        for source in [
            "(n :int, s :string) -> :int",
            "-> {summary :string, _ids [:int], note :string?}",
            ":map",
            "(items [:any]) -> {groups {a [:int]}}",
        ] {
            let sig = parse(source).unwrap();
            let rendered = sig.render();
            let reparsed = parse(&rendered).unwrap();
            assert_eq!(sig, reparsed, "round trip failed for {source}");
        }
    }
}
