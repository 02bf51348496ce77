use std::fmt::{self, Display, Write as _};

/// A parsed contract type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    String,
    Int,
    Float,
    Bool,
    Keyword,
    /// Accepts anything.
    Any,
    /// Any map, fields unconstrained.
    Map,
    List(Box<Type>),
    /// A map with named, typed fields. Extra fields are allowed and
    /// preserved.
    Record(Vec<Field>),
    Optional(Box<Type>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub ty: Type,
}

impl Field {
    /// Fields named with a leading underscore are firewalled: present in
    /// program data, hidden from LLM-visible text.
    pub fn is_firewalled(&self) -> bool {
        self.name.starts_with('_')
    }

    pub fn is_optional(&self) -> bool {
        matches!(self.ty, Type::Optional(_))
    }
}

impl Type {
    pub fn is_optional(&self) -> bool {
        matches!(self, Type::Optional(_))
    }

    /// The type with one level of optionality stripped.
    pub fn unwrap_optional(&self) -> &Type {
        match self {
            Type::Optional(inner) => inner,
            other => other,
        }
    }

    /// Canonical contract spelling, the inverse of the parser.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out);
        out
    }

    fn render_into(&self, out: &mut String) {
        match self {
            Type::String => out.push_str(":string"),
            Type::Int => out.push_str(":int"),
            Type::Float => out.push_str(":float"),
            Type::Bool => out.push_str(":bool"),
            Type::Keyword => out.push_str(":keyword"),
            Type::Any => out.push_str(":any"),
            Type::Map => out.push_str(":map"),
            Type::List(element) => {
                out.push('[');
                element.render_into(out);
                out.push(']');
            }
            Type::Record(fields) => {
                out.push('{');
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&field.name);
                    out.push(' ');
                    field.ty.render_into(out);
                }
                out.push('}');
            }
            Type::Optional(inner) => {
                inner.render_into(out);
                out.push('?');
            }
        }
    }

    /// How the type reads inside a prompt: colon-free, firewalled fields
    /// hidden.
    pub fn render_for_prompt(&self) -> String {
        let mut out = String::new();
        self.prompt_into(&mut out);
        out
    }

    fn prompt_into(&self, out: &mut String) {
        match self {
            Type::String => out.push_str("string"),
            Type::Int => out.push_str("int"),
            Type::Float => out.push_str("float"),
            Type::Bool => out.push_str("bool"),
            Type::Keyword => out.push_str("keyword"),
            Type::Any => out.push_str("any"),
            Type::Map => out.push_str("map"),
            Type::List(element) => {
                out.push('[');
                element.prompt_into(out);
                out.push(']');
            }
            Type::Record(fields) => {
                out.push('{');
                let mut first = true;
                for field in fields {
                    if field.is_firewalled() {
                        continue;
                    }
                    if !first {
                        out.push_str(", ");
                    }
                    first = false;
                    out.push_str(&field.name);
                    out.push(' ');
                    field.ty.prompt_into(out);
                }
                out.push('}');
            }
            Type::Optional(inner) => {
                inner.prompt_into(out);
                out.push('?');
            }
        }
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// A named parameter of a signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub ty: Type,
}

/// A parsed `(params) -> return` contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub params: Vec<Param>,
    pub returns: Type,
}

impl Signature {
    /// A return-only contract.
    pub fn returning(returns: Type) -> Self {
        Signature {
            params: Vec::new(),
            returns,
        }
    }

    pub fn param(&self, name: &str) -> Option<&Param> {
        self.params.iter().find(|param| param.name == name)
    }

    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(|param| param.name.as_str())
    }

    /// Canonical spelling; parses back to an equivalent signature.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push('(');
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            let _ = write!(out, "{} {}", param.name, param.ty.render());
        }
        out.push_str(") -> ");
        out.push_str(&self.returns.render());
        out
    }
}

impl Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
