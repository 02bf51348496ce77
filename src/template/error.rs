use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("unclosed section {{{{#{0}}}}}")]
    UnclosedSection(String),

    #[error("unexpected closing tag {{{{/{0}}}}}")]
    UnexpectedClose(String),

    #[error("section {{{{#{name}}}}} expects a list, got {got}")]
    SectionNotAList { name: String, got: String },
}
