use thiserror::Error;

/// Fatal conditions of a conversion run. Anything raised here aborts the run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("unexpected structure in {context}: {message}")]
    Structure { context: String, message: String },

    #[error("could not resolve {what}: {detail}")]
    Resolution { what: &'static str, detail: String },

    #[error("{relation}.{field} value {key:?} maps to both pk {first} and pk {second}")]
    DuplicateRelated {
        relation: String,
        field: String,
        key: String,
        first: u64,
        second: u64,
    },

    #[error("cannot translate fields.{relation}__{field} from {value:?}")]
    Translation {
        relation: String,
        field: String,
        value: String,
    },
}

impl PipelineError {
    pub fn structure(context: impl Into<String>, message: impl Into<String>) -> Self {
        PipelineError::Structure {
            context: context.into(),
            message: message.into(),
        }
    }
}
