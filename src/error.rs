use thiserror::Error;

pub type Result<T> = std::result::Result<T, AttritionError>;

#[derive(Error, Debug)]
pub enum AttritionError {
    #[error("bad input data: {message}")]
    Data { message: String },

    #[error("bad parameter: {parameter} = {value}")]
    Validation { parameter: String, value: String },

    #[error("metric undefined: {message}")]
    MetricUndefined { message: String },

    #[error("{stage} not fitted yet - call fit() first")]
    FitPrecondition { stage: String },

    #[error("training blew up: {message}")]
    TrainingFailure { message: String },

    #[error("configuration problem: {message}")]
    Config { message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("dataframe error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl AttritionError {
    pub fn data(message: impl Into<String>) -> Self {
        Self::Data { message: message.into() }
    }

    pub fn validation(parameter: impl Into<String>, value: impl ToString) -> Self {
        Self::Validation {
            parameter: parameter.into(),
            value: value.to_string(),
        }
    }

    pub fn metric_undefined(message: impl Into<String>) -> Self {
        Self::MetricUndefined { message: message.into() }
    }

    pub fn not_fitted(stage: impl Into<String>) -> Self {
        Self::FitPrecondition { stage: stage.into() }
    }

    pub fn training_failure(message: impl Into<String>) -> Self {
        Self::TrainingFailure { message: message.into() }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    /// true for the failures a serving layer should report as a bad request
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Data { .. } | Self::Validation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_context() {
        let err = AttritionError::validation("num_samples", 0);
        assert_eq!(err.to_string(), "bad parameter: num_samples = 0");

        let err = AttritionError::not_fitted("preprocessor");
        assert_eq!(err.to_string(), "preprocessor not fitted yet - call fit() first");
    }

    #[test]
    fn test_client_errors() {
        assert!(AttritionError::data("empty").is_client_error());
        assert!(AttritionError::validation("ratio", -1.0).is_client_error());
        assert!(!AttritionError::metric_undefined("no events").is_client_error());
        assert!(!AttritionError::training_failure("nan").is_client_error());
    }
}
