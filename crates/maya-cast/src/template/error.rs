//! Template error types

use std::fmt;

/// Errors that can occur during template operations
#[derive(Debug)]
pub enum TemplateError {
    /// Template rendering failed
    Render(minijinja::Error),
    /// The effect buffer shared with template functions is unusable
    Effects(String),
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Render(e) => write!(f, "template render error: {:#}", e),
            Self::Effects(msg) => write!(f, "template effects error: {}", msg),
        }
    }
}

impl std::error::Error for TemplateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Render(e) => Some(e),
            _ => None,
        }
    }
}

impl From<minijinja::Error> for TemplateError {
    fn from(err: minijinja::Error) -> Self {
        Self::Render(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TemplateError::Effects("lock poisoned".to_string());
        assert!(err.to_string().contains("lock poisoned"));
    }

    #[test]
    fn test_render_error_has_source() {
        let err = TemplateError::from(minijinja::Error::new(
            minijinja::ErrorKind::UndefinedError,
            "Config.missing",
        ));
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("template render error"));
    }
}
