//! Renderer error types.

use thiserror::Error;

use deferred_rhi::RhiError;

/// Errors raised while building or driving the deferred pipeline.
#[derive(Error, Debug)]
pub enum RenderError {
    /// GPU object creation or command failure
    #[error(transparent)]
    Rhi(#[from] RhiError),

    /// Window, surface or configuration failure
    #[error(transparent)]
    Core(#[from] deferred_core::Error),

    /// Queue submission failed; the frame's work was never queued
    #[error("Queue submission failed: {0}")]
    Submission(String),

    /// A pass could not create its GPU objects
    #[error("Pass '{pass}' failed to initialize: {source}")]
    PassInitialization {
        pass: &'static str,
        #[source]
        source: Box<RenderError>,
    },

    /// Frames were requested before the pipeline was initialized
    #[error("Pass pipeline used before initialization")]
    PipelineNotInitialized,

    /// A consumer read a resource no pass has published
    #[error("Missing pass dependency: {0}")]
    MissingDependency(String),

    /// Scene data could not be uploaded
    #[error("Scene error: {0}")]
    Scene(String),
}

impl RenderError {
    /// Fatal errors end the frame loop. Everything else may be retried after
    /// a swapchain recreation.
    pub fn is_fatal(&self) -> bool {
        match self {
            RenderError::Submission(_)
            | RenderError::PassInitialization { .. }
            | RenderError::PipelineNotInitialized
            | RenderError::Scene(_) => true,
            RenderError::Rhi(RhiError::VulkanError(result)) => matches!(
                *result,
                ash::vk::Result::ERROR_DEVICE_LOST
                    | ash::vk::Result::ERROR_OUT_OF_HOST_MEMORY
                    | ash::vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
            ),
            RenderError::Rhi(_) | RenderError::Core(_) | RenderError::MissingDependency(_) => false,
        }
    }
}

/// Result type alias for renderer operations.
pub type RenderResult<T> = std::result::Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submission_is_fatal() {
        assert!(RenderError::Submission("lost".into()).is_fatal());
    }

    #[test]
    fn test_pass_initialization_names_pass() {
        let err = RenderError::PassInitialization {
            pass: "gbuffer",
            source: Box::new(RenderError::Rhi(RhiError::ShaderError("missing".into()))),
        };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("gbuffer"));
    }

    #[test]
    fn test_out_of_date_is_recoverable() {
        let err = RenderError::from(RhiError::VulkanError(ash::vk::Result::ERROR_OUT_OF_DATE_KHR));
        assert!(!err.is_fatal());
        let lost = RenderError::from(RhiError::VulkanError(ash::vk::Result::ERROR_DEVICE_LOST));
        assert!(lost.is_fatal());
    }
}
