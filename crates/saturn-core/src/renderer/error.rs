// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Defines the hierarchy of error types for the rendering subsystem.

use crate::renderer::api::ShaderModuleId;
use std::fmt;

/// An error related to the creation or compilation of a shader module.
#[derive(Debug)]
pub enum ShaderError {
    /// The shader source failed to compile into a backend-specific module.
    CompilationError {
        /// A descriptive label for the shader, if available.
        label: String,
        /// Detailed error messages from the shader compiler.
        details: String,
    },
    /// The specified entry point (e.g., `vs_main`) is not valid for the shader module.
    InvalidEntryPoint {
        /// The ID of the shader module.
        id: ShaderModuleId,
        /// The entry point name that was not found.
        entry_point: String,
    },
}

impl fmt::Display for ShaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderError::CompilationError { label, details } => {
                write!(f, "Shader compilation failed for '{label}': {details}")
            }
            ShaderError::InvalidEntryPoint { id, entry_point } => {
                write!(
                    f,
                    "Invalid entry point '{entry_point}' for shader module {id:?}"
                )
            }
        }
    }
}

impl std::error::Error for ShaderError {}

/// An error related to the creation or use of a GPU resource (buffers, textures, etc.).
#[derive(Debug)]
pub enum ResourceError {
    /// A shader-specific error occurred.
    Shader(ShaderError),
    /// A generic resource could not be found.
    NotFound,
    /// The handle or ID used to reference a resource is invalid.
    InvalidHandle,
    /// The device could not allocate memory for a resource.
    OutOfMemory {
        /// Label of the resource that failed to allocate.
        label: String,
        /// Requested size in bytes.
        requested: u64,
    },
    /// An error originating from the specific graphics backend implementation.
    BackendError(String),
    /// An attempt was made to access a resource out of its bounds (e.g., in a buffer).
    OutOfBounds,
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceError::Shader(err) => write!(f, "Shader resource error: {err}"),
            ResourceError::NotFound => write!(f, "Resource not found with ID."),
            ResourceError::InvalidHandle => write!(f, "Invalid resource handle or ID."),
            ResourceError::OutOfMemory { label, requested } => {
                write!(f, "Out of GPU memory allocating '{label}' ({requested} bytes)")
            }
            ResourceError::BackendError(msg) => {
                write!(f, "Backend-specific resource error: {msg}")
            }
            ResourceError::OutOfBounds => {
                write!(f, "Resource access out of bounds.")
            }
        }
    }
}

impl std::error::Error for ResourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ResourceError::Shader(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ShaderError> for ResourceError {
    fn from(err: ShaderError) -> Self {
        ResourceError::Shader(err)
    }
}

/// A high-level error that can occur within the renderer or graphics device.
#[derive(Debug)]
pub enum RenderError {
    /// An operation was attempted before the renderer was initialized.
    NotInitialized,
    /// A failure occurred while creating the renderer's GPU resources.
    InitializationFailed(String),
    /// A rendering operation failed.
    RenderingFailed(String),
    /// A GPU buffer or image could not be allocated.
    ///
    /// Fatal for the operation that triggered it: the frame is skipped and
    /// nothing partial is drawn.
    AllocationFailed {
        /// What was being allocated.
        resource: String,
        /// The device error behind the failure.
        source: ResourceError,
    },
    /// An error occurred while managing a GPU resource.
    ResourceError(ResourceError),
    /// The graphics device was lost (e.g., GPU driver crashed or was updated).
    /// This is a catastrophic error that typically requires reinitialization.
    DeviceLost,
    /// An unexpected or internal error occurred.
    Internal(String),
}

impl RenderError {
    /// Wraps a device error raised while allocating `resource`.
    pub fn allocation(resource: impl Into<String>, source: ResourceError) -> Self {
        RenderError::AllocationFailed {
            resource: resource.into(),
            source,
        }
    }

    /// Returns `true` for faults the host should treat as unrecoverable for the frame.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RenderError::AllocationFailed { .. } | RenderError::DeviceLost
        )
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::NotInitialized => {
                write!(f, "The renderer is not initialized.")
            }
            RenderError::InitializationFailed(msg) => {
                write!(f, "Failed to initialize renderer resources: {msg}")
            }
            RenderError::RenderingFailed(msg) => {
                write!(f, "A rendering operation failed: {msg}")
            }
            RenderError::AllocationFailed { resource, source } => {
                write!(f, "Failed to allocate {resource}: {source}")
            }
            RenderError::ResourceError(err) => {
                write!(f, "Graphics resource operation failed: {err}")
            }
            RenderError::DeviceLost => write!(
                f,
                "The graphics device was lost and needs to be reinitialized."
            ),
            RenderError::Internal(msg) => {
                write!(f, "An internal or unexpected error occurred: {msg}")
            }
        }
    }
}

impl std::error::Error for RenderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RenderError::ResourceError(err) => Some(err),
            RenderError::AllocationFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ResourceError> for RenderError {
    fn from(err: ResourceError) -> Self {
        RenderError::ResourceError(err)
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;

    #[test]
    fn resource_error_display_wrapping_shader_error() {
        let shader_err = ShaderError::InvalidEntryPoint {
            id: ShaderModuleId(42),
            entry_point: "vs_main".to_string(),
        };
        let res_err: ResourceError = shader_err.into();
        assert_eq!(
            format!("{res_err}"),
            "Shader resource error: Invalid entry point 'vs_main' for shader module ShaderModuleId(42)"
        );
        assert!(res_err.source().is_some());
    }

    #[test]
    fn allocation_failure_is_fatal_and_chains_source() {
        let err = RenderError::allocation(
            "transform buffer",
            ResourceError::OutOfMemory {
                label: "Transforms".to_string(),
                requested: 4096,
            },
        );
        assert!(err.is_fatal());
        assert_eq!(
            format!("{err}"),
            "Failed to allocate transform buffer: Out of GPU memory allocating 'Transforms' (4096 bytes)"
        );
        assert!(err.source().is_some());
    }

    #[test]
    fn resource_errors_are_not_fatal() {
        let err: RenderError = ResourceError::InvalidHandle.into();
        assert!(!err.is_fatal());
        assert!(RenderError::DeviceLost.is_fatal());
    }
}
