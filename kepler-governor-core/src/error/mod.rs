/*
 *     Copyright 2025 The Kepler Authors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

pub mod errors;

pub use errors::ErrorType;
pub use errors::ExternalError;
pub use errors::OrErr;

// GovernorError is the error for the resource governor.
#[derive(thiserror::Error, Debug)]
pub enum GovernorError {
    // IO is the error for IO operation.
    #[error(transparent)]
    IO(#[from] std::io::Error),

    // ProcessNotFound is the error when the monitored process is not found.
    #[error("process {0} not found")]
    ProcessNotFound(u32),

    // Unsupported is the error when the platform does not provide a mechanism.
    #[error("unsupported {0}")]
    Unsupported(String),

    // InvalidParameter is the error when the parameter is invalid.
    #[error("invalid parameter")]
    InvalidParameter,

    // ValidationError is the error for validate.
    #[error("validate failed: {0}")]
    ValidationError(String),

    // ExternalError is the error for external error.
    #[error(transparent)]
    ExternalError(#[from] ExternalError),

    // Unknown is the error when the error is unknown.
    #[error("unknown {0}")]
    Unknown(String),
}
