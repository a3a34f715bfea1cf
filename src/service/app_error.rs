// Copyright 2025 jonefeewang@gmail.com
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

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// handshake errors, fatal at startup
    #[error("connect error: {0}")]
    ConnectError(String),

    /// steady-state errors, the connection is closed afterwards
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("frame too large: {0}")]
    FrameTooLarge(String),

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// two callers awaited the same sid at the same time
    #[error("correlation misuse: {0}")]
    CorrelationMisuse(String),

    /// general errors
    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("channel send error: {0}")]
    ChannelSendError(String),

    #[error("channel recv error: {0}")]
    ChannelRecvError(String),

    #[error("config file error: {0}")]
    ConfigFileError(#[from] config::ConfigError),

    /// marker error, the buffer does not hold a complete frame yet
    #[error("incomplete frame")]
    Incomplete,
}

impl AppError {
    /// Errors after which the connection cannot continue.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::MalformedFrame(_)
                | AppError::FrameTooLarge(_)
                | AppError::ConnectionLost(_)
                | AppError::IoError(_)
        )
    }
}
