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

use bytes::Bytes;

use crate::message::{InboundMessage, Sid};

use super::{ConnectOptions, ServerInfo};

/// Frames the server sends to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Info(ServerInfo),
    Ping,
    Pong,
    Msg(InboundMessage),
    /// `+OK`, only sent to verbose clients
    Ok,
    /// `-ERR`, with the quotes stripped from the reason
    Err(String),
}

impl ServerMessage {
    pub fn name(&self) -> &'static str {
        match self {
            ServerMessage::Info(_) => "INFO",
            ServerMessage::Ping => "PING",
            ServerMessage::Pong => "PONG",
            ServerMessage::Msg(_) => "MSG",
            ServerMessage::Ok => "+OK",
            ServerMessage::Err(_) => "-ERR",
        }
    }
}

/// Frames the client sends to the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Connect(ConnectOptions),
    Ping,
    Pong,
    Pub {
        subject: String,
        reply_to: Option<String>,
        payload: Bytes,
    },
    Sub {
        subject: String,
        queue_group: Option<String>,
        sid: Sid,
    },
    Unsub {
        sid: Sid,
        max_msgs: Option<u64>,
    },
}

impl ClientMessage {
    pub fn name(&self) -> &'static str {
        match self {
            ClientMessage::Connect(_) => "CONNECT",
            ClientMessage::Ping => "PING",
            ClientMessage::Pong => "PONG",
            ClientMessage::Pub { .. } => "PUB",
            ClientMessage::Sub { .. } => "SUB",
            ClientMessage::Unsub { .. } => "UNSUB",
        }
    }
}
