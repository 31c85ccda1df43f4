//! 实时通道的事件词汇
//!
//! 客户端发来的命令与服务端推送的事件，均以 JSON 文本帧传输，一帧一个。

pub mod chat_event;
pub mod client_command;

pub use chat_event::*;
pub use client_command::*;
