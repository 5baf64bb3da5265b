//! A2A (Agent2Agent) protocol types.
//!
//! A trimmed rendition of the A2A JSON schema covering what the router core
//! speaks on the wire: messages and their parts, tasks and their lifecycle
//! states, the streaming event union, and the JSON-RPC 2.0 envelope shared by
//! the per-agent server and the backend client.

pub mod rpc;
pub mod types;

pub use rpc::{JsonRpcError, JsonRpcId, JsonRpcRequest, JsonRpcResponse, JSONRPC_VERSION};
pub use types::{
    AgentCapabilities, AgentCard, Artifact, FileContent, Message, MessageRole, MessageSendParams,
    Part, SendMessageResult, StreamEvent, Task, TaskArtifactUpdateEvent, TaskQueryParams,
    TaskState, TaskStatus, TaskStatusUpdateEvent, AGENT_CARD_PATH,
};
