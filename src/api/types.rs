//! Wire types of the control-plane API. Field names are the contract and
//! are shared with the client SDK.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
	pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
	pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PathRequest {
	pub path: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MkdirResponse {
	pub message: String,
	pub path: String,
	pub id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LsEntry {
	pub name: String,
	pub is_directory: bool,
	pub size: u64,
	/// RFC 3339 modification time
	pub modified: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LsResponse {
	pub path: String,
	pub contents: Vec<LsEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PutInitiateRequest {
	pub path: String,
	pub size: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BlockAssignmentInfo {
	pub block_id: String,
	pub primary_datanode_grpc: String,
	pub secondary_datanode_grpc: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PutPlanData {
	pub file_id: i64,
	pub block_assignments: Vec<BlockAssignmentInfo>,
	pub block_size: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PutInitiateResponse {
	pub data: PutPlanData,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PutCompleteRequest {
	pub path: String,
	pub file_id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BlockReadData {
	pub block_id: String,
	pub sequence: u32,
	pub size: u64,
	/// Addresses of the active replicas, in preference order
	pub datanode_grpc_addresses: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FileInfoData {
	pub file_name: String,
	pub total_size: u64,
	pub block_size: u64,
	pub blocks: Vec<BlockReadData>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetResponse {
	pub data: FileInfoData,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterRequest {
	pub datanode_id: String,
	pub grpc_address: String,
	pub flask_address: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
	pub message: String,
	pub id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HeartbeatRequest {
	pub datanode_id: String,
}

/// Work handed back to a node with a heartbeat acknowledgement. Reserved
/// for a future re-replication daemon; always empty today.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TaskSet {
	pub replication_tasks: Vec<ReplicationTask>,
	pub deletion_tasks: Vec<DeletionTask>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReplicationTask {
	pub block_id: String,
	pub source: String,
	pub target: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeletionTask {
	pub block_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HeartbeatResponse {
	pub tasks: TaskSet,
}
