//! Message types shared by the demo providers and callers.

#![allow(dead_code)]

use beacon_rpc::ResultCode;
use serde::{Deserialize, Serialize};

/// Input for `UserService.Login`.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginRequest {
    pub name: String,
    pub pwd: String,
}

/// Output of `UserService.Login`.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginResponse {
    pub result: ResultCode,
    pub success: bool,
}

/// Input for `UserService.Register` (not published by the demo provider).
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegisterRequest {
    pub id: u32,
    pub name: String,
    pub pwd: String,
}

/// Output of `UserService.Register`.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegisterResponse {
    pub result: ResultCode,
    pub success: bool,
}

/// Input for `FriendService.GetFriendsList`.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GetFriendsListRequest {
    pub id: u32,
}

/// Output of `FriendService.GetFriendsList`.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GetFriendsListResponse {
    pub result: ResultCode,
    pub friends: Vec<String>,
}
