use serde::{Deserialize, Serialize};

use crate::models::{Conversation, Message, PublicProfile};

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub display_name: String,
    pub photo_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: PublicProfile,
}

// -- Conversations --

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub conversation: Conversation,
    pub messages: Vec<Message>,
}
