//! Remote conversation API — trait seam and reqwest client.

pub mod client;

pub use client::{ApiError, AudioUpload, ConversationApi, HttpConversationApi};

#[cfg(test)]
pub use client::mock::MockApi;
