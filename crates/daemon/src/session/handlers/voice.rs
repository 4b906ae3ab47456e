//! Voice conversation verbs. Conversation history is fully persisted;
//! dictation and realtime audio need an STT provider, which this daemon
//! does not bundle.

use paseo_domain::{Error, Result};
use paseo_protocol::session::ServerMessage;
use paseo_protocol::types::VoiceConversation;

use crate::session::Session;

pub async fn set_conversation(
    session: &Session,
    request_id: String,
    conversation: VoiceConversation,
) -> Result<ServerMessage> {
    session.daemon.voice.set(&conversation)?;
    Ok(ServerMessage::SetVoiceConversationResponse { request_id })
}

pub async fn load_conversation(
    session: &Session,
    request_id: String,
    conversation_id: &str,
) -> Result<ServerMessage> {
    let conversation = session.daemon.voice.load(conversation_id)?;
    Ok(ServerMessage::LoadVoiceConversationResponse {
        request_id,
        conversation,
    })
}

pub async fn list_conversations(session: &Session, request_id: String) -> Result<ServerMessage> {
    Ok(ServerMessage::ListVoiceConversationsResponse {
        request_id,
        conversations: session.daemon.voice.list()?,
    })
}

pub async fn delete_conversation(
    session: &Session,
    request_id: String,
    conversation_id: &str,
) -> Result<ServerMessage> {
    let deleted = session.daemon.voice.delete(conversation_id)?;
    Ok(ServerMessage::DeleteVoiceConversationResponse {
        request_id,
        deleted,
    })
}

pub fn dictation_unavailable(_request_id: String) -> Result<ServerMessage> {
    Err(Error::BadRequest("no voice provider configured".into()))
}
