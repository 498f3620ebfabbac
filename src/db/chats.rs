use super::{parse_enum, parse_json, parse_time, Database};
use crate::errors::{AppError, AppResult};
use crate::models::{AiChat, AiChatMessage, ChatContext, CreateChatPayload, MessageRole};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

const CHAT_COLUMNS: &str = "id, title, context, user_id, organization_id, application_id, created_at, updated_at";

impl Database {
    pub fn insert_chat(&self, payload: &CreateChatPayload) -> AppResult<AiChat> {
        let now = Utc::now();
        let chat = AiChat {
            id: Uuid::new_v4().to_string(),
            title: normalize_chat_title(payload.title.as_deref().unwrap_or_default()),
            context: payload.context,
            user_id: payload.user_id.clone(),
            organization_id: payload.organization_id.clone(),
            application_id: payload.application_id.clone(),
            created_at: now,
            updated_at: now,
        };

        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO ai_chats (id, title, context, user_id, organization_id, application_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                chat.id,
                chat.title,
                chat.context.as_str(),
                chat.user_id,
                chat.organization_id,
                chat.application_id,
                now.to_rfc3339(),
            ],
        )?;
        Ok(chat)
    }

    pub fn get_chat(&self, chat_id: &str) -> AppResult<Option<AiChat>> {
        let conn = self.connection()?;
        conn.query_row(
            &format!("SELECT {} FROM ai_chats WHERE id = ?1", CHAT_COLUMNS),
            [chat_id],
            parse_chat_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn list_chats(&self, organization_id: &str, context: Option<ChatContext>) -> AppResult<Vec<AiChat>> {
        let conn = self.connection()?;
        let mut query = format!("SELECT {} FROM ai_chats WHERE organization_id = ?1", CHAT_COLUMNS);
        if context.is_some() {
            query.push_str(" AND context = ?2");
        }
        query.push_str(" ORDER BY updated_at DESC, id ASC");

        let mut statement = conn.prepare(&query)?;
        let rows = match context {
            Some(context) => statement
                .query_map(params![organization_id, context.as_str()], parse_chat_row)?
                .collect::<Result<Vec<_>, _>>()?,
            None => statement
                .query_map([organization_id], parse_chat_row)?
                .collect::<Result<Vec<_>, _>>()?,
        };
        Ok(rows)
    }

    /// Appends under the connection lock so `seq` is strictly increasing per chat;
    /// the `(chat_id, seq)` unique constraint backs that up.
    pub fn insert_message(
        &self,
        chat_id: &str,
        role: MessageRole,
        content: &str,
        metadata: &serde_json::Value,
    ) -> AppResult<AiChatMessage> {
        let created_at = Utc::now();
        let id = Uuid::new_v4().to_string();

        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        let seq: i64 = tx.query_row(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM ai_chat_messages WHERE chat_id = ?1",
            [chat_id],
            |row| row.get(0),
        )?;

        tx.execute(
            "INSERT INTO ai_chat_messages (id, chat_id, seq, role, content, metadata_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                chat_id,
                seq,
                role.as_str(),
                content,
                serde_json::to_string(metadata)?,
                created_at.to_rfc3339()
            ],
        )?;
        tx.execute(
            "UPDATE ai_chats SET updated_at = ?1 WHERE id = ?2",
            params![created_at.to_rfc3339(), chat_id],
        )?;
        tx.commit()?;

        Ok(AiChatMessage {
            id,
            chat_id: chat_id.to_string(),
            seq,
            role,
            content: content.to_string(),
            metadata: metadata.clone(),
            created_at,
        })
    }

    pub fn list_messages(&self, chat_id: &str) -> AppResult<Vec<AiChatMessage>> {
        let conn = self.connection()?;
        let mut statement = conn.prepare(
            "SELECT id, chat_id, seq, role, content, metadata_json, created_at
             FROM ai_chat_messages WHERE chat_id = ?1 ORDER BY seq ASC",
        )?;
        let messages = statement
            .query_map([chat_id], |row| {
                Ok(AiChatMessage {
                    id: row.get(0)?,
                    chat_id: row.get(1)?,
                    seq: row.get(2)?,
                    role: parse_enum(&row.get::<_, String>(3)?, MessageRole::parse, "message role")?,
                    content: row.get(4)?,
                    metadata: parse_json(&row.get::<_, String>(5)?, serde_json::json!({})),
                    created_at: parse_time(&row.get::<_, String>(6)?)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    pub fn rename_chat(&self, chat_id: &str, title: &str) -> AppResult<bool> {
        let conn = self.connection()?;
        let changed = conn.execute(
            "UPDATE ai_chats SET title = ?1 WHERE id = ?2",
            params![normalize_chat_title(title), chat_id],
        )?;
        Ok(changed > 0)
    }
}

fn parse_chat_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AiChat> {
    Ok(AiChat {
        id: row.get(0)?,
        title: row.get(1)?,
        context: parse_enum(&row.get::<_, String>(2)?, ChatContext::parse, "chat context")?,
        user_id: row.get(3)?,
        organization_id: row.get(4)?,
        application_id: row.get(5)?,
        created_at: parse_time(&row.get::<_, String>(6)?)?,
        updated_at: parse_time(&row.get::<_, String>(7)?)?,
    })
}

fn normalize_chat_title(raw: &str) -> String {
    let first_line = raw.lines().next().unwrap_or_default().trim();
    if first_line.is_empty() {
        return "New chat".to_string();
    }
    let max_chars = 80;
    if first_line.chars().count() <= max_chars {
        return first_line.to_string();
    }
    let truncated: String = first_line.chars().take(max_chars - 1).collect();
    format!("{}...", truncated)
}
