//! 消息相关的外观操作：发送、重发、召回、删除撤销、置顶收藏、历史与附件

use crate::bridge::client::{required, ClientBridge};
use crate::bridge::event::{parse_recall, recall_payload};
use crate::bridge::message::{
    AttachmentKind, ChatMessage, DeleteOutcome, MessageStatus, Recaller, TransferState,
};
use crate::bridge::native::{OutgoingPayload, ReplyRef};
use crate::bridge::outbox::{is_non_retryable, PendingOutgoing};
use crate::bridge::prefs::keys;
use crate::bridge::serialization::coordinate_to_e7;
use crate::bridge::types::{BridgeError, BridgeResult, ConvRef};
use std::path::{Path, PathBuf};
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const MESSAGE_NOT_FOUND: &str = "Message not found";

/// 可下载附件的定位信息
struct FileLocator {
    file_id: String,
    file_key: Vec<u8>,
    file_name: String,
    file_size: u64,
}

impl ClientBridge {
    // ---------- 发送 ----------

    /// 发送任意载荷；成功后以 Sent 写入列表，可重试的失败进入待重发队列
    pub(crate) async fn send_payload(
        &self,
        conv: &ConvRef,
        payload: OutgoingPayload,
    ) -> BridgeResult<String> {
        let native = self.ready(true).await?;
        let target = required(&conv.id, "Recipient is empty")?;
        if conv.is_group && !payload.allowed_in_group() {
            return Err(BridgeError::invalid(format!(
                "{} messages are not supported in group chats",
                payload.kind_name()
            )));
        }
        let is_group = conv.is_group;
        let to_send = payload.clone();
        let result = native
            .call("send", move |sdk| sdk.send(&target, is_group, &to_send))
            .await;

        let mut st = self.inner.state.lock().await;
        let result = match result {
            Ok(id) => {
                debug!("[Bridge] 📤 已发送 {} -> {} ({})", payload.kind_name(), conv, id);
                st.record_sent(conv, &id, &payload).await;
                Ok(id)
            }
            Err(e) => {
                match &e.message_id {
                    Some(id) if !is_non_retryable(&e.message) => {
                        info!("[Bridge] 📮 发送失败，加入重发队列: {} ({})", id, e.message);
                        st.outbox
                            .enqueue(conv.clone(), id.clone(), payload, Instant::now());
                    }
                    _ => warn!("[Bridge] ❌ 发送失败: {}", e.message),
                }
                Err(BridgeError::from(e))
            }
        };
        st.note(&result);
        self.flush(st);
        result
    }

    /// 发送文本；以召回前缀开头的文本按召回处理
    pub async fn send_text(
        &self,
        conv: &ConvRef,
        text: &str,
        reply: Option<ReplyRef>,
    ) -> BridgeResult<String> {
        if text.trim().is_empty() {
            self.ready(true).await?;
            return Err(BridgeError::invalid("Message is empty"));
        }
        let payload = OutgoingPayload::Text {
            text: text.to_string(),
            reply,
        };
        self.send_payload(conv, payload).await
    }

    pub async fn send_file(&self, conv: &ConvRef, path: &str) -> BridgeResult<String> {
        self.ready(true).await?;
        let path = required(path, "File path is empty")?;
        let id = self
            .send_payload(conv, OutgoingPayload::File { path: path.clone() })
            .await?;
        let st = self.inner.state.lock().await;
        st.persist_string(&keys::msg_last_file_path(conv), &path).await;
        Ok(id)
    }

    pub async fn send_sticker(&self, conv: &ConvRef, sticker_id: &str) -> BridgeResult<String> {
        self.ready(true).await?;
        let sticker_id = required(sticker_id, "Sticker id is empty")?;
        self.send_payload(conv, OutgoingPayload::Sticker { sticker_id })
            .await
    }

    /// 发送位置；坐标转为 E7 整数，非有限值或越界直接拒绝
    pub async fn send_location(
        &self,
        conv: &ConvRef,
        lat: f64,
        lon: f64,
        label: &str,
    ) -> BridgeResult<String> {
        self.ready(true).await?;
        let lat_e7 = coordinate_to_e7(lat, 90.0)?;
        let lon_e7 = coordinate_to_e7(lon, 180.0)?;
        let payload = OutgoingPayload::Location {
            lat_e7,
            lon_e7,
            label: label.trim().to_string(),
        };
        self.send_payload(conv, payload).await
    }

    pub async fn send_contact(
        &self,
        conv: &ConvRef,
        username: &str,
        display: &str,
    ) -> BridgeResult<String> {
        self.ready(true).await?;
        let username = required(username, "Contact username is empty")?;
        let payload = OutgoingPayload::Contact {
            username,
            display: display.trim().to_string(),
        };
        self.send_payload(conv, payload).await
    }

    /// 手动重发：优先使用重发队列里的载荷，其次是失败的文本消息
    pub async fn resend_message(&self, conv: &ConvRef, message_id: &str) -> BridgeResult<()> {
        let native = self.ready(true).await?;
        let pending = {
            let st = self.inner.state.lock().await;
            match st.outbox.get(message_id) {
                Some(p) => p.clone(),
                None => {
                    let msg = st
                        .messages
                        .get(conv)
                        .and_then(|log| log.get(message_id))
                        .filter(|m| m.is_mine && m.status == MessageStatus::Failed)
                        .ok_or_else(|| BridgeError::not_found(MESSAGE_NOT_FOUND))?;
                    if msg.attachment.is_some() || msg.body.is_empty() {
                        return Err(BridgeError::invalid("Resend failed: attachment is gone"));
                    }
                    PendingOutgoing {
                        conv: conv.clone(),
                        message_id: message_id.to_string(),
                        payload: OutgoingPayload::Text {
                            text: msg.body.clone(),
                            reply: msg.reply_to.as_ref().map(|r| ReplyRef {
                                message_id: r.message_id.clone(),
                                preview: r.snippet.clone(),
                            }),
                        },
                        attempts: 0,
                        next_retry_at: Instant::now(),
                    }
                }
            }
        };
        let p = pending.clone();
        let result = native
            .call("resend", move |sdk| {
                sdk.resend(&p.conv.id, p.conv.is_group, &p.message_id, &p.payload)
            })
            .await;
        let mut st = self.inner.state.lock().await;
        let result = st.finish_resend(&pending, result, Instant::now()).await;
        st.note(&result);
        self.flush(st);
        result
    }

    // ---------- 召回 ----------

    /// 召回自己的消息；只能在倒计时结束前调用
    pub async fn recall_message(&self, conv: &ConvRef, message_id: &str) -> BridgeResult<String> {
        self.ready(true).await?;
        {
            let st = self.inner.state.lock().await;
            let msg = st
                .messages
                .get(conv)
                .and_then(|log| log.get(message_id))
                .ok_or_else(|| BridgeError::not_found(MESSAGE_NOT_FOUND))?;
            if !msg.is_mine {
                return Err(BridgeError::invalid("Only your own messages can be recalled"));
            }
            if msg.recall_seconds_left(Instant::now()).is_none() {
                return Err(BridgeError::invalid("Recall window has expired"));
            }
        }
        let payload = OutgoingPayload::Text {
            text: recall_payload(message_id),
            reply: None,
        };
        self.send_payload(conv, payload).await
    }

    /// 剩余可召回秒数
    pub async fn recall_seconds_left(&self, conv: &ConvRef, message_id: &str) -> Option<u64> {
        let st = self.inner.state.lock().await;
        st.messages
            .get(conv)
            .and_then(|log| log.get(message_id))
            .and_then(|m| m.recall_seconds_left(Instant::now()))
    }

    /// 取回自己召回的原文用于重新编辑（只能取一次）
    pub async fn take_recalled_text(
        &self,
        conv: &ConvRef,
        message_id: &str,
    ) -> BridgeResult<Option<String>> {
        self.ready(false).await?;
        let mut st = self.inner.state.lock().await;
        Ok(st
            .messages
            .get_mut(conv)
            .and_then(|log| log.take_recalled_text(message_id)))
    }

    // ---------- 删除与撤销 ----------

    /// 乐观删除；撤销窗口内再次删除会重新计时
    pub async fn delete_message(&self, conv: &ConvRef, message_id: &str) -> BridgeResult<DeleteOutcome> {
        self.ready(false).await?;
        let mut st = self.inner.state.lock().await;
        let grace = st.undo_grace;
        let outcome = st
            .messages
            .get_mut(conv)
            .and_then(|log| log.delete(message_id, Instant::now(), grace))
            .ok_or_else(|| BridgeError::not_found(MESSAGE_NOT_FOUND))?;
        match outcome {
            DeleteOutcome::Hidden => {
                debug!("[Bridge] 🗑️ 隐藏消息 {} in {}", message_id, conv);
                st.mark_messages(conv);
                st.refresh_preview(conv);
                st.persist_message_prefs(conv).await;
                self.flush(st);
                self.schedule_delete_commit(grace);
            }
            DeleteOutcome::Restarted => {
                drop(st);
                self.schedule_delete_commit(grace);
            }
            DeleteOutcome::AlreadyDeleted => {}
        }
        Ok(outcome)
    }

    /// 撤销窗口结束后提交删除（轮询未运行时同样生效）
    fn schedule_delete_commit(&self, grace: tokio::time::Duration) {
        let weak = std::sync::Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(inner) = weak.upgrade() {
                ClientBridge::from_inner(inner).commit_pending_deletes().await;
            }
        });
    }

    /// 撤销删除，返回是否恢复成功
    pub async fn undo_delete(&self, conv: &ConvRef, message_id: &str) -> BridgeResult<bool> {
        self.ready(false).await?;
        let mut st = self.inner.state.lock().await;
        let restored = st
            .messages
            .get_mut(conv)
            .is_some_and(|log| log.undo_delete(message_id, Instant::now()));
        if restored {
            debug!("[Bridge] ↩️ 撤销删除 {} in {}", message_id, conv);
            st.mark_messages(conv);
            st.refresh_preview(conv);
            self.flush(st);
        }
        Ok(restored)
    }

    /// 提交所有到期的删除
    pub async fn commit_pending_deletes(&self) -> Vec<ConvRef> {
        let mut st = self.inner.state.lock().await;
        st.commit_expired_deletes(Instant::now()).await
    }

    // ---------- 置顶与收藏 ----------

    /// 消息置顶开关，返回当前置顶的消息 ID
    pub async fn toggle_pinned_message(
        &self,
        conv: &ConvRef,
        message_id: &str,
    ) -> BridgeResult<Option<String>> {
        self.ready(false).await?;
        let mut st = self.inner.state.lock().await;
        let log = st
            .messages
            .get_mut(conv)
            .filter(|log| log.get(message_id).is_some())
            .ok_or_else(|| BridgeError::not_found(MESSAGE_NOT_FOUND))?;
        let pinned = log.toggle_pin(message_id);
        st.persist_message_prefs(conv).await;
        st.mark_messages(conv);
        self.flush(st);
        Ok(pinned)
    }

    /// 收藏开关，返回是否已收藏
    pub async fn toggle_favorite_message(&self, conv: &ConvRef, message_id: &str) -> BridgeResult<bool> {
        self.ready(false).await?;
        let mut st = self.inner.state.lock().await;
        let log = st
            .messages
            .get_mut(conv)
            .filter(|log| log.get(message_id).is_some())
            .ok_or_else(|| BridgeError::not_found(MESSAGE_NOT_FOUND))?;
        let favorite = log.toggle_favorite(message_id);
        st.persist_message_prefs(conv).await;
        Ok(favorite)
    }

    pub async fn pinned_message(&self, conv: &ConvRef) -> Option<String> {
        let st = self.inner.state.lock().await;
        st.messages
            .get(conv)
            .and_then(|log| log.pinned_id().map(str::to_string))
    }

    pub async fn is_favorite(&self, conv: &ConvRef, message_id: &str) -> bool {
        let st = self.inner.state.lock().await;
        st.messages
            .get(conv)
            .is_some_and(|log| log.favorite_ids().contains(message_id))
    }

    // ---------- 历史 ----------

    pub async fn messages(&self, conv: &ConvRef) -> Vec<ChatMessage> {
        let st = self.inner.state.lock().await;
        st.messages
            .get(conv)
            .map(|log| log.items().to_vec())
            .unwrap_or_default()
    }

    /// 从原生历史整体替换消息列表（过滤已删除、应用已召回）
    pub async fn load_history(&self, conv: &ConvRef) -> BridgeResult<Vec<ChatMessage>> {
        let native = self.ready(true).await?;
        let conv_id = required(&conv.id, "Conversation id is empty")?;
        let (is_group, limit) = (conv.is_group, self.inner.options.history_limit);
        let result = native
            .call("load_history", move |sdk| sdk.load_chat_history(&conv_id, is_group, limit))
            .await
            .map_err(BridgeError::from);

        let mut st = self.inner.state.lock().await;
        let entries = match result {
            Ok(entries) => entries,
            Err(e) => {
                let result = Err(e);
                st.note(&result);
                self.flush(st);
                return result;
            }
        };
        let me = st.username.clone();
        let mut recalls = Vec::new();
        let mut messages = Vec::with_capacity(entries.len());
        for entry in entries {
            if let Some(target) = parse_recall(&entry.text) {
                let by = if entry.outgoing {
                    Recaller::Me
                } else {
                    Recaller::Peer(entry.sender.clone())
                };
                recalls.push((target.to_string(), by));
                continue;
            }
            let deadline = if entry.outgoing {
                st.recall_deadline_for(entry.timestamp_sec.saturating_mul(1000))
            } else {
                None
            };
            messages.push(ChatMessage::from_history(entry, &me, deadline));
        }
        st.ensure_conversation(conv).await;
        let log = st.ensure_log(conv).await;
        log.replace_all(messages);
        for (target, by) in &recalls {
            log.apply_recall(target, by.clone(), false);
        }
        let items = log.items().to_vec();
        if !recalls.is_empty() {
            st.persist_message_prefs(conv).await;
        }
        debug!("[Bridge] 📜 历史 {}: {} 条", conv, items.len());
        st.mark_messages(conv);
        if !items.is_empty() {
            st.refresh_preview(conv);
        }
        st.note(&Ok::<(), BridgeError>(()));
        self.flush(st);
        Ok(items)
    }

    /// 删除会话的聊天记录
    pub async fn delete_chat_history(
        &self,
        conv: &ConvRef,
        delete_attachments: bool,
        secure_wipe: bool,
    ) -> BridgeResult<()> {
        let native = self.ready(true).await?;
        let conv_id = required(&conv.id, "Conversation id is empty")?;
        let is_group = conv.is_group;
        let result = native
            .call("delete_history", move |sdk| {
                sdk.delete_chat_history(&conv_id, is_group, delete_attachments, secure_wipe)
            })
            .await
            .map_err(BridgeError::from);
        let mut st = self.inner.state.lock().await;
        if result.is_ok() {
            if let Some(log) = st.messages.get_mut(conv) {
                log.clear();
            }
            st.clear_message_prefs(conv).await;
            st.mark_messages(conv);
            st.refresh_preview(conv);
        }
        st.note(&result);
        self.flush(st);
        result
    }

    pub async fn set_history_enabled(&self, enabled: bool) -> BridgeResult<()> {
        self.call_simple(false, "history_enabled", move |sdk| sdk.set_history_enabled(enabled))
            .await?;
        let mut st = self.inner.state.lock().await;
        st.privacy.history_enabled = enabled;
        st.persist_bool(keys::HISTORY_ENABLED, enabled).await;
        Ok(())
    }

    /// 清空全部聊天记录
    pub async fn clear_all_history(&self, delete_attachments: bool, secure_wipe: bool) -> BridgeResult<()> {
        let native = self.ready(true).await?;
        let result = native
            .call("clear_history", move |sdk| {
                sdk.clear_all_history(delete_attachments, secure_wipe)
            })
            .await
            .map_err(BridgeError::from);
        let mut st = self.inner.state.lock().await;
        if result.is_ok() {
            let convs: Vec<ConvRef> = st.messages.keys().cloned().collect();
            for conv in &convs {
                if let Some(log) = st.messages.get_mut(conv) {
                    log.clear();
                }
                st.clear_message_prefs(conv).await;
                st.mark_messages(conv);
                st.refresh_preview(conv);
            }
            info!("[Bridge] 🧹 已清空 {} 个会话的聊天记录", convs.len());
        }
        st.note(&result);
        self.flush(st);
        result
    }

    // ---------- 附件 ----------

    pub async fn store_attachment_preview_bytes(
        &self,
        file_id: &str,
        file_name: &str,
        file_size: u64,
        bytes: Vec<u8>,
    ) -> BridgeResult<()> {
        self.ready(true).await?;
        let file_id = required(file_id, "File id is empty")?;
        let file_name = file_name.to_string();
        self.call_simple(true, "store_preview", move |sdk| {
            sdk.store_attachment_preview_bytes(&file_id, &file_name, file_size, &bytes)
        })
        .await
    }

    /// 下载文件附件到指定路径（只支持文件类附件）
    pub async fn download_attachment_to_path(
        &self,
        conv: &ConvRef,
        message_id: &str,
        out_path: &Path,
    ) -> BridgeResult<()> {
        let native = self.ready(true).await?;
        if out_path.as_os_str().is_empty() {
            return Err(BridgeError::invalid("Output path is empty"));
        }
        let loc = self.begin_download(conv, message_id).await?;
        let out: PathBuf = out_path.to_path_buf();
        let result = native
            .call("download", move |sdk| {
                sdk.download_chat_file_to_path(
                    &loc.file_id,
                    &loc.file_key,
                    &loc.file_name,
                    loc.file_size,
                    &out,
                )
            })
            .await
            .map_err(BridgeError::from);
        self.finish_download(conv, message_id, &result).await;
        result
    }

    /// 下载文件附件为字节（解密内容只在本次调用内存在）
    pub async fn download_attachment_to_bytes(
        &self,
        conv: &ConvRef,
        message_id: &str,
    ) -> BridgeResult<Vec<u8>> {
        let native = self.ready(true).await?;
        let loc = self.begin_download(conv, message_id).await?;
        let result = native
            .call("download_bytes", move |sdk| {
                sdk.download_chat_file_to_bytes(
                    &loc.file_id,
                    &loc.file_key,
                    &loc.file_name,
                    loc.file_size,
                )
            })
            .await
            .map_err(BridgeError::from);
        self.finish_download(conv, message_id, &result).await;
        result
    }

    async fn begin_download(&self, conv: &ConvRef, message_id: &str) -> BridgeResult<FileLocator> {
        let mut st = self.inner.state.lock().await;
        let msg = st
            .messages
            .get_mut(conv)
            .and_then(|log| log.get_mut(message_id))
            .ok_or_else(|| BridgeError::not_found(MESSAGE_NOT_FOUND))?;
        let att = msg
            .attachment
            .as_mut()
            .filter(|a| a.kind == AttachmentKind::File)
            .ok_or_else(|| BridgeError::invalid("Message has no downloadable file"))?;
        let (Some(file_id), Some(key_hex), Some(file_size)) =
            (att.file_id.clone(), att.file_key_hex.clone(), att.file_size)
        else {
            return Err(BridgeError::invalid("Attachment is missing file id, key or size"));
        };
        let file_key = hex::decode(&key_hex)
            .map_err(|e| BridgeError::invalid(format!("Invalid file key: {}", e)))?;
        att.state = TransferState::Downloading;
        let loc = FileLocator {
            file_id,
            file_key,
            file_name: att.label.clone(),
            file_size,
        };
        st.mark_messages(conv);
        self.flush(st);
        Ok(loc)
    }

    async fn finish_download<T>(&self, conv: &ConvRef, message_id: &str, result: &BridgeResult<T>) {
        let mut st = self.inner.state.lock().await;
        if let Some(att) = st
            .messages
            .get_mut(conv)
            .and_then(|log| log.get_mut(message_id))
            .and_then(|m| m.attachment.as_mut())
        {
            if result.is_ok() {
                att.state = TransferState::Ready;
                att.progress = 1.0;
            } else {
                att.state = TransferState::Failed;
            }
        }
        st.mark_messages(conv);
        st.note(result);
        self.flush(st);
    }
}
