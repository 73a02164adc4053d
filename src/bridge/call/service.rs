//! 通话簿：群通话房间、当前单聊/群通话与待接来电

use crate::bridge::call::models::{GroupCallRoomUi, GroupCallState, IncomingCall, PeerCallState};
use crate::bridge::event::{GroupCallOp, GroupCallSignal};
use crate::bridge::native::media_flag;
use crate::bridge::serialization::{call_id_to_hex, CALL_ID_LEN};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Default)]
pub struct CallBook {
    rooms: BTreeMap<String, GroupCallRoomUi>,
    pub pending_call: Option<IncomingCall>,
    pub active_peer_call: Option<PeerCallState>,
    pub active_group_call: Option<GroupCallState>,
}

impl CallBook {
    /// 记录房间；同一群重新加入新通话时替换旧条目
    pub fn upsert_room(&mut self, group_id: &str, call_id: &[u8; CALL_ID_LEN], video: bool) -> bool {
        let room = GroupCallRoomUi {
            group_id: group_id.to_string(),
            call_id: call_id_to_hex(call_id),
            video,
        };
        if self.rooms.get(group_id) == Some(&room) {
            return false;
        }
        self.rooms.insert(group_id.to_string(), room);
        true
    }

    pub fn remove_room(&mut self, group_id: &str) -> bool {
        let removed = self.rooms.remove(group_id).is_some();
        if self
            .active_group_call
            .as_ref()
            .is_some_and(|c| c.group_id == group_id)
        {
            self.active_group_call = None;
        }
        removed
    }

    pub fn room(&self, group_id: &str) -> Option<&GroupCallRoomUi> {
        self.rooms.get(group_id)
    }

    pub fn rooms(&self) -> Vec<GroupCallRoomUi> {
        self.rooms.values().cloned().collect()
    }

    /// 应用群通话信令，返回房间列表是否变化
    pub fn apply_signal(&mut self, sig: &GroupCallSignal) -> bool {
        debug!(
            "[CallBook] 群通话信令: group={}, op={:?}, sender={}",
            sig.group_id, sig.op, sig.sender
        );
        match sig.op {
            GroupCallOp::Create | GroupCallOp::Join | GroupCallOp::Update => {
                let video = sig.media_flags & media_flag::VIDEO != 0;
                self.upsert_room(&sig.group_id, &sig.call_id, video)
            }
            GroupCallOp::Leave | GroupCallOp::End => self.remove_room(&sig.group_id),
            // 心跳不改变房间
            GroupCallOp::Ping => false,
        }
    }

    pub fn clear(&mut self) {
        self.rooms.clear();
        self.pending_call = None;
        self.active_peer_call = None;
        self.active_group_call = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(group: &str, op: GroupCallOp, id: u8, flags: u8) -> GroupCallSignal {
        GroupCallSignal {
            group_id: group.to_string(),
            sender: "bob".to_string(),
            call_id: [id; CALL_ID_LEN],
            key_id: 1,
            op,
            media_flags: flags,
        }
    }

    #[test]
    fn one_room_per_group() {
        let mut book = CallBook::default();
        assert!(book.upsert_room("g1", &[1; CALL_ID_LEN], true));
        assert!(!book.upsert_room("g1", &[1; CALL_ID_LEN], true));
        assert!(book.upsert_room("g1", &[2; CALL_ID_LEN], false));
        assert_eq!(book.rooms().len(), 1);
        assert_eq!(book.room("g1").unwrap().call_id, call_id_to_hex(&[2; CALL_ID_LEN]));
    }

    #[test]
    fn leave_or_end_removes_room() {
        let mut book = CallBook::default();
        book.apply_signal(&signal("g1", GroupCallOp::Create, 1, 0x03));
        assert!(book.room("g1").unwrap().video);
        assert!(!book.apply_signal(&signal("g1", GroupCallOp::Ping, 1, 0x03)));
        assert!(book.apply_signal(&signal("g1", GroupCallOp::Leave, 1, 0)));
        assert!(book.rooms().is_empty());
        book.apply_signal(&signal("g2", GroupCallOp::Join, 1, 0x01));
        assert!(!book.room("g2").unwrap().video);
        assert!(book.apply_signal(&signal("g2", GroupCallOp::End, 1, 0)));
        assert!(!book.apply_signal(&signal("g2", GroupCallOp::End, 1, 0)));
    }
}
