//! 通知合并存储 - 每个联系人最多一条存活通知
//!
//! 同一 `BuddyKey` 再次通知时更新已有记录而不是新建弹窗；
//! sink 报告关闭后移除记录。重复移除是无操作。

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use super::sink::NotificationHandle;
use crate::event::BuddyKey;

/// 存活通知记录
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationRecord {
    pub key: BuddyKey,
    pub handle: NotificationHandle,
    pub title: String,
    pub body: String,
    /// 首次创建时间
    pub created_at: DateTime<Utc>,
    /// 最近一次更新时间
    pub updated_at: DateTime<Utc>,
    /// 被合并的次数
    pub updates: u32,
}

/// upsert 结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// 新建记录
    Created(NotificationHandle),
    /// 更新已有记录
    Updated(NotificationHandle),
}

impl Upsert {
    pub fn handle(&self) -> NotificationHandle {
        match self {
            Upsert::Created(h) | Upsert::Updated(h) => *h,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Upsert::Created(_))
    }
}

/// 通知合并存储
///
/// 所有方法都要求 `&mut self`，同一 key 的查找与插入天然串行。
#[derive(Debug, Default)]
pub struct CoalescingStore {
    records: HashMap<BuddyKey, NotificationRecord>,
    by_handle: HashMap<NotificationHandle, BuddyKey>,
}

impl CoalescingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 存在则原地更新标题正文，否则调用 `create` 取得新句柄并登记
    ///
    /// `create` 失败时不登记任何记录。
    pub fn upsert_with<F>(
        &mut self,
        key: &BuddyKey,
        title: &str,
        body: &str,
        create: F,
    ) -> Result<Upsert>
    where
        F: FnOnce() -> Result<NotificationHandle>,
    {
        let now = Utc::now();

        if let Some(record) = self.records.get_mut(key) {
            record.title = title.to_string();
            record.body = body.to_string();
            record.updated_at = now;
            record.updates += 1;
            return Ok(Upsert::Updated(record.handle));
        }

        let handle = create()?;
        // sink 复用句柄时清理旧的反向索引
        if let Some(stale) = self.by_handle.insert(handle, key.clone()) {
            self.records.remove(&stale);
        }
        self.records.insert(
            key.clone(),
            NotificationRecord {
                key: key.clone(),
                handle,
                title: title.to_string(),
                body: body.to_string(),
                created_at: now,
                updated_at: now,
                updates: 0,
            },
        );
        Ok(Upsert::Created(handle))
    }

    /// 按联系人移除；不存在时返回 None
    pub fn remove(&mut self, key: &BuddyKey) -> Option<NotificationRecord> {
        let record = self.records.remove(key)?;
        self.by_handle.remove(&record.handle);
        Some(record)
    }

    /// 按 sink 句柄移除（关闭回调使用）
    pub fn remove_by_handle(&mut self, handle: NotificationHandle) -> Option<NotificationRecord> {
        let key = self.by_handle.remove(&handle)?;
        self.records.remove(&key)
    }

    pub fn get(&self, key: &BuddyKey) -> Option<&NotificationRecord> {
        self.records.get(key)
    }

    pub fn key_for(&self, handle: NotificationHandle) -> Option<&BuddyKey> {
        self.by_handle.get(&handle)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 清空并返回所有记录（关闭时释放 sink 句柄）
    pub fn drain(&mut self) -> Vec<NotificationRecord> {
        self.by_handle.clear();
        let mut records: Vec<_> = self.records.drain().map(|(_, r)| r).collect();
        records.sort_by_key(|r| r.handle);
        records
    }
}
