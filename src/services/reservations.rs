//! Reservation Store: временные холды ресурсов (мест и столов) с TTL.
//!
//! Холд — это ключ `(event_id, resource_id)` со значением `holder_id` и
//! сроком жизни. Повторный захват тем же держателем продлевает TTL, чужой
//! живой холд не перебивается. Истёкший холд эквивалентен отсутствующему.
//!
//! Redis-бэкенд строится на SET NX EX (захват) и SET XX EX (продление),
//! поэтому решение «кто успел первым» принимает сам Redis. Memory-бэкенд
//! повторяет ту же семантику под одним мьютексом. Ошибки инфраструктуры
//! трактуются как отказ (fail closed): лучше не дать холд, чем продать
//! место дважды.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::redis_client::RedisClient;

#[derive(Clone)]
pub enum ReservationStore {
    Memory(MemoryReservations),
    Redis(RedisReservations),
}

impl ReservationStore {
    pub fn memory() -> Self {
        ReservationStore::Memory(MemoryReservations::new())
    }

    pub fn redis(client: RedisClient) -> Self {
        ReservationStore::Redis(RedisReservations::new(client))
    }

    /// Захват или продление холда. `false` — ресурс держит кто-то другой.
    pub async fn reserve(
        &self,
        event_id: i64,
        resource_id: i64,
        holder_id: i64,
        ttl: Duration,
    ) -> bool {
        match self {
            ReservationStore::Memory(s) => s.reserve(event_id, resource_id, holder_id, ttl),
            ReservationStore::Redis(s) => s.reserve(event_id, resource_id, holder_id, ttl).await,
        }
    }

    /// Снятие холда; отсутствующий или истёкший ключ — не ошибка.
    pub async fn release(&self, event_id: i64, resource_id: i64) {
        match self {
            ReservationStore::Memory(s) => s.release(event_id, resource_id),
            ReservationStore::Redis(s) => s.release(event_id, resource_id).await,
        }
    }

    pub async fn release_many(&self, event_id: i64, resource_ids: &[i64]) {
        match self {
            ReservationStore::Memory(s) => s.release_many(event_id, resource_ids),
            ReservationStore::Redis(s) => s.release_many(event_id, resource_ids).await,
        }
    }

    /// Есть ли живой холд на ресурс; `exclude_holder` не считается.
    pub async fn is_reserved(
        &self,
        event_id: i64,
        resource_id: i64,
        exclude_holder: Option<i64>,
    ) -> bool {
        match self {
            ReservationStore::Memory(s) => s.is_reserved(event_id, resource_id, exclude_holder),
            ReservationStore::Redis(s) => {
                s.is_reserved(event_id, resource_id, exclude_holder).await
            }
        }
    }

    /// Держит ли `holder_id` живой холд на ресурс.
    pub async fn is_held_by(&self, event_id: i64, resource_id: i64, holder_id: i64) -> bool {
        match self {
            ReservationStore::Memory(s) => s.is_held_by(event_id, resource_id, holder_id),
            ReservationStore::Redis(s) => s.is_held_by(event_id, resource_id, holder_id).await,
        }
    }

    /// Живые холды события, опционально отфильтрованные по держателю.
    pub async fn reserved_for_event(&self, event_id: i64, holder_id: Option<i64>) -> Vec<i64> {
        match self {
            ReservationStore::Memory(s) => s.reserved_for_event(event_id, holder_id),
            ReservationStore::Redis(s) => s.reserved_for_event(event_id, holder_id).await,
        }
    }

    /// Выселение истёкших холдов; Redis делает это сам через TTL.
    pub async fn sweep(&self) -> usize {
        match self {
            ReservationStore::Memory(s) => s.sweep(),
            ReservationStore::Redis(_) => 0,
        }
    }
}

#[derive(Debug, Clone)]
struct Hold {
    holder_id: i64,
    expires_at: DateTime<Utc>,
}

impl Hold {
    fn live_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

#[derive(Clone, Default)]
pub struct MemoryReservations {
    inner: Arc<Mutex<HashMap<(i64, i64), Hold>>>,
}

impl MemoryReservations {
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> MutexGuard<'_, HashMap<(i64, i64), Hold>> {
        self.inner.lock().unwrap()
    }

    pub fn reserve(&self, event_id: i64, resource_id: i64, holder_id: i64, ttl: Duration) -> bool {
        let now = Utc::now();
        let expires_at =
            now + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero());
        let mut map = self.locked();
        match map.get(&(event_id, resource_id)) {
            Some(h) if h.live_at(now) && h.holder_id != holder_id => false,
            _ => {
                map.insert((event_id, resource_id), Hold { holder_id, expires_at });
                true
            }
        }
    }

    pub fn release(&self, event_id: i64, resource_id: i64) {
        self.locked().remove(&(event_id, resource_id));
    }

    pub fn release_many(&self, event_id: i64, resource_ids: &[i64]) {
        let mut map = self.locked();
        for rid in resource_ids {
            map.remove(&(event_id, *rid));
        }
    }

    pub fn is_reserved(&self, event_id: i64, resource_id: i64, exclude_holder: Option<i64>) -> bool {
        let now = Utc::now();
        let mut map = self.locked();
        match map.get(&(event_id, resource_id)) {
            Some(h) if h.live_at(now) => exclude_holder != Some(h.holder_id),
            Some(_) => {
                // ленивое выселение истёкшего ключа
                map.remove(&(event_id, resource_id));
                false
            }
            None => false,
        }
    }

    pub fn is_held_by(&self, event_id: i64, resource_id: i64, holder_id: i64) -> bool {
        let now = Utc::now();
        let map = self.locked();
        matches!(
            map.get(&(event_id, resource_id)),
            Some(h) if h.live_at(now) && h.holder_id == holder_id
        )
    }

    pub fn reserved_for_event(&self, event_id: i64, holder_id: Option<i64>) -> Vec<i64> {
        let now = Utc::now();
        let map = self.locked();
        let mut ids: Vec<i64> = map
            .iter()
            .filter(|((eid, _), h)| {
                *eid == event_id
                    && h.live_at(now)
                    && holder_id.map_or(true, |hid| h.holder_id == hid)
            })
            .map(|((_, rid), _)| *rid)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut map = self.locked();
        let before = map.len();
        map.retain(|_, h| h.live_at(now));
        before - map.len()
    }
}

fn hold_key(event_id: i64, resource_id: i64) -> String {
    format!("hold:{event_id}:{resource_id}")
}

#[derive(Clone)]
pub struct RedisReservations {
    client: RedisClient,
}

impl RedisReservations {
    pub fn new(client: RedisClient) -> Self {
        RedisReservations { client }
    }

    pub async fn reserve(
        &self,
        event_id: i64,
        resource_id: i64,
        holder_id: i64,
        ttl: Duration,
    ) -> bool {
        let key = hold_key(event_id, resource_id);
        // EX не принимает ноль
        let ttl_secs = ttl.as_secs().max(1);

        match self.client.acquire(&key, holder_id, ttl_secs).await {
            Ok(true) => true,
            Ok(false) => match self.client.get_i64(&key).await {
                // наш собственный холд продлеваем; если он истёк между GET
                // и SET XX, добираем обычным захватом
                Ok(Some(current)) if current == holder_id => {
                    match self.client.refresh(&key, holder_id, ttl_secs).await {
                        Ok(true) => true,
                        Ok(false) => {
                            self.client.acquire(&key, holder_id, ttl_secs).await.unwrap_or(false)
                        }
                        Err(e) => {
                            warn!("hold refresh failed for {key}: {e}");
                            false
                        }
                    }
                }
                Ok(_) => false,
                Err(e) => {
                    warn!("hold lookup failed for {key}: {e}");
                    false
                }
            },
            Err(e) => {
                warn!("hold acquire failed for {key}: {e}");
                false
            }
        }
    }

    pub async fn release(&self, event_id: i64, resource_id: i64) {
        self.release_many(event_id, &[resource_id]).await
    }

    pub async fn release_many(&self, event_id: i64, resource_ids: &[i64]) {
        let keys: Vec<String> = resource_ids
            .iter()
            .map(|rid| hold_key(event_id, *rid))
            .collect();
        if let Err(e) = self.client.delete(&keys).await {
            warn!("hold release failed for event {event_id}: {e}");
        }
    }

    pub async fn is_reserved(
        &self,
        event_id: i64,
        resource_id: i64,
        exclude_holder: Option<i64>,
    ) -> bool {
        let key = hold_key(event_id, resource_id);
        match self.client.get_i64(&key).await {
            Ok(Some(holder)) => exclude_holder != Some(holder),
            Ok(None) => false,
            Err(e) => {
                warn!("hold lookup failed for {key}: {e}");
                false
            }
        }
    }

    pub async fn is_held_by(&self, event_id: i64, resource_id: i64, holder_id: i64) -> bool {
        let key = hold_key(event_id, resource_id);
        match self.client.get_i64(&key).await {
            Ok(holder) => holder == Some(holder_id),
            Err(e) => {
                warn!("hold lookup failed for {key}: {e}");
                false
            }
        }
    }

    pub async fn reserved_for_event(&self, event_id: i64, holder_id: Option<i64>) -> Vec<i64> {
        let pattern = format!("hold:{event_id}:*");
        let keys = match self.client.keys(&pattern).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!("hold listing failed for event {event_id}: {e}");
                return Vec::new();
            }
        };

        let mut ids: Vec<i64> = match holder_id {
            None => keys.iter().filter_map(|k| resource_id_of(k)).collect(),
            Some(hid) => {
                let holders = match self.client.mget_i64(&keys).await {
                    Ok(holders) => holders,
                    Err(e) => {
                        warn!("hold listing failed for event {event_id}: {e}");
                        return Vec::new();
                    }
                };
                keys.iter()
                    .zip(holders)
                    .filter(|(_, holder)| *holder == Some(hid))
                    .filter_map(|(k, _)| resource_id_of(k))
                    .collect()
            }
        };
        ids.sort_unstable();
        ids
    }
}

fn resource_id_of(key: &str) -> Option<i64> {
    key.rsplit(':').next()?.parse().ok()
}
