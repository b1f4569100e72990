use redis::{aio::MultiplexedConnection, AsyncCommands, Client};

#[derive(Clone)]
pub struct RedisClient {
    pub conn: MultiplexedConnection,
}

impl RedisClient {
    pub async fn new(redis_url: &str) -> redis::RedisResult<Self> {
        let client = Client::open(redis_url)?;
        let conn = client.get_multiplexed_tokio_connection().await?;
        Ok(RedisClient { conn })
    }

    /// SET NX EX - атомарный захват ключа с TTL, без гонок.
    /// `Ok(false)` - ключ уже существует.
    pub async fn acquire(&self, key: &str, value: i64, ttl_secs: u64) -> redis::RedisResult<bool> {
        let mut conn = self.conn.clone();
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX") // только если ключа нет
            .arg("EX") // TTL в секундах
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await?;
        Ok(result.is_some())
    }

    /// SET XX EX - продление TTL, только пока ключ ещё жив.
    pub async fn refresh(&self, key: &str, value: i64, ttl_secs: u64) -> redis::RedisResult<bool> {
        let mut conn = self.conn.clone();
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("XX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await?;
        Ok(result.is_some())
    }

    pub async fn get_i64(&self, key: &str) -> redis::RedisResult<Option<i64>> {
        let mut conn = self.conn.clone();
        conn.get(key).await
    }

    /// Пакетное удаление одним pipeline.
    pub async fn delete(&self, keys: &[String]) -> redis::RedisResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.del(key).ignore();
        }
        pipe.query_async::<()>(&mut conn).await
    }

    pub async fn keys(&self, pattern: &str) -> redis::RedisResult<Vec<String>> {
        let mut conn = self.conn.clone();
        redis::cmd("KEYS").arg(pattern).query_async(&mut conn).await
    }

    pub async fn mget_i64(&self, keys: &[String]) -> redis::RedisResult<Vec<Option<i64>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        conn.mget(keys).await
    }
}
