//! # Command Wrappers
//!
//! Purpose: Typed convenience methods over `Client::invoke`.
//!
//! Each wrapper only reshapes arguments on the way in and the reply on the
//! way out; ordering, retries and timeouts are the session's business.
//!
//! | Wrapper            | Arguments in                      | Reply out                    |
//! |--------------------|-----------------------------------|------------------------------|
//! | `set_with`         | EX / PX / NX\|XX appended if set   | `bool`                       |
//! | `mset`, `msetnx`   | pairs interleaved                 | `bool`                       |
//! | `hmset`            | field/value pairs interleaved     | `bool`                       |
//! | `hmget`            | field list                        | `(field, Option<value>)` list|
//! | `hgetall`          | key                               | field → value map            |
//! | `sort`             | options flattened, `sort` first   | `Value`                      |
//! | `select`, `auth`   | db / credential                   | `bool`, remembered on success|
//! | `*scan`            | (none)                            | `NotImplemented`             |

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;

use crate::client::Client;
use crate::command::IntoArg;
use crate::config::Credential;
use crate::error::{ClientError, ClientResult};
use crate::value::Value;

/// TTL state returned by the server, mirroring Redis semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientTtl {
    /// Key is missing or already expired.
    Missing,
    /// Key exists without expiration.
    NoExpiry,
    /// Key expires after the provided duration.
    ExpiresIn(Duration),
}

/// Write condition for SET.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetCondition {
    /// Only set when the key does not exist.
    Nx,
    /// Only set when the key already exists.
    Xx,
}

/// Optional flags appended to SET.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Expiry in seconds (`EX`).
    pub ex: Option<u64>,
    /// Expiry in milliseconds (`PX`).
    pub px: Option<u64>,
    pub condition: Option<SetCondition>,
}

/// Ordered SORT options.
///
/// Entries are flattened in insertion order as `NAME value...`, except the
/// `sort` entry whose values go right after the key without a name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortOptions {
    entries: Vec<(String, Vec<Bytes>)>,
}

impl SortOptions {
    pub fn new() -> Self {
        SortOptions::default()
    }

    /// Adds a raw option entry.
    pub fn option<I, A>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
    {
        self.entries.push((
            name.to_string(),
            values.into_iter().map(IntoArg::into_arg).collect(),
        ));
        self
    }

    /// Ordering flags placed directly after the key, e.g. `DESC` or `ALPHA`.
    pub fn order<I, A>(self, flags: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
    {
        self.option("sort", flags)
    }

    pub fn by(self, pattern: &str) -> Self {
        self.option("BY", [pattern])
    }

    pub fn limit(self, offset: i64, count: i64) -> Self {
        self.option("LIMIT", [offset, count])
    }

    pub fn get(self, pattern: &str) -> Self {
        self.option("GET", [pattern])
    }

    pub fn store(self, destination: &str) -> Self {
        self.option("STORE", [destination])
    }
}

impl Client {
    pub async fn get(&self, key: impl IntoArg) -> ClientResult<Option<Bytes>> {
        self.invoke("GET", [key.into_arg()]).await?.into_bytes()
    }

    /// Sets a value without expiration.
    pub async fn set(&self, key: impl IntoArg, value: impl IntoArg) -> ClientResult<bool> {
        self.set_with(key, value, SetOptions::default()).await
    }

    /// SET with optional EX / PX / NX|XX flags.
    ///
    /// Returns false when a condition prevented the write.
    pub async fn set_with(
        &self,
        key: impl IntoArg,
        value: impl IntoArg,
        options: SetOptions,
    ) -> ClientResult<bool> {
        let args = set_args(key.into_arg(), value.into_arg(), options);
        self.invoke("SET", args).await?.into_bool()
    }

    pub async fn setex(
        &self,
        key: impl IntoArg,
        seconds: u64,
        value: impl IntoArg,
    ) -> ClientResult<bool> {
        self.invoke("SETEX", [key.into_arg(), seconds.into_arg(), value.into_arg()])
            .await?
            .into_bool()
    }

    pub async fn setnx(&self, key: impl IntoArg, value: impl IntoArg) -> ClientResult<bool> {
        self.invoke("SETNX", [key.into_arg(), value.into_arg()])
            .await?
            .into_bool()
    }

    /// Deletes keys; returns how many existed.
    pub async fn del<I, A>(&self, keys: I) -> ClientResult<i64>
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
    {
        self.invoke("DEL", keys).await?.into_int()
    }

    pub async fn exists<I, A>(&self, keys: I) -> ClientResult<i64>
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
    {
        self.invoke("EXISTS", keys).await?.into_int()
    }

    /// Sets a time-to-live on a key. Returns true when the TTL was set.
    pub async fn expire(&self, key: impl IntoArg, ttl: Duration) -> ClientResult<bool> {
        self.invoke("EXPIRE", [key.into_arg(), ttl.as_secs().into_arg()])
            .await?
            .into_bool()
    }

    /// Returns TTL status for a key.
    pub async fn ttl(&self, key: impl IntoArg) -> ClientResult<ClientTtl> {
        match self.invoke("TTL", [key.into_arg()]).await?.into_int()? {
            -2 => Ok(ClientTtl::Missing),
            -1 => Ok(ClientTtl::NoExpiry),
            value if value >= 0 => Ok(ClientTtl::ExpiresIn(Duration::from_secs(value as u64))),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub async fn incr(&self, key: impl IntoArg) -> ClientResult<i64> {
        self.invoke("INCR", [key.into_arg()]).await?.into_int()
    }

    pub async fn incr_by(&self, key: impl IntoArg, delta: i64) -> ClientResult<i64> {
        self.invoke("INCRBY", [key.into_arg(), delta.into_arg()])
            .await?
            .into_int()
    }

    pub async fn decr(&self, key: impl IntoArg) -> ClientResult<i64> {
        self.invoke("DECR", [key.into_arg()]).await?.into_int()
    }

    pub async fn append(&self, key: impl IntoArg, value: impl IntoArg) -> ClientResult<i64> {
        self.invoke("APPEND", [key.into_arg(), value.into_arg()])
            .await?
            .into_int()
    }

    pub async fn strlen(&self, key: impl IntoArg) -> ClientResult<i64> {
        self.invoke("STRLEN", [key.into_arg()]).await?.into_int()
    }

    pub async fn mget<I, A>(&self, keys: I) -> ClientResult<Vec<Option<Bytes>>>
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
    {
        self.invoke("MGET", keys)
            .await?
            .into_array()?
            .into_iter()
            .map(Value::into_bytes)
            .collect()
    }

    /// Sets every key/value pair atomically.
    pub async fn mset<I, K, V>(&self, pairs: I) -> ClientResult<bool>
    where
        I: IntoIterator<Item = (K, V)>,
        K: IntoArg,
        V: IntoArg,
    {
        self.invoke("MSET", interleave(pairs)).await?.into_bool()
    }

    /// Sets the pairs only if none of the keys exist.
    pub async fn msetnx<I, K, V>(&self, pairs: I) -> ClientResult<bool>
    where
        I: IntoIterator<Item = (K, V)>,
        K: IntoArg,
        V: IntoArg,
    {
        self.invoke("MSETNX", interleave(pairs)).await?.into_bool()
    }

    pub async fn hset(
        &self,
        key: impl IntoArg,
        field: impl IntoArg,
        value: impl IntoArg,
    ) -> ClientResult<i64> {
        self.invoke("HSET", [key.into_arg(), field.into_arg(), value.into_arg()])
            .await?
            .into_int()
    }

    pub async fn hget(&self, key: impl IntoArg, field: impl IntoArg) -> ClientResult<Option<Bytes>> {
        self.invoke("HGET", [key.into_arg(), field.into_arg()])
            .await?
            .into_bytes()
    }

    pub async fn hdel<I, A>(&self, key: impl IntoArg, fields: I) -> ClientResult<i64>
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
    {
        let mut args = vec![key.into_arg()];
        args.extend(fields.into_iter().map(IntoArg::into_arg));
        self.invoke("HDEL", args).await?.into_int()
    }

    pub async fn hmset<I, K, V>(&self, key: impl IntoArg, pairs: I) -> ClientResult<bool>
    where
        I: IntoIterator<Item = (K, V)>,
        K: IntoArg,
        V: IntoArg,
    {
        let mut args = vec![key.into_arg()];
        args.extend(interleave(pairs));
        self.invoke("HMSET", args).await?.into_bool()
    }

    /// Fetches fields; each result is paired with the field it answers.
    pub async fn hmget<I, A>(
        &self,
        key: impl IntoArg,
        fields: I,
    ) -> ClientResult<Vec<(Bytes, Option<Bytes>)>>
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
    {
        let fields: Vec<Bytes> = fields.into_iter().map(IntoArg::into_arg).collect();
        let mut args = vec![key.into_arg()];
        args.extend(fields.iter().cloned());

        let keyed = self
            .invoke_with("HMGET", args, Box::new(move |value| zip_fields(fields, value)))
            .await?;
        keyed
            .into_map()?
            .into_iter()
            .map(|(field, value)| Ok((field, value.into_bytes()?)))
            .collect()
    }

    /// Fetches a whole hash as a field → value map.
    pub async fn hgetall(&self, key: impl IntoArg) -> ClientResult<HashMap<Bytes, Bytes>> {
        let keyed = self
            .invoke_with("HGETALL", vec![key.into_arg()], Box::new(pair_up))
            .await?;
        keyed
            .into_map()?
            .into_iter()
            .map(|(field, value)| match value.into_bytes()? {
                Some(data) => Ok((field, data)),
                None => Err(ClientError::UnexpectedResponse),
            })
            .collect()
    }

    pub async fn lpush<I, A>(&self, key: impl IntoArg, values: I) -> ClientResult<i64>
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
    {
        let mut args = vec![key.into_arg()];
        args.extend(values.into_iter().map(IntoArg::into_arg));
        self.invoke("LPUSH", args).await?.into_int()
    }

    pub async fn rpush<I, A>(&self, key: impl IntoArg, values: I) -> ClientResult<i64>
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
    {
        let mut args = vec![key.into_arg()];
        args.extend(values.into_iter().map(IntoArg::into_arg));
        self.invoke("RPUSH", args).await?.into_int()
    }

    pub async fn lpop(&self, key: impl IntoArg) -> ClientResult<Option<Bytes>> {
        self.invoke("LPOP", [key.into_arg()]).await?.into_bytes()
    }

    pub async fn rpop(&self, key: impl IntoArg) -> ClientResult<Option<Bytes>> {
        self.invoke("RPOP", [key.into_arg()]).await?.into_bytes()
    }

    pub async fn lrange(&self, key: impl IntoArg, start: i64, stop: i64) -> ClientResult<Vec<Bytes>> {
        let items = self
            .invoke("LRANGE", [key.into_arg(), start.into_arg(), stop.into_arg()])
            .await?
            .into_array()?;
        collect_bytes(items)
    }

    pub async fn llen(&self, key: impl IntoArg) -> ClientResult<i64> {
        self.invoke("LLEN", [key.into_arg()]).await?.into_int()
    }

    /// Blocking left pop; `None` when the server-side timeout expires.
    ///
    /// While it heads the queue it is exempt from the client wait timeout.
    pub async fn blpop<I, A>(&self, keys: I, timeout_secs: u64) -> ClientResult<Option<(Bytes, Bytes)>>
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
    {
        self.blocking_pop("BLPOP", keys, timeout_secs).await
    }

    /// Blocking right pop; see `blpop`.
    pub async fn brpop<I, A>(&self, keys: I, timeout_secs: u64) -> ClientResult<Option<(Bytes, Bytes)>>
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
    {
        self.blocking_pop("BRPOP", keys, timeout_secs).await
    }

    async fn blocking_pop<I, A>(
        &self,
        name: &str,
        keys: I,
        timeout_secs: u64,
    ) -> ClientResult<Option<(Bytes, Bytes)>>
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
    {
        let mut args: Vec<Bytes> = keys.into_iter().map(IntoArg::into_arg).collect();
        args.push(timeout_secs.into_arg());
        let value = self.invoke(name, args).await?;
        if value.is_nil() {
            return Ok(None);
        }
        let mut items = collect_bytes(value.into_array()?)?.into_iter();
        match (items.next(), items.next(), items.next()) {
            (Some(list), Some(element), None) => Ok(Some((list, element))),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub async fn sadd<I, A>(&self, key: impl IntoArg, members: I) -> ClientResult<i64>
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
    {
        let mut args = vec![key.into_arg()];
        args.extend(members.into_iter().map(IntoArg::into_arg));
        self.invoke("SADD", args).await?.into_int()
    }

    pub async fn smembers(&self, key: impl IntoArg) -> ClientResult<Vec<Bytes>> {
        collect_bytes(self.invoke("SMEMBERS", [key.into_arg()]).await?.into_array()?)
    }

    /// SORT with flattened options; the reply is a list, or a count with STORE.
    pub async fn sort(&self, key: impl IntoArg, options: SortOptions) -> ClientResult<Value> {
        self.invoke("SORT", sort_args(key.into_arg(), options)).await
    }

    /// Publishes a message; returns the number of receivers.
    pub async fn publish(&self, channel: impl IntoArg, message: impl IntoArg) -> ClientResult<i64> {
        self.invoke("PUBLISH", [channel.into_arg(), message.into_arg()])
            .await?
            .into_int()
    }

    /// Pings the server. Returns the raw response payload.
    pub async fn ping(&self, payload: Option<&[u8]>) -> ClientResult<Bytes> {
        let args: Vec<Bytes> = payload.map(Bytes::copy_from_slice).into_iter().collect();
        self.invoke("PING", args)
            .await?
            .into_bytes()?
            .ok_or(ClientError::UnexpectedResponse)
    }

    /// Fetches server INFO output.
    pub async fn info(&self) -> ClientResult<Bytes> {
        self.invoke("INFO", Vec::<Bytes>::new())
            .await?
            .into_bytes()?
            .ok_or(ClientError::UnexpectedResponse)
    }

    /// Selects a database and re-selects it after every reconnect.
    pub async fn select(&self, db: u32) -> ClientResult<bool> {
        let selected = self.invoke("SELECT", [db.into_arg()]).await?.into_bool()?;
        if selected {
            self.remember_db(db)?;
        }
        Ok(selected)
    }

    /// Authenticates and re-authenticates after every reconnect.
    pub async fn auth(&self, credential: Credential) -> ClientResult<bool> {
        let accepted = self
            .invoke("AUTH", credential.to_args())
            .await?
            .into_bool()?;
        if accepted {
            self.remember_auth(credential)?;
        }
        Ok(accepted)
    }

    /// Sends a raw argument frame, name first.
    pub async fn command(&self, mut args: Vec<Bytes>) -> ClientResult<Value> {
        if args.is_empty() {
            return Err(ClientError::EmptyCommand);
        }
        let name = String::from_utf8_lossy(&args.remove(0)).into_owned();
        self.invoke(&name, args).await
    }

    pub async fn scan(&self) -> ClientResult<Value> {
        Err(ClientError::NotImplemented("SCAN"))
    }

    pub async fn hscan(&self) -> ClientResult<Value> {
        Err(ClientError::NotImplemented("HSCAN"))
    }

    pub async fn sscan(&self) -> ClientResult<Value> {
        Err(ClientError::NotImplemented("SSCAN"))
    }

    pub async fn zscan(&self) -> ClientResult<Value> {
        Err(ClientError::NotImplemented("ZSCAN"))
    }
}

fn set_args(key: Bytes, value: Bytes, options: SetOptions) -> Vec<Bytes> {
    let mut args = vec![key, value];
    if let Some(seconds) = options.ex {
        args.push(Bytes::from_static(b"EX"));
        args.push(seconds.into_arg());
    }
    if let Some(millis) = options.px {
        args.push(Bytes::from_static(b"PX"));
        args.push(millis.into_arg());
    }
    match options.condition {
        Some(SetCondition::Nx) => args.push(Bytes::from_static(b"NX")),
        Some(SetCondition::Xx) => args.push(Bytes::from_static(b"XX")),
        None => {}
    }
    args
}

fn sort_args(key: Bytes, options: SortOptions) -> Vec<Bytes> {
    let mut entries = options.entries;
    let mut args = vec![key];
    if let Some(idx) = entries
        .iter()
        .position(|(name, _)| name.eq_ignore_ascii_case("sort"))
    {
        let (_, flags) = entries.remove(idx);
        args.extend(flags);
    }
    for (name, values) in entries {
        args.push(Bytes::from(name));
        args.extend(values);
    }
    args
}

fn interleave<I, K, V>(pairs: I) -> Vec<Bytes>
where
    I: IntoIterator<Item = (K, V)>,
    K: IntoArg,
    V: IntoArg,
{
    let mut args = Vec::new();
    for (key, value) in pairs {
        args.push(key.into_arg());
        args.push(value.into_arg());
    }
    args
}

// HMGET: values come back in request order.
fn zip_fields(fields: Vec<Bytes>, value: Value) -> Value {
    match value {
        Value::Array(values) if values.len() == fields.len() => {
            Value::Map(fields.into_iter().zip(values).collect())
        }
        other => other,
    }
}

// HGETALL: flat [field, value, field, value, ...].
fn pair_up(value: Value) -> Value {
    let items = match value {
        Value::Array(items) if items.len() % 2 == 0 => items,
        other => return other,
    };
    let mut pairs = Vec::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
        match field.into_bytes() {
            Ok(Some(field)) => pairs.push((field, value)),
            _ => return Value::Error("non-string hash field".into()),
        }
    }
    Value::Map(pairs)
}

fn collect_bytes(items: Vec<Value>) -> ClientResult<Vec<Bytes>> {
    items
        .into_iter()
        .map(|item| item.into_bytes()?.ok_or(ClientError::UnexpectedResponse))
        .collect()
}
