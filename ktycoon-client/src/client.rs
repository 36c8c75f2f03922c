//! Client facade: one of the two protocol handlers behind a single type.

use crate::config::ClientConfig;
use crate::cursor::Cursor;
use crate::error::{ClientError, ErrorState};
use crate::handler::{Concat, Db, Expire, ProtocolHandler};
use crate::binary::BinaryProtocolHandler;
use crate::http::HttpProtocolHandler;
use bytes::Bytes;
use ktycoon_protocol::ValueCodec;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

/// A Kyoto Tycoon client.
///
/// The transport is chosen once at construction; every call is forwarded to
/// the selected [`ProtocolHandler`].
pub struct KyotoTycoon<V> {
    handler: Box<dyn ProtocolHandler<V>>,
    binary: bool,
}

impl<V: 'static> KyotoTycoon<V> {
    /// Creates an unopened client.
    pub fn new(binary: bool, codec: ValueCodec<V>, exceptions: bool) -> Self {
        let handler: Box<dyn ProtocolHandler<V>> = if binary {
            Box::new(BinaryProtocolHandler::new(codec, exceptions))
        } else {
            Box::new(HttpProtocolHandler::new(codec, exceptions))
        };
        Self { handler, binary }
    }

    /// Creates a client from `config` and opens it.
    pub fn connect(config: &ClientConfig, codec: ValueCodec<V>) -> Result<Self, ClientError> {
        let mut client = Self::new(config.binary, codec, config.exceptions);
        client.open(
            &config.host,
            config.port,
            Duration::from_secs(config.timeout_secs),
        )?;
        Ok(client)
    }
}

impl<V> KyotoTycoon<V>
where
    V: Serialize + DeserializeOwned + 'static,
{
    /// Like [`KyotoTycoon::connect`], with the codec named by `config.codec`.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        let codec = ValueCodec::from_kind(config.codec)
            .map_err(|e| ClientError::Invalid(e.to_string()))?;
        Self::connect(config, codec)
    }
}

impl<V> KyotoTycoon<V> {
    pub fn is_binary(&self) -> bool {
        self.binary
    }

    pub fn handler(&self) -> &dyn ProtocolHandler<V> {
        self.handler.as_ref()
    }

    pub fn handler_mut(&mut self) -> &mut dyn ProtocolHandler<V> {
        self.handler.as_mut()
    }

    pub fn error(&self) -> &ErrorState {
        self.handler.error()
    }

    pub fn open(&mut self, host: &str, port: u16, timeout: Duration) -> Result<bool, ClientError> {
        self.handler.open(host, port, timeout)
    }

    pub fn close(&mut self) -> Result<bool, ClientError> {
        self.handler.close()
    }

    pub fn echo(&mut self) -> Result<bool, ClientError> {
        self.handler.echo()
    }

    pub fn report(&mut self) -> Result<HashMap<String, String>, ClientError> {
        self.handler.report()
    }

    pub fn status(&mut self, db: Option<Db>) -> Result<HashMap<String, String>, ClientError> {
        self.handler.status(db)
    }

    pub fn clear(&mut self, db: Option<Db>) -> Result<bool, ClientError> {
        self.handler.clear(db)
    }

    pub fn count(&mut self, db: Option<Db>) -> Result<Option<u64>, ClientError> {
        self.handler.count(db)
    }

    pub fn size(&mut self, db: Option<Db>) -> Result<Option<u64>, ClientError> {
        self.handler.size(db)
    }

    pub fn vacuum(&mut self, db: Option<Db>) -> Result<bool, ClientError> {
        self.handler.vacuum(db)
    }

    pub fn get(&mut self, key: &[u8], db: Option<Db>) -> Result<Option<V>, ClientError> {
        self.handler.get(key, db)
    }

    pub fn get_int(&mut self, key: &[u8], db: Option<Db>) -> Result<Option<i64>, ClientError> {
        self.handler.get_int(key, db)
    }

    pub fn set(
        &mut self,
        key: &[u8],
        value: &V,
        expire: Option<Expire>,
        db: Option<Db>,
    ) -> Result<bool, ClientError> {
        self.handler.set(key, value, expire, db)
    }

    pub fn add(
        &mut self,
        key: &[u8],
        value: &V,
        expire: Option<Expire>,
        db: Option<Db>,
    ) -> Result<bool, ClientError> {
        self.handler.add(key, value, expire, db)
    }

    pub fn replace(
        &mut self,
        key: &[u8],
        value: &V,
        expire: Option<Expire>,
        db: Option<Db>,
    ) -> Result<bool, ClientError> {
        self.handler.replace(key, value, expire, db)
    }

    pub fn remove(&mut self, key: &[u8], db: Option<Db>) -> Result<bool, ClientError> {
        self.handler.remove(key, db)
    }

    pub fn cas(
        &mut self,
        key: &[u8],
        old: Option<&V>,
        new: Option<&V>,
        expire: Option<Expire>,
        db: Option<Db>,
    ) -> Result<bool, ClientError> {
        self.handler.cas(key, old, new, expire, db)
    }

    pub fn append(
        &mut self,
        key: &[u8],
        value: &V,
        expire: Option<Expire>,
        db: Option<Db>,
    ) -> Result<bool, ClientError>
    where
        V: Concat,
    {
        self.handler.append(key, value, expire, db)
    }

    pub fn increment(
        &mut self,
        key: &[u8],
        delta: i64,
        expire: Option<Expire>,
        db: Option<Db>,
    ) -> Result<Option<i64>, ClientError> {
        self.handler.increment(key, delta, expire, db)
    }

    pub fn increment_double(
        &mut self,
        key: &[u8],
        delta: f64,
        expire: Option<Expire>,
        db: Option<Db>,
    ) -> Result<Option<f64>, ClientError> {
        self.handler.increment_double(key, delta, expire, db)
    }

    pub fn set_bulk(
        &mut self,
        records: &[(&[u8], V)],
        expire: Option<Expire>,
        atomic: bool,
        db: Option<Db>,
    ) -> Result<u64, ClientError> {
        self.handler.set_bulk(records, expire, atomic, db)
    }

    pub fn remove_bulk(
        &mut self,
        keys: &[&[u8]],
        atomic: bool,
        db: Option<Db>,
    ) -> Result<u64, ClientError> {
        self.handler.remove_bulk(keys, atomic, db)
    }

    pub fn get_bulk(
        &mut self,
        keys: &[&[u8]],
        atomic: bool,
        db: Option<Db>,
    ) -> Result<HashMap<Bytes, V>, ClientError> {
        self.handler.get_bulk(keys, atomic, db)
    }

    pub fn match_prefix(
        &mut self,
        prefix: &[u8],
        max: Option<usize>,
        db: Option<Db>,
    ) -> Result<Vec<Bytes>, ClientError> {
        self.handler.match_prefix(prefix, max, db)
    }

    pub fn match_regex(
        &mut self,
        regex: &str,
        max: Option<usize>,
        db: Option<Db>,
    ) -> Result<Vec<Bytes>, ClientError> {
        self.handler.match_regex(regex, max, db)
    }

    pub fn play_script(
        &mut self,
        name: &str,
        args: &[(&[u8], &[u8])],
    ) -> Result<Vec<(Bytes, Bytes)>, ClientError> {
        self.handler.play_script(name, args)
    }

    pub fn cursor(&mut self) -> Result<Cursor<'_, V>, ClientError> {
        self.handler.cursor()
    }
}
