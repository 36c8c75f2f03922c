//! Binary protocol handler.
//!
//! Only the bulk and script operations exist on the binary protocol; single
//! key `get`/`set`/`remove` are one-record bulk calls. Everything else fails
//! with [`ClientError::Unsupported`].

use crate::config::ConnectionConfig;
use crate::connection::Connection;
use crate::cursor::Cursor;
use crate::error::{ClientError, ErrorState};
use crate::handler::{decode_int, Concat, Db, Expire, ProtocolHandler};
use bytes::Bytes;
use ktycoon_protocol::frame::{
    encode_get_bulk, encode_play_script, encode_remove_bulk, encode_set_bulk,
};
use ktycoon_protocol::{BulkRecord, Magic, ValueCodec, DEFAULT_EXPIRE};
use std::collections::HashMap;
use std::time::Duration;

/// Protocol handler speaking the binary protocol over one TCP connection.
pub struct BinaryProtocolHandler<V> {
    codec: ValueCodec<V>,
    err: ErrorState,
    conn: Option<Connection>,
}

impl<V> BinaryProtocolHandler<V> {
    /// Creates a handler (not yet connected).
    pub fn new(codec: ValueCodec<V>, exceptions: bool) -> Self {
        Self {
            codec,
            err: ErrorState::new(exceptions),
            conn: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    fn conn(&mut self) -> Result<&mut Connection, ClientError> {
        self.conn.as_mut().ok_or(ClientError::NotConnected)
    }

    fn unsupported<T: Default>(&mut self, op: &'static str) -> Result<T, ClientError> {
        self.err.settle(Err(ClientError::Unsupported(op)))
    }

    fn do_set_bulk(
        &mut self,
        records: &[(&[u8], &V)],
        expire: Option<Expire>,
        db: Option<Db>,
    ) -> Result<u64, ClientError> {
        if records.is_empty() {
            return Err(ClientError::Logic("set_bulk called without records".to_string()));
        }

        let db = db_index(db)?;
        let expire = expire.map(|e| e.resolve()).unwrap_or(DEFAULT_EXPIRE);

        let mut frame_records = Vec::with_capacity(records.len());
        for (key, value) in records {
            let value = self.codec.encode(value)?;
            frame_records.push(
                BulkRecord::new(db, Bytes::copy_from_slice(key), value).with_expire(expire),
            );
        }

        let request = encode_set_bulk(&frame_records)?;
        let conn = self.conn()?;
        tracing::debug!(
            "set_bulk: {} records ({} bytes)",
            frame_records.len(),
            request.len()
        );
        conn.send(&request)?;

        let stored = conn.reader().read_count_response(Magic::SetBulk)?;
        Ok(u64::from(stored))
    }

    fn do_get_bulk(
        &mut self,
        keys: &[&[u8]],
        db: Option<Db>,
    ) -> Result<Vec<BulkRecord>, ClientError> {
        if keys.is_empty() {
            return Err(ClientError::Logic("get_bulk called without keys".to_string()));
        }

        let request = encode_get_bulk(db_index(db)?, keys)?;
        let conn = self.conn()?;
        tracing::debug!("get_bulk: {} keys", keys.len());
        conn.send(&request)?;

        let records = conn.reader().read_get_bulk_response()?;
        if records.is_empty() {
            return Err(ClientError::NotFound);
        }
        Ok(records)
    }

    fn do_remove_bulk(&mut self, keys: &[&[u8]], db: Option<Db>) -> Result<u64, ClientError> {
        if keys.is_empty() {
            return Err(ClientError::Logic("remove_bulk called without keys".to_string()));
        }

        let request = encode_remove_bulk(db_index(db)?, keys)?;
        let conn = self.conn()?;
        tracing::debug!("remove_bulk: {} keys", keys.len());
        conn.send(&request)?;

        let removed = conn.reader().read_count_response(Magic::RemoveBulk)?;
        if removed == 0 {
            return Err(ClientError::NotFound);
        }
        Ok(u64::from(removed))
    }

    /// Raw value of a single key.
    fn get_raw(&mut self, key: &[u8], db: Option<Db>) -> Result<Bytes, ClientError> {
        self.do_get_bulk(&[key], db)?
            .into_iter()
            .find(|r| r.key.as_ref() == key)
            .map(|r| r.value)
            .ok_or(ClientError::NotFound)
    }

    fn do_play_script(
        &mut self,
        name: &str,
        args: &[(&[u8], &[u8])],
    ) -> Result<Vec<(Bytes, Bytes)>, ClientError> {
        let request = encode_play_script(name, args)?;
        let conn = self.conn()?;
        tracing::debug!("play_script: {} with {} arguments", name, args.len());
        conn.send(&request)?;

        Ok(conn.reader().read_play_script_response()?)
    }
}

fn db_index(db: Option<Db>) -> Result<u16, ClientError> {
    db.map(|d| d.index()).transpose().map(|index| index.unwrap_or(0))
}

impl<V> ProtocolHandler<V> for BinaryProtocolHandler<V> {
    fn error(&self) -> &ErrorState {
        &self.err
    }

    fn open(&mut self, host: &str, port: u16, timeout: Duration) -> Result<bool, ClientError> {
        let config = ConnectionConfig::new(host, port).with_timeout(timeout);
        let result = Connection::connect(&config).map(|conn| {
            self.conn = Some(conn);
            true
        });
        self.err.settle(result)
    }

    fn close(&mut self) -> Result<bool, ClientError> {
        let result = match self.conn.take() {
            Some(conn) => {
                tracing::debug!("Closing connection to {}", conn.config().addr());
                conn.shutdown().map(|_| true)
            }
            None => Ok(true),
        };
        self.err.settle(result)
    }

    fn echo(&mut self) -> Result<bool, ClientError> {
        self.unsupported("echo")
    }

    fn report(&mut self) -> Result<HashMap<String, String>, ClientError> {
        self.unsupported("report")
    }

    fn status(&mut self, _db: Option<Db>) -> Result<HashMap<String, String>, ClientError> {
        self.unsupported("status")
    }

    fn clear(&mut self, _db: Option<Db>) -> Result<bool, ClientError> {
        self.unsupported("clear")
    }

    fn count(&mut self, _db: Option<Db>) -> Result<Option<u64>, ClientError> {
        self.unsupported("count")
    }

    fn size(&mut self, _db: Option<Db>) -> Result<Option<u64>, ClientError> {
        self.unsupported("size")
    }

    fn vacuum(&mut self, _db: Option<Db>) -> Result<bool, ClientError> {
        self.unsupported("vacuum")
    }

    fn get(&mut self, key: &[u8], db: Option<Db>) -> Result<Option<V>, ClientError> {
        let result = self
            .get_raw(key, db)
            .and_then(|raw| Ok(Some(self.codec.decode(&raw)?)));
        self.err.settle(result)
    }

    fn get_int(&mut self, key: &[u8], db: Option<Db>) -> Result<Option<i64>, ClientError> {
        let result = self
            .get_raw(key, db)
            .and_then(|raw| decode_int(&raw).map(Some));
        self.err.settle(result)
    }

    fn set(
        &mut self,
        key: &[u8],
        value: &V,
        expire: Option<Expire>,
        db: Option<Db>,
    ) -> Result<bool, ClientError> {
        let result = self
            .do_set_bulk(&[(key, value)], expire, db)
            .map(|stored| stored > 0);
        self.err.settle(result)
    }

    fn add(
        &mut self,
        _key: &[u8],
        _value: &V,
        _expire: Option<Expire>,
        _db: Option<Db>,
    ) -> Result<bool, ClientError> {
        self.unsupported("add")
    }

    fn replace(
        &mut self,
        _key: &[u8],
        _value: &V,
        _expire: Option<Expire>,
        _db: Option<Db>,
    ) -> Result<bool, ClientError> {
        self.unsupported("replace")
    }

    fn remove(&mut self, key: &[u8], db: Option<Db>) -> Result<bool, ClientError> {
        let result = self.do_remove_bulk(&[key], db).map(|removed| removed > 0);
        self.err.settle(result)
    }

    fn cas(
        &mut self,
        _key: &[u8],
        _old: Option<&V>,
        _new: Option<&V>,
        _expire: Option<Expire>,
        _db: Option<Db>,
    ) -> Result<bool, ClientError> {
        self.unsupported("cas")
    }

    fn append(
        &mut self,
        _key: &[u8],
        _value: &V,
        _expire: Option<Expire>,
        _db: Option<Db>,
    ) -> Result<bool, ClientError>
    where
        V: Concat,
    {
        self.unsupported("append")
    }

    fn increment(
        &mut self,
        _key: &[u8],
        _delta: i64,
        _expire: Option<Expire>,
        _db: Option<Db>,
    ) -> Result<Option<i64>, ClientError> {
        self.unsupported("increment")
    }

    fn increment_double(
        &mut self,
        _key: &[u8],
        _delta: f64,
        _expire: Option<Expire>,
        _db: Option<Db>,
    ) -> Result<Option<f64>, ClientError> {
        self.unsupported("increment_double")
    }

    fn set_bulk(
        &mut self,
        records: &[(&[u8], V)],
        expire: Option<Expire>,
        _atomic: bool,
        db: Option<Db>,
    ) -> Result<u64, ClientError> {
        let records: Vec<(&[u8], &V)> = records.iter().map(|(k, v)| (*k, v)).collect();
        let result = self.do_set_bulk(&records, expire, db);
        self.err.settle(result)
    }

    fn remove_bulk(
        &mut self,
        keys: &[&[u8]],
        _atomic: bool,
        db: Option<Db>,
    ) -> Result<u64, ClientError> {
        let result = self.do_remove_bulk(keys, db);
        self.err.settle(result)
    }

    fn get_bulk(
        &mut self,
        keys: &[&[u8]],
        _atomic: bool,
        db: Option<Db>,
    ) -> Result<HashMap<Bytes, V>, ClientError> {
        let result = self.do_get_bulk(keys, db).and_then(|records| {
            let mut values = HashMap::with_capacity(records.len());
            for record in records {
                values.insert(record.key, self.codec.decode(&record.value)?);
            }
            Ok(values)
        });
        self.err.settle(result)
    }

    fn match_prefix(
        &mut self,
        _prefix: &[u8],
        _max: Option<usize>,
        _db: Option<Db>,
    ) -> Result<Vec<Bytes>, ClientError> {
        self.unsupported("match_prefix")
    }

    fn match_regex(
        &mut self,
        _regex: &str,
        _max: Option<usize>,
        _db: Option<Db>,
    ) -> Result<Vec<Bytes>, ClientError> {
        self.unsupported("match_regex")
    }

    fn play_script(
        &mut self,
        name: &str,
        args: &[(&[u8], &[u8])],
    ) -> Result<Vec<(Bytes, Bytes)>, ClientError> {
        let result = self.do_play_script(name, args);
        self.err.settle(result)
    }

    fn cursor(&mut self) -> Result<Cursor<'_, V>, ClientError> {
        let err = ClientError::Unsupported("cursor");
        self.err.set_error(err.code(), Some(err.to_string()));
        Err(err)
    }
}
