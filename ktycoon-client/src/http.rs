//! HTTP protocol handler.
//!
//! Single-key reads and writes use the REST interface (`GET`/`PUT`/`DELETE`
//! on the quoted key); everything else is a `POST` to `/rpc/<method>` with a
//! tab-separated body.

use crate::config::ConnectionConfig;
use crate::cursor::Cursor;
use crate::error::{ClientError, ErrorState};
use crate::handler::{decode_int, Concat, Db, Expire, ProtocolHandler};
use bytes::Bytes;
use ktycoon_protocol::rpc::{EXPIRE_HEADER, MODE_HEADER, STATUS_NO_RECORD};
use ktycoon_protocol::tsv::{self, quote, strip_record_prefix, TsvWriter, RPC_CONTENT_TYPE};
use ktycoon_protocol::{ColumnEncoding, ProtocolError, RestMode, RpcMethod, ValueCodec};
use reqwest::blocking::Client;
use reqwest::header::{CONNECTION, CONTENT_TYPE};
use reqwest::Method;
use std::collections::HashMap;
use std::time::Duration;

/// A decoded HTTP response.
pub(crate) struct HttpResponse {
    pub(crate) status: u16,
    encoding: ColumnEncoding,
    body: Bytes,
}

impl HttpResponse {
    /// TSV fields of the body, in order.
    pub(crate) fn fields(&self) -> Result<Vec<(Bytes, Bytes)>, ClientError> {
        Ok(tsv::decode(&self.body, self.encoding)?)
    }

    /// Fails unless the RPC answered 200. Cursor methods report a missing
    /// record as 404 or 450.
    pub(crate) fn expect_ok(self, method: RpcMethod) -> Result<Self, ClientError> {
        match self.status {
            200 => Ok(self),
            404 | STATUS_NO_RECORD if method.is_cursor() => Err(ClientError::NotFound),
            status => Err(ClientError::UnexpectedStatus {
                op: method.to_string(),
                status,
            }),
        }
    }
}

/// Looks up a field by name.
pub(crate) fn field<'f>(fields: &'f [(Bytes, Bytes)], name: &str) -> Option<&'f Bytes> {
    fields
        .iter()
        .find(|(key, _)| key.as_ref() == name.as_bytes())
        .map(|(_, value)| value)
}

/// Looks up a required field and parses it.
pub(crate) fn parse_field<T: std::str::FromStr>(
    fields: &[(Bytes, Bytes)],
    name: &str,
) -> Result<T, ClientError> {
    let raw = field(fields, name).ok_or_else(|| malformed(format!("missing `{}` field", name)))?;
    std::str::from_utf8(raw)
        .ok()
        .and_then(|text| text.trim().parse().ok())
        .ok_or_else(|| malformed(format!("unparsable `{}` field", name)))
}

fn malformed(message: String) -> ClientError {
    ClientError::Protocol(ProtocolError::Malformed(message))
}

fn string_map(fields: Vec<(Bytes, Bytes)>) -> HashMap<String, String> {
    fields
        .into_iter()
        .map(|(key, value)| {
            (
                String::from_utf8_lossy(&key).into_owned(),
                String::from_utf8_lossy(&value).into_owned(),
            )
        })
        .collect()
}

/// Keys of a `match_*` response; `num == 0` means nothing matched.
fn matched_keys(fields: Vec<(Bytes, Bytes)>) -> Result<Vec<Bytes>, ClientError> {
    let num: u64 = parse_field(&fields, "num")?;
    if num == 0 {
        return Err(ClientError::NotFound);
    }

    Ok(fields
        .iter()
        .filter_map(|(key, _)| strip_record_prefix(key).map(Bytes::copy_from_slice))
        .collect())
}

struct HttpConnection {
    config: ConnectionConfig,
    client: Client,
}

impl HttpConnection {
    fn open(config: ConnectionConfig) -> Result<Self, ClientError> {
        let mut builder = Client::builder();
        if !config.timeout.is_zero() {
            builder = builder
                .timeout(config.timeout)
                .connect_timeout(config.timeout);
        }
        let client = builder.build()?;
        tracing::debug!("HTTP client ready for {}", config.base_url());
        Ok(Self { config, client })
    }
}

/// Protocol handler speaking HTTP/1.1 to the server's REST and RPC interfaces.
pub struct HttpProtocolHandler<V> {
    codec: ValueCodec<V>,
    err: ErrorState,
    conn: Option<HttpConnection>,
    reopens: u64,
}

impl<V> HttpProtocolHandler<V> {
    /// Creates a handler (not yet connected).
    pub fn new(codec: ValueCodec<V>, exceptions: bool) -> Self {
        Self {
            codec,
            err: ErrorState::new(exceptions),
            conn: None,
            reopens: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    pub(crate) fn codec(&self) -> &ValueCodec<V> {
        &self.codec
    }

    pub(crate) fn exceptions_enabled(&self) -> bool {
        self.err.exceptions_enabled()
    }

    /// Connections rebuilt after the server asked to close.
    pub fn reopen_count(&self) -> u64 {
        self.reopens
    }

    /// Sends one request. A response announcing `Connection: close` makes the
    /// handler start over with a fresh connection to the same server.
    fn execute(
        &mut self,
        method: Method,
        target: &str,
        headers: &[(&'static str, String)],
        body: Option<Vec<u8>>,
    ) -> Result<HttpResponse, ClientError> {
        let conn = self.conn.as_ref().ok_or(ClientError::NotConnected)?;
        let url = format!("{}{}", conn.config.base_url(), target);
        tracing::debug!("{} {}", method, target);

        let mut request = conn.client.request(method, url.as_str());
        for (name, value) in headers {
            request = request.header(*name, value.as_str());
        }
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request.send()?;
        let status = response.status().as_u16();
        let encoding = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ColumnEncoding::from_content_type)
            .unwrap_or(ColumnEncoding::Raw);
        let will_close = response
            .headers()
            .get(CONNECTION)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("close"))
            .unwrap_or(false);
        let body = response.bytes()?;

        if will_close {
            let config = conn.config.clone();
            tracing::debug!("Server closed the connection, reopening {}", config.addr());
            self.conn = Some(HttpConnection::open(config)?);
            self.reopens += 1;
        }

        Ok(HttpResponse {
            status,
            encoding,
            body,
        })
    }

    /// Calls an RPC method.
    pub(crate) fn rpc(
        &mut self,
        method: RpcMethod,
        db: Option<&Db>,
        body: TsvWriter,
    ) -> Result<HttpResponse, ClientError> {
        let mut target = method.path();
        if let Some(db) = db.and_then(|d| d.http_param()) {
            target.push_str("?DB=");
            target.push_str(&db);
        }
        self.rpc_target(&target, body)
    }

    fn rpc_target(&mut self, target: &str, body: TsvWriter) -> Result<HttpResponse, ClientError> {
        let headers = [("Content-Type", RPC_CONTENT_TYPE.to_string())];
        let body = if body.is_empty() {
            None
        } else {
            Some(body.finish().into_bytes())
        };
        self.execute(Method::POST, target, &headers, body)
    }

    fn rest_path(key: &[u8], db: Option<&Db>) -> String {
        match db.and_then(|d| d.http_param()) {
            Some(db) => format!("/{}/{}", db, quote(key)),
            None => format!("/{}", quote(key)),
        }
    }

    fn rest_get(&mut self, key: &[u8], db: Option<Db>) -> Result<Bytes, ClientError> {
        let path = Self::rest_path(key, db.as_ref());
        let response = self.execute(Method::GET, &path, &[], None)?;
        match response.status {
            200 => Ok(response.body),
            404 => Err(ClientError::NotFound),
            status => Err(ClientError::UnexpectedStatus {
                op: "get".to_string(),
                status,
            }),
        }
    }

    fn rest_put(
        &mut self,
        mode: RestMode,
        key: &[u8],
        value: &V,
        expire: Option<Expire>,
        db: Option<Db>,
    ) -> Result<bool, ClientError> {
        let encoded = self.codec.encode(value)?;
        let path = Self::rest_path(key, db.as_ref());

        let mut headers = vec![(MODE_HEADER, mode.header_value().to_string())];
        if let Some(expire) = expire {
            headers.push((EXPIRE_HEADER, expire.resolve().to_string()));
        }

        let response = self.execute(Method::PUT, &path, &headers, Some(encoded))?;
        match (response.status, mode) {
            (201, _) => Ok(true),
            (_, RestMode::Replace) => Err(ClientError::NotFound),
            (status, mode) => Err(ClientError::UnexpectedStatus {
                op: mode.header_value().to_string(),
                status,
            }),
        }
    }

    fn rest_delete(&mut self, key: &[u8], db: Option<Db>) -> Result<bool, ClientError> {
        let path = Self::rest_path(key, db.as_ref());
        let response = self.execute(Method::DELETE, &path, &[], None)?;
        match response.status {
            204 => Ok(true),
            _ => Err(ClientError::NotFound),
        }
    }

    fn simple_rpc(&mut self, method: RpcMethod, db: Option<Db>) -> Result<bool, ClientError> {
        self.rpc(method, db.as_ref(), TsvWriter::new())?
            .expect_ok(method)
            .map(|_| true)
    }

    fn do_status(&mut self, db: Option<Db>) -> Result<Vec<(Bytes, Bytes)>, ClientError> {
        self.rpc(RpcMethod::Status, db.as_ref(), TsvWriter::new())?
            .expect_ok(RpcMethod::Status)?
            .fields()
    }

    fn do_cas(
        &mut self,
        key: &[u8],
        old: Option<&V>,
        new: Option<&V>,
        expire: Option<Expire>,
        db: Option<Db>,
    ) -> Result<bool, ClientError> {
        if old.is_none() && new.is_none() {
            return Err(ClientError::Logic(
                "cas needs an old value, a new value or both".to_string(),
            ));
        }

        let mut body = TsvWriter::new();
        body.field("key", key);
        if let Some(old) = old {
            body.field("oval", self.codec.encode(old)?);
        }
        if let Some(new) = new {
            body.field("nval", self.codec.encode(new)?);
        }
        if let Some(expire) = expire {
            body.field("xt", expire.resolve().to_string());
        }

        self.rpc(RpcMethod::Cas, db.as_ref(), body)?
            .expect_ok(RpcMethod::Cas)
            .map(|_| true)
    }

    fn do_increment(
        &mut self,
        method: RpcMethod,
        key: &[u8],
        num: String,
        expire: Option<Expire>,
        db: Option<Db>,
    ) -> Result<Vec<(Bytes, Bytes)>, ClientError> {
        let mut body = TsvWriter::new();
        body.field("key", key).field("num", num);
        if let Some(expire) = expire {
            body.field("xt", expire.resolve().to_string());
        }

        self.rpc(method, db.as_ref(), body)?
            .expect_ok(method)?
            .fields()
    }

    fn do_set_bulk(
        &mut self,
        records: &[(&[u8], V)],
        expire: Option<Expire>,
        atomic: bool,
        db: Option<Db>,
    ) -> Result<u64, ClientError> {
        if records.is_empty() {
            return Err(ClientError::Logic("set_bulk called without records".to_string()));
        }

        let mut body = TsvWriter::new();
        for (key, value) in records {
            body.record(key, self.codec.encode(value)?);
        }
        if let Some(expire) = expire {
            body.field("xt", expire.resolve().to_string());
        }
        if atomic {
            body.field("atomic", "");
        }

        let fields = self
            .rpc(RpcMethod::SetBulk, db.as_ref(), body)?
            .expect_ok(RpcMethod::SetBulk)?
            .fields()?;
        parse_field(&fields, "num")
    }

    fn key_list_body(keys: &[&[u8]], atomic: bool) -> TsvWriter {
        let mut body = TsvWriter::new();
        for key in keys {
            body.record(key, "");
        }
        if atomic {
            body.field("atomic", "");
        }
        body
    }

    fn do_remove_bulk(
        &mut self,
        keys: &[&[u8]],
        atomic: bool,
        db: Option<Db>,
    ) -> Result<u64, ClientError> {
        if keys.is_empty() {
            return Err(ClientError::Logic("remove_bulk called without keys".to_string()));
        }

        let fields = self
            .rpc(RpcMethod::RemoveBulk, db.as_ref(), Self::key_list_body(keys, atomic))?
            .expect_ok(RpcMethod::RemoveBulk)?
            .fields()?;
        let removed: u64 = parse_field(&fields, "num")?;
        if removed == 0 {
            return Err(ClientError::NotFound);
        }
        Ok(removed)
    }

    fn do_get_bulk(
        &mut self,
        keys: &[&[u8]],
        atomic: bool,
        db: Option<Db>,
    ) -> Result<HashMap<Bytes, V>, ClientError> {
        if keys.is_empty() {
            return Err(ClientError::Logic("get_bulk called without keys".to_string()));
        }

        let fields = self
            .rpc(RpcMethod::GetBulk, db.as_ref(), Self::key_list_body(keys, atomic))?
            .expect_ok(RpcMethod::GetBulk)?
            .fields()?;
        let num: u64 = parse_field(&fields, "num")?;
        if num == 0 {
            return Err(ClientError::NotFound);
        }

        let mut values = HashMap::with_capacity(num as usize);
        for (key, value) in &fields {
            if let Some(key) = strip_record_prefix(key) {
                values.insert(Bytes::copy_from_slice(key), self.codec.decode(value)?);
            }
        }
        Ok(values)
    }

    fn do_match(
        &mut self,
        method: RpcMethod,
        pattern_field: &str,
        pattern: &[u8],
        max: Option<usize>,
        db: Option<Db>,
    ) -> Result<Vec<Bytes>, ClientError> {
        let mut body = TsvWriter::new();
        body.field(pattern_field, pattern);
        if let Some(max) = max {
            body.field("max", max.to_string());
        }

        let fields = self
            .rpc(method, db.as_ref(), body)?
            .expect_ok(method)?
            .fields()?;
        matched_keys(fields)
    }

    fn do_play_script(
        &mut self,
        name: &str,
        args: &[(&[u8], &[u8])],
    ) -> Result<Vec<(Bytes, Bytes)>, ClientError> {
        let mut body = TsvWriter::new();
        for (key, value) in args {
            body.record(key, value);
        }

        let target = format!("{}?name={}", RpcMethod::PlayScript.path(), quote(name.as_bytes()));
        let response = self.rpc_target(&target, body)?;
        if response.status != 200 {
            return Err(ClientError::Logic(format!(
                "script `{}` failed with HTTP status {}",
                name, response.status
            )));
        }

        Ok(response
            .fields()?
            .into_iter()
            .filter_map(|(key, value)| {
                strip_record_prefix(&key).map(|k| (Bytes::copy_from_slice(k), value))
            })
            .collect())
    }

    fn do_append(
        &mut self,
        key: &[u8],
        value: &V,
        expire: Option<Expire>,
        db: Option<Db>,
    ) -> Result<bool, ClientError>
    where
        V: Concat,
    {
        let current = match self.rest_get(key, db.clone()) {
            Ok(raw) => self.codec.decode(&raw)?,
            Err(ClientError::NotFound) => V::default(),
            Err(e) => return Err(e),
        };
        let joined = current.concat(value);
        self.rest_put(RestMode::Set, key, &joined, expire, db)
    }
}

impl<V> ProtocolHandler<V> for HttpProtocolHandler<V> {
    fn error(&self) -> &ErrorState {
        &self.err
    }

    fn open(&mut self, host: &str, port: u16, timeout: Duration) -> Result<bool, ClientError> {
        let config = ConnectionConfig::new(host, port).with_timeout(timeout);
        let result = HttpConnection::open(config).map(|conn| {
            self.conn = Some(conn);
            true
        });
        self.err.settle(result)
    }

    fn close(&mut self) -> Result<bool, ClientError> {
        if let Some(conn) = self.conn.take() {
            tracing::debug!("Closing HTTP client for {}", conn.config.base_url());
        }
        self.err.settle(Ok(true))
    }

    fn echo(&mut self) -> Result<bool, ClientError> {
        let result = self.simple_rpc(RpcMethod::Echo, None);
        self.err.settle(result)
    }

    fn report(&mut self) -> Result<HashMap<String, String>, ClientError> {
        let result = self
            .rpc(RpcMethod::Report, None, TsvWriter::new())
            .and_then(|r| r.expect_ok(RpcMethod::Report))
            .and_then(|r| r.fields())
            .map(string_map);
        self.err.settle(result)
    }

    fn status(&mut self, db: Option<Db>) -> Result<HashMap<String, String>, ClientError> {
        let result = self.do_status(db).map(string_map);
        self.err.settle(result)
    }

    fn clear(&mut self, db: Option<Db>) -> Result<bool, ClientError> {
        let result = self.simple_rpc(RpcMethod::Clear, db);
        self.err.settle(result)
    }

    fn count(&mut self, db: Option<Db>) -> Result<Option<u64>, ClientError> {
        let result = self
            .do_status(db)
            .and_then(|fields| parse_field(&fields, "count").map(Some));
        self.err.settle(result)
    }

    fn size(&mut self, db: Option<Db>) -> Result<Option<u64>, ClientError> {
        let result = self
            .do_status(db)
            .and_then(|fields| parse_field(&fields, "size").map(Some));
        self.err.settle(result)
    }

    fn vacuum(&mut self, db: Option<Db>) -> Result<bool, ClientError> {
        let result = self.simple_rpc(RpcMethod::Vacuum, db);
        self.err.settle(result)
    }

    fn get(&mut self, key: &[u8], db: Option<Db>) -> Result<Option<V>, ClientError> {
        let result = self
            .rest_get(key, db)
            .and_then(|raw| Ok(Some(self.codec.decode(&raw)?)));
        self.err.settle(result)
    }

    fn get_int(&mut self, key: &[u8], db: Option<Db>) -> Result<Option<i64>, ClientError> {
        let result = self
            .rest_get(key, db)
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
        let result = self.rest_put(RestMode::Set, key, value, expire, db);
        self.err.settle(result)
    }

    fn add(
        &mut self,
        key: &[u8],
        value: &V,
        expire: Option<Expire>,
        db: Option<Db>,
    ) -> Result<bool, ClientError> {
        let result = self.rest_put(RestMode::Add, key, value, expire, db);
        self.err.settle(result)
    }

    fn replace(
        &mut self,
        key: &[u8],
        value: &V,
        expire: Option<Expire>,
        db: Option<Db>,
    ) -> Result<bool, ClientError> {
        let result = self.rest_put(RestMode::Replace, key, value, expire, db);
        self.err.settle(result)
    }

    fn remove(&mut self, key: &[u8], db: Option<Db>) -> Result<bool, ClientError> {
        let result = self.rest_delete(key, db);
        self.err.settle(result)
    }

    fn cas(
        &mut self,
        key: &[u8],
        old: Option<&V>,
        new: Option<&V>,
        expire: Option<Expire>,
        db: Option<Db>,
    ) -> Result<bool, ClientError> {
        let result = self.do_cas(key, old, new, expire, db);
        self.err.settle(result)
    }

    fn append(
        &mut self,
        key: &[u8],
        value: &V,
        expire: Option<Expire>,
        db: Option<Db>,
    ) -> Result<bool, ClientError>
    where
        V: Concat,
    {
        let result = self.do_append(key, value, expire, db);
        self.err.settle(result)
    }

    fn increment(
        &mut self,
        key: &[u8],
        delta: i64,
        expire: Option<Expire>,
        db: Option<Db>,
    ) -> Result<Option<i64>, ClientError> {
        let result = self
            .do_increment(RpcMethod::Increment, key, delta.to_string(), expire, db)
            .and_then(|fields| parse_field(&fields, "num").map(Some));
        self.err.settle(result)
    }

    fn increment_double(
        &mut self,
        key: &[u8],
        delta: f64,
        expire: Option<Expire>,
        db: Option<Db>,
    ) -> Result<Option<f64>, ClientError> {
        let result = self
            .do_increment(
                RpcMethod::IncrementDouble,
                key,
                format!("{:.6}", delta),
                expire,
                db,
            )
            .and_then(|fields| parse_field(&fields, "num").map(Some));
        self.err.settle(result)
    }

    fn set_bulk(
        &mut self,
        records: &[(&[u8], V)],
        expire: Option<Expire>,
        atomic: bool,
        db: Option<Db>,
    ) -> Result<u64, ClientError> {
        let result = self.do_set_bulk(records, expire, atomic, db);
        self.err.settle(result)
    }

    fn remove_bulk(
        &mut self,
        keys: &[&[u8]],
        atomic: bool,
        db: Option<Db>,
    ) -> Result<u64, ClientError> {
        let result = self.do_remove_bulk(keys, atomic, db);
        self.err.settle(result)
    }

    fn get_bulk(
        &mut self,
        keys: &[&[u8]],
        atomic: bool,
        db: Option<Db>,
    ) -> Result<HashMap<Bytes, V>, ClientError> {
        let result = self.do_get_bulk(keys, atomic, db);
        self.err.settle(result)
    }

    fn match_prefix(
        &mut self,
        prefix: &[u8],
        max: Option<usize>,
        db: Option<Db>,
    ) -> Result<Vec<Bytes>, ClientError> {
        let result = self.do_match(RpcMethod::MatchPrefix, "prefix", prefix, max, db);
        self.err.settle(result)
    }

    fn match_regex(
        &mut self,
        regex: &str,
        max: Option<usize>,
        db: Option<Db>,
    ) -> Result<Vec<Bytes>, ClientError> {
        let result = self.do_match(RpcMethod::MatchRegex, "regex", regex.as_bytes(), max, db);
        self.err.settle(result)
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
        self.err.set_success();
        Ok(Cursor::new(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ktycoon_protocol::ErrorCode;
    use crate::test_support::open_http;
    use mockito::{Matcher, Server, ServerGuard};

    const TSV_U: &str = "text/tab-separated-values; colenc=U";

    fn string_handler(server: &ServerGuard) -> HttpProtocolHandler<String> {
        open_http(server, ValueCodec::string())
    }

    #[test]
    fn test_rest_get() {
        let mut server = Server::new();
        let hit = server
            .mock("GET", "/a%20key")
            .with_status(200)
            .with_body("value")
            .create();
        let miss = server.mock("GET", "/missing").with_status(404).create();

        let mut handler = string_handler(&server);
        assert_eq!(
            handler.get(b"a key", None).unwrap(),
            Some("value".to_string())
        );
        assert_eq!(handler.error().code(), ErrorCode::Success);

        assert_eq!(handler.get(b"missing", None).unwrap(), None);
        assert_eq!(handler.error().code(), ErrorCode::NotFound);

        hit.assert();
        miss.assert();
    }

    #[test]
    fn test_rest_get_with_db() {
        let mut server = Server::new();
        let by_index = server.mock("GET", "/2/k").with_status(200).with_body("x").create();
        let by_name = server
            .mock("GET", "/users%2Fold/k")
            .with_status(200)
            .with_body("y")
            .create();
        let default_db = server.mock("GET", "/k").with_status(200).with_body("z").create();

        let mut handler = string_handler(&server);
        assert_eq!(handler.get(b"k", Some(Db::Index(2))).unwrap().unwrap(), "x");
        assert_eq!(
            handler.get(b"k", Some(Db::from("users/old"))).unwrap().unwrap(),
            "y"
        );
        assert_eq!(handler.get(b"k", Some(Db::Index(0))).unwrap().unwrap(), "z");

        by_index.assert();
        by_name.assert();
        default_db.assert();
    }

    #[test]
    fn test_rest_put_modes() {
        let mut server = Server::new();
        let set = server
            .mock("PUT", "/k")
            .match_header("x-kt-mode", "set")
            .match_header("x-kt-xt", "1000")
            .match_body("v")
            .with_status(201)
            .create();
        let add = server
            .mock("PUT", "/k")
            .match_header("x-kt-mode", "add")
            .with_status(450)
            .create();
        let replace = server
            .mock("PUT", "/k")
            .match_header("x-kt-mode", "replace")
            .with_status(450)
            .create();

        let mut handler = string_handler(&server);
        let value = "v".to_string();
        assert!(handler
            .set(b"k", &value, Some(Expire::At(1000)), None)
            .unwrap());

        let err = handler.add(b"k", &value, None, None).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Miscellaneous);

        assert!(!handler.replace(b"k", &value, None, None).unwrap());
        assert_eq!(handler.error().code(), ErrorCode::NotFound);

        set.assert();
        add.assert();
        replace.assert();
    }

    #[test]
    fn test_rest_remove() {
        let mut server = Server::new();
        server.mock("DELETE", "/present").with_status(204).create();
        server.mock("DELETE", "/absent").with_status(404).create();

        let mut handler = string_handler(&server);
        assert!(handler.remove(b"present", None).unwrap());
        assert_eq!(handler.error().code(), ErrorCode::Success);
        assert!(!handler.remove(b"absent", None).unwrap());
        assert_eq!(handler.error().code(), ErrorCode::NotFound);
    }

    #[test]
    fn test_get_int() {
        let mut server = Server::new();
        server
            .mock("GET", "/n")
            .with_status(200)
            .with_body(300i64.to_be_bytes())
            .create();
        server.mock("GET", "/s").with_status(200).with_body("300").create();

        let mut handler = string_handler(&server);
        assert_eq!(handler.get_int(b"n", None).unwrap(), Some(300));
        let err = handler.get_int(b"s", None).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Invalid);
    }

    #[test]
    fn test_set_bulk_body() {
        let mut server = Server::new();
        let mock = server
            .mock("POST", "/rpc/set_bulk")
            .match_header("content-type", TSV_U)
            .match_query(Matcher::UrlEncoded("DB".into(), "1".into()))
            .match_body("_a\t1\n_b%09\t2%0A\natomic\t")
            .with_status(200)
            .with_header("content-type", TSV_U)
            .with_body("num\t2\n")
            .create();

        let mut handler = string_handler(&server);
        let records: Vec<(&[u8], String)> = vec![
            (b"a".as_slice(), "1".to_string()),
            (b"b\t".as_slice(), "2\n".to_string()),
        ];
        assert_eq!(
            handler
                .set_bulk(&records, None, true, Some(Db::Index(1)))
                .unwrap(),
            2
        );
        mock.assert();
    }

    #[test]
    fn test_get_bulk() {
        let mut server = Server::new();
        server
            .mock("POST", "/rpc/get_bulk")
            .match_body("_a\t\n_b\t\n_c\t")
            .with_status(200)
            .with_header("content-type", TSV_U)
            .with_body("_a\t1\n_b\tx%20y\nnum\t2\n")
            .create();

        let mut handler = string_handler(&server);
        let values = handler
            .get_bulk(&[b"a".as_slice(), b"b".as_slice(), b"c".as_slice()], false, None)
            .unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[&Bytes::from_static(b"a")], "1");
        assert_eq!(values[&Bytes::from_static(b"b")], "x y");
        assert_eq!(handler.error().code(), ErrorCode::Success);
    }

    #[test]
    fn test_get_bulk_none_found() {
        let mut server = Server::new();
        server
            .mock("POST", "/rpc/get_bulk")
            .with_status(200)
            .with_header("content-type", TSV_U)
            .with_body("num\t0\n")
            .create();

        let mut handler = string_handler(&server);
        let values = handler.get_bulk(&[b"a".as_slice()], false, None).unwrap();
        assert!(values.is_empty());
        assert_eq!(handler.error().code(), ErrorCode::NotFound);
    }

    #[test]
    fn test_get_bulk_missing_num_is_internal() {
        let mut server = Server::new();
        server
            .mock("POST", "/rpc/get_bulk")
            .with_status(200)
            .with_body("_a\t1\n")
            .create();

        let mut handler = string_handler(&server);
        let err = handler.get_bulk(&[b"a".as_slice()], false, None).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Internal);
    }

    #[test]
    fn test_base64_columns() {
        let mut server = Server::new();
        server
            .mock("POST", "/rpc/get_bulk")
            .with_status(200)
            .with_header("content-type", "text/tab-separated-values; colenc=B")
            .with_body("X2s=\tdg==\nbnVt\tMQ==\n")
            .create();

        let mut handler = string_handler(&server);
        let values = handler.get_bulk(&[b"k".as_slice()], false, None).unwrap();
        assert_eq!(values[&Bytes::from_static(b"k")], "v");
    }

    #[test]
    fn test_empty_key_list_is_logic_error() {
        // never opened: nothing may be sent
        let mut handler: HttpProtocolHandler<String> =
            HttpProtocolHandler::new(ValueCodec::string(), true);
        let err = handler.get_bulk(&[], true, None).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Logic);
        assert!(matches!(err, ClientError::Logic(_)));
    }

    #[test]
    fn test_remove_bulk() {
        let mut server = Server::new();
        server
            .mock("POST", "/rpc/remove_bulk")
            .match_body("_a\t\natomic\t")
            .with_status(200)
            .with_body("num\t1\n")
            .create();
        server
            .mock("POST", "/rpc/remove_bulk")
            .match_body("_z\t\natomic\t")
            .with_status(200)
            .with_body("num\t0\n")
            .create();

        let mut handler = string_handler(&server);
        assert_eq!(handler.remove_bulk(&[b"a".as_slice()], true, None).unwrap(), 1);
        assert_eq!(handler.remove_bulk(&[b"z".as_slice()], true, None).unwrap(), 0);
        assert_eq!(handler.error().code(), ErrorCode::NotFound);
    }

    #[test]
    fn test_increment() {
        let mut server = Server::new();
        server
            .mock("POST", "/rpc/increment")
            .match_body("key\tcounter\nnum\t100")
            .with_status(200)
            .with_body("num\t100\n")
            .create();
        server
            .mock("POST", "/rpc/increment")
            .match_body("key\tcounter\nnum\t200")
            .with_status(200)
            .with_body("num\t300\n")
            .create();

        let mut handler = string_handler(&server);
        assert_eq!(handler.increment(b"counter", 100, None, None).unwrap(), Some(100));
        assert_eq!(handler.increment(b"counter", 200, None, None).unwrap(), Some(300));
    }

    #[test]
    fn test_increment_double() {
        let mut server = Server::new();
        server
            .mock("POST", "/rpc/increment_double")
            .match_body("key\tf\nnum\t1.500000\nxt\t2000")
            .with_status(200)
            .with_body("num\t3.000000\n")
            .create();

        let mut handler = string_handler(&server);
        assert_eq!(
            handler
                .increment_double(b"f", 1.5, Some(Expire::At(2000)), None)
                .unwrap(),
            Some(3.0)
        );
    }

    #[test]
    fn test_cas() {
        let mut server = Server::new();
        server
            .mock("POST", "/rpc/cas")
            .match_body("key\tk\noval\told\nnval\tnew")
            .with_status(200)
            .create();
        server
            .mock("POST", "/rpc/cas")
            .match_body("key\tk\noval\tstale")
            .with_status(450)
            .create();

        let mut handler = string_handler(&server);
        let (old, new, stale) = ("old".to_string(), "new".to_string(), "stale".to_string());
        assert!(handler.cas(b"k", Some(&old), Some(&new), None, None).unwrap());

        let err = handler.cas(b"k", Some(&stale), None, None, None).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Miscellaneous);

        let err = handler.cas(b"k", None, None, None, None).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Logic);
    }

    #[test]
    fn test_append_read_modify_write() {
        let mut server = Server::new();
        server.mock("GET", "/k").with_status(200).with_body("ab").create();
        let put = server
            .mock("PUT", "/k")
            .match_header("x-kt-mode", "set")
            .match_body("abcd")
            .with_status(201)
            .create();
        server.mock("GET", "/fresh").with_status(404).create();
        let put_fresh = server
            .mock("PUT", "/fresh")
            .match_body("cd")
            .with_status(201)
            .create();

        let mut handler = string_handler(&server);
        let suffix = "cd".to_string();
        assert!(handler.append(b"k", &suffix, None, None).unwrap());
        assert!(handler.append(b"fresh", &suffix, None, None).unwrap());
        put.assert();
        put_fresh.assert();
    }

    #[test]
    fn test_match_prefix() {
        let mut server = Server::new();
        server
            .mock("POST", "/rpc/match_prefix")
            .match_body("prefix\tuser%3A\nmax\t10")
            .with_status(200)
            .with_header("content-type", TSV_U)
            .with_body("_user%3A1\t0\n_user%3A2\t1\nnum\t2\n")
            .create();
        server
            .mock("POST", "/rpc/match_regex")
            .match_body("regex\t%5Ezzz")
            .with_status(200)
            .with_body("num\t0\n")
            .create();

        let mut handler = string_handler(&server);
        let keys = handler.match_prefix(b"user:", Some(10), None).unwrap();
        assert_eq!(
            keys,
            vec![Bytes::from_static(b"user:1"), Bytes::from_static(b"user:2")]
        );

        assert!(handler.match_regex("^zzz", None, None).unwrap().is_empty());
        assert_eq!(handler.error().code(), ErrorCode::NotFound);
    }

    #[test]
    fn test_status_count_size() {
        let mut server = Server::new();
        server
            .mock("POST", "/rpc/status")
            .with_status(200)
            .with_body("count\t42\nsize\t8192\npath\t*\n")
            .expect(3)
            .create();

        let mut handler = string_handler(&server);
        let status = handler.status(None).unwrap();
        assert_eq!(status["path"], "*");
        assert_eq!(handler.count(None).unwrap(), Some(42));
        assert_eq!(handler.size(None).unwrap(), Some(8192));
    }

    #[test]
    fn test_echo_report_clear_vacuum() {
        let mut server = Server::new();
        server.mock("POST", "/rpc/echo").with_status(200).create();
        server
            .mock("POST", "/rpc/report")
            .with_status(200)
            .with_body("conf_kt_version\t0.9.56\n")
            .create();
        server
            .mock("POST", "/rpc/clear")
            .match_query(Matcher::UrlEncoded("DB".into(), "3".into()))
            .with_status(200)
            .create();
        server.mock("POST", "/rpc/vacuum").with_status(500).create();

        let mut handler = string_handler(&server);
        assert!(handler.echo().unwrap());
        assert_eq!(handler.report().unwrap()["conf_kt_version"], "0.9.56");
        assert!(handler.clear(Some(Db::Index(3))).unwrap());

        let err = handler.vacuum(None).unwrap_err();
        assert!(matches!(
            err,
            ClientError::UnexpectedStatus { status: 500, .. }
        ));
        assert_eq!(handler.error().code(), ErrorCode::Miscellaneous);
    }

    #[test]
    fn test_play_script() {
        let mut server = Server::new();
        server
            .mock("POST", "/rpc/play_script")
            .match_query(Matcher::UrlEncoded("name".into(), "echo".into()))
            .match_body("_k\t%FF")
            .with_status(200)
            .with_header("content-type", TSV_U)
            .with_body("_k\t%FF\n")
            .create();
        server
            .mock("POST", "/rpc/play_script")
            .match_query(Matcher::UrlEncoded("name".into(), "broken".into()))
            .with_status(500)
            .create();

        let mut handler = string_handler(&server);
        let result = handler
            .play_script("echo", &[(b"k".as_slice(), b"\xff".as_slice())])
            .unwrap();
        assert_eq!(
            result,
            vec![(Bytes::from_static(b"k"), Bytes::from_static(b"\xff"))]
        );

        let err = handler.play_script("broken", &[]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Logic);
    }

    #[test]
    fn test_reopen_after_connection_close() {
        let mut server = Server::new();
        let echo = server
            .mock("POST", "/rpc/echo")
            .with_status(200)
            .with_header("connection", "close")
            .expect(1)
            .create();
        let report = server
            .mock("POST", "/rpc/report")
            .with_status(200)
            .with_body("version\t0.9\n")
            .expect(1)
            .create();

        let mut handler = string_handler(&server);
        assert_eq!(handler.reopen_count(), 0);

        assert!(handler.echo().unwrap());
        assert_eq!(handler.reopen_count(), 1);
        assert!(handler.is_open());

        // the rebuilt connection serves the next call; no further reopen
        let fields = handler.report().unwrap();
        assert_eq!(fields.get("version").map(String::as_str), Some("0.9"));
        assert_eq!(handler.reopen_count(), 1);

        echo.assert();
        report.assert();
    }

    #[test]
    fn test_not_connected() {
        let mut handler: HttpProtocolHandler<String> =
            HttpProtocolHandler::new(ValueCodec::string(), false);
        assert_eq!(handler.get(b"k", None).unwrap(), None);
        assert_eq!(handler.error().code(), ErrorCode::Logic);
        assert!(handler.close().unwrap());
    }

    #[test]
    fn test_json_codec_values() {
        let mut server = Server::new();
        server
            .mock("PUT", "/doc")
            .match_body(r#"{"n":1}"#)
            .with_status(201)
            .create();

        let mut handler = open_http(&server, ValueCodec::<serde_json::Value>::json());
        let value = serde_json::json!({"n": 1});
        assert!(handler.set(b"doc", &value, None, None).unwrap());
    }
}
