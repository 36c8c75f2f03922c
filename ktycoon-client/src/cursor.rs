//! Server-side cursors over the HTTP RPC interface.

use crate::error::{ClientError, ErrorState};
use crate::handler::{Db, Expire};
use crate::http::{field, HttpProtocolHandler, HttpResponse};
use bytes::Bytes;
use ktycoon_protocol::tsv::TsvWriter;
use ktycoon_protocol::RpcMethod;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide cursor id source.
static NEXT_CURSOR_ID: AtomicU64 = AtomicU64::new(1);

/// A cursor bound to an HTTP handler.
///
/// Created unpositioned; `jump`/`jump_back` place it, `step`/`step_back`
/// move it. The server-side cursor is released by [`Cursor::delete`] or,
/// failing that, when the cursor is dropped.
pub struct Cursor<'a, V> {
    handler: &'a mut HttpProtocolHandler<V>,
    id: u64,
    err: ErrorState,
    deleted: bool,
}

impl<'a, V> Cursor<'a, V> {
    pub(crate) fn new(handler: &'a mut HttpProtocolHandler<V>) -> Self {
        let err = ErrorState::new(handler.exceptions_enabled());
        Self {
            handler,
            id: NEXT_CURSOR_ID.fetch_add(1, Ordering::SeqCst),
            err,
            deleted: false,
        }
    }

    /// Locally unique id of this cursor.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Outcome of the last cursor call.
    pub fn error(&self) -> &ErrorState {
        &self.err
    }

    fn body(&self) -> TsvWriter {
        let mut body = TsvWriter::new();
        body.field("CUR", self.id.to_string());
        body
    }

    fn call(
        &mut self,
        method: RpcMethod,
        db: Option<&Db>,
        body: TsvWriter,
    ) -> Result<HttpResponse, ClientError> {
        self.handler.rpc(method, db, body)?.expect_ok(method)
    }

    fn do_jump(
        &mut self,
        method: RpcMethod,
        key: Option<&[u8]>,
        db: Option<Db>,
    ) -> Result<bool, ClientError> {
        let mut body = self.body();
        if let Some(key) = key {
            body.field("key", key);
        }
        self.call(method, db.as_ref(), body).map(|_| true)
    }

    fn do_move(&mut self, method: RpcMethod, step: bool) -> Result<Vec<(Bytes, Bytes)>, ClientError> {
        let mut body = self.body();
        if step {
            body.field("step", "1");
        }
        self.call(method, None, body)?.fields()
    }

    fn decode_record(&self, fields: &[(Bytes, Bytes)]) -> Result<(Bytes, V), ClientError> {
        let key = required(fields, "key")?;
        let value = self.handler.codec().decode(required(fields, "value")?)?;
        Ok((key.clone(), value))
    }

    /// Positions the cursor on `key`, or on the first record, for a forward scan.
    pub fn jump(&mut self, key: Option<&[u8]>, db: Option<Db>) -> Result<bool, ClientError> {
        let result = self.do_jump(RpcMethod::CurJump, key, db);
        self.err.settle(result)
    }

    /// Positions the cursor on `key`, or on the last record, for a backward scan.
    pub fn jump_back(&mut self, key: Option<&[u8]>, db: Option<Db>) -> Result<bool, ClientError> {
        let result = self.do_jump(RpcMethod::CurJumpBack, key, db);
        self.err.settle(result)
    }

    pub fn step(&mut self) -> Result<bool, ClientError> {
        let result = self.do_move(RpcMethod::CurStep, false).map(|_| true);
        self.err.settle(result)
    }

    pub fn step_back(&mut self) -> Result<bool, ClientError> {
        let result = self.do_move(RpcMethod::CurStepBack, false).map(|_| true);
        self.err.settle(result)
    }

    /// Replaces the value of the current record.
    pub fn set_value(
        &mut self,
        value: &V,
        step: bool,
        expire: Option<Expire>,
    ) -> Result<bool, ClientError> {
        let result = self
            .handler
            .codec()
            .encode(value)
            .map_err(ClientError::from)
            .and_then(|encoded| {
                let mut body = self.body();
                body.field("value", encoded);
                if step {
                    body.field("step", "1");
                }
                if let Some(expire) = expire {
                    body.field("xt", expire.resolve().to_string());
                }
                self.call(RpcMethod::CurSetValue, None, body).map(|_| true)
            });
        self.err.settle(result)
    }

    /// Removes the current record.
    pub fn remove(&mut self) -> Result<bool, ClientError> {
        let result = self.do_move(RpcMethod::CurRemove, false).map(|_| true);
        self.err.settle(result)
    }

    pub fn get_key(&mut self, step: bool) -> Result<Option<Bytes>, ClientError> {
        let result = self
            .do_move(RpcMethod::CurGetKey, step)
            .and_then(|fields| Ok(Some(required(&fields, "key")?.clone())));
        self.err.settle(result)
    }

    pub fn get_value(&mut self, step: bool) -> Result<Option<V>, ClientError> {
        let result = self.do_move(RpcMethod::CurGetValue, step).and_then(|fields| {
            let raw = required(&fields, "value")?;
            Ok(Some(self.handler.codec().decode(raw)?))
        });
        self.err.settle(result)
    }

    /// Key and value of the current record; `None` once the cursor has run
    /// past the last record.
    pub fn get(&mut self, step: bool) -> Result<Option<(Bytes, V)>, ClientError> {
        let result = self
            .do_move(RpcMethod::CurGet, step)
            .and_then(|fields| self.decode_record(&fields).map(Some));
        self.err.settle(result)
    }

    /// Reads the current record and removes it in one call.
    pub fn seize(&mut self) -> Result<Option<(Bytes, V)>, ClientError> {
        let result = self
            .do_move(RpcMethod::CurSeize, false)
            .and_then(|fields| self.decode_record(&fields).map(Some));
        self.err.settle(result)
    }

    /// Releases the server-side cursor. Later calls, and the drop, do nothing.
    pub fn delete(&mut self) -> Result<bool, ClientError> {
        let result = self.release();
        self.err.settle(result)
    }

    fn release(&mut self) -> Result<bool, ClientError> {
        if self.deleted {
            return Ok(true);
        }
        self.deleted = true;

        match self.do_move(RpcMethod::CurDelete, false) {
            Ok(_) | Err(ClientError::NotFound) => Ok(true),
            Err(e) => Err(e),
        }
    }
}

impl<V> Drop for Cursor<'_, V> {
    fn drop(&mut self) {
        if self.deleted {
            return;
        }
        if let Err(e) = self.release() {
            tracing::warn!("Failed to delete cursor {}: {}", self.id, e);
        }
    }
}

fn required<'f>(fields: &'f [(Bytes, Bytes)], name: &str) -> Result<&'f Bytes, ClientError> {
    field(fields, name).ok_or_else(|| {
        ClientError::Protocol(ktycoon_protocol::ProtocolError::Malformed(format!(
            "cursor response without `{}`",
            name
        )))
    })
}
