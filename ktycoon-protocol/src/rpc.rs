//! HTTP RPC method names and REST write modes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Header selecting the write mode of a REST `PUT`.
pub const MODE_HEADER: &str = "X-Kt-Mode";

/// Header carrying the absolute expiration (epoch seconds) of a REST `PUT`.
pub const EXPIRE_HEADER: &str = "X-Kt-Xt";

/// Status returned by cursor calls when no record is under the cursor.
pub const STATUS_NO_RECORD: u16 = 450;

/// RPC endpoints, served under `/rpc/<name>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcMethod {
    Echo,
    Report,
    Status,
    Clear,
    Vacuum,
    SetBulk,
    GetBulk,
    RemoveBulk,
    Cas,
    Increment,
    IncrementDouble,
    MatchPrefix,
    MatchRegex,
    PlayScript,
    CurJump,
    CurJumpBack,
    CurStep,
    CurStepBack,
    CurSetValue,
    CurRemove,
    CurGetKey,
    CurGetValue,
    CurGet,
    CurSeize,
    CurDelete,
}

impl RpcMethod {
    pub fn name(&self) -> &'static str {
        match self {
            RpcMethod::Echo => "echo",
            RpcMethod::Report => "report",
            RpcMethod::Status => "status",
            RpcMethod::Clear => "clear",
            RpcMethod::Vacuum => "vacuum",
            RpcMethod::SetBulk => "set_bulk",
            RpcMethod::GetBulk => "get_bulk",
            RpcMethod::RemoveBulk => "remove_bulk",
            RpcMethod::Cas => "cas",
            RpcMethod::Increment => "increment",
            RpcMethod::IncrementDouble => "increment_double",
            RpcMethod::MatchPrefix => "match_prefix",
            RpcMethod::MatchRegex => "match_regex",
            RpcMethod::PlayScript => "play_script",
            RpcMethod::CurJump => "cur_jump",
            RpcMethod::CurJumpBack => "cur_jump_back",
            RpcMethod::CurStep => "cur_step",
            RpcMethod::CurStepBack => "cur_step_back",
            RpcMethod::CurSetValue => "cur_set_value",
            RpcMethod::CurRemove => "cur_remove",
            RpcMethod::CurGetKey => "cur_get_key",
            RpcMethod::CurGetValue => "cur_get_value",
            RpcMethod::CurGet => "cur_get",
            RpcMethod::CurSeize => "cur_seize",
            RpcMethod::CurDelete => "cur_delete",
        }
    }

    /// Request path of this method.
    pub fn path(&self) -> String {
        format!("/rpc/{}", self.name())
    }

    /// Whether the method operates on a cursor.
    pub fn is_cursor(&self) -> bool {
        self.name().starts_with("cur_")
    }
}

impl fmt::Display for RpcMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Write mode of a REST `PUT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RestMode {
    /// Store unconditionally.
    Set,
    /// Store only if the key is absent.
    Add,
    /// Store only if the key exists.
    Replace,
}

impl RestMode {
    /// Value of the [`MODE_HEADER`] header.
    pub fn header_value(&self) -> &'static str {
        match self {
            RestMode::Set => "set",
            RestMode::Add => "add",
            RestMode::Replace => "replace",
        }
    }
}
